pub mod agent_loop;
pub mod generator;
pub mod types;

pub use agent_loop::AgentLoop;
pub use generator::{AnyGenerator, Generation, Generator, LlmGenerator, ScriptedGenerator};
pub use types::{load_samples, save_samples, Prompt, Sample, SampleStatus, Task, TrainMetadata};
