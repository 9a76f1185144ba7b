//! Model-facing building blocks shared by the rollout loop and the judge.
//!
//! - [`api`] -- conversation turns and the OpenAI-compatible [`LlmClient`].
//! - [`format`] -- the Qwen3 raw-text format for assistant turns.
//! - [`prompt`] -- the step header and the pairwise judge prompts.

pub mod api;
pub mod format;
pub mod prompt;

pub use api::{
    ChatMessage, ChatResponse, Choice, FunctionCall, LlmClient, RequestOptions, Role,
    SamplingParams, ToolCall, Usage,
};
pub use format::{normalize_assistant, parse_assistant_content, render_assistant_content};
