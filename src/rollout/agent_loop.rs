//! The step-bounded agent rollout loop.
//!
//! [`AgentLoop::run`] drives one task through at most `max_steps` tool-use
//! rounds:
//!   1. rewrite the system header with the round counter,
//!   2. open a step snapshot,
//!   3. generate one assistant turn and parse it,
//!   4. stop if no tools were requested, otherwise run them concurrently and
//!      append their results in call order.
//!
//! A model that is still asking for tools when the budget runs out gets one
//! forced final-answer step whose header forbids tools. The result is always
//! exactly `max_steps + 1` samples, left-padded when the agent stopped early.

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::config::RolloutConfig;
use crate::model::api::{ChatMessage, Role, SamplingParams};
use crate::model::format::{normalize_assistant, parse_assistant_content};
use crate::model::prompt::build_system_message;
use crate::rollout::generator::Generator;
use crate::rollout::types::{Sample, Task, TrainMetadata};
use crate::tools::{ToolRegistry, ToolSchema};

/// Runs tasks through the bounded tool-use loop.
#[derive(Debug, Clone)]
pub struct AgentLoop {
    max_steps: usize,
    params: SamplingParams,
}

impl AgentLoop {
    pub fn new(max_steps: usize, params: SamplingParams) -> Self {
        Self { max_steps, params }
    }

    pub fn from_config(config: &RolloutConfig) -> Self {
        Self::new(config.max_steps, config.sampling_params())
    }

    pub fn max_steps(&self) -> usize {
        self.max_steps
    }

    /// Roll out `task` and return `max_steps + 1` samples.
    ///
    /// Generation and tool failures abort the rollout.
    pub async fn run<G: Generator>(
        &self,
        task: &Task,
        generator: &G,
        tools: &ToolRegistry,
    ) -> Result<Vec<Sample>> {
        let max_steps = self.max_steps;
        let catalog = tools.catalog();

        let mut conversation = task.prompt.to_messages();
        if conversation.first().map(|m| m.role) != Some(Role::System) {
            conversation.insert(0, build_system_message(0, max_steps));
        }

        let mut samples = Vec::with_capacity(max_steps + 1);
        let mut answered = false;

        for step_idx in 0..max_steps {
            conversation[0] = build_system_message(step_idx, max_steps);
            let mut sample = Sample::open(
                task,
                &conversation,
                Some(TrainMetadata {
                    tools: catalog.clone(),
                }),
            );

            let turn = self
                .generate_turn(generator, &conversation, &catalog, &mut sample)
                .await
                .with_context(|| format!("generation failed at step {step_idx}"))?;
            let calls = turn.requested_tools().to_vec();
            conversation.push(turn);

            if calls.is_empty() {
                debug!(step = step_idx, "agent answered without tools");
                sample.finalize(&conversation);
                samples.push(sample);
                answered = true;
                break;
            }

            debug!(step = step_idx, tool_calls = calls.len(), "executing tool calls");
            let results = tools
                .call_all(&calls)
                .await
                .with_context(|| format!("tool execution failed at step {step_idx}"))?;
            conversation.extend(results);
            sample.finalize(&conversation);
            samples.push(sample);
        }

        if !answered {
            conversation[0] = build_system_message(max_steps, max_steps);
            let mut sample = Sample::open(task, &conversation, None);

            // No catalog is advertised once the budget is spent.
            let mut turn = self
                .generate_turn(generator, &conversation, &[], &mut sample)
                .await
                .context("generation failed at the forced final step")?;
            // Tools are never run past the budget.
            if let Some(ignored) = turn.tool_calls.take() {
                warn!(
                    ignored = ignored.len(),
                    "final answer still requested tools; dropping them"
                );
                if let Some(parsed) = sample.response_message.as_mut() {
                    parsed.tool_calls = None;
                }
            }
            conversation.push(turn);
            sample.finalize(&conversation);
            samples.push(sample);
        }

        if let Some(last) = samples.last_mut() {
            for message in last.messages.iter_mut() {
                if message.role == Role::Assistant {
                    *message = normalize_assistant(message);
                }
            }
        }

        let produced = samples.len();
        let pad_token_id = generator.pad_token_id();
        let samples = pad_front(samples, max_steps + 1, task.group_index, pad_token_id);

        info!(
            group_index = task.group_index,
            index = task.index,
            steps = produced,
            forced_final = !answered,
            padding = samples.len() - produced,
            "rollout finished"
        );
        Ok(samples)
    }

    /// Generate one assistant turn, record it on `sample`, and return it
    /// parsed into structured form.
    async fn generate_turn<G: Generator>(
        &self,
        generator: &G,
        conversation: &[ChatMessage],
        catalog: &[ToolSchema],
        sample: &mut Sample,
    ) -> Result<ChatMessage> {
        let generation = generator
            .generate(conversation, catalog, &self.params)
            .await?;
        let raw = generation
            .text
            .strip_suffix(generator.eos_token())
            .unwrap_or(&generation.text)
            .to_string();

        // The raw turn is parsed in place before it joins the conversation,
        // so later tool results can reference the parsed call ids.
        let turn = parse_assistant_content(&raw);
        sample.response = raw;
        sample.rollout_log_probs = generation.log_probs;
        sample.response_message = Some(turn.clone());
        Ok(turn)
    }
}

/// Left-pad `samples` with placeholders up to `len`.
fn pad_front(
    samples: Vec<Sample>,
    len: usize,
    group_index: usize,
    pad_token_id: u32,
) -> Vec<Sample> {
    if samples.len() >= len {
        return samples;
    }
    let missing = len - samples.len();
    let mut padded: Vec<Sample> = (0..missing)
        .map(|_| Sample::padding(group_index, pad_token_id))
        .collect();
    padded.extend(samples);
    padded
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::model::prompt::ANSWER_DIRECTLY;
    use crate::rollout::generator::{Generation, ScriptedGenerator, QWEN_PAD_TOKEN_ID};
    use crate::rollout::types::{Prompt, SampleStatus};
    use crate::tools::canned::{travel_registry, CannedTool};
    use crate::tools::Tool;

    const POI_CALL: &str = concat!(
        "<tool_call>\n",
        r#"{"name": "poi_search", "arguments": {"city": "Hangzhou", "keywords": "sights"}}"#,
        "\n</tool_call><|im_end|>",
    );
    const ANSWER: &str = "Day 1: West Lake. Day 2: Lingyin Temple.<|im_end|>";

    fn agent(max_steps: usize) -> AgentLoop {
        AgentLoop::new(max_steps, SamplingParams::default())
    }

    fn counted_poi_tool() -> Arc<CannedTool> {
        let schema = travel_registry()
            .catalog()
            .into_iter()
            .find(|s| s.name == "poi_search")
            .unwrap();
        Arc::new(CannedTool::new(schema, "sights in {city}"))
    }

    fn real_samples(samples: &[Sample]) -> Vec<&Sample> {
        samples.iter().filter(|s| !s.is_padding()).collect()
    }

    #[tokio::test]
    async fn test_hangzhou_trip_uses_two_tool_rounds_then_answers() {
        let task = Task::new("plan a 2-day Hangzhou trip");
        let generator = ScriptedGenerator::new([POI_CALL, POI_CALL, ANSWER]);
        let poi = counted_poi_tool();
        let tools = ToolRegistry::new().with_tool(poi.clone());

        let samples = agent(3).run(&task, &generator, &tools).await.unwrap();

        // Answer at step 2 of 3: three real steps behind one padding entry.
        assert_eq!(samples.len(), 4);
        assert!(samples[0].is_padding());
        assert_eq!(real_samples(&samples).len(), 3);
        assert_eq!(poi.call_count(), 2);
        assert!(samples[1].messages[0].content.contains("0 of 3 rounds used"));

        let last = samples.last().unwrap();
        let answer = last.final_assistant().unwrap();
        assert!(answer.tool_calls.is_none());
        assert!(answer.content.starts_with("Day 1"));
        assert_eq!(generator.calls(), 3);
    }

    #[tokio::test]
    async fn test_exhausted_budget_yields_n_plus_one_real_samples() {
        let generator = ScriptedGenerator::new([POI_CALL, POI_CALL, POI_CALL, ANSWER]);
        let samples = agent(3)
            .run(&Task::new("plan a 2-day Hangzhou trip"), &generator, &travel_registry())
            .await
            .unwrap();

        assert_eq!(samples.len(), 4);
        assert!(samples.iter().all(|s| !s.is_padding()));
        assert!(samples[0].messages[0].content.contains("0 of 3 rounds used"));
        assert!(samples[3].final_assistant().unwrap().tool_calls.is_none());
        assert_eq!(generator.calls(), 4);
    }

    #[tokio::test]
    async fn test_early_answer_is_left_padded() {
        let task = Task {
            group_index: 7,
            ..Task::new("where should I eat in Chengdu?")
        };
        let generator = ScriptedGenerator::new([ANSWER]);

        let samples = agent(5).run(&task, &generator, &travel_registry()).await.unwrap();

        assert_eq!(samples.len(), 6);
        assert!(samples[..5].iter().all(Sample::is_padding));
        assert!(samples[..5].iter().all(|s| s.tokens == vec![QWEN_PAD_TOKEN_ID]));
        assert!(samples[..5].iter().all(|s| s.group_index == 7));

        let real = real_samples(&samples);
        assert_eq!(real.len(), 1);
        assert!(real[0].final_assistant().unwrap().tool_calls.is_none());
        assert_eq!(generator.calls(), 1);
    }

    #[tokio::test]
    async fn test_answer_at_step_k_yields_k_plus_one_real_samples() {
        let generator = ScriptedGenerator::new([POI_CALL, ANSWER]);
        let samples = agent(4)
            .run(&Task::new("q"), &generator, &travel_registry())
            .await
            .unwrap();

        assert_eq!(samples.len(), 5);
        let real = real_samples(&samples);
        assert_eq!(real.len(), 2);
        assert!(real[1].final_assistant().unwrap().tool_calls.is_none());
        assert!(samples[..3].iter().all(Sample::is_padding));
    }

    #[tokio::test]
    async fn test_last_natural_step_at_budget_boundary_needs_no_forced_step() {
        // Tools at steps 0..N-2, answer at step N-1.
        let max_steps = 3;
        let generator = ScriptedGenerator::new([POI_CALL, POI_CALL, ANSWER]);
        let samples = agent(max_steps)
            .run(&Task::new("q"), &generator, &travel_registry())
            .await
            .unwrap();

        assert_eq!(samples.len(), max_steps + 1);
        assert_eq!(real_samples(&samples).len(), max_steps);
        assert!(samples[0].is_padding());
        assert_eq!(generator.calls(), max_steps);
        let header = &samples.last().unwrap().messages[0].content;
        assert!(!header.contains(ANSWER_DIRECTLY));
    }

    #[tokio::test]
    async fn test_tool_hungry_agent_gets_a_forced_final_answer() {
        let max_steps = 2;
        let generator = ScriptedGenerator::new([POI_CALL]);
        let poi = counted_poi_tool();
        let tools = ToolRegistry::new().with_tool(poi.clone());

        let samples = agent(max_steps).run(&Task::new("q"), &generator, &tools).await.unwrap();

        assert_eq!(samples.len(), max_steps + 1);
        assert!(samples.iter().all(|s| !s.is_padding()));
        assert_eq!(poi.call_count(), max_steps);

        let last = samples.last().unwrap();
        let header = &last.messages[0].content;
        assert!(header.contains("2 of 2 rounds used"));
        assert!(header.contains(ANSWER_DIRECTLY));
        assert!(last.final_assistant().unwrap().tool_calls.is_none());
        assert!(last.response_message.as_ref().unwrap().tool_calls.is_none());
        assert!(last.train_metadata.is_none());
        // The raw completion keeps what the model actually wrote.
        assert!(last.response.contains("<tool_call>"));
    }

    #[tokio::test]
    async fn test_forced_step_offers_no_tools() {
        let generator = ScriptedGenerator::new([POI_CALL]);
        let samples = agent(2)
            .run(&Task::new("q"), &generator, &travel_registry())
            .await
            .unwrap();

        let offered: Vec<usize> = generator.offered_tools().iter().map(Vec::len).collect();
        assert_eq!(offered, vec![5, 5, 0]);
        assert!(samples.last().unwrap().train_metadata.is_none());
        assert_eq!(samples[0].train_metadata.as_ref().unwrap().tools.len(), 5);
    }

    #[tokio::test]
    async fn test_negative_task_index_survives_padding_detection() {
        let task = Task {
            index: -1,
            ..Task::new("q")
        };
        let generator = ScriptedGenerator::new([POI_CALL, ANSWER]);
        let samples = agent(3).run(&task, &generator, &travel_registry()).await.unwrap();

        assert_eq!(samples.len(), 4);
        let padding: Vec<bool> = samples.iter().map(Sample::is_padding).collect();
        assert_eq!(padding, vec![true, true, false, false]);
        assert!(samples[2..].iter().all(|s| s.index == -1));
        assert!(samples[2..].iter().all(|s| s.status == SampleStatus::Completed));
    }

    #[tokio::test]
    async fn test_zero_budget_goes_straight_to_final_answer() {
        let generator = ScriptedGenerator::new([ANSWER]);
        let samples = agent(0)
            .run(&Task::new("q"), &generator, &travel_registry())
            .await
            .unwrap();
        assert_eq!(samples.len(), 1);
        assert!(samples[0].messages[0].content.contains(ANSWER_DIRECTLY));
    }

    #[tokio::test]
    async fn test_every_header_reports_its_own_step() {
        let max_steps = 3;
        let generator = ScriptedGenerator::new([POI_CALL, POI_CALL, POI_CALL, ANSWER]);
        let samples = agent(max_steps)
            .run(&Task::new("q"), &generator, &travel_registry())
            .await
            .unwrap();

        for (step, sample) in samples.iter().enumerate() {
            let header = &sample.messages[0];
            assert_eq!(header.role, Role::System);
            assert!(header
                .content
                .contains(&format!("{step} of {max_steps} rounds used")));
        }
        // The model saw the same header the snapshot recorded.
        for (seen, sample) in generator.seen().iter().zip(&samples) {
            assert_eq!(seen[0], sample.messages[0]);
        }
    }

    #[tokio::test]
    async fn test_snapshots_are_isolated_from_later_steps() {
        let generator = ScriptedGenerator::new([POI_CALL, ANSWER]);
        let samples = agent(2)
            .run(&Task::new("q"), &generator, &travel_registry())
            .await
            .unwrap();
        let (first, second) = (&samples[1], &samples[2]);

        assert_eq!(first.status, SampleStatus::Completed);
        // header, user, assistant(tool call), tool result
        assert_eq!(first.messages.len(), 4);
        assert_eq!(first.prompt_turns, 2);
        let step_roles: Vec<_> = first.step_turns().iter().map(|m| m.role).collect();
        assert_eq!(step_roles, vec![Role::Assistant, Role::Tool]);

        assert_eq!(second.messages.len(), 5);
        assert_eq!(second.prompt_turns, 4);
        assert!(first.messages[0].content.contains("0 of 2"));
        assert!(second.messages[0].content.contains("1 of 2"));

        let call_id = &first.messages[2].requested_tools()[0].id;
        assert_eq!(first.messages[3].tool_call_id.as_ref(), Some(call_id));
        assert_eq!(first.train_metadata.as_ref().unwrap().tools.len(), 5);
    }

    #[tokio::test]
    async fn test_existing_system_turn_is_replaced_not_duplicated() {
        let task = Task::new(Prompt::Messages(vec![
            ChatMessage::system("stale header"),
            ChatMessage::user("plan a day in Xi'an"),
        ]));
        let generator = ScriptedGenerator::new([ANSWER]);
        let samples = agent(2).run(&task, &generator, &travel_registry()).await.unwrap();

        let last = samples.last().unwrap();
        let systems = last.messages.iter().filter(|m| m.role == Role::System).count();
        assert_eq!(systems, 1);
        assert!(last.messages[0].content.contains("0 of 2 rounds used"));
        assert_eq!(last.messages[1].content, "plan a day in Xi'an");
    }

    #[tokio::test]
    async fn test_eos_marker_is_stripped_and_reasoning_is_structured() {
        let generator = ScriptedGenerator::new(["<think>easy</think>Go to West Lake.<|im_end|>"]);
        let samples = agent(1)
            .run(&Task::new("q"), &generator, &travel_registry())
            .await
            .unwrap();
        let last = samples.last().unwrap();

        assert!(!last.response.ends_with("<|im_end|>"));
        let answer = last.final_assistant().unwrap();
        assert_eq!(answer.content, "Go to West Lake.");
        assert_eq!(answer.reasoning_content.as_deref(), Some("easy"));
    }

    #[tokio::test]
    async fn test_final_snapshot_assistant_turns_are_all_structured() {
        let generator = ScriptedGenerator::travel_demo();
        let samples = agent(5)
            .run(&Task::new("plan a 2-day Hangzhou trip"), &generator, &travel_registry())
            .await
            .unwrap();
        let last = samples.last().unwrap();

        for message in last.messages.iter().filter(|m| m.role == Role::Assistant) {
            assert!(!message.content.contains("<tool_call>"));
            assert!(!message.content.contains("<think>"));
        }
        let tool_turns = last.messages.iter().filter(|m| m.role == Role::Tool).count();
        assert_eq!(tool_turns, 3);
    }

    struct FailingGenerator;

    impl Generator for FailingGenerator {
        async fn generate(
            &self,
            _messages: &[ChatMessage],
            _tools: &[ToolSchema],
            _params: &SamplingParams,
        ) -> Result<Generation> {
            anyhow::bail!("policy server unreachable")
        }

        fn eos_token(&self) -> &str {
            ""
        }

        fn pad_token_id(&self) -> u32 {
            0
        }
    }

    #[tokio::test]
    async fn test_generation_failure_aborts_rollout() {
        let err = agent(3)
            .run(&Task::new("q"), &FailingGenerator, &travel_registry())
            .await
            .unwrap_err();
        assert!(format!("{err:#}").contains("policy server unreachable"));
    }

    struct DownTool;

    #[async_trait::async_trait]
    impl Tool for DownTool {
        fn schema(&self) -> ToolSchema {
            ToolSchema {
                name: "poi_search".into(),
                description: String::new(),
                parameters: serde_json::json!({}),
            }
        }

        async fn call(&self, _arguments: serde_json::Value) -> Result<String> {
            anyhow::bail!("maps backend returned 503")
        }
    }

    #[tokio::test]
    async fn test_tool_failure_aborts_rollout() {
        let generator = ScriptedGenerator::new([POI_CALL, ANSWER]);
        let tools = ToolRegistry::new().with_tool(Arc::new(DownTool));
        let err = agent(3).run(&Task::new("q"), &generator, &tools).await.unwrap_err();
        assert!(format!("{err:#}").contains("maps backend returned 503"));
    }
}
