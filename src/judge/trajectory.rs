//! Condensing a transcript into what the judge sees: the tool-use path and
//! the final answer.

use serde::Serialize;

use crate::model::api::{ChatMessage, Role, ToolCall};

/// Answer text used when a transcript does not end in an assistant reply.
pub const NO_REPLY: &str = "No reply";

/// One assistant step on the path to the answer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepRecord {
    /// 1-based position among the assistant turns.
    pub step: usize,
    pub reasoning_content: String,
    pub tool_calls: Vec<ToolCall>,
}

/// A transcript reduced to its intermediate steps and its final answer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Trajectory {
    pub steps: Vec<StepRecord>,
    pub answer: String,
}

impl Trajectory {
    /// The step list as pretty JSON, as embedded in the judge prompt.
    pub fn path_json(&self) -> String {
        serde_json::to_string_pretty(&self.steps).unwrap_or_else(|_| "[]".to_string())
    }

    pub fn has_reply(&self) -> bool {
        self.answer != NO_REPLY
    }
}

/// Extract the trajectory of a transcript.
///
/// Every assistant turn except the last turn of the transcript becomes a step.
/// The answer is the last turn's content when that turn is a non-empty
/// assistant reply, [`NO_REPLY`] otherwise.
pub fn extract_trajectory(transcript: &[ChatMessage]) -> Trajectory {
    let Some((last, earlier)) = transcript.split_last() else {
        return Trajectory {
            steps: Vec::new(),
            answer: NO_REPLY.to_string(),
        };
    };

    let steps = earlier
        .iter()
        .filter(|m| m.role == Role::Assistant)
        .enumerate()
        .map(|(i, m)| StepRecord {
            step: i + 1,
            reasoning_content: m.reasoning_content.clone().unwrap_or_default(),
            tool_calls: m.requested_tools().to_vec(),
        })
        .collect();

    let answer = if last.role == Role::Assistant && !last.content.is_empty() {
        last.content.clone()
    } else {
        NO_REPLY.to_string()
    };

    Trajectory { steps, answer }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool_turn(name: &str) -> ChatMessage {
        ChatMessage {
            reasoning_content: Some(format!("need {name}")),
            tool_calls: Some(vec![ToolCall::function(
                name,
                &serde_json::json!({"city": "Hangzhou"}),
            )]),
            ..ChatMessage::assistant("")
        }
    }

    #[test]
    fn test_steps_and_answer() {
        let first = tool_turn("poi_search");
        let second = tool_turn("direction");
        let transcript = vec![
            ChatMessage::system("header"),
            ChatMessage::user("plan a 2-day Hangzhou trip"),
            first.clone(),
            ChatMessage::tool_result(&first.requested_tools()[0], "West Lake"),
            second.clone(),
            ChatMessage::tool_result(&second.requested_tools()[0], "metro line 1"),
            ChatMessage::assistant("Day 1: West Lake."),
        ];

        let trajectory = extract_trajectory(&transcript);
        assert_eq!(trajectory.steps.len(), 2);
        assert_eq!(trajectory.steps[0].step, 1);
        assert_eq!(trajectory.steps[1].step, 2);
        assert_eq!(trajectory.steps[0].reasoning_content, "need poi_search");
        assert_eq!(trajectory.steps[1].tool_calls[0].function.name, "direction");
        assert_eq!(trajectory.answer, "Day 1: West Lake.");
        assert!(trajectory.has_reply());
    }

    #[test]
    fn test_step_count_matches_assistant_turns_before_last() {
        let transcript = vec![
            ChatMessage::user("q"),
            ChatMessage::assistant("thinking out loud"),
            ChatMessage::user("go on"),
            ChatMessage::assistant("final"),
        ];
        let trajectory = extract_trajectory(&transcript);
        assert_eq!(trajectory.steps.len(), 1);
        assert!(trajectory.steps[0].tool_calls.is_empty());
        assert_eq!(trajectory.steps[0].reasoning_content, "");
        assert_eq!(trajectory.answer, "final");
    }

    #[test]
    fn test_missing_reply_uses_sentinel() {
        let call = ToolCall::function("poi_search", &serde_json::json!({}));
        let ends_in_tool = vec![
            ChatMessage::user("q"),
            ChatMessage::tool_result(&call, "result"),
        ];
        assert_eq!(extract_trajectory(&ends_in_tool).answer, NO_REPLY);

        let empty_reply = vec![ChatMessage::user("q"), ChatMessage::assistant("")];
        assert_eq!(extract_trajectory(&empty_reply).answer, NO_REPLY);

        let empty = extract_trajectory(&[]);
        assert!(empty.steps.is_empty());
        assert!(!empty.has_reply());
    }

    #[test]
    fn test_path_json() {
        let transcript = vec![tool_turn("web_search"), ChatMessage::assistant("done")];
        let json = extract_trajectory(&transcript).path_json();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value[0]["step"], 1);
        assert_eq!(value[0]["tool_calls"][0]["function"]["name"], "web_search");
        assert_eq!(extract_trajectory(&[ChatMessage::assistant("x")]).path_json(), "[]");
    }
}
