//! Data types produced and consumed by the rollout loop.
//!
//! A [`Task`] is the caller's unit of work. The loop turns it into a
//! fixed-length `Vec<Sample>`, one [`Sample`] per step, left-padded with
//! placeholder samples when the agent stops early.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::model::api::{ChatMessage, Role};
use crate::tools::ToolSchema;

/// Sample index carried by padding samples.
pub const PADDING_INDEX: i64 = -1;

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

/// The initial prompt of a task: a bare question or a full turn list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Prompt {
    Text(String),
    Messages(Vec<ChatMessage>),
}

impl Prompt {
    /// The opening conversation: a text prompt becomes one user turn, a turn
    /// list is copied as is.
    pub fn to_messages(&self) -> Vec<ChatMessage> {
        match self {
            Prompt::Text(text) => vec![ChatMessage::user(text.clone())],
            Prompt::Messages(messages) => messages.clone(),
        }
    }

    /// The user query shown to the judge: the text itself, or the content of
    /// the last turn of a turn list.
    pub fn query(&self) -> &str {
        match self {
            Prompt::Text(text) => text,
            Prompt::Messages(messages) => messages.last().map(|m| m.content.as_str()).unwrap_or(""),
        }
    }
}

impl From<&str> for Prompt {
    fn from(text: &str) -> Self {
        Prompt::Text(text.to_string())
    }
}

/// One unit of rollout work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub prompt: Prompt,
    /// Reference transcript the candidate is judged against.
    #[serde(default)]
    pub label: Option<Vec<ChatMessage>>,
    #[serde(default)]
    pub group_index: usize,
    #[serde(default)]
    pub index: i64,
    /// Opaque caller data, carried through unchanged.
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl Task {
    pub fn new(prompt: impl Into<Prompt>) -> Self {
        Self {
            prompt: prompt.into(),
            label: None,
            group_index: 0,
            index: 0,
            metadata: serde_json::Value::Null,
        }
    }

    pub fn with_label(mut self, label: Vec<ChatMessage>) -> Self {
        self.label = Some(label);
        self
    }

    /// Read a JSON task file.
    pub fn load_from_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read task from {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse task from {}", path.display()))
    }
}

// ---------------------------------------------------------------------------
// Sample (step snapshot)
// ---------------------------------------------------------------------------

/// Lifecycle of a step snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleStatus {
    /// Created at the top of a step, generation not finished.
    Pending,
    /// Generation (and any tool calls) for the step are committed.
    Completed,
    /// Placeholder that fills a short rollout up to its fixed length.
    Padding,
}

/// Step-scoped training metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainMetadata {
    /// Tool catalog visible to the model at this step.
    pub tools: Vec<ToolSchema>,
}

/// A per-step snapshot of one rollout.
///
/// `messages` is a value copy of the conversation; `prompt_turns` marks how
/// many of those turns existed when the step began, the rest were committed
/// by the step itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sample {
    pub group_index: usize,
    pub index: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<Prompt>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<Vec<ChatMessage>>,
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub status: SampleStatus,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub prompt_turns: usize,
    /// Raw completion text of this step, end-of-sequence marker removed.
    #[serde(default)]
    pub response: String,
    /// The parsed assistant turn of this step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_message: Option<ChatMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub train_metadata: Option<TrainMetadata>,
    #[serde(default)]
    pub tokens: Vec<u32>,
    #[serde(default)]
    pub loss_mask: Vec<u8>,
    #[serde(default)]
    pub rollout_log_probs: Vec<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reward: Option<f64>,
}

impl Sample {
    /// Open a snapshot for a step: identity fields from `task`, a copy of the
    /// conversation as it stands, status pending.
    pub fn open(
        task: &Task,
        messages: &[ChatMessage],
        train_metadata: Option<TrainMetadata>,
    ) -> Self {
        Self {
            group_index: task.group_index,
            index: task.index,
            prompt: Some(task.prompt.clone()),
            label: task.label.clone(),
            metadata: task.metadata.clone(),
            status: SampleStatus::Pending,
            messages: messages.to_vec(),
            prompt_turns: messages.len(),
            response: String::new(),
            response_message: None,
            train_metadata,
            tokens: Vec::new(),
            loss_mask: Vec::new(),
            rollout_log_probs: Vec::new(),
            reward: None,
        }
    }

    /// A placeholder that pads a short rollout to its fixed length.
    pub fn padding(group_index: usize, pad_token_id: u32) -> Self {
        Self {
            group_index,
            index: PADDING_INDEX,
            prompt: None,
            label: None,
            metadata: serde_json::Value::Null,
            status: SampleStatus::Padding,
            messages: Vec::new(),
            prompt_turns: 0,
            response: String::new(),
            response_message: None,
            train_metadata: None,
            tokens: vec![pad_token_id],
            loss_mask: Vec::new(),
            rollout_log_probs: Vec::new(),
            reward: Some(0.0),
        }
    }

    /// Commit the step: take a copy of the conversation including the turns
    /// this step appended and mark the sample completed.
    pub fn finalize(&mut self, conversation: &[ChatMessage]) {
        self.messages = conversation.to_vec();
        self.status = SampleStatus::Completed;
    }

    pub fn is_padding(&self) -> bool {
        self.status == SampleStatus::Padding
    }

    /// Turns committed by this step (the assistant turn and any tool results).
    pub fn step_turns(&self) -> &[ChatMessage] {
        &self.messages[self.prompt_turns.min(self.messages.len())..]
    }

    /// The last assistant turn of the conversation, if any.
    pub fn final_assistant(&self) -> Option<&ChatMessage> {
        self.messages.iter().rev().find(|m| m.role == Role::Assistant)
    }

    /// Reward used for training; padding and unscored samples count as 0.0.
    pub fn reward_value(&self) -> f64 {
        self.reward.unwrap_or(0.0)
    }

    /// The judge query for this sample's task.
    pub fn query(&self) -> &str {
        self.prompt.as_ref().map(Prompt::query).unwrap_or("")
    }
}

/// Write a rollout to a pretty-printed JSON file.
pub fn save_samples(samples: &[Sample], path: impl AsRef<std::path::Path>) -> Result<()> {
    let path = path.as_ref();
    let json = serde_json::to_string_pretty(samples).context("Failed to serialize samples")?;
    std::fs::write(path, json)
        .with_context(|| format!("Failed to write samples to {}", path.display()))?;
    tracing::info!(path = %path.display(), count = samples.len(), "Saved samples");
    Ok(())
}

/// Read a rollout written by [`save_samples`].
pub fn load_samples(path: impl AsRef<std::path::Path>) -> Result<Vec<Sample>> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read samples from {}", path.display()))?;
    serde_json::from_str(&text)
        .with_context(|| format!("Failed to parse samples from {}", path.display()))
}
