//! The generation collaborator.
//!
//! The rollout loop only needs raw completion text for a conversation plus the
//! tokenizer's end-of-sequence marker and padding id. [`LlmGenerator`] serves
//! that from an OpenAI-compatible endpoint; [`ScriptedGenerator`] replays canned
//! completions so the loop can run without a model.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use anyhow::{Context, Result};
use tracing::debug;

use crate::config::RolloutConfig;
use crate::model::api::{ChatMessage, LlmClient, RequestOptions, SamplingParams};
use crate::model::format::render_assistant_content;
use crate::tools::ToolSchema;

/// End-of-sequence marker of Qwen-family tokenizers.
pub const QWEN_EOS_TOKEN: &str = "<|im_end|>";
/// Padding token id of Qwen-family tokenizers.
pub const QWEN_PAD_TOKEN_ID: u32 = 151643;

/// One completion.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Generation {
    /// Raw text, possibly ending in the end-of-sequence marker.
    pub text: String,
    /// Per-token log-probabilities, when the backend reports them.
    pub log_probs: Vec<f64>,
}

impl From<&str> for Generation {
    fn from(text: &str) -> Self {
        Self {
            text: text.to_string(),
            log_probs: Vec::new(),
        }
    }
}

/// Produces one assistant completion per call.
#[allow(async_fn_in_trait)]
pub trait Generator: Send + Sync {
    async fn generate(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSchema],
        params: &SamplingParams,
    ) -> Result<Generation>;

    fn eos_token(&self) -> &str;

    fn pad_token_id(&self) -> u32;
}

// ---------------------------------------------------------------------------
// LLM-backed generator
// ---------------------------------------------------------------------------

/// Generator backed by an OpenAI-compatible policy server.
///
/// Structured tool calls and reasoning returned by the server are rendered
/// back into the raw Qwen3 text format.
#[derive(Debug, Clone)]
pub struct LlmGenerator {
    client: LlmClient,
    model_id: String,
    eos_token: String,
    pad_token_id: u32,
}

impl LlmGenerator {
    pub fn new(client: LlmClient, model_id: impl Into<String>, rollout: &RolloutConfig) -> Self {
        Self {
            client,
            model_id: model_id.into(),
            eos_token: rollout.eos_token.clone(),
            pad_token_id: rollout.pad_token_id,
        }
    }
}

impl Generator for LlmGenerator {
    async fn generate(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSchema],
        params: &SamplingParams,
    ) -> Result<Generation> {
        let tool_defs: Vec<serde_json::Value> = tools.iter().map(ToolSchema::to_openai).collect();
        let response = self
            .client
            .chat_completion(
                &self.model_id,
                messages,
                params,
                RequestOptions {
                    tools: Some(&tool_defs),
                    logprobs: true,
                },
            )
            .await
            .context("policy model chat completion failed")?;

        let message = response
            .first_message()
            .context("policy model returned no choices")?;
        let text = if message.tool_calls.is_some() || message.reasoning_content.is_some() {
            render_assistant_content(message)
        } else {
            message.content.clone()
        };

        Ok(Generation {
            text,
            log_probs: response.token_log_probs(),
        })
    }

    fn eos_token(&self) -> &str {
        &self.eos_token
    }

    fn pad_token_id(&self) -> u32 {
        self.pad_token_id
    }
}

// ---------------------------------------------------------------------------
// Scripted generator
// ---------------------------------------------------------------------------

/// Replays a fixed list of completions in order; once the script runs out the
/// last completion repeats. Every conversation it is asked to continue is
/// recorded for inspection.
#[derive(Debug)]
pub struct ScriptedGenerator {
    script: Vec<String>,
    cursor: AtomicUsize,
    seen: Mutex<Vec<Vec<ChatMessage>>>,
    offered: Mutex<Vec<Vec<String>>>,
    eos_token: String,
    pad_token_id: u32,
}

impl ScriptedGenerator {
    pub fn new<I, S>(script: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            script: script.into_iter().map(Into::into).collect(),
            cursor: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
            offered: Mutex::new(Vec::new()),
            eos_token: QWEN_EOS_TOKEN.to_string(),
            pad_token_id: QWEN_PAD_TOKEN_ID,
        }
    }

    /// A short Hangzhou itinerary: two tool rounds, then an answer.
    pub fn travel_demo() -> Self {
        Self::new([
            "<think>\nStart with the main sights.\n</think>\n\n<tool_call>\n{\"name\": \"poi_search\", \"arguments\": {\"city\": \"Hangzhou\", \"keywords\": \"attractions\"}}\n</tool_call><|im_end|>",
            "<think>\nNow find food and lodging near West Lake.\n</think>\n\n<tool_call>\n{\"name\": \"around_search\", \"arguments\": {\"location\": \"West Lake\", \"radius\": \"1000\"}}\n</tool_call>\n<tool_call>\n{\"name\": \"direction\", \"arguments\": {\"origin\": \"West Lake\", \"destination\": \"Lingyin Temple\"}}\n</tool_call><|im_end|>",
            "Day 1: West Lake by bike in the morning, lunch at Grandma's Kitchen, Hefang Street at night.\nDay 2: Metro to Lingyin Temple (75 CNY), then Longjing tea villages.<|im_end|>",
        ])
    }

    /// Number of completions served so far.
    pub fn calls(&self) -> usize {
        self.cursor.load(Ordering::SeqCst)
    }

    /// The conversations this generator was asked to continue, in call order.
    pub fn seen(&self) -> Vec<Vec<ChatMessage>> {
        self.seen.lock().map(|s| s.clone()).unwrap_or_default()
    }

    /// Names of the tools advertised on each call, in call order.
    pub fn offered_tools(&self) -> Vec<Vec<String>> {
        self.offered.lock().map(|o| o.clone()).unwrap_or_default()
    }
}

impl Generator for ScriptedGenerator {
    async fn generate(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSchema],
        _params: &SamplingParams,
    ) -> Result<Generation> {
        let idx = self.cursor.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut seen) = self.seen.lock() {
            seen.push(messages.to_vec());
        }
        if let Ok(mut offered) = self.offered.lock() {
            offered.push(tools.iter().map(|t| t.name.clone()).collect());
        }
        let text = self
            .script
            .get(idx)
            .or_else(|| self.script.last())
            .context("scripted generator has an empty script")?;
        debug!(call = idx, "serving scripted completion");
        Ok(Generation::from(text.as_str()))
    }

    fn eos_token(&self) -> &str {
        &self.eos_token
    }

    fn pad_token_id(&self) -> u32 {
        self.pad_token_id
    }
}

// ---------------------------------------------------------------------------
// AnyGenerator: enum dispatch for runtime selection
// ---------------------------------------------------------------------------

/// Runtime choice between the live and the scripted generator, without `dyn`
/// (async trait methods are not object safe).
#[derive(Debug)]
pub enum AnyGenerator {
    Llm(LlmGenerator),
    Scripted(ScriptedGenerator),
}

impl Generator for AnyGenerator {
    async fn generate(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSchema],
        params: &SamplingParams,
    ) -> Result<Generation> {
        match self {
            Self::Llm(g) => g.generate(messages, tools, params).await,
            Self::Scripted(g) => g.generate(messages, tools, params).await,
        }
    }

    fn eos_token(&self) -> &str {
        match self {
            Self::Llm(g) => g.eos_token(),
            Self::Scripted(g) => g.eos_token(),
        }
    }

    fn pad_token_id(&self) -> u32 {
        match self {
            Self::Llm(g) => g.pad_token_id(),
            Self::Scripted(g) => g.pad_token_id(),
        }
    }
}
