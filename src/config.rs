use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::model::api::SamplingParams;
use crate::model::prompt::TRAVEL_JUDGE_SYSTEM_PROMPT;
use crate::rollout::generator::{QWEN_EOS_TOKEN, QWEN_PAD_TOKEN_ID};

/// Complete configuration for rollouts and judging.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ItineraConfig {
    pub rollout: RolloutConfig,
    pub policy: PolicyConfig,
    pub judge: JudgeConfig,
    pub reward: RewardConfig,
}

/// Rollout loop configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RolloutConfig {
    /// Tool-use rounds before the forced final answer (default: 5).
    pub max_steps: usize,
    /// Sampling temperature for the policy (default: 1.0).
    pub temperature: f64,
    /// Nucleus sampling cutoff (default: unset).
    pub top_p: Option<f64>,
    /// Completion length cap per step (default: 4096).
    pub max_tokens: usize,
    /// End-of-sequence marker stripped from completions.
    pub eos_token: String,
    /// Token id carried by padding samples.
    pub pad_token_id: u32,
}

impl RolloutConfig {
    pub fn sampling_params(&self) -> SamplingParams {
        SamplingParams {
            temperature: self.temperature,
            top_p: self.top_p,
            max_tokens: self.max_tokens,
        }
    }
}

impl Default for RolloutConfig {
    fn default() -> Self {
        Self {
            max_steps: 5,
            temperature: 1.0,
            top_p: None,
            max_tokens: 4096,
            eos_token: QWEN_EOS_TOKEN.into(),
            pad_token_id: QWEN_PAD_TOKEN_ID,
        }
    }
}

/// Policy model endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Base URL of the OpenAI-compatible policy server.
    pub api_base: String,
    pub model_id: String,
    pub api_key: String,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            api_base: "http://localhost:8000/v1".into(),
            model_id: "Qwen/Qwen3-8B".into(),
            api_key: String::new(),
        }
    }
}

/// Judge model endpoint and limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JudgeConfig {
    pub api_base: String,
    pub model: String,
    pub api_key: String,
    /// Ceiling on in-flight judge requests (default: 10).
    pub concurrency_limit: usize,
    /// Per-request timeout in seconds (default: 60).
    pub timeout_secs: u64,
    /// Retries on transient failure (default: 10).
    pub max_retries: usize,
    /// Fixed wait between retries in seconds (default: 1.0).
    pub retry_wait_secs: f64,
    /// Replaces the built-in travel rubric when set.
    pub system_prompt: Option<String>,
}

impl JudgeConfig {
    pub fn system_prompt(&self) -> &str {
        self.system_prompt
            .as_deref()
            .unwrap_or(TRAVEL_JUDGE_SYSTEM_PROMPT)
    }
}

impl Default for JudgeConfig {
    fn default() -> Self {
        Self {
            api_base: "https://openrouter.ai/api/v1".into(),
            model: "qwen/qwen-2.5-72b-instruct".into(),
            api_key: String::new(),
            concurrency_limit: 10,
            timeout_secs: 60,
            max_retries: 10,
            retry_wait_secs: 1.0,
            system_prompt: None,
        }
    }
}

/// How a group of competing rollouts is turned into per-member rewards.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupStrategy {
    /// Member 0 is the anchor; everyone else is compared against it.
    #[default]
    Anchor,
    /// Every pair of members is compared.
    RoundRobin,
}

/// Reward assignment configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RewardConfig {
    pub group_strategy: GroupStrategy,
}

impl ItineraConfig {
    /// Load a JSON config file; missing fields take their defaults.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse config from {}", path.display()))
    }

    /// Fill unset keys and URLs from the environment.
    ///
    /// `OPENROUTER_API_KEY` / `OPENROUTER_BASE_URL` feed the judge (the URL
    /// only replaces the built-in default, never a configured base),
    /// `OPENAI_API_KEY` feeds the policy (and the judge when no OpenRouter key
    /// is present).
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if self.judge.api_key.is_empty() {
            if let Some(key) = lookup("OPENROUTER_API_KEY").or_else(|| lookup("OPENAI_API_KEY")) {
                self.judge.api_key = key;
            }
        }
        if self.judge.api_base == JudgeConfig::default().api_base {
            if let Some(base) = lookup("OPENROUTER_BASE_URL") {
                self.judge.api_base = base;
            }
        }
        if self.policy.api_key.is_empty() {
            if let Some(key) = lookup("OPENAI_API_KEY") {
                self.policy.api_key = key;
            }
        }
    }
}
