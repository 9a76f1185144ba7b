//! Bidirectional pairwise judging.
//!
//! A single judge call sees two trajectories in fixed slots "A" and "B", and
//! judge models favour one slot. [`PairwiseJudge::bidirectional_compare`]
//! asks twice, once per order, and sums each side's two scores so the slot
//! bias cancels out.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::config::JudgeConfig;
use crate::judge::reward::assign_pairwise_reward;
use crate::judge::trajectory::{extract_trajectory, Trajectory};
use crate::judge::verdict::{parse_verdict, JudgeVerdict, NEUTRAL_SCORE};
use crate::model::api::{ChatMessage, LlmClient, RequestOptions, SamplingParams};
use crate::model::prompt::{pairwise_judge_messages, pairwise_judge_prompt};

/// Chat completion for the judge model.
#[allow(async_fn_in_trait)]
pub trait JudgeBackend: Send + Sync {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        model: &str,
        temperature: f64,
    ) -> Result<String>;
}

// ---------------------------------------------------------------------------
// LLM backend
// ---------------------------------------------------------------------------

/// Judge backend over an OpenAI-compatible endpoint (OpenRouter by default).
///
/// The HTTP client is built on first use.
#[derive(Debug)]
pub struct LlmJudgeBackend {
    config: JudgeConfig,
    client: OnceLock<LlmClient>,
}

impl LlmJudgeBackend {
    pub fn new(config: JudgeConfig) -> Self {
        Self {
            config,
            client: OnceLock::new(),
        }
    }

    fn client(&self) -> Result<&LlmClient> {
        if let Some(client) = self.client.get() {
            return Ok(client);
        }
        let client = LlmClient::with_options(
            &self.config.api_base,
            &self.config.api_key,
            Duration::from_secs(self.config.timeout_secs),
            self.config.max_retries,
            Duration::from_secs_f64(self.config.retry_wait_secs.max(0.0)),
        )
        .context("failed to build judge client")?;
        Ok(self.client.get_or_init(|| client))
    }
}

impl JudgeBackend for LlmJudgeBackend {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        model: &str,
        temperature: f64,
    ) -> Result<String> {
        let params = SamplingParams {
            temperature,
            ..SamplingParams::default()
        };
        let response = self
            .client()?
            .chat_completion(model, messages, &params, RequestOptions::default())
            .await?;
        let message = response
            .first_message()
            .context("judge model returned no choices")?;
        Ok(message.content.clone())
    }
}

// ---------------------------------------------------------------------------
// Scripted backend
// ---------------------------------------------------------------------------

type ReplyFn = dyn Fn(&str) -> Result<String> + Send + Sync;

/// Offline judge: replies are computed from the user prompt by a closure.
///
/// Records every prompt it receives and the peak number of overlapping calls.
pub struct ScriptedJudge {
    reply: Arc<ReplyFn>,
    delay: Duration,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl fmt::Debug for ScriptedJudge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptedJudge")
            .field("delay", &self.delay)
            .field("calls", &self.calls())
            .finish_non_exhaustive()
    }
}

impl ScriptedJudge {
    pub fn new(reply: impl Fn(&str) -> Result<String> + Send + Sync + 'static) -> Self {
        Self {
            reply: Arc::new(reply),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Always returns `reply`.
    pub fn fixed(reply: impl Into<String>) -> Self {
        let reply = reply.into();
        Self::new(move |_| Ok(reply.clone()))
    }

    /// Always fails.
    pub fn failing(message: &'static str) -> Self {
        Self::new(move |_| Err(anyhow::anyhow!(message)))
    }

    /// Scores each slot by the length of its answer, capped at 10. A
    /// position-independent stand-in for a real judge.
    pub fn by_answer_length() -> Self {
        Self::new(|prompt| {
            let score = |tag: &str| {
                let len = section(prompt, tag).map(|s| s.chars().count()).unwrap_or(0);
                ((len as f64 / 20.0).min(10.0) * 100.0).round() / 100.0
            };
            let (a, b) = (score("Answer_A"), score("Answer_B"));
            let winner = if a > b {
                "Agent_A"
            } else if b > a {
                "Agent_B"
            } else {
                "Tie"
            };
            Ok(serde_json::json!({
                "combined_scores": {"Agent_A": a, "Agent_B": b},
                "winner": winner,
            })
            .to_string())
        })
    }

    /// Sleep this long inside every call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    /// User prompts received, in call order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }
}

fn section<'a>(prompt: &'a str, tag: &str) -> Option<&'a str> {
    let open = format!("<{tag}>\n");
    let close = format!("\n</{tag}>");
    let start = prompt.find(&open)? + open.len();
    let end = prompt[start..].find(&close)? + start;
    Some(&prompt[start..end])
}

impl JudgeBackend for ScriptedJudge {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        _model: &str,
        _temperature: f64,
    ) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);

        let prompt = messages.last().map(|m| m.content.as_str()).unwrap_or("");
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.to_string());
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let reply = (self.reply)(prompt);

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        reply
    }
}

/// Runtime choice of judge backend.
#[derive(Debug)]
pub enum AnyJudgeBackend {
    Llm(LlmJudgeBackend),
    Scripted(ScriptedJudge),
}

impl JudgeBackend for AnyJudgeBackend {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        model: &str,
        temperature: f64,
    ) -> Result<String> {
        match self {
            Self::Llm(b) => b.complete(messages, model, temperature).await,
            Self::Scripted(b) => b.complete(messages, model, temperature).await,
        }
    }
}

// ---------------------------------------------------------------------------
// Pairwise judge
// ---------------------------------------------------------------------------

/// Bias-corrected scores for two transcripts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Comparison {
    pub score_a: f64,
    pub score_b: f64,
}

impl Comparison {
    pub fn swapped(self) -> Self {
        Self {
            score_a: self.score_b,
            score_b: self.score_a,
        }
    }

    /// Reward of side A: 1.0 win, 0.0 loss, 0.5 tie.
    pub fn reward_a(&self) -> f64 {
        assign_pairwise_reward(self.score_a, self.score_b)
    }
}

/// Compares trajectories with a judge model under a shared concurrency limit.
#[derive(Debug)]
pub struct PairwiseJudge<B> {
    backend: B,
    model: String,
    system_prompt: String,
    concurrency_limit: usize,
    limiter: OnceLock<Arc<Semaphore>>,
}

impl<B: JudgeBackend> PairwiseJudge<B> {
    pub fn new(
        backend: B,
        model: impl Into<String>,
        system_prompt: impl Into<String>,
        concurrency_limit: usize,
    ) -> Self {
        Self {
            backend,
            model: model.into(),
            system_prompt: system_prompt.into(),
            concurrency_limit: concurrency_limit.max(1),
            limiter: OnceLock::new(),
        }
    }

    pub fn from_config(backend: B, config: &JudgeConfig) -> Self {
        Self::new(
            backend,
            config.model.clone(),
            config.system_prompt(),
            config.concurrency_limit,
        )
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    fn limiter(&self) -> Arc<Semaphore> {
        self.limiter
            .get_or_init(|| Arc::new(Semaphore::new(self.concurrency_limit)))
            .clone()
    }

    /// Judge once with `a` in slot A and `b` in slot B.
    ///
    /// Never fails: call errors and unparseable replies are logged and
    /// yield the neutral verdict.
    pub async fn compare_one_direction(
        &self,
        query: &str,
        a: &Trajectory,
        b: &Trajectory,
    ) -> JudgeVerdict {
        let (path_a, path_b) = (a.path_json(), b.path_json());
        let prompt = pairwise_judge_prompt(query, &path_a, &path_b, &a.answer, &b.answer);
        let messages = pairwise_judge_messages(&self.system_prompt, prompt);

        let limiter = self.limiter();
        let reply = match limiter.acquire().await {
            Ok(_permit) => self.backend.complete(&messages, &self.model, 0.0).await,
            Err(_) => Err(anyhow::anyhow!("judge limiter closed")),
        };

        match reply {
            Ok(text) => match parse_verdict(&text) {
                Some(verdict) => {
                    debug!(
                        score_a = verdict.score_a,
                        score_b = verdict.score_b,
                        winner = ?verdict.winner,
                        "judge verdict"
                    );
                    verdict
                }
                None => {
                    warn!(
                        reply = %text,
                        neutral = NEUTRAL_SCORE,
                        "judge reply has no combined scores; using neutral scores"
                    );
                    JudgeVerdict::neutral()
                }
            },
            Err(err) => {
                warn!(error = %format!("{err:#}"), "judge call failed; using neutral scores");
                JudgeVerdict::neutral()
            }
        }
    }

    /// Judge both orders concurrently and combine:
    /// `A = A-first(A) + B-first(A)`, `B = A-first(B) + B-first(B)`.
    pub async fn bidirectional_compare(
        &self,
        query: &str,
        transcript_a: &[ChatMessage],
        transcript_b: &[ChatMessage],
    ) -> Comparison {
        let a = extract_trajectory(transcript_a);
        let b = extract_trajectory(transcript_b);

        let (forward, backward) = tokio::join!(
            self.compare_one_direction(query, &a, &b),
            self.compare_one_direction(query, &b, &a),
        );

        let comparison = Comparison {
            score_a: forward.score_a + backward.score_b,
            score_b: forward.score_b + backward.score_a,
        };
        debug!(
            score_a = comparison.score_a,
            score_b = comparison.score_b,
            "bidirectional comparison"
        );
        comparison
    }
}
