//! OpenAI-compatible chat completion client.
//!
//! Provides the conversation turn type shared by the rollout loop and the
//! judge, typed request/response structures, and a retrying HTTP client used
//! both for policy generation (with optional log-probabilities) and for the
//! judge model.

use std::fmt;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer, Serialize};
use tracing::{debug, info, warn};

// ---------------------------------------------------------------------------
// Conversation turns
// ---------------------------------------------------------------------------

/// Author of a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        };
        f.write_str(name)
    }
}

/// The function half of a tool call: a tool name plus JSON-encoded arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    /// Arguments as a JSON string, the way OpenAI-compatible servers send them.
    pub arguments: String,
}

/// A single tool invocation requested by the assistant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type", default = "default_tool_call_kind")]
    pub kind: String,
    pub function: FunctionCall,
}

fn default_tool_call_kind() -> String {
    "function".to_string()
}

impl ToolCall {
    /// Build a function tool call with a freshly generated id.
    pub fn function(name: impl Into<String>, arguments: &serde_json::Value) -> Self {
        Self {
            id: format!("call_{}", uuid::Uuid::new_v4().simple()),
            kind: default_tool_call_kind(),
            function: FunctionCall {
                name: name.into(),
                arguments: arguments.to_string(),
            },
        }
    }

    /// Decode the argument string. An empty string decodes to an empty object.
    pub fn parsed_arguments(&self) -> Result<serde_json::Value> {
        if self.function.arguments.trim().is_empty() {
            return Ok(serde_json::json!({}));
        }
        serde_json::from_str(&self.function.arguments).with_context(|| {
            format!(
                "tool call {} has malformed arguments for {}",
                self.id, self.function.name
            )
        })
    }
}

/// A single turn in a chat conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    /// Textual content. Servers send `null` alongside tool calls; that reads as "".
    #[serde(default, deserialize_with = "null_as_empty")]
    pub content: String,
    /// Chain-of-thought text split out of an assistant turn.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_content: Option<String>,
    /// Structured tool requests carried by an assistant turn.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    /// For tool turns: the id of the call this turn answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// For tool turns: the name of the tool that produced the content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

fn null_as_empty<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

impl ChatMessage {
    fn plain(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            reasoning_content: None,
            tool_calls: None,
            tool_call_id: None,
            name: None,
        }
    }

    /// Convenience constructor for a system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(Role::System, content)
    }

    /// Convenience constructor for a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(Role::User, content)
    }

    /// Convenience constructor for an assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(Role::Assistant, content)
    }

    /// A tool-result turn answering `call`.
    pub fn tool_result(call: &ToolCall, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(call.id.clone()),
            name: Some(call.function.name.clone()),
            ..Self::plain(Role::Tool, content)
        }
    }

    /// Tool calls carried by this turn, or an empty slice.
    pub fn requested_tools(&self) -> &[ToolCall] {
        self.tool_calls.as_deref().unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

/// Sampling parameters for one chat completion request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplingParams {
    pub temperature: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    pub max_tokens: usize,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            temperature: 1.0,
            top_p: None,
            max_tokens: 4096,
        }
    }
}

/// Token-level log-probability information returned by the API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenLogProb {
    pub token: String,
    pub logprob: f64,
}

/// Log-probability information attached to a choice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChoiceLogProbs {
    pub content: Option<Vec<TokenLogProb>>,
}

/// A single completion choice returned by the API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Choice {
    pub index: usize,
    pub message: ChatMessage,
    /// The reason the model stopped generating (e.g. `"stop"`, `"length"`).
    pub finish_reason: Option<String>,
    #[serde(default)]
    pub logprobs: Option<ChoiceLogProbs>,
}

/// Token usage statistics for a request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub total_tokens: usize,
}

/// A chat completion response from the API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub id: String,
    pub choices: Vec<Choice>,
    /// Some gateways omit usage entirely.
    #[serde(default)]
    pub usage: Usage,
}

impl ChatResponse {
    /// The first choice's message, if any.
    pub fn first_message(&self) -> Option<&ChatMessage> {
        self.choices.first().map(|c| &c.message)
    }

    /// Per-token log probabilities of the first choice (empty when absent).
    pub fn token_log_probs(&self) -> Vec<f64> {
        self.choices
            .first()
            .and_then(|choice| choice.logprobs.as_ref())
            .and_then(|lp| lp.content.as_ref())
            .map(|tokens| tokens.iter().map(|t| t.logprob).collect())
            .unwrap_or_default()
    }
}

/// Optional extras for a chat completion request.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions<'a> {
    /// OpenAI-style tool definitions to advertise to the model.
    pub tools: Option<&'a [serde_json::Value]>,
    /// Ask the server for per-token log-probabilities.
    pub logprobs: bool,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// HTTP client for an OpenAI-compatible chat completions API.
///
/// Transient failures (transport errors, HTTP 429 and 5xx) are retried up to
/// `max_retries` additional times with a fixed wait between attempts. Other
/// HTTP errors fail immediately.
#[derive(Debug, Clone)]
pub struct LlmClient {
    api_base: String,
    api_key: String,
    http: reqwest::Client,
    max_retries: usize,
    retry_wait: Duration,
}

impl LlmClient {
    /// Create a client pointing at `base_url` (e.g. `"https://api.openai.com/v1"`)
    /// with a 120 s timeout and no retries.
    pub fn new(base_url: &str, api_key: &str) -> Result<Self> {
        Self::with_options(base_url, api_key, Duration::from_secs(120), 0, Duration::ZERO)
    }

    pub fn with_options(
        base_url: &str,
        api_key: &str,
        timeout: Duration,
        max_retries: usize,
        retry_wait: Duration,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build reqwest client")?;

        Ok(Self {
            api_base: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            http,
            max_retries,
            retry_wait,
        })
    }

    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    /// Send a chat completion request and return the parsed response.
    ///
    /// Calls `POST {base_url}/chat/completions`.
    pub async fn chat_completion(
        &self,
        model: &str,
        messages: &[ChatMessage],
        params: &SamplingParams,
        options: RequestOptions<'_>,
    ) -> Result<ChatResponse> {
        let url = format!("{}/chat/completions", self.api_base);
        debug!(
            model,
            temperature = params.temperature,
            max_tokens = params.max_tokens,
            turns = messages.len(),
            "sending chat completion request"
        );

        let mut body = serde_json::json!({
            "model": model,
            "messages": messages,
            "temperature": params.temperature,
            "max_tokens": params.max_tokens,
        });
        if let Some(top_p) = params.top_p {
            body["top_p"] = serde_json::json!(top_p);
        }
        if let Some(tools) = options.tools.filter(|t| !t.is_empty()) {
            body["tools"] = serde_json::json!(tools);
        }
        if options.logprobs {
            body["logprobs"] = serde_json::json!(true);
        }

        let mut attempt = 0;
        loop {
            match self.send_once(&url, &body).await {
                Ok(response) => {
                    info!(
                        model,
                        attempt,
                        prompt_tokens = response.usage.prompt_tokens,
                        completion_tokens = response.usage.completion_tokens,
                        "chat completion succeeded"
                    );
                    return Ok(response);
                }
                Err(SendError::Transient(err)) if attempt < self.max_retries => {
                    attempt += 1;
                    warn!(
                        model,
                        attempt,
                        error = %err,
                        "transient chat completion failure; retrying"
                    );
                    tokio::time::sleep(self.retry_wait).await;
                }
                Err(SendError::Transient(err)) | Err(SendError::Fatal(err)) => return Err(err),
            }
        }
    }

    async fn send_once(
        &self,
        url: &str,
        body: &serde_json::Value,
    ) -> std::result::Result<ChatResponse, SendError> {
        let resp = self
            .http
            .post(url)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .context("failed to send chat completion request")
            .map_err(SendError::Transient)?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            let err = anyhow::anyhow!("chat completion API returned {status}: {text}");
            return Err(if status.as_u16() == 429 || status.is_server_error() {
                SendError::Transient(err)
            } else {
                SendError::Fatal(err)
            });
        }

        resp.json()
            .await
            .context("failed to parse chat completion response")
            .map_err(SendError::Fatal)
    }
}

enum SendError {
    Transient(anyhow::Error),
    Fatal(anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response_with(message: ChatMessage, logprobs: Option<ChoiceLogProbs>) -> ChatResponse {
        ChatResponse {
            id: "test".into(),
            choices: vec![Choice {
                index: 0,
                message,
                finish_reason: Some("stop".into()),
                logprobs,
            }],
            usage: Usage {
                prompt_tokens: 5,
                completion_tokens: 2,
                total_tokens: 7,
            },
        }
    }

    #[test]
    fn test_chat_message_constructors() {
        let sys = ChatMessage::system("You are a travel planner.");
        assert_eq!(sys.role, Role::System);
        assert_eq!(sys.content, "You are a travel planner.");

        assert_eq!(ChatMessage::user("Hello").role, Role::User);
        assert_eq!(ChatMessage::assistant("Hi").role, Role::Assistant);
    }

    #[test]
    fn test_tool_result_links_call() {
        let call = ToolCall::function("poi_search", &serde_json::json!({"city": "Hangzhou"}));
        let turn = ChatMessage::tool_result(&call, "West Lake");
        assert_eq!(turn.role, Role::Tool);
        assert_eq!(turn.tool_call_id.as_deref(), Some(call.id.as_str()));
        assert_eq!(turn.name.as_deref(), Some("poi_search"));
    }

    #[test]
    fn test_parsed_arguments() {
        let call = ToolCall::function("web_search", &serde_json::json!({"query": "tea"}));
        assert_eq!(call.parsed_arguments().unwrap()["query"], "tea");

        let mut empty = call.clone();
        empty.function.arguments = "  ".into();
        assert_eq!(empty.parsed_arguments().unwrap(), serde_json::json!({}));

        let mut broken = call;
        broken.function.arguments = "{not json".into();
        assert!(broken.parsed_arguments().is_err());
    }

    #[test]
    fn test_null_content_deserializes_to_empty() {
        let json = r#"{
            "role": "assistant",
            "content": null,
            "tool_calls": [{"id": "call_1", "type": "function",
                            "function": {"name": "direction", "arguments": "{}"}}]
        }"#;
        let msg: ChatMessage = serde_json::from_str(json).unwrap();
        assert_eq!(msg.content, "");
        assert_eq!(msg.requested_tools().len(), 1);
        assert_eq!(msg.requested_tools()[0].function.name, "direction");
    }

    #[test]
    fn test_optional_fields_are_not_serialized() {
        let json = serde_json::to_value(ChatMessage::user("hi")).unwrap();
        assert_eq!(json, serde_json::json!({"role": "user", "content": "hi"}));
    }

    #[test]
    fn test_token_log_probs() {
        let resp = response_with(ChatMessage::assistant("hi"), None);
        assert!(resp.token_log_probs().is_empty());

        let resp = response_with(
            ChatMessage::assistant("hello world"),
            Some(ChoiceLogProbs {
                content: Some(vec![
                    TokenLogProb {
                        token: "hello".into(),
                        logprob: -0.5,
                    },
                    TokenLogProb {
                        token: " world".into(),
                        logprob: -1.2,
                    },
                ]),
            }),
        );
        let lps = resp.token_log_probs();
        assert_eq!(lps.len(), 2);
        assert!((lps[1] - (-1.2)).abs() < 1e-9);
    }

    #[test]
    fn test_response_without_usage() {
        let json = r#"{"id": "x", "choices": [{"index": 0,
            "message": {"role": "assistant", "content": "ok"}, "finish_reason": "stop"}]}"#;
        let resp: ChatResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.usage.total_tokens, 0);
        assert_eq!(resp.first_message().unwrap().content, "ok");
    }

    #[test]
    fn test_client_trims_trailing_slash() {
        let client = LlmClient::new("http://localhost:8000/v1/", "key").unwrap();
        assert_eq!(client.api_base(), "http://localhost:8000/v1");
    }
}
