//! Qwen3-style assistant text format.
//!
//! The policy writes its turns as raw text:
//!
//! ```text
//! <think>
//! reasoning...
//! </think>
//!
//! visible answer text
//! <tool_call>
//! {"name": "poi_search", "arguments": {"city": "Hangzhou"}}
//! </tool_call>
//! ```
//!
//! [`parse_assistant_content`] turns that text into a structured assistant
//! turn and [`render_assistant_content`] goes the other way, so that servers
//! which already return structured tool calls can be folded back into the same
//! raw representation.

use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;
use tracing::warn;

use crate::model::api::{ChatMessage, Role, ToolCall};

static TOOL_CALL_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<tool_call>\s*(.*?)\s*</tool_call>").expect("invalid tool_call regex")
});

const THINK_OPEN: &str = "<think>";
const THINK_CLOSE: &str = "</think>";

#[derive(Deserialize)]
struct RawToolCall {
    name: String,
    #[serde(default)]
    arguments: serde_json::Value,
}

/// Parse raw assistant text into a structured assistant turn.
///
/// Tool-call blocks whose body is not valid JSON are logged and left in the
/// visible content.
pub fn parse_assistant_content(raw: &str) -> ChatMessage {
    let (reasoning, rest) = split_reasoning(raw);

    let mut tool_calls = Vec::new();
    let mut content = String::with_capacity(rest.len());
    let mut cursor = 0;

    for caps in TOOL_CALL_BLOCK.captures_iter(rest) {
        let (Some(block), Some(body)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        match decode_tool_call(body.as_str()) {
            Some(call) => {
                content.push_str(&rest[cursor..block.start()]);
                cursor = block.end();
                tool_calls.push(call);
            }
            None => warn!(block = body.as_str(), "ignoring malformed tool_call block"),
        }
    }
    content.push_str(&rest[cursor..]);

    ChatMessage {
        reasoning_content: reasoning,
        tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
        ..ChatMessage::assistant(content.trim())
    }
}

/// Re-parse an assistant turn that may already be structured.
///
/// Fields the text does not yield are kept from `message`, so the operation
/// is idempotent.
pub fn normalize_assistant(message: &ChatMessage) -> ChatMessage {
    if message.role != Role::Assistant {
        return message.clone();
    }
    let parsed = parse_assistant_content(&message.content);
    ChatMessage {
        reasoning_content: parsed
            .reasoning_content
            .or_else(|| message.reasoning_content.clone()),
        tool_calls: parsed.tool_calls.or_else(|| message.tool_calls.clone()),
        ..parsed
    }
}

/// Render a structured assistant turn back into the raw text format.
pub fn render_assistant_content(message: &ChatMessage) -> String {
    let mut out = String::new();
    if let Some(reasoning) = message.reasoning_content.as_deref().filter(|r| !r.is_empty()) {
        out.push_str(THINK_OPEN);
        out.push('\n');
        out.push_str(reasoning);
        out.push('\n');
        out.push_str(THINK_CLOSE);
        out.push_str("\n\n");
    }
    out.push_str(&message.content);

    for call in message.requested_tools() {
        let arguments = call
            .parsed_arguments()
            .unwrap_or_else(|_| serde_json::Value::String(call.function.arguments.clone()));
        let body = serde_json::json!({ "name": call.function.name, "arguments": arguments });
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str("<tool_call>\n");
        out.push_str(&body.to_string());
        out.push_str("\n</tool_call>");
    }
    out
}

fn split_reasoning(raw: &str) -> (Option<String>, &str) {
    match raw.find(THINK_CLOSE) {
        Some(end) => {
            let head = &raw[..end];
            let head = head
                .find(THINK_OPEN)
                .map(|start| &head[start + THINK_OPEN.len()..])
                .unwrap_or(head);
            let reasoning = head.trim();
            let rest = &raw[end + THINK_CLOSE.len()..];
            ((!reasoning.is_empty()).then(|| reasoning.to_string()), rest)
        }
        None => (None, raw),
    }
}

fn decode_tool_call(body: &str) -> Option<ToolCall> {
    let raw: RawToolCall = serde_json::from_str(body).ok()?;
    // Some models double-encode the arguments object as a string.
    let arguments = match raw.arguments {
        serde_json::Value::String(s) => serde_json::from_str(&s).ok()?,
        serde_json::Value::Null => serde_json::json!({}),
        other => other,
    };
    Some(ToolCall::function(raw.name, &arguments))
}
