//! Conversation model and the completion engine seam
//!
//! A conversation is an ordered list of [`Message`]s. The model answers with
//! text, with tool invocations, or both; the [`Dispatcher`] executes the
//! invocations and sends the results back until the model answers without
//! calling any tool.

mod dispatch;
mod prompts;

pub use dispatch::{
    Answer, DispatchState, Dispatcher, DEFAULT_MAX_TURNS, FALLBACK_MESSAGE, TURN_LIMIT_MESSAGE,
};
pub use prompts::{render_system_prompt, PromptContext, DEFAULT_SYSTEM_PROMPT};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::tools::ToolDeclaration;
use crate::Result;

/// Who produced a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

/// A tool call issued by the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub name: String,
    /// Argument object as produced by the model
    #[serde(default)]
    pub args: Value,
}

/// Outcome of one tool invocation, payload or structured error
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub name: String,
    pub response: Value,
}

impl ToolResult {
    /// Whether the payload is a structured error
    pub fn is_error(&self) -> bool {
        self.response.get("error").is_some()
    }
}

/// One piece of a message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Part {
    Text(String),
    ToolCall(ToolInvocation),
    ToolResult(ToolResult),
}

/// A single conversation turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub parts: Vec<Part>,
}

impl Message {
    /// User message with a single text part
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            parts: vec![Part::Text(text.into())],
        }
    }

    /// Model message with a single text part
    pub fn model(text: impl Into<String>) -> Self {
        Self {
            role: Role::Model,
            parts: vec![Part::Text(text.into())],
        }
    }

    /// User turn carrying a batch of tool results
    pub fn tool_results(results: Vec<ToolResult>) -> Self {
        Self {
            role: Role::User,
            parts: results.into_iter().map(Part::ToolResult).collect(),
        }
    }

    /// Concatenated text parts
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|part| match part {
                Part::Text(text) => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }

    /// Tool invocations in the order the model issued them
    pub fn tool_calls(&self) -> Vec<&ToolInvocation> {
        self.parts
            .iter()
            .filter_map(|part| match part {
                Part::ToolCall(call) => Some(call),
                _ => None,
            })
            .collect()
    }

    /// Whether the message asks for any tool
    pub fn has_tool_calls(&self) -> bool {
        self.parts.iter().any(|part| matches!(part, Part::ToolCall(_)))
    }
}

/// Everything the completion engine sees for one call
#[derive(Debug, Clone, Copy)]
pub struct CompletionRequest<'a> {
    pub system: &'a str,
    pub tools: &'a [ToolDeclaration],
    pub history: &'a [Message],
}

/// Hosted model that produces the next conversation turn
#[async_trait]
pub trait CompletionEngine: Send + Sync {
    /// Produce the next model message, or `None` when the response had no candidate
    async fn complete(&self, request: CompletionRequest<'_>) -> Result<Option<Message>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_accessors() {
        let message = Message {
            role: Role::Model,
            parts: vec![
                Part::Text("Looking at ".to_string()),
                Part::ToolCall(ToolInvocation {
                    name: "list_branches".to_string(),
                    args: json!({}),
                }),
                Part::Text("the branches".to_string()),
            ],
        };

        assert_eq!(message.text(), "Looking at the branches");
        assert!(message.has_tool_calls());
        assert_eq!(message.tool_calls()[0].name, "list_branches");
        assert!(!Message::model("done").has_tool_calls());
    }

    #[test]
    fn test_tool_result_error_detection() {
        let ok = ToolResult {
            name: "list_branches".to_string(),
            response: json!({"branches": ["main"]}),
        };
        let failed = ToolResult {
            name: "list_branches".to_string(),
            response: json!({"error": {"kind": "not_found", "message": "x"}}),
        };
        assert!(!ok.is_error());
        assert!(failed.is_error());
    }
}
