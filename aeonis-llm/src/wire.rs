//! JSON shapes of the `generateContent` API
//!
//! Conversion between the core conversation model and the wire format lives
//! here so it can be tested without a network.

use aeonis_core::chat::{CompletionRequest, Message, Part, Role, ToolInvocation, ToolResult};
use aeonis_core::tools::ToolDeclaration;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
    pub contents: Vec<Content>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<Tool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub parts: Vec<WirePart>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WirePart {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_call: Option<FunctionCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_response: Option<FunctionResponse>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    #[serde(default)]
    pub args: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionResponse {
    pub name: String,
    pub response: Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Tool {
    pub function_declarations: Vec<FunctionDeclaration>,
}

#[derive(Debug, Serialize)]
pub struct FunctionDeclaration {
    pub name: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
    #[serde(default)]
    pub usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    #[serde(default)]
    pub content: Option<Content>,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageMetadata {
    #[serde(default)]
    pub prompt_token_count: u64,
    #[serde(default)]
    pub candidates_token_count: u64,
}

/// Error body returned with non-success statuses
#[derive(Debug, Deserialize)]
pub struct ErrorEnvelope {
    pub error: ErrorBody,
}

#[derive(Debug, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub status: Option<String>,
}

fn declaration(tool: &ToolDeclaration) -> FunctionDeclaration {
    // The API rejects object schemas without properties
    let empty = tool
        .parameters
        .get("properties")
        .and_then(Value::as_object)
        .map_or(true, Map::is_empty);

    FunctionDeclaration {
        name: tool.name.clone(),
        description: tool.description.clone(),
        parameters: (!empty).then(|| tool.parameters.clone()),
    }
}

/// `functionResponse.response` must be an object
fn response_object(value: &Value) -> Value {
    match value {
        Value::Object(_) => value.clone(),
        other => json!({"result": other}),
    }
}

fn part_to_wire(part: &Part) -> WirePart {
    match part {
        Part::Text(text) => WirePart {
            text: Some(text.clone()),
            ..Default::default()
        },
        Part::ToolCall(call) => WirePart {
            function_call: Some(FunctionCall {
                name: call.name.clone(),
                args: if call.args.is_null() { json!({}) } else { call.args.clone() },
            }),
            ..Default::default()
        },
        Part::ToolResult(result) => WirePart {
            function_response: Some(FunctionResponse {
                name: result.name.clone(),
                response: response_object(&result.response),
            }),
            ..Default::default()
        },
    }
}

fn message_to_wire(message: &Message) -> Content {
    let role = match message.role {
        Role::User => "user",
        Role::Model => "model",
    };

    Content {
        role: Some(role.to_string()),
        parts: message.parts.iter().map(part_to_wire).collect(),
    }
}

impl GenerateContentRequest {
    /// Build the request body for one completion call
    pub fn from_request(request: &CompletionRequest<'_>) -> Self {
        let system_instruction = (!request.system.trim().is_empty()).then(|| Content {
            role: None,
            parts: vec![WirePart {
                text: Some(request.system.to_string()),
                ..Default::default()
            }],
        });

        let tools = if request.tools.is_empty() {
            Vec::new()
        } else {
            vec![Tool {
                function_declarations: request.tools.iter().map(declaration).collect(),
            }]
        };

        Self {
            system_instruction,
            contents: request.history.iter().map(message_to_wire).collect(),
            tools,
        }
    }
}

impl GenerateContentResponse {
    /// First candidate as a model message
    ///
    /// `None` when there is no candidate or it carries no usable part.
    pub fn into_message(self) -> Option<Message> {
        let content = self.candidates.into_iter().next()?.content?;

        let parts: Vec<Part> = content
            .parts
            .into_iter()
            .filter_map(|part| {
                if let Some(call) = part.function_call {
                    Some(Part::ToolCall(ToolInvocation {
                        name: call.name,
                        args: call.args,
                    }))
                } else if let Some(response) = part.function_response {
                    Some(Part::ToolResult(ToolResult {
                        name: response.name,
                        response: response.response,
                    }))
                } else {
                    part.text.map(Part::Text)
                }
            })
            .collect();

        if parts.is_empty() {
            return None;
        }

        Some(Message {
            role: Role::Model,
            parts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aeonis_core::tools::declarations;

    #[test]
    fn test_request_mapping() {
        let history = vec![
            Message::user("Why is checkout slow?"),
            Message {
                role: Role::Model,
                parts: vec![Part::ToolCall(ToolInvocation {
                    name: "list_branches".to_string(),
                    args: Value::Null,
                })],
            },
            Message::tool_results(vec![ToolResult {
                name: "list_branches".to_string(),
                response: json!({"branches": ["main"]}),
            }]),
        ];
        let tools = declarations();
        let request = CompletionRequest {
            system: "You are Aeonis.",
            tools: &tools,
            history: &history,
        };

        let body = serde_json::to_value(GenerateContentRequest::from_request(&request)).unwrap();

        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "You are Aeonis.");
        assert!(body["systemInstruction"].get("role").is_none());
        assert_eq!(body["contents"][0]["role"], "user");
        assert_eq!(body["contents"][0]["parts"][0]["text"], "Why is checkout slow?");
        assert_eq!(body["contents"][1]["role"], "model");
        assert_eq!(body["contents"][1]["parts"][0]["functionCall"]["name"], "list_branches");
        assert_eq!(body["contents"][1]["parts"][0]["functionCall"]["args"], json!({}));
        assert_eq!(
            body["contents"][2]["parts"][0]["functionResponse"]["response"],
            json!({"branches": ["main"]})
        );

        let declared = body["tools"][0]["functionDeclarations"].as_array().unwrap();
        assert_eq!(declared.len(), 9);
        let list_branches = declared.iter().find(|d| d["name"] == "list_branches").unwrap();
        assert!(list_branches.get("parameters").is_none());
        let history_tool = declared.iter().find(|d| d["name"] == "get_commit_history").unwrap();
        assert_eq!(history_tool["parameters"]["type"], "object");
    }

    #[test]
    fn test_scalar_tool_result_is_wrapped() {
        assert_eq!(response_object(&json!("ok")), json!({"result": "ok"}));
        assert_eq!(response_object(&json!({"a": 1})), json!({"a": 1}));
    }

    #[test]
    fn test_response_with_function_calls() {
        let response: GenerateContentResponse = serde_json::from_value(json!({
            "candidates": [{
                "content": {
                    "role": "model",
                    "parts": [
                        {"text": "Let me look."},
                        {"functionCall": {"name": "get_commit_history", "args": {"limit": 5}}},
                        {"functionCall": {"name": "list_branches"}}
                    ]
                },
                "finishReason": "STOP"
            }],
            "usageMetadata": {"promptTokenCount": 120, "candidatesTokenCount": 14}
        }))
        .unwrap();

        let message = response.into_message().unwrap();
        assert_eq!(message.role, Role::Model);
        assert_eq!(message.text(), "Let me look.");
        let calls = message.tool_calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].args, json!({"limit": 5}));
        assert_eq!(calls[1].name, "list_branches");
        assert!(calls[1].args.is_null());
    }

    #[test]
    fn test_missing_candidates_is_none() {
        let empty: GenerateContentResponse = serde_json::from_value(json!({})).unwrap();
        assert!(empty.into_message().is_none());

        let blocked: GenerateContentResponse = serde_json::from_value(json!({
            "candidates": [{"finishReason": "SAFETY"}]
        }))
        .unwrap();
        assert!(blocked.into_message().is_none());

        let no_parts: GenerateContentResponse = serde_json::from_value(json!({
            "candidates": [{"content": {"role": "model", "parts": []}}]
        }))
        .unwrap();
        assert!(no_parts.into_message().is_none());
    }
}
