//! Response Converter (C6).
//!
//! Normalises whatever an `Invocation::execute` returned as `llm_content`
//! into the canonical function-response part sequence fed back to the
//! model. Conversion is total: it never fails, because a terminal
//! `ToolCall` always needs a well-formed response.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::invocation::{LlmContent, Part};

/// The canonical return shape fed back into the model, keyed by `call_id`
/// and `name`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FunctionResponsePart {
    pub id: String,
    pub name: String,
    pub response: ResponsePayload,
}

/// The `response` object inside a [`FunctionResponsePart`]. Serializes as
/// `{"output": ...}`, `{"error": ...}` or `{"status": ...}` — externally
/// tagged, snake_case.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum ResponsePayload {
    Output(Value),
    Error(String),
    Status(String),
}

impl ResponsePayload {
    pub fn output_text(text: impl Into<String>) -> Self {
        ResponsePayload::Output(Value::String(text.into()))
    }
}

/// A response, ready to feed back to the model: the canonical
/// `FunctionResponsePart` optionally followed by carried media parts.
#[derive(Debug, Clone, PartialEq)]
pub struct ConvertedResponse {
    pub function_response: FunctionResponsePart,
    pub additional_parts: Vec<Part>,
}

const BINARY_PROCESSED_STATUS: &str = "status";
const SUCCEEDED_STATUS: &str = "Tool execution succeeded.";

/// Convert a tool's `llm_content` into a [`ConvertedResponse`] for
/// `call_id`/`tool_name`. Applies the following rules in order.
pub fn convert(call_id: &str, tool_name: &str, content: LlmContent) -> ConvertedResponse {
    match content {
        // Rule 1: bare string.
        LlmContent::Text(text) => ConvertedResponse {
            function_response: FunctionResponsePart {
                id: call_id.to_string(),
                name: tool_name.to_string(),
                response: ResponsePayload::output_text(text),
            },
            additional_parts: Vec::new(),
        },
        // Rule 2: sequence of length 1 unwraps and re-evaluates.
        LlmContent::Parts(mut parts) if parts.len() == 1 => {
            convert_part(call_id, tool_name, parts.pop().expect("len == 1"))
        }
        // Rule 3: sequence of length >= 2.
        LlmContent::Parts(parts) if parts.len() >= 2 => ConvertedResponse {
            function_response: FunctionResponsePart {
                id: call_id.to_string(),
                name: tool_name.to_string(),
                response: ResponsePayload::Status(SUCCEEDED_STATUS.to_string()),
            },
            additional_parts: parts,
        },
        // Empty sequence: no rule covers it explicitly; treat as an empty
        // string output so the response is still well-formed (I3).
        LlmContent::Parts(_) => ConvertedResponse {
            function_response: FunctionResponsePart {
                id: call_id.to_string(),
                name: tool_name.to_string(),
                response: ResponsePayload::output_text(""),
            },
            additional_parts: Vec::new(),
        },
        LlmContent::Part(part) => convert_part(call_id, tool_name, part),
    }
}

fn convert_part(call_id: &str, tool_name: &str, part: Part) -> ConvertedResponse {
    match part {
        // Rule 4 / 5: nested function-response.
        Part::FunctionResponse(nested) => {
            if let ResponsePayload::Output(Value::Object(ref map)) = nested.response {
                if let Some(content) = map.get("content") {
                    let text = match content {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    return ConvertedResponse {
                        function_response: FunctionResponsePart {
                            id: call_id.to_string(),
                            name: tool_name.to_string(),
                            response: ResponsePayload::output_text(text),
                        },
                        additional_parts: Vec::new(),
                    };
                }
            }
            // Rule 5: pass through unchanged.
            ConvertedResponse {
                function_response: nested,
                additional_parts: Vec::new(),
            }
        }
        // Rule 6: inline/file binary data.
        Part::InlineData { mime_type, data } => ConvertedResponse {
            function_response: FunctionResponsePart {
                id: call_id.to_string(),
                name: tool_name.to_string(),
                response: ResponsePayload::Status(binary_status(&mime_type)),
            },
            additional_parts: vec![Part::InlineData { mime_type, data }],
        },
        Part::FileData {
            mime_type,
            file_uri,
        } => ConvertedResponse {
            function_response: FunctionResponsePart {
                id: call_id.to_string(),
                name: tool_name.to_string(),
                response: ResponsePayload::Status(binary_status(&mime_type)),
            },
            additional_parts: vec![Part::FileData {
                mime_type,
                file_uri,
            }],
        },
        // Rule 7: plain text part.
        Part::Text(text) => ConvertedResponse {
            function_response: FunctionResponsePart {
                id: call_id.to_string(),
                name: tool_name.to_string(),
                response: ResponsePayload::output_text(text),
            },
            additional_parts: Vec::new(),
        },
    }
}

fn binary_status(mime_type: &str) -> String {
    format!("Binary content of type {mime_type} was processed.")
}

/// Build a function-response part for an error-terminated `ToolCall`.
pub fn error_response(call_id: &str, tool_name: &str, message: impl Into<String>) -> ConvertedResponse {
    ConvertedResponse {
        function_response: FunctionResponsePart {
            id: call_id.to_string(),
            name: tool_name.to_string(),
            response: ResponsePayload::Error(message.into()),
        },
        additional_parts: Vec::new(),
    }
}
