//! Provider-neutral chat and tool-calling types.
//!
//! These mirror the subset of the OpenAI chat wire format the review
//! pipeline needs: a linear turn list, tool definitions, and an outcome
//! that is either a final message or a batch of tool calls to execute.

use serde_json::Value;

/// One turn in a chat exchange.
#[derive(Debug, Clone)]
pub enum ChatTurn {
    /// System instruction.
    System(String),
    /// User message.
    User(String),
    /// Assistant message; either content, tool calls, or both.
    Assistant {
        content: Option<String>,
        tool_calls: Vec<ToolCall>,
    },
    /// Result of a tool call, echoed back with its call id.
    Tool { call_id: String, content: String },
}

/// Definition of a callable tool, in JSON-Schema parameter form.
#[derive(Debug, Clone)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON schema of the arguments object.
    pub parameters: Value,
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// Raw JSON arguments as the provider sent them.
    pub arguments: String,
}

impl ToolCall {
    /// Parse the raw argument string; malformed arguments become an empty object.
    pub fn arguments_json(&self) -> Value {
        serde_json::from_str(&self.arguments).unwrap_or_else(|_| Value::Object(Default::default()))
    }
}

/// Outcome of one chat round.
#[derive(Debug, Clone)]
pub enum ChatOutcome {
    /// The model produced a final text message.
    Message(String),
    /// The model wants these tools executed before continuing.
    ToolCalls(Vec<ToolCall>),
}

/// Flatten a turn list into a single prompt for providers without a chat
/// surface (Ollama `/api/generate`).
pub fn flatten_turns(turns: &[ChatTurn]) -> String {
    let mut out = String::new();
    for turn in turns {
        match turn {
            ChatTurn::System(s) => {
                out.push_str(s);
                out.push_str("\n\n");
            }
            ChatTurn::User(u) => {
                out.push_str(u);
                out.push_str("\n\n");
            }
            ChatTurn::Assistant { content, .. } => {
                if let Some(c) = content {
                    out.push_str(c);
                    out.push_str("\n\n");
                }
            }
            ChatTurn::Tool { content, .. } => {
                out.push_str("Tool result:\n");
                out.push_str(content);
                out.push_str("\n\n");
            }
        }
    }
    out.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flatten_keeps_order_and_skips_empty_assistant() {
        let turns = vec![
            ChatTurn::System("sys".into()),
            ChatTurn::User("ask".into()),
            ChatTurn::Assistant {
                content: None,
                tool_calls: vec![],
            },
            ChatTurn::Tool {
                call_id: "1".into(),
                content: "data".into(),
            },
        ];
        let flat = flatten_turns(&turns);
        assert!(flat.starts_with("sys"));
        assert!(flat.contains("ask"));
        assert!(flat.contains("Tool result:\ndata"));
    }

    #[test]
    fn malformed_arguments_become_empty_object() {
        let call = ToolCall {
            id: "x".into(),
            name: "t".into(),
            arguments: "{not json".into(),
        };
        assert!(call.arguments_json().as_object().unwrap().is_empty());
    }
}
