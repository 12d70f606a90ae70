//! Translation of history and tools into the chat-completions wire schema.

use serde_json::{json, Map, Value};

use super::{ProviderRequest, ToolDefinition};
use crate::types::{Message, Role, ToolCall};

/// Convert message history into wire messages.
pub fn messages_to_wire(messages: &[Message]) -> Vec<Value> {
    messages.iter().map(message_to_wire).collect()
}

/// Convert one message into its wire form.
pub fn message_to_wire(msg: &Message) -> Value {
    match msg.role {
        Role::Tool => json!({
            "role": "tool",
            "tool_call_id": msg.tool_call_id.clone().unwrap_or_default(),
            "content": msg.content,
        }),
        Role::Assistant => {
            let mut obj = Map::new();
            obj.insert("role".into(), "assistant".into());
            if !msg.content.is_empty() {
                obj.insert("content".into(), msg.content.clone().into());
            }
            if msg.has_tool_calls() {
                let calls = msg.tool_calls.iter().map(tool_call_to_wire).collect::<Vec<_>>();
                obj.insert("tool_calls".into(), calls.into());
            }
            Value::Object(obj)
        }
        Role::System | Role::User => json!({
            "role": msg.role.to_string(),
            "content": msg.content,
        }),
    }
}

fn tool_call_to_wire(call: &ToolCall) -> Value {
    json!({
        "id": call.id,
        "type": "function",
        "function": {
            "name": call.name,
            "arguments": arguments_to_string(&call.arguments),
        }
    })
}

/// Arguments travel as a JSON-encoded string; a raw string is passed through.
pub(crate) fn arguments_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Convert a tool definition into a function-tool entry.
///
/// Some providers reject tools without a description, so the name stands in.
pub fn tool_to_wire(tool: &ToolDefinition) -> Value {
    let description = if tool.description.is_empty() {
        tool.name.as_str()
    } else {
        tool.description.as_str()
    };
    json!({
        "type": "function",
        "function": {
            "name": tool.name,
            "description": description,
            "parameters": tool.parameters,
        }
    })
}

/// Build the JSON body of a streamed chat-completions request.
pub fn request_body(model: &str, request: &ProviderRequest) -> Value {
    let mut body = json!({
        "model": model,
        "messages": messages_to_wire(&request.messages),
        "stream": true,
    });

    let Some(obj) = body.as_object_mut() else {
        return body;
    };

    let settings = &request.settings;
    if let Some(max) = settings.max_tokens {
        obj.insert("max_tokens".into(), max.into());
    }
    if let Some(temp) = settings.temperature {
        obj.insert("temperature".into(), temp.into());
    }
    if let Some(top_p) = settings.top_p {
        obj.insert("top_p".into(), top_p.into());
    }
    if let Some(ref stops) = settings.stop_sequences {
        obj.insert("stop".into(), json!(stops));
    }

    if !request.tools.is_empty() {
        let tools = request.tools.iter().map(tool_to_wire).collect::<Vec<_>>();
        obj.insert("tools".into(), tools.into());
        obj.insert("tool_choice".into(), "auto".into());
    }

    body
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GenerationSettings;
    use pretty_assertions::assert_eq;

    #[test]
    fn assistant_tool_calls_are_stringified_and_empty_content_omitted() {
        let msg = Message::assistant_with_tool_calls(
            "",
            vec![ToolCall {
                id: "call_1".into(),
                name: "lookup".into(),
                arguments: json!({"q": "kyoto"}),
            }],
        );

        assert_eq!(
            message_to_wire(&msg),
            json!({
                "role": "assistant",
                "tool_calls": [{
                    "id": "call_1",
                    "type": "function",
                    "function": {"name": "lookup", "arguments": "{\"q\":\"kyoto\"}"}
                }]
            })
        );
    }

    #[test]
    fn tool_results_map_to_tool_role() {
        let wire = messages_to_wire(&[
            Message::system("be brief"),
            Message::user("hi"),
            Message::tool_result("call_9", "42"),
        ]);
        assert_eq!(wire[0], json!({"role": "system", "content": "be brief"}));
        assert_eq!(wire[1], json!({"role": "user", "content": "hi"}));
        assert_eq!(
            wire[2],
            json!({"role": "tool", "tool_call_id": "call_9", "content": "42"})
        );
    }

    #[test]
    fn tool_without_description_falls_back_to_name() {
        let tool = ToolDefinition {
            name: "clock".into(),
            description: String::new(),
            parameters: json!({"type": "object"}),
        };
        assert_eq!(tool_to_wire(&tool)["function"]["description"], "clock");
    }

    #[test]
    fn request_body_includes_settings_and_tools() {
        let request = ProviderRequest {
            messages: vec![Message::user("hi")],
            tools: vec![ToolDefinition {
                name: "clock".into(),
                description: "time".into(),
                parameters: json!({"type": "object"}),
            }],
            settings: GenerationSettings::builder().max_tokens(64).temperature(0.5).build(),
        };

        let body = request_body("glm-4", &request);
        assert_eq!(body["model"], "glm-4");
        assert_eq!(body["stream"], true);
        assert_eq!(body["max_tokens"], 64);
        assert_eq!(body["temperature"], 0.5);
        assert_eq!(body["tool_choice"], "auto");
        assert!(body.get("top_p").is_none());
        assert_eq!(body["tools"].as_array().map(Vec::len), Some(1));
    }
}
