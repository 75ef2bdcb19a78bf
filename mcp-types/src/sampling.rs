use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

/// Declares that a client can answer server-initiated
/// `sampling/createMessage` requests. The inner `tools` value is an
/// empty object on the wire (`capabilities: { sampling: { tools: {} } }`,
/// §4.F); its presence, not its content, is what matters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplingCapability {
    #[serde(default = "empty_object")]
    pub tools: Value,
}

impl Default for SamplingCapability {
    fn default() -> Self {
        Self {
            tools: empty_object(),
        }
    }
}

fn empty_object() -> Value {
    Value::Object(serde_json::Map::new())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SamplingRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SamplingContent {
    Text { text: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplingMessage {
    pub role: SamplingRole,
    pub content: SamplingContent,
}

/// Params of the server-initiated `sampling/createMessage` request that
/// drives one iteration of the AI analyzer loop (§4.I). `tools` mirrors
/// `tools/list` shape so the client can dispatch a returned tool call
/// straight back through its own `tools/call` handling without a
/// separate schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateMessageParams {
    pub messages: Vec<SamplingMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    pub max_tokens: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Value>,
}

/// Why the model stopped: `"tool_call"` means `content` carries a
/// structured call the orchestrator should execute and feed back in the
/// next iteration; `"end_turn"` means the model considers the analysis
/// complete.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateMessageResult {
    pub role: SamplingRole,
    pub content: SamplingContent,
    pub model: String,
    pub stop_reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sampling_capability_serializes_tools_as_empty_object_by_default() {
        let cap = SamplingCapability::default();
        let v = serde_json::to_value(&cap).unwrap();
        assert_eq!(v, serde_json::json!({"tools": {}}));
    }

    #[test]
    fn create_message_params_omit_optional_fields() {
        let params = CreateMessageParams {
            messages: vec![SamplingMessage {
                role: SamplingRole::User,
                content: SamplingContent::Text { text: "hi".into() },
            }],
            system_prompt: None,
            max_tokens: 512,
            tools: None,
        };
        let v = serde_json::to_value(&params).unwrap();
        assert!(v.get("systemPrompt").is_none());
        assert!(v.get("tools").is_none());
    }
}
