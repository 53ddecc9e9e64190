//! Inbound types for the [OpenAI Chat Completions API](https://platform.openai.com/docs/api-reference/chat).
//!
//! Only the fields the translator reads are modelled. Everything else at the
//! top level lands in [`ChatRequest::extra`] and is filtered by the
//! pass-through allow-list later. Parsing is lenient below `messages`: odd
//! content parts or call arguments are tolerated here and normalized during
//! translation.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};

use crate::error::{Result, ShimError};

// ---------------------------------------------------------------------------
// Request types (what the client sends TO us)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    #[serde(default, deserialize_with = "lenient")]
    pub model: Option<String>,
    #[serde(deserialize_with = "lenient_seq")]
    pub messages: Vec<ChatMessage>,
    #[serde(default, deserialize_with = "lenient")]
    pub stream: Option<bool>,
    /// Legacy function definitions.
    #[serde(default, deserialize_with = "lenient_list")]
    pub functions: Option<Vec<FunctionDefinition>>,
    /// Modern tool definitions, already in the backend's shape.
    #[serde(default, deserialize_with = "lenient")]
    pub tools: Option<Vec<Value>>,
    // Sampling parameters and anything else the client sent
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ChatRequest {
    /// Parse a raw request body.
    ///
    /// Fails with [`ShimError::MalformedRequest`] when the body is not JSON,
    /// is not an object, or lacks a `messages` array.
    pub fn from_slice(body: &[u8]) -> Result<Self> {
        let value: Value = serde_json::from_slice(body)
            .map_err(|e| ShimError::malformed(format!("body is not valid JSON: {e}")))?;

        let Some(object) = value.as_object() else {
            return Err(ShimError::malformed("body must be a JSON object"));
        };

        match object.get("messages") {
            Some(Value::Array(_)) => {}
            Some(_) => return Err(ShimError::malformed("`messages` must be an array")),
            None => return Err(ShimError::malformed("`messages` is required")),
        }

        serde_json::from_value(value).map_err(|e| ShimError::malformed(e.to_string()))
    }
}

/// Decode a value, dropping it when it has the wrong shape.
fn lenient<'de, D, T>(deserializer: D) -> std::result::Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).ok())
}

/// Like [`lenient`], falling back to `T::default()`.
fn lenient_or_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    Ok(lenient(deserializer)?.unwrap_or_default())
}

/// Decode a list, dropping entries that have the wrong shape. Anything that
/// is not an array becomes `None`.
fn lenient_list<'de, D, T>(deserializer: D) -> std::result::Result<Option<Vec<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let Value::Array(items) = Value::deserialize(deserializer)? else {
        return Ok(None);
    };
    let total = items.len();
    let kept: Vec<T> = items
        .into_iter()
        .filter_map(|item| serde_json::from_value(item).ok())
        .collect();
    if kept.len() < total {
        tracing::debug!(dropped = total - kept.len(), "Dropped malformed list entries");
    }
    Ok(Some(kept))
}

fn lenient_seq<'de, D, T>(deserializer: D) -> std::result::Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    Ok(lenient_list(deserializer)?.unwrap_or_default())
}

/// Message role. Unknown roles (e.g. the legacy "function" role) are carried
/// through untouched; a missing or non-string role becomes `Other("")`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "Value")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
    Other(String),
}

impl Default for Role {
    fn default() -> Self {
        Self::Other(String::new())
    }
}

impl From<Value> for Role {
    fn from(value: Value) -> Self {
        match value.as_str() {
            Some("system") => Self::System,
            Some("user") => Self::User,
            Some("assistant") => Self::Assistant,
            Some("tool") => Self::Tool,
            Some(other) => Self::Other(other.to_string()),
            None => Self::default(),
        }
    }
}

impl Role {
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
            Self::Other(role) => role,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatMessage {
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub content: Option<MessageContent>,
    #[serde(default, deserialize_with = "lenient")]
    pub function_call: Option<FunctionCall>,
    #[serde(default, deserialize_with = "lenient_list")]
    pub tool_calls: Option<Vec<ToolCall>>,
}

/// Message content in any of the shapes clients send.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
    /// A lone part object instead of a list.
    Part(ContentPart),
}

impl MessageContent {
    /// View the content as an ordered slice of parts, if it is not plain text.
    #[must_use]
    pub fn parts(&self) -> Option<&[ContentPart]> {
        match self {
            Self::Text(_) => None,
            Self::Parts(parts) => Some(parts),
            Self::Part(part) => Some(std::slice::from_ref(part)),
        }
    }
}

/// One unit of multimodal content.
///
/// Decoding never fails: anything that is not a recognisable text or image
/// part becomes [`ContentPart::Unsupported`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "Value")]
pub enum ContentPart {
    Text { text: String },
    ImageRef { url: String },
    Unsupported,
}

impl From<Value> for ContentPart {
    fn from(value: Value) -> Self {
        if let Value::String(text) = value {
            return Self::Text { text };
        }
        match value.get("type").and_then(Value::as_str) {
            Some("text") => Self::Text {
                text: value
                    .get("text")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            },
            Some("image_url") => {
                let url = match value.get("image_url") {
                    Some(Value::String(url)) => Some(url.clone()),
                    Some(detail) => detail.get("url").and_then(Value::as_str).map(String::from),
                    None => None,
                };
                url.map_or(Self::Unsupported, |url| Self::ImageRef { url })
            }
            _ => Self::Unsupported,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FunctionDefinition {
    #[serde(default, deserialize_with = "lenient")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub description: Option<String>,
    #[serde(default)]
    pub parameters: Option<Value>,
}

/// Legacy single `function_call`, arguments usually a JSON-encoded string.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FunctionCall {
    #[serde(default, deserialize_with = "lenient")]
    pub name: Option<String>,
    #[serde(default)]
    pub arguments: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ToolCall {
    #[serde(default, deserialize_with = "lenient")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "lenient_or_default")]
    pub function: FunctionCall,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(value: Value) -> Result<ChatRequest> {
        ChatRequest::from_slice(value.to_string().as_bytes())
    }

    #[test]
    fn test_rejects_invalid_json() {
        let err = ChatRequest::from_slice(b"{not json").unwrap_err();
        assert!(matches!(err, ShimError::MalformedRequest { .. }));
    }

    #[test]
    fn test_rejects_missing_messages() {
        let err = parse(json!({"model": "llama3"})).unwrap_err();
        assert!(err.to_string().contains("`messages` is required"));
    }

    #[test]
    fn test_rejects_non_array_messages() {
        let err = parse(json!({"model": "llama3", "messages": "hi"})).unwrap_err();
        assert!(matches!(err, ShimError::MalformedRequest { .. }));
    }

    #[test]
    fn test_rejects_non_object_body() {
        let err = parse(json!([1, 2, 3])).unwrap_err();
        assert!(matches!(err, ShimError::MalformedRequest { .. }));
    }

    #[test]
    fn test_captures_extra_params() {
        let req = parse(json!({
            "model": "llama3",
            "messages": [],
            "temperature": 0.2,
            "logit_bias": {"50256": -100}
        }))
        .unwrap();

        assert_eq!(req.model.as_deref(), Some("llama3"));
        assert_eq!(req.extra.get("temperature"), Some(&json!(0.2)));
        assert!(req.extra.contains_key("logit_bias"));
        assert!(!req.extra.contains_key("messages"));
    }

    #[test]
    fn test_content_shapes() {
        let req = parse(json!({
            "messages": [
                {"role": "user", "content": "plain"},
                {"role": "user", "content": [
                    {"type": "text", "text": "a"},
                    {"type": "image_url", "image_url": {"url": "http://x/1.png", "detail": "low"}},
                    {"type": "image_url", "image_url": "http://x/2.png"},
                    {"type": "input_audio", "input_audio": {"data": "..."}},
                    {"type": "text"},
                    "bare"
                ]},
                {"role": "user", "content": {"type": "text", "text": "lone"}},
                {"role": "assistant", "content": null}
            ]
        }))
        .unwrap();

        assert!(matches!(req.messages[0].content, Some(MessageContent::Text(ref t)) if t == "plain"));

        let parts = req.messages[1].content.as_ref().unwrap().parts().unwrap();
        assert_eq!(
            parts,
            &[
                ContentPart::Text { text: "a".into() },
                ContentPart::ImageRef { url: "http://x/1.png".into() },
                ContentPart::ImageRef { url: "http://x/2.png".into() },
                ContentPart::Unsupported,
                ContentPart::Text { text: String::new() },
                ContentPart::Text { text: "bare".into() },
            ]
        );

        let lone = req.messages[2].content.as_ref().unwrap().parts().unwrap();
        assert_eq!(lone, &[ContentPart::Text { text: "lone".into() }]);

        assert!(req.messages[3].content.is_none());
    }

    #[test]
    fn test_unknown_role_is_kept() {
        let req = parse(json!({
            "messages": [
                {"role": "tool", "content": "42"},
                {"role": "function", "content": "43"}
            ]
        }))
        .unwrap();

        assert_eq!(req.messages[0].role, Role::Tool);
        assert_eq!(req.messages[1].role, Role::Other("function".into()));
        assert_eq!(req.messages[1].role.as_str(), "function");
    }

    #[test]
    fn test_tolerates_malformed_details_below_messages() {
        let req = parse(json!({
            "stream": "true",
            "model": 7,
            "functions": ["not-an-object", {"name": 3, "description": "kept"}],
            "tools": "nope",
            "messages": [
                {"content": "no role"},
                {"role": 5, "content": "numeric role"},
                {"role": "assistant", "function_call": {"name": 7, "arguments": "{}"}},
                {"role": "assistant", "function_call": "lookup"},
                {"role": "assistant", "tool_calls": [
                    {"id": "c1", "type": "function"},
                    {"id": "c2", "function": "broken"},
                    "junk"
                ]},
                "not a message"
            ]
        }))
        .unwrap();

        assert_eq!(req.stream, None);
        assert_eq!(req.model, None);
        assert!(req.tools.is_none());

        let functions = req.functions.as_ref().unwrap();
        assert_eq!(functions.len(), 1);
        assert_eq!(functions[0].name, None);
        assert_eq!(functions[0].description.as_deref(), Some("kept"));

        assert_eq!(req.messages.len(), 5);
        assert_eq!(req.messages[0].role, Role::Other(String::new()));
        assert_eq!(req.messages[0].role.as_str(), "");
        assert_eq!(req.messages[1].role, Role::Other(String::new()));

        let call = req.messages[2].function_call.as_ref().unwrap();
        assert_eq!(call.name, None);
        assert_eq!(call.arguments, Some(json!("{}")));
        assert!(req.messages[3].function_call.is_none());

        let calls = req.messages[4].tool_calls.as_ref().unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].id.as_deref(), Some("c1"));
        assert_eq!(calls[0].function.name, None);
        assert_eq!(calls[1].function.name, None);
    }
}
