//! Translate OpenAI Chat Completions requests into Ollama chat requests.
//!
//! Handles multi-part content (text joined, images lifted into `images`),
//! legacy `function_call` and modern `tool_calls` (arguments parsed into
//! structured JSON), and legacy `functions` definitions. Nothing here fails:
//! anomalies are normalized or dropped, never propagated.

use serde_json::{Map, Value};

use super::ollama_types::{
    FunctionSpec, FunctionTool, OllamaChatRequest, OllamaFunctionCall, OllamaMessage, OllamaTool,
    OllamaToolCall,
};
use super::openai_types::{ChatMessage, ChatRequest, ContentPart, FunctionCall, MessageContent};

/// Top-level keys copied verbatim unless configured otherwise.
pub const DEFAULT_PASSTHROUGH_PARAMS: &[&str] = &[
    "model",
    "stream",
    "temperature",
    "top_p",
    "n",
    "stop",
    "max_tokens",
];

/// Translate an OpenAI request into an Ollama request.
/// Pure function: takes the request + pass-through allow-list, returns the translated request.
pub fn openai_to_ollama<S: AsRef<str>>(req: &ChatRequest, passthrough: &[S]) -> OllamaChatRequest {
    let allowed = |key: &str| passthrough.iter().any(|k| k.as_ref() == key);

    let mut params = Map::new();
    for (key, value) in &req.extra {
        if allowed(key.as_str()) {
            params.insert(key.clone(), value.clone());
        }
    }

    let messages = req.messages.iter().map(translate_message).collect();

    // Legacy definitions win; the two lists are never merged.
    let tools = match (&req.functions, &req.tools) {
        (Some(functions), _) => Some(
            functions
                .iter()
                .map(|f| {
                    OllamaTool::Function(FunctionTool {
                        tool_type: "function".to_string(),
                        function: FunctionSpec {
                            name: f.name.clone(),
                            description: f.description.clone(),
                            parameters: f.parameters.clone(),
                        },
                    })
                })
                .collect(),
        ),
        (None, Some(tools)) => Some(tools.iter().cloned().map(OllamaTool::Verbatim).collect()),
        (None, None) => None,
    };

    OllamaChatRequest {
        model: req.model.clone().filter(|_| allowed("model")),
        messages,
        tools,
        stream: req.stream.filter(|_| allowed("stream")),
        params,
    }
}

fn translate_message(msg: &ChatMessage) -> OllamaMessage {
    let (content, images) = match &msg.content {
        Some(MessageContent::Text(text)) => (text.clone(), None),
        Some(content) => flatten_parts(content.parts().unwrap_or_default()),
        None => (String::new(), None),
    };

    let tool_calls = match (&msg.function_call, &msg.tool_calls) {
        (Some(call), _) => Some(vec![translate_call(call)]),
        (None, Some(calls)) if !calls.is_empty() => Some(
            calls
                .iter()
                .map(|call| translate_call(&call.function))
                .collect(),
        ),
        _ => None,
    };

    OllamaMessage {
        role: msg.role.as_str().to_string(),
        content,
        images,
        tool_calls,
    }
}

/// Join text parts with newlines and collect image URLs, both in order.
fn flatten_parts(parts: &[ContentPart]) -> (String, Option<Vec<String>>) {
    let mut texts = Vec::new();
    let mut images = Vec::new();

    for part in parts {
        match part {
            ContentPart::Text { text } => texts.push(text.as_str()),
            ContentPart::ImageRef { url } => images.push(url.clone()),
            ContentPart::Unsupported => {}
        }
    }

    let images = if images.is_empty() { None } else { Some(images) };
    (texts.join("\n"), images)
}

fn translate_call(call: &FunctionCall) -> OllamaToolCall {
    OllamaToolCall {
        function: OllamaFunctionCall {
            name: call.name.clone().unwrap_or_default(),
            arguments: parse_arguments(call.arguments.as_ref()),
        },
    }
}

/// Arguments arrive as a JSON-encoded string (or, from lenient clients, an
/// object). Anything that does not yield an object becomes `{}`.
fn parse_arguments(arguments: Option<&Value>) -> Value {
    let parsed = match arguments {
        Some(Value::String(raw)) => match serde_json::from_str::<Value>(raw) {
            Ok(value) => value,
            Err(e) => {
                tracing::debug!(error = %e, "Unparseable function arguments, using {{}}");
                Value::Null
            }
        },
        Some(value) => value.clone(),
        None => Value::Null,
    };

    if parsed.is_object() {
        parsed
    } else {
        Value::Object(Map::new())
    }
}
