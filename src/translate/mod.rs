//! API translation from OpenAI chat completions to the Ollama chat format.
//!
//! Only requests are translated. Backend responses are relayed byte-for-byte
//! by [`crate::relay`]. All translation functions are pure (no I/O).

pub mod ollama_types;
pub mod openai_types;
pub mod request;
