//! Wire format types for each provider protocol
//!
//! Pure serde structs matching the providers' JSON. Backends serialize them as
//! requests and decode them from responses; frontends use the same shapes in
//! the opposite direction.

pub mod anthropic;
pub mod gemini;
pub mod ollama;
pub mod openai;
