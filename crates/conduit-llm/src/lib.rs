//! Core of Conduit
//!
//! Translates between provider chat APIs (`OpenAI`, Anthropic, Gemini, Ollama)
//! through a shared intermediate representation. A [`Bridge`] pairs one
//! frontend format with one backend, or with a [`Router`] over several, and
//! runs a middleware chain around every call.

#![allow(clippy::must_use_candidate, clippy::missing_errors_doc)]

pub mod backend;
pub mod bridge;
pub mod convert;
pub mod error;
pub mod frontend;
pub mod health;
pub mod middleware;
pub mod protocol;
pub mod router;
pub mod stream;
pub mod transport;

#[cfg(test)]
mod testing;

pub use backend::{Backend, BackendCapabilities, BackendKind, build_backend};
pub use bridge::{Bridge, NativeStream};
pub use error::LlmError;
pub use frontend::{AnthropicFrontend, Frontend, GeminiFrontend, OpenAiFrontend};
pub use middleware::{Middleware, Next};
pub use router::{Router, RouterBuilder, RouterEvent, Strategy};
pub use stream::ChunkStream;
pub use transport::{ReqwestTransport, Transport};
