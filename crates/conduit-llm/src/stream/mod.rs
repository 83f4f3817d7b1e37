//! Stream normalization
//!
//! Providers frame their streams as SSE or newline-delimited JSON, and network
//! reads never line up with either. This module reassembles lines, decodes the
//! framing and hands parsed payloads to a per-provider [`ChunkMapper`].

mod line;
mod normalizer;
mod sse;

use std::pin::Pin;

use conduit_ir::StreamChunk;
use futures_util::Stream;

pub use line::LineBuffer;
pub use normalizer::{ChunkMapper, Framing, Mapped, StreamContext, normalize};
pub use sse::{SseDecoder, SseLine};

/// Lazy, finite, non-restartable sequence of IR chunks
pub type ChunkStream = Pin<Box<dyn Stream<Item = StreamChunk> + Send>>;
