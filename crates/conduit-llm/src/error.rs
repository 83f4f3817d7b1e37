use std::time::Duration;

use conduit_ir::{ErrorKind, StreamChunk, StreamFailure};
use http::{HeaderMap, StatusCode};
use thiserror::Error;

/// Errors raised while translating, dispatching or streaming a request
#[derive(Debug, Error)]
pub enum LlmError {
    /// Malformed or incomplete input, including missing credentials
    #[error("invalid request: {0}")]
    Validation(String),

    /// Provider rejected the credentials
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Provider or local limiter applied backpressure
    #[error("rate limited: {message}")]
    RateLimited {
        message: String,
        /// Hint for when to try again
        retry_after: Option<Duration>,
    },

    /// Transport failure or timeout
    #[error("network error: {0}")]
    Network(String),

    /// Provider answered with a non-success status
    #[error("provider returned {status}: {body}")]
    Provider { status: u16, body: String },

    /// Malformed framing in the middle of a stream
    #[error("stream error: {0}")]
    Stream(String),

    /// Every router candidate failed
    #[error("all {attempts} backend attempts failed, last error: {last}")]
    Exhausted { attempts: usize, last: Box<LlmError> },

    /// Unexpected internal error
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl LlmError {
    /// Classify a non-success provider response
    pub fn from_status(status: StatusCode, headers: &HeaderMap, body: String) -> Self {
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Self::Authentication(body),
            StatusCode::TOO_MANY_REQUESTS => Self::RateLimited {
                message: body,
                retry_after: retry_after(headers),
            },
            _ => Self::Provider {
                status: status.as_u16(),
                body,
            },
        }
    }

    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::Authentication(_) => ErrorKind::Authentication,
            Self::RateLimited { .. } => ErrorKind::RateLimit,
            Self::Network(_) => ErrorKind::Network,
            Self::Provider { .. } => ErrorKind::Provider,
            Self::Stream(_) => ErrorKind::Stream,
            Self::Exhausted { .. } => ErrorKind::Exhausted,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Whether repeating the same request may succeed
    ///
    /// Validation and authentication failures never are. Provider errors are
    /// retryable for timeouts, conflicts, throttling and server errors.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimited { .. } | Self::Network(_) | Self::Stream(_) => true,
            Self::Provider { status, .. } => matches!(status, 408 | 409 | 429) || *status >= 500,
            Self::Exhausted { last, .. } => last.is_retryable(),
            Self::Validation(_) | Self::Authentication(_) | Self::Internal(_) => false,
        }
    }

    /// Delay requested by the provider, if any
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } => *retry_after,
            Self::Exhausted { last, .. } => last.retry_after(),
            _ => None,
        }
    }

    /// Upstream HTTP status, if the error came from one
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Provider { status, .. } => Some(*status),
            Self::Authentication(_) => Some(401),
            Self::RateLimited { .. } => Some(429),
            _ => None,
        }
    }

    /// Render as a terminal error chunk
    ///
    /// The chunk carries the bare detail; `kind` restores the variant.
    pub fn to_chunk(&self) -> StreamChunk {
        StreamChunk::Error {
            kind: self.kind(),
            message: self.detail(),
            status: self.status(),
        }
    }

    fn detail(&self) -> String {
        match self {
            Self::Validation(message)
            | Self::Authentication(message)
            | Self::RateLimited { message, .. }
            | Self::Network(message)
            | Self::Stream(message)
            | Self::Provider { body: message, .. } => message.clone(),
            Self::Internal(e) => e.to_string(),
            Self::Exhausted { .. } => self.to_string(),
        }
    }
}

impl From<StreamFailure> for LlmError {
    fn from(failure: StreamFailure) -> Self {
        let StreamFailure { kind, message, status } = failure;
        match kind {
            ErrorKind::Validation => Self::Validation(message),
            ErrorKind::Authentication => Self::Authentication(message),
            ErrorKind::RateLimit => Self::RateLimited {
                message,
                retry_after: None,
            },
            ErrorKind::Network => Self::Network(message),
            ErrorKind::Provider => Self::Provider {
                status: status.unwrap_or(StatusCode::BAD_GATEWAY.as_u16()),
                body: message,
            },
            ErrorKind::Stream | ErrorKind::Exhausted => Self::Stream(message),
            ErrorKind::Internal => Self::Internal(anyhow::anyhow!(message)),
        }
    }
}

/// Parse a `retry-after` header given in whole seconds
fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(http::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}
