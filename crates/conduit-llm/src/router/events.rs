use conduit_ir::ErrorKind;

/// Observable router decisions, one per step of a dispatch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouterEvent {
    /// A backend was chosen for an attempt (1-based)
    BackendSelected {
        request_id: String,
        backend: String,
        attempt: usize,
    },
    /// An attempt failed
    BackendError {
        request_id: String,
        backend: String,
        attempt: usize,
        kind: ErrorKind,
        message: String,
    },
    /// Failing over from one backend to the next
    BackendSwitch {
        request_id: String,
        from: String,
        to: String,
    },
    /// Every candidate failed
    Exhausted { request_id: String, attempts: usize },
}

impl RouterEvent {
    pub(crate) fn log(&self) {
        match self {
            Self::BackendSelected {
                request_id,
                backend,
                attempt,
            } => tracing::debug!(request_id = %request_id, backend = %backend, attempt, "backend selected"),
            Self::BackendError {
                request_id,
                backend,
                attempt,
                kind,
                message,
            } => tracing::warn!(
                request_id = %request_id,
                backend = %backend,
                attempt,
                kind = %kind,
                error = %message,
                "backend attempt failed"
            ),
            Self::BackendSwitch { request_id, from, to } => {
                tracing::warn!(request_id = %request_id, from = %from, to = %to, "failing over to next backend");
            }
            Self::Exhausted { request_id, attempts } => {
                tracing::error!(request_id = %request_id, attempts, "all backends failed");
            }
        }
    }
}
