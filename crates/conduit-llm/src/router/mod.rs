//! Backend-compatible router with failover across several backends

mod events;
mod strategy;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use conduit_config::{CircuitBreakerConfig, RouterConfig};
use conduit_ir::{ChatRequest, ChatResponse};
use futures_util::StreamExt;
use futures_util::stream::FuturesUnordered;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

pub use self::events::RouterEvent;
pub use self::strategy::{SelectFn, Strategy};
use self::strategy::Selector;
use crate::backend::{Backend, BackendCapabilities};
use crate::error::LlmError;
use crate::health::HealthTracker;
use crate::stream::ChunkStream;

const EVENT_CAPACITY: usize = 256;

type Attempt<'a, T> = Pin<Box<dyn Future<Output = Result<T, LlmError>> + Send + 'a>>;

/// Selects among several backends per request
///
/// Attempts run one at a time in strategy order unless parallel dispatch is
/// enabled, in which case the first candidates race and the losers are
/// dropped. Backends with an open circuit are tried last.
pub struct Router {
    name: String,
    backends: Vec<Arc<dyn Backend>>,
    selector: Selector,
    fallback_on_error: bool,
    max_attempts: Option<usize>,
    parallel: Option<usize>,
    health: Option<HealthTracker>,
    events: broadcast::Sender<RouterEvent>,
}

impl Router {
    pub fn builder() -> RouterBuilder {
        RouterBuilder::default()
    }

    /// Router over the configured subset of `backends`, matched by name
    ///
    /// An empty backend list in the configuration selects all of them in
    /// the given order.
    pub fn from_config(config: &RouterConfig, backends: &[Arc<dyn Backend>]) -> Result<Self, LlmError> {
        let selected = if config.backends.is_empty() {
            backends.to_vec()
        } else {
            config
                .backends
                .iter()
                .map(|name| {
                    backends
                        .iter()
                        .find(|backend| backend.name() == name)
                        .cloned()
                        .ok_or_else(|| LlmError::Validation(format!("router references unknown backend '{name}'")))
                })
                .collect::<Result<Vec<_>, _>>()?
        };

        let weights = selected
            .iter()
            .map(|backend| config.weights.get(backend.name()).copied().unwrap_or(1.0))
            .collect();

        let mut builder = Self::builder()
            .backends(selected)
            .strategy(Strategy::from_config(config.strategy, weights))
            .fallback_on_error(config.fallback_on_error);

        if let Some(max_attempts) = config.max_attempts {
            builder = builder.max_attempts(max_attempts);
        }
        if let Some(parallel) = config.parallel {
            builder = builder.parallel(parallel);
        }
        if let Some(circuit_breaker) = &config.circuit_breaker {
            builder = builder.circuit_breaker(circuit_breaker.clone());
        }

        builder.build()
    }

    /// Receive every event emitted after this call
    pub fn subscribe(&self) -> broadcast::Receiver<RouterEvent> {
        self.events.subscribe()
    }

    pub fn backends(&self) -> &[Arc<dyn Backend>] {
        &self.backends
    }

    pub const fn strategy(&self) -> &Strategy {
        self.selector.strategy()
    }

    /// Strategy order with open circuits moved to the end, capped at `max_attempts`
    fn candidates(&self, request: &ChatRequest) -> Vec<usize> {
        let mut order = self.selector.order(request, &self.backends);

        if let Some(health) = &self.health {
            let (available, open): (Vec<usize>, Vec<usize>) = order
                .into_iter()
                .partition(|&index| health.is_available(self.backends[index].name()));

            for &index in &open {
                tracing::debug!(backend = %self.backends[index].name(), "circuit open, deprioritizing backend");
            }

            order = available;
            order.extend(open);
        }

        if let Some(max_attempts) = self.max_attempts {
            order.truncate(max_attempts);
        }
        order
    }

    fn emit(&self, event: RouterEvent) {
        event.log();
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn selected(&self, request_id: &str, backend: &str, attempt: usize) {
        self.emit(RouterEvent::BackendSelected {
            request_id: request_id.to_owned(),
            backend: backend.to_owned(),
            attempt,
        });
    }

    fn succeeded(&self, backend: &str) {
        if let Some(health) = &self.health {
            health.record_success(backend);
        }
    }

    fn failed(&self, request_id: &str, backend: &str, attempt: usize, error: &LlmError) {
        if let Some(health) = &self.health {
            health.record_failure(backend);
        }
        self.emit(RouterEvent::BackendError {
            request_id: request_id.to_owned(),
            backend: backend.to_owned(),
            attempt,
            kind: error.kind(),
            message: error.to_string(),
        });
    }

    /// Run `call` against candidates until one succeeds
    async fn dispatch<'a, T, F>(&'a self, request: &'a ChatRequest, call: F) -> Result<T, LlmError>
    where
        T: Send,
        F: Fn(&'a dyn Backend) -> Attempt<'a, T> + Send + Sync,
    {
        let request_id = request.request_id();
        let order = self.candidates(request);

        let mut attempts = 0;
        let mut last_error = None;
        let mut previous: Option<&str> = None;

        let racing = self.parallel.filter(|&n| n > 1).map_or(0, |n| n.min(order.len()));

        if racing > 0 {
            let mut race = FuturesUnordered::new();
            for &index in &order[..racing] {
                let backend = self.backends[index].as_ref();
                attempts += 1;
                self.selected(request_id, backend.name(), attempts);

                let attempt = attempts;
                let pending = call(backend);
                race.push(async move { (backend, attempt, pending.await) });
            }

            // Dropping the race cancels the losers
            while let Some((backend, attempt, result)) = race.next().await {
                match result {
                    Ok(value) => {
                        self.succeeded(backend.name());
                        return Ok(value);
                    }
                    Err(e) => {
                        self.failed(request_id, backend.name(), attempt, &e);
                        previous = Some(backend.name());
                        last_error = Some(e);
                    }
                }
            }

            if !self.fallback_on_error
                && let Some(e) = last_error.take()
            {
                return Err(e);
            }
        }

        for &index in &order[racing..] {
            let backend = self.backends[index].as_ref();
            attempts += 1;

            if let Some(from) = previous {
                self.emit(RouterEvent::BackendSwitch {
                    request_id: request_id.to_owned(),
                    from: from.to_owned(),
                    to: backend.name().to_owned(),
                });
            }
            self.selected(request_id, backend.name(), attempts);

            match call(backend).await {
                Ok(value) => {
                    self.succeeded(backend.name());
                    return Ok(value);
                }
                Err(e) => {
                    self.failed(request_id, backend.name(), attempts, &e);
                    if !self.fallback_on_error {
                        return Err(e);
                    }
                    previous = Some(backend.name());
                    last_error = Some(e);
                }
            }
        }

        self.emit(RouterEvent::Exhausted {
            request_id: request_id.to_owned(),
            attempts,
        });

        Err(LlmError::Exhausted {
            attempts,
            last: Box::new(last_error.unwrap_or_else(|| LlmError::Validation("router has no candidates".to_owned()))),
        })
    }
}

#[async_trait]
impl Backend for Router {
    fn name(&self) -> &str {
        &self.name
    }

    /// Capabilities every backend shares
    fn capabilities(&self) -> BackendCapabilities {
        self.backends.iter().map(|backend| backend.capabilities()).fold(
            BackendCapabilities {
                streaming: true,
                tool_calling: true,
                vision: true,
            },
            |all, one| BackendCapabilities {
                streaming: all.streaming && one.streaming,
                tool_calling: all.tool_calling && one.tool_calling,
                vision: all.vision && one.vision,
            },
        )
    }

    async fn execute(&self, request: &ChatRequest) -> Result<ChatResponse, LlmError> {
        self.dispatch(request, |backend| backend.execute(request)).await
    }

    /// Failover applies while opening; later failures arrive as error chunks
    async fn execute_stream(&self, request: &ChatRequest, cancel: CancellationToken) -> Result<ChunkStream, LlmError> {
        self.dispatch(request, move |backend| backend.execute_stream(request, cancel.clone()))
            .await
    }

    /// Healthy while any backend is
    async fn health_check(&self) -> bool {
        for backend in &self.backends {
            if backend.health_check().await {
                return true;
            }
        }
        false
    }

    async fn destroy(&self) {
        for backend in &self.backends {
            backend.destroy().await;
        }
    }
}

/// Builder for [`Router`]
pub struct RouterBuilder {
    name: String,
    backends: Vec<Arc<dyn Backend>>,
    strategy: Strategy,
    fallback_on_error: bool,
    max_attempts: Option<usize>,
    parallel: Option<usize>,
    circuit_breaker: Option<CircuitBreakerConfig>,
}

impl Default for RouterBuilder {
    fn default() -> Self {
        Self {
            name: "router".to_owned(),
            backends: Vec::new(),
            strategy: Strategy::default(),
            fallback_on_error: true,
            max_attempts: None,
            parallel: None,
            circuit_breaker: None,
        }
    }
}

impl RouterBuilder {
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    #[must_use]
    pub fn backend(mut self, backend: Arc<dyn Backend>) -> Self {
        self.backends.push(backend);
        self
    }

    #[must_use]
    pub fn backends(mut self, backends: impl IntoIterator<Item = Arc<dyn Backend>>) -> Self {
        self.backends.extend(backends);
        self
    }

    #[must_use]
    pub fn strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }

    #[must_use]
    pub const fn fallback_on_error(mut self, enabled: bool) -> Self {
        self.fallback_on_error = enabled;
        self
    }

    #[must_use]
    pub const fn max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    /// Race this many candidates concurrently before falling back in turn
    #[must_use]
    pub const fn parallel(mut self, racers: usize) -> Self {
        self.parallel = Some(racers);
        self
    }

    #[must_use]
    pub fn circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.circuit_breaker = Some(config);
        self
    }

    pub fn build(self) -> Result<Router, LlmError> {
        if self.backends.is_empty() {
            return Err(LlmError::Validation("router needs at least one backend".to_owned()));
        }
        if self.max_attempts == Some(0) {
            return Err(LlmError::Validation("max_attempts must be at least 1".to_owned()));
        }
        if self.parallel == Some(0) {
            return Err(LlmError::Validation("parallel must be at least 1".to_owned()));
        }
        self.strategy.validate(self.backends.len())?;

        tracing::debug!(
            router = %self.name,
            backends = self.backends.len(),
            strategy = self.strategy.name(),
            fallback_on_error = self.fallback_on_error,
            "router constructed"
        );

        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Ok(Router {
            name: self.name,
            backends: self.backends,
            selector: Selector::new(self.strategy),
            fallback_on_error: self.fallback_on_error,
            max_attempts: self.max_attempts,
            parallel: self.parallel,
            health: self.circuit_breaker.map(HealthTracker::new),
            events,
        })
    }
}
