//! Candidate ordering strategies

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use conduit_config::RoutingStrategy;
use conduit_ir::ChatRequest;
use rand::Rng;
use rand::seq::SliceRandom;

use crate::backend::Backend;
use crate::error::LlmError;

/// Caller-supplied selection: returns the index of the first candidate
pub type SelectFn = dyn Fn(&ChatRequest, &[Arc<dyn Backend>]) -> usize + Send + Sync;

/// How the router orders candidates for a dispatch
#[derive(Clone, Default)]
pub enum Strategy {
    /// Rotate the first candidate on every dispatch
    #[default]
    RoundRobin,
    /// Always start from the first backend
    Priority,
    /// Uniformly shuffled order
    Random,
    /// Order sampled without replacement in proportion to per-backend weights
    Weighted(Vec<f64>),
    /// First candidate chosen by a function; the rest follow in rotation
    Custom(Arc<SelectFn>),
}

impl Strategy {
    pub fn custom(select: impl Fn(&ChatRequest, &[Arc<dyn Backend>]) -> usize + Send + Sync + 'static) -> Self {
        Self::Custom(Arc::new(select))
    }

    pub const fn name(&self) -> &'static str {
        match self {
            Self::RoundRobin => "round_robin",
            Self::Priority => "priority",
            Self::Random => "random",
            Self::Weighted(_) => "weighted",
            Self::Custom(_) => "custom",
        }
    }

    /// Strategy for a configured router; `weights` lines up with the backends
    pub fn from_config(strategy: RoutingStrategy, weights: Vec<f64>) -> Self {
        match strategy {
            RoutingStrategy::RoundRobin => Self::RoundRobin,
            RoutingStrategy::Priority => Self::Priority,
            RoutingStrategy::Random => Self::Random,
            RoutingStrategy::Weighted => Self::Weighted(weights),
        }
    }

    pub(crate) fn validate(&self, backends: usize) -> Result<(), LlmError> {
        let Self::Weighted(weights) = self else {
            return Ok(());
        };

        if weights.len() != backends {
            return Err(LlmError::Validation(format!(
                "weighted strategy needs {backends} weights, got {}",
                weights.len()
            )));
        }
        if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(LlmError::Validation("weights must be finite and non-negative".to_owned()));
        }
        let total: f64 = weights.iter().sum();
        if total <= 0.0 {
            return Err(LlmError::Validation("at least one weight must be positive".to_owned()));
        }
        if !total.is_finite() {
            return Err(LlmError::Validation("weights must sum to a finite number".to_owned()));
        }
        Ok(())
    }
}

impl fmt::Debug for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Weighted(weights) => f.debug_tuple("Weighted").field(weights).finish(),
            other => f.write_str(other.name()),
        }
    }
}

/// Strategy plus the round-robin cursor, the router's only cross-request state
pub(crate) struct Selector {
    strategy: Strategy,
    cursor: AtomicUsize,
}

impl Selector {
    pub(crate) const fn new(strategy: Strategy) -> Self {
        Self {
            strategy,
            cursor: AtomicUsize::new(0),
        }
    }

    pub(crate) const fn strategy(&self) -> &Strategy {
        &self.strategy
    }

    /// Every backend index exactly once, in the order to try them
    pub(crate) fn order(&self, request: &ChatRequest, backends: &[Arc<dyn Backend>]) -> Vec<usize> {
        let count = backends.len();
        if count == 0 {
            return Vec::new();
        }

        match &self.strategy {
            Strategy::RoundRobin => rotated(self.cursor.fetch_add(1, Ordering::Relaxed) % count, count),
            Strategy::Priority => (0..count).collect(),
            Strategy::Random => {
                let mut order: Vec<usize> = (0..count).collect();
                order.shuffle(&mut rand::rng());
                order
            }
            Strategy::Weighted(weights) => weighted_order(weights, &mut rand::rng()),
            Strategy::Custom(select) => rotated(select(request, backends) % count, count),
        }
    }
}

fn rotated(start: usize, count: usize) -> Vec<usize> {
    (0..count).map(|offset| (start + offset) % count).collect()
}

/// Weighted sampling without replacement; zero-weight entries go last
fn weighted_order(weights: &[f64], rng: &mut impl Rng) -> Vec<usize> {
    let mut remaining: Vec<usize> = (0..weights.len()).filter(|&i| weights[i] > 0.0).collect();
    let mut order = Vec::with_capacity(weights.len());

    while !remaining.is_empty() {
        let total: f64 = remaining.iter().map(|&i| weights[i]).sum();
        let mut point = rng.random_range(0.0..total);

        let mut picked = remaining.len() - 1;
        for (position, &index) in remaining.iter().enumerate() {
            if point < weights[index] {
                picked = position;
                break;
            }
            point -= weights[index];
        }
        order.push(remaining.remove(picked));
    }

    order.extend((0..weights.len()).filter(|&i| weights[i] <= 0.0));
    order
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use conduit_ir::Message;

    use super::*;
    use crate::testing::ScriptedBackend;

    fn backends(count: usize) -> Vec<Arc<dyn Backend>> {
        (0..count)
            .map(|i| Arc::new(ScriptedBackend::replying(&format!("b{i}"), "OK")) as Arc<dyn Backend>)
            .collect()
    }

    fn request() -> ChatRequest {
        ChatRequest::new("m", vec![Message::user("hi")])
    }

    fn is_permutation(order: &[usize], count: usize) -> bool {
        order.len() == count && order.iter().copied().collect::<HashSet<_>>().len() == count
    }

    #[test]
    fn round_robin_rotates_the_start() {
        let selector = Selector::new(Strategy::RoundRobin);
        let backends = backends(3);

        assert_eq!(selector.order(&request(), &backends), vec![0, 1, 2]);
        assert_eq!(selector.order(&request(), &backends), vec![1, 2, 0]);
        assert_eq!(selector.order(&request(), &backends), vec![2, 0, 1]);
        assert_eq!(selector.order(&request(), &backends), vec![0, 1, 2]);
    }

    #[test]
    fn priority_is_stable() {
        let selector = Selector::new(Strategy::Priority);
        let backends = backends(3);
        for _ in 0..5 {
            assert_eq!(selector.order(&request(), &backends), vec![0, 1, 2]);
        }
    }

    #[test]
    fn random_is_a_permutation() {
        let selector = Selector::new(Strategy::Random);
        let backends = backends(4);
        for _ in 0..20 {
            assert!(is_permutation(&selector.order(&request(), &backends), 4));
        }
    }

    #[test]
    fn weighted_skips_zero_weights_until_last() {
        let selector = Selector::new(Strategy::Weighted(vec![0.0, 1.0, 0.0]));
        let backends = backends(3);
        for _ in 0..20 {
            assert_eq!(selector.order(&request(), &backends), vec![1, 0, 2]);
        }
    }

    #[test]
    fn weighted_follows_proportions() {
        let mut rng = rand::rng();
        let weights = [9.0, 1.0];
        let first_is_heavy = (0..1000).filter(|_| weighted_order(&weights, &mut rng)[0] == 0).count();
        assert!(first_is_heavy > 800, "heavy backend first {first_is_heavy} times");
    }

    #[test]
    fn custom_chooses_the_first_candidate() {
        let selector = Selector::new(Strategy::custom(|_, backends| backends.len() - 1));
        assert_eq!(selector.order(&request(), &backends(3)), vec![2, 0, 1]);
    }

    #[test]
    fn weight_validation() {
        assert!(Strategy::Weighted(vec![1.0]).validate(2).is_err());
        assert!(Strategy::Weighted(vec![0.0, 0.0]).validate(2).is_err());
        assert!(Strategy::Weighted(vec![-1.0, 2.0]).validate(2).is_err());
        assert!(Strategy::Weighted(vec![f64::MAX, f64::MAX]).validate(2).is_err());
        assert!(Strategy::Weighted(vec![0.0, 2.0]).validate(2).is_ok());
        assert!(Strategy::Priority.validate(2).is_ok());
    }
}
