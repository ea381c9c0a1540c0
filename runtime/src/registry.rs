//! Policy resolution and per-request-type policy state.
//!
//! [`PolicyRegistry`] answers "which descriptor applies to this request type", with
//! the override for the type consulted before the global default. A `None` answer
//! means the layer is a pass-through for that type.
//!
//! [`PolicyInstances`] owns the stateful rate limiters, bulkheads and circuit
//! breakers. Each is created lazily on first use and shared by every execution of
//! the same request type for the lifetime of the pipeline.

use crate::bulkhead::Bulkhead;
use crate::circuit_breaker::CircuitBreaker;
use crate::rate_limiter::RateLimiter;
use dashmap::DashMap;
use relaykit_core::config::ConfigError;
use relaykit_core::policy::{
    BulkheadPolicy, CircuitBreakerPolicy, PolicyOverrides, RateLimitPolicy, ResiliencyConfig,
    RetryPolicy, TimeoutPolicy,
};
use std::collections::HashMap;
use std::sync::Arc;

/// Resolves the effective descriptor per request type.
#[derive(Debug, Clone, Default)]
pub struct PolicyRegistry {
    defaults: ResiliencyConfig,
    overrides: HashMap<String, PolicyOverrides>,
}

fn enabled<'a, P>(
    overridden: Option<&'a P>,
    default: &'a P,
    is_enabled: impl Fn(&P) -> bool,
) -> Option<&'a P> {
    Some(overridden.unwrap_or(default)).filter(|p| is_enabled(p))
}

impl PolicyRegistry {
    /// Create a registry with the given global defaults and no overrides.
    #[must_use]
    pub fn new(defaults: ResiliencyConfig) -> Self {
        Self {
            defaults,
            overrides: HashMap::new(),
        }
    }

    /// Set the overrides for one request type, replacing any previous ones.
    pub fn set_override(&mut self, request: impl Into<String>, overrides: PolicyOverrides) {
        self.overrides.insert(request.into(), overrides);
    }

    /// Replace the global defaults, keeping overrides.
    pub fn set_defaults(&mut self, defaults: ResiliencyConfig) {
        self.defaults = defaults;
    }

    /// Validate the defaults and every override.
    ///
    /// # Errors
    ///
    /// Returns the first invalid enabled descriptor.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.defaults.validate()?;
        for (request, overrides) in &self.overrides {
            overrides.validate().map_err(|e| {
                ConfigError::ValidationError(format!("overrides for '{request}': {e}"))
            })?;
        }
        Ok(())
    }

    /// Global defaults.
    #[must_use]
    pub const fn defaults(&self) -> &ResiliencyConfig {
        &self.defaults
    }

    fn override_for(&self, request: &str) -> Option<&PolicyOverrides> {
        self.overrides.get(request)
    }

    /// Effective rate limit, if enabled.
    #[must_use]
    pub fn rate_limit(&self, request: &str) -> Option<&RateLimitPolicy> {
        let overridden = self.override_for(request).and_then(|o| o.rate_limit.as_ref());
        enabled(overridden, &self.defaults.rate_limit, |p| p.enabled)
    }

    /// Effective bulkhead, if enabled.
    #[must_use]
    pub fn bulkhead(&self, request: &str) -> Option<&BulkheadPolicy> {
        let overridden = self.override_for(request).and_then(|o| o.bulkhead.as_ref());
        enabled(overridden, &self.defaults.bulkhead, |p| p.enabled)
    }

    /// Effective circuit breaker, if enabled.
    #[must_use]
    pub fn circuit_breaker(&self, request: &str) -> Option<&CircuitBreakerPolicy> {
        let overridden = self
            .override_for(request)
            .and_then(|o| o.circuit_breaker.as_ref());
        enabled(overridden, &self.defaults.circuit_breaker, |p| p.enabled)
    }

    /// Effective timeout, if enabled.
    #[must_use]
    pub fn timeout(&self, request: &str) -> Option<&TimeoutPolicy> {
        let overridden = self.override_for(request).and_then(|o| o.timeout.as_ref());
        enabled(overridden, &self.defaults.timeout, |p| p.enabled)
    }

    /// Effective retry policy, if enabled.
    #[must_use]
    pub fn retry(&self, request: &str) -> Option<&RetryPolicy> {
        let overridden = self.override_for(request).and_then(|o| o.retry.as_ref());
        enabled(overridden, &self.defaults.retry, |p| p.enabled)
    }
}

/// Shared policy state keyed by request type name.
#[derive(Debug, Default)]
pub struct PolicyInstances {
    rate_limiters: DashMap<&'static str, Arc<RateLimiter>>,
    bulkheads: DashMap<&'static str, Arc<Bulkhead>>,
    circuit_breakers: DashMap<&'static str, Arc<CircuitBreaker>>,
}

impl PolicyInstances {
    /// Create an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Limiter for `request`, created from `policy` on first use.
    pub fn rate_limiter(&self, request: &'static str, policy: &RateLimitPolicy) -> Arc<RateLimiter> {
        let entry = self
            .rate_limiters
            .entry(request)
            .or_insert_with(|| Arc::new(RateLimiter::new(request, policy)));
        Arc::clone(entry.value())
    }

    /// Bulkhead for `request`, created from `policy` on first use.
    pub fn bulkhead(&self, request: &'static str, policy: &BulkheadPolicy) -> Arc<Bulkhead> {
        let entry = self
            .bulkheads
            .entry(request)
            .or_insert_with(|| Arc::new(Bulkhead::new(request, policy)));
        Arc::clone(entry.value())
    }

    /// Breaker for `request`, created from `policy` on first use.
    pub fn circuit_breaker(
        &self,
        request: &'static str,
        policy: &CircuitBreakerPolicy,
    ) -> Arc<CircuitBreaker> {
        let entry = self
            .circuit_breakers
            .entry(request)
            .or_insert_with(|| Arc::new(CircuitBreaker::new(request, policy)));
        Arc::clone(entry.value())
    }

    /// Existing breaker for `request`, without creating one.
    #[must_use]
    pub fn existing_circuit_breaker(&self, request: &str) -> Option<Arc<CircuitBreaker>> {
        self.circuit_breakers
            .get(request)
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Number of limiters created so far.
    #[must_use]
    pub fn rate_limiter_count(&self) -> usize {
        self.rate_limiters.len()
    }

    /// Number of bulkheads created so far.
    #[must_use]
    pub fn bulkhead_count(&self) -> usize {
        self.bulkheads.len()
    }

    /// Number of breakers created so far.
    #[must_use]
    pub fn circuit_breaker_count(&self) -> usize {
        self.circuit_breakers.len()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn enabled_defaults() -> ResiliencyConfig {
        let mut defaults = ResiliencyConfig::default();
        defaults.rate_limit.enabled = true;
        defaults.timeout.enabled = true;
        defaults
    }

    #[test]
    fn test_default_applies_without_override() {
        let registry = PolicyRegistry::new(enabled_defaults());

        assert_eq!(registry.rate_limit("GetOrderQuery").unwrap().executions, 100);
        assert!(registry.bulkhead("GetOrderQuery").is_none());
        assert!(registry.retry("GetOrderQuery").is_none());
    }

    #[test]
    fn test_override_wins_over_default() {
        let mut registry = PolicyRegistry::new(enabled_defaults());
        registry.set_override(
            "GetOrderQuery",
            PolicyOverrides::default().retry(RetryPolicy {
                enabled: true,
                retry_count: 5,
                ..RetryPolicy::default()
            }),
        );

        assert_eq!(registry.retry("GetOrderQuery").unwrap().retry_count, 5);
        assert!(registry.retry("CreateOrderCommand").is_none());
    }

    #[test]
    fn test_disabled_override_turns_layer_off() {
        let mut registry = PolicyRegistry::new(enabled_defaults());
        registry.set_override(
            "ExportOrdersQuery",
            PolicyOverrides::default().timeout(TimeoutPolicy {
                enabled: false,
                ..TimeoutPolicy::default()
            }),
        );

        assert!(registry.timeout("ExportOrdersQuery").is_none());
        assert!(registry.timeout("GetOrderQuery").is_some());
    }

    #[test]
    fn test_instances_are_created_once_per_type() {
        let instances = PolicyInstances::new();
        let policy = CircuitBreakerPolicy::default();

        let first = instances.circuit_breaker("GetOrderQuery", &policy);
        let second = instances.circuit_breaker("GetOrderQuery", &policy);
        let other = instances.circuit_breaker("CreateOrderCommand", &policy);

        assert!(Arc::ptr_eq(&first, &second));
        assert!(!Arc::ptr_eq(&first, &other));
        assert_eq!(instances.circuit_breaker_count(), 2);
        assert!(instances.existing_circuit_breaker("GetOrderQuery").is_some());
        assert!(instances.existing_circuit_breaker("DeleteOrderCommand").is_none());
    }
}
