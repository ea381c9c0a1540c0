//! The pipeline executor and its builder.
//!
//! [`Pipeline::send`] runs one request through every layer in a fixed order. The
//! order is encoded once here by nesting each layer's `next` closure inside the
//! one outside it; layers never call each other directly.

use crate::handlers::Registrations;
use futures::FutureExt;
use crate::layers::{self, cache::CachePolicy, to_json};
use crate::metrics::PipelineMetrics;
use crate::registry::{PolicyInstances, PolicyRegistry};
use relaykit_core::cache::CacheStore;
use relaykit_core::config::{AppConfig, ConfigError};
use relaykit_core::policy::{PolicyOverrides, ResiliencyConfig};
use relaykit_core::request::{FallbackHandler, Validator};
use relaykit_core::{PipelineError, Request, RequestContext, RequestHandler};
use std::sync::Arc;
use std::time::Duration;

/// Default threshold above which a request is reported as long running.
pub const DEFAULT_SLOW_REQUEST_THRESHOLD: Duration = Duration::from_millis(500);

/// Executes requests through the policy layers.
///
/// Cheap to share behind an `Arc`; every policy instance lives inside.
pub struct Pipeline {
    namespace: String,
    policies: PolicyRegistry,
    instances: PolicyInstances,
    registrations: Registrations,
    cache: Option<Arc<dyn CacheStore>>,
    slow_request_threshold: Duration,
}

impl Pipeline {
    /// Start building a pipeline.
    #[must_use]
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::new()
    }

    /// Execute `request` through every layer and its handler.
    ///
    /// # Errors
    ///
    /// [`PipelineError::Configuration`] when no handler is registered for `R`, or
    /// any failure produced by a layer or the handler.
    pub async fn send<R: Request>(
        &self,
        request: &R,
        ctx: &RequestContext,
    ) -> Result<R::Response, PipelineError> {
        let name = R::NAME;
        tracing::info!(
            request = name,
            user_id = ?ctx.caller.user_id,
            user_name = ?ctx.caller.user_name,
            payload = %to_json(request),
            "Processing request"
        );
        PipelineMetrics::record_request(name);

        let handler = self.registrations.handler::<R>().ok_or_else(|| {
            PipelineError::Configuration(format!("No handler registered for '{name}'"))
        })?;
        let fallback = self.registrations.fallback::<R>();
        let cache_policy = self.registrations.cache_policy::<R>();
        let validators = self.registrations.validators::<R>();
        let cache = self.cache.as_deref();
        let instances = &self.instances;

        let invoke = || handler.handle(request, ctx);
        let retried = || layers::retry::run(name, self.policies.retry(name), ctx, invoke);
        let fallen_back = || layers::fallback::run(request, ctx, fallback.as_deref(), retried);
        let cached = || {
            layers::cache::run(
                &self.namespace,
                request,
                ctx,
                cache,
                cache_policy.as_deref(),
                fallen_back,
            )
            .boxed()
        };
        let timed = || {
            layers::performance::run(request, ctx, self.slow_request_threshold, cached)
        };
        let validated = || layers::validation::run(request, ctx, validators, timed);
        let logged = || layers::request_kind::run(request, validated);
        let guarded = || layers::guard::run(request, ctx, logged);
        let bounded = || layers::timeout::run(name, self.policies.timeout(name), guarded);
        let broken = || {
            layers::circuit_breaker::run(name, self.policies.circuit_breaker(name), instances, bounded)
        };
        let bulkheaded = || {
            layers::bulkhead::run(name, self.policies.bulkhead(name), instances, ctx, broken)
        };

        layers::rate_limit::run(name, self.policies.rate_limit(name), instances, bulkheaded).await
    }

    /// Namespace used for cache keys and durable queue keys.
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Descriptor resolution.
    #[must_use]
    pub const fn policies(&self) -> &PolicyRegistry {
        &self.policies
    }

    /// Shared policy state.
    #[must_use]
    pub const fn instances(&self) -> &PolicyInstances {
        &self.instances
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("namespace", &self.namespace)
            .field("policies", &self.policies)
            .field("registrations", &self.registrations)
            .field("cache", &self.cache.is_some())
            .field("slow_request_threshold", &self.slow_request_threshold)
            .finish_non_exhaustive()
    }
}

/// Builder for [`Pipeline`].
pub struct PipelineBuilder {
    namespace: String,
    policies: PolicyRegistry,
    registrations: Registrations,
    cache: Option<Arc<dyn CacheStore>>,
    slow_request_threshold: Duration,
    error: Option<ConfigError>,
}

impl PipelineBuilder {
    /// Builder with every layer disabled and no registrations.
    #[must_use]
    pub fn new() -> Self {
        Self {
            namespace: "relaykit".to_string(),
            policies: PolicyRegistry::default(),
            registrations: Registrations::new(),
            cache: None,
            slow_request_threshold: DEFAULT_SLOW_REQUEST_THRESHOLD,
            error: None,
        }
    }

    /// Apply namespace, policy defaults, overrides and the slow-request threshold
    /// from the application configuration.
    #[must_use]
    pub fn configure(mut self, config: &AppConfig) -> Self {
        self.namespace.clone_from(&config.app.namespace);
        let mut policies = PolicyRegistry::new(config.resiliency.clone());
        for (request, overrides) in &config.overrides {
            policies.set_override(request.clone(), overrides.clone());
        }
        self.policies = policies;
        self.slow_request_threshold = config.request_performance_threshold();
        self
    }

    /// Set the namespace.
    #[must_use]
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Replace the global policy defaults, keeping overrides.
    #[must_use]
    pub fn resiliency(mut self, defaults: ResiliencyConfig) -> Self {
        self.policies.set_defaults(defaults);
        self
    }

    /// Override policies for one request type.
    #[must_use]
    pub fn override_policies(mut self, request: impl Into<String>, overrides: PolicyOverrides) -> Self {
        self.policies.set_override(request, overrides);
        self
    }

    /// Set the long-running request threshold.
    #[must_use]
    pub fn slow_request_threshold(mut self, threshold: Duration) -> Self {
        self.slow_request_threshold = threshold;
        self
    }

    /// Set the distributed cache.
    #[must_use]
    pub fn cache_store(mut self, store: Arc<dyn CacheStore>) -> Self {
        self.cache = Some(store);
        self
    }

    /// Register the handler for `R`.
    #[must_use]
    pub fn handler<R: Request>(mut self, handler: Arc<dyn RequestHandler<R>>) -> Self {
        if let Err(e) = self.registrations.insert_handler(handler) {
            self.error.get_or_insert(e);
        }
        self
    }

    /// Add a validator for `R`.
    #[must_use]
    pub fn validator<R: Request>(mut self, validator: Arc<dyn Validator<R>>) -> Self {
        self.registrations.add_validator(validator);
        self
    }

    /// Add a fallback handler for `R`.
    #[must_use]
    pub fn fallback<R: Request>(mut self, fallback: Arc<dyn FallbackHandler<R>>) -> Self {
        self.registrations.add_fallback(fallback);
        self
    }

    /// Set the cache policy for `R`.
    #[must_use]
    pub fn cache_policy<R: Request>(mut self, policy: Arc<dyn CachePolicy<R>>) -> Self {
        self.registrations.set_cache_policy(policy);
        self
    }

    /// Validate and build.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] for a duplicate handler, an invalid
    /// enabled descriptor, or cache policies registered without a cache store.
    pub fn build(self) -> Result<Pipeline, ConfigError> {
        if let Some(e) = self.error {
            return Err(e);
        }
        self.policies.validate()?;
        if self.registrations.has_cache_policies() && self.cache.is_none() {
            return Err(ConfigError::ValidationError(
                "Cache policies are registered but no cache store was provided".to_string(),
            ));
        }

        Ok(Pipeline {
            namespace: self.namespace,
            policies: self.policies,
            instances: PolicyInstances::new(),
            registrations: self.registrations,
            cache: self.cache,
            slow_request_threshold: self.slow_request_threshold,
        })
    }
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}
