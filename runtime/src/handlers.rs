//! Per-request-type registrations: handler, validators, fallbacks, cache policy.
//!
//! Registrations are keyed by the request's `TypeId`, so lookups are resolved to
//! the exact request type; there is no matching by name or by supertype.

use crate::layers::cache::CachePolicy;
use relaykit_core::config::ConfigError;
use relaykit_core::request::{FallbackHandler, Validator};
use relaykit_core::{Request, RequestHandler};
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

type Slot = Box<dyn Any + Send + Sync>;

/// Type map of everything registered for each request type.
#[derive(Default)]
pub struct Registrations {
    handlers: HashMap<TypeId, Slot>,
    validators: HashMap<TypeId, Slot>,
    fallbacks: HashMap<TypeId, Slot>,
    cache_policies: HashMap<TypeId, Slot>,
}

impl std::fmt::Debug for Registrations {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registrations")
            .field("handlers", &self.handlers.len())
            .field("validators", &self.validators.len())
            .field("fallbacks", &self.fallbacks.len())
            .field("cache_policies", &self.cache_policies.len())
            .finish()
    }
}

impl Registrations {
    /// Create an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the handler for `R`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] if `R` already has a handler.
    pub fn insert_handler<R: Request>(
        &mut self,
        handler: Arc<dyn RequestHandler<R>>,
    ) -> Result<(), ConfigError> {
        let key = TypeId::of::<R>();
        if self.handlers.contains_key(&key) {
            return Err(ConfigError::ValidationError(format!(
                "Request type '{}' already has a handler",
                R::NAME
            )));
        }
        self.handlers.insert(key, Box::new(handler));
        Ok(())
    }

    /// The handler for `R`, if registered.
    #[must_use]
    pub fn handler<R: Request>(&self) -> Option<Arc<dyn RequestHandler<R>>> {
        self.handlers
            .get(&TypeId::of::<R>())
            .and_then(|slot| slot.downcast_ref::<Arc<dyn RequestHandler<R>>>())
            .cloned()
    }

    /// Add a validator for `R`.
    pub fn add_validator<R: Request>(&mut self, validator: Arc<dyn Validator<R>>) {
        let slot = self
            .validators
            .entry(TypeId::of::<R>())
            .or_insert_with(|| Box::new(Vec::<Arc<dyn Validator<R>>>::new()));
        if let Some(list) = slot.downcast_mut::<Vec<Arc<dyn Validator<R>>>>() {
            list.push(validator);
        }
    }

    /// Validators for `R`, in registration order.
    #[must_use]
    pub fn validators<R: Request>(&self) -> &[Arc<dyn Validator<R>>] {
        self.validators
            .get(&TypeId::of::<R>())
            .and_then(|slot| slot.downcast_ref::<Vec<Arc<dyn Validator<R>>>>())
            .map_or(&[][..], Vec::as_slice)
    }

    /// Add a fallback handler for `R`. Only the first one is ever invoked.
    pub fn add_fallback<R: Request>(&mut self, fallback: Arc<dyn FallbackHandler<R>>) {
        let slot = self
            .fallbacks
            .entry(TypeId::of::<R>())
            .or_insert_with(|| Box::new(Vec::<Arc<dyn FallbackHandler<R>>>::new()));
        if let Some(list) = slot.downcast_mut::<Vec<Arc<dyn FallbackHandler<R>>>>() {
            list.push(fallback);
        }
    }

    /// The fallback handler for `R`, if any.
    #[must_use]
    pub fn fallback<R: Request>(&self) -> Option<Arc<dyn FallbackHandler<R>>> {
        self.fallbacks
            .get(&TypeId::of::<R>())
            .and_then(|slot| slot.downcast_ref::<Vec<Arc<dyn FallbackHandler<R>>>>())
            .and_then(|list| list.first())
            .cloned()
    }

    /// Set the cache policy for `R`, replacing any previous one.
    pub fn set_cache_policy<R: Request>(&mut self, policy: Arc<dyn CachePolicy<R>>) {
        self.cache_policies
            .insert(TypeId::of::<R>(), Box::new(policy));
    }

    /// The cache policy for `R`, if any.
    #[must_use]
    pub fn cache_policy<R: Request>(&self) -> Option<Arc<dyn CachePolicy<R>>> {
        self.cache_policies
            .get(&TypeId::of::<R>())
            .and_then(|slot| slot.downcast_ref::<Arc<dyn CachePolicy<R>>>())
            .cloned()
    }

    /// Whether any request type has a cache policy.
    #[must_use]
    pub fn has_cache_policies(&self) -> bool {
        !self.cache_policies.is_empty()
    }
}
