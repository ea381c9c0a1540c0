//! Cache layer and per-request-type cache policies.
//!
//! A hit returns the stored response without touching any inner layer. A miss
//! runs the inner chain and stores the successful response. Any cache failure is
//! logged and treated as a miss; the cache never fails a request.
//!
//! The default key is
//! `"{namespace}:{request name}:{sha256(json(request) | customer code | attributes)}"`,
//! with attributes in sorted order so equal callers always share a key.

use super::to_json;
use crate::metrics::PipelineMetrics;
use relaykit_core::cache::{CacheExpiration, CacheStore};
use relaykit_core::{PipelineError, Request, RequestContext};
use sha2::{Digest, Sha256};
use std::future::Future;

/// Caching rules for one request type.
pub trait CachePolicy<R: Request>: Send + Sync {
    /// Expirations applied when storing a response.
    fn expiration(&self) -> CacheExpiration;

    /// Key under which the response for `request` from this caller is stored.
    fn cache_key(&self, namespace: &str, request: &R, ctx: &RequestContext) -> String {
        default_cache_key(namespace, request, ctx)
    }
}

/// A cache policy defined only by its expirations.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExpirationPolicy(pub CacheExpiration);

impl<R: Request> CachePolicy<R> for ExpirationPolicy {
    fn expiration(&self) -> CacheExpiration {
        self.0
    }
}

/// Key derived from the request content and the caller's identity.
#[must_use]
pub fn default_cache_key<R: Request>(namespace: &str, request: &R, ctx: &RequestContext) -> String {
    let mut hasher = Sha256::new();
    hasher.update(to_json(request).as_bytes());
    hasher.update(b"|");
    hasher.update(ctx.caller.customer_code.as_deref().unwrap_or_default().as_bytes());
    hasher.update(b"|");
    for (attribute, values) in &ctx.caller.attributes {
        let mut values: Vec<&str> = values.iter().map(String::as_str).collect();
        values.sort_unstable();
        hasher.update(attribute.as_bytes());
        hasher.update(b"=");
        hasher.update(values.join(",").as_bytes());
        hasher.update(b";");
    }
    format!("{namespace}:{}:{:x}", R::NAME, hasher.finalize())
}

/// Serve from cache or run the inner chain and store its response.
///
/// Pass-through when either the store or the policy is absent.
///
/// # Errors
///
/// Whatever the inner chain returns on a miss.
pub async fn run<R, F, Fut>(
    namespace: &str,
    request: &R,
    ctx: &RequestContext,
    store: Option<&dyn CacheStore>,
    policy: Option<&dyn CachePolicy<R>>,
    next: F,
) -> Result<R::Response, PipelineError>
where
    R: Request,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<R::Response, PipelineError>>,
{
    let (Some(store), Some(policy)) = (store, policy) else {
        return next().await;
    };
    let name = R::NAME;
    let key = policy.cache_key(namespace, request, ctx);

    match store.get(&key).await {
        Ok(Some(bytes)) => match serde_json::from_slice::<R::Response>(&bytes) {
            Ok(response) => {
                tracing::debug!(request = name, key = %key, "Serving response from cache");
                PipelineMetrics::record_cache(name, true);
                return Ok(response);
            }
            Err(e) => {
                tracing::warn!(request = name, key = %key, error = %e, "Cached response is unreadable, executing request");
            }
        },
        Ok(None) => {}
        Err(e) => {
            tracing::warn!(request = name, key = %key, error = %e, "Cache read failed, executing request");
        }
    }
    PipelineMetrics::record_cache(name, false);

    let response = next().await?;

    match serde_json::to_vec(&response) {
        Ok(bytes) => {
            if let Err(e) = store.set(&key, bytes, policy.expiration()).await {
                tracing::warn!(request = name, key = %key, error = %e, "Cache write failed");
            }
        }
        Err(e) => {
            tracing::warn!(request = name, error = %e, "Response could not be serialized for cache");
        }
    }

    Ok(response)
}
