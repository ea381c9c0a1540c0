//! Requests, handlers and the per-call context.
//!
//! A request is a typed unit of work identified by a stable name. The name's suffix
//! decides whether it is a command or a query; anything else is a wiring mistake that
//! the pipeline reports as a configuration error.
//!
//! ```rust,ignore
//! #[derive(Serialize, Deserialize)]
//! struct GetOrderQuery { id: u64 }
//!
//! impl Request for GetOrderQuery {
//!     type Response = Order;
//!     const NAME: &'static str = "GetOrderQuery";
//! }
//!
//! struct GetOrderHandler { db: PgPool }
//!
//! #[async_trait]
//! impl RequestHandler<GetOrderQuery> for GetOrderHandler {
//!     async fn handle(&self, request: &GetOrderQuery, ctx: &RequestContext)
//!         -> Result<Order, PipelineError> { ... }
//! }
//! ```

use crate::error::PipelineError;
use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::fmt;
use tokio_util::sync::CancellationToken;

/// Whether a request mutates state or reads it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    /// State-changing request; only its payload is logged
    Command,
    /// Read-only request; payload and response are logged
    Query,
}

impl RequestKind {
    /// Derive the kind from a request type name.
    ///
    /// Returns `None` when the name ends in neither `Command` nor `Query`.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        if name.ends_with("Command") {
            Some(Self::Command)
        } else if name.ends_with("Query") {
            Some(Self::Query)
        } else {
            None
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Command => f.write_str("command"),
            Self::Query => f.write_str("query"),
        }
    }
}

/// A typed unit of work.
pub trait Request: Serialize + Send + Sync + 'static {
    /// Value produced by the handler.
    type Response: Serialize + DeserializeOwned + Send + Sync + 'static;

    /// Stable type identifier, used as the key for policies, instances and caches.
    const NAME: &'static str;
}

/// Identity of the caller issuing a request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallerIdentity {
    /// Authenticated user id
    pub user_id: Option<String>,
    /// Display name of the user
    pub user_name: Option<String>,
    /// Tenant / customer code
    pub customer_code: Option<String>,
    /// Attribute set granted to the caller (sorted for stable keys)
    pub attributes: BTreeMap<String, Vec<String>>,
}

impl CallerIdentity {
    /// Identity used for background work with no caller.
    #[must_use]
    pub fn system() -> Self {
        Self {
            user_id: None,
            user_name: Some("system".to_string()),
            customer_code: None,
            attributes: BTreeMap::new(),
        }
    }
}

/// Per-call context passed through every layer.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// Caller identity
    pub caller: CallerIdentity,
    /// Cooperative cancellation signal from the caller
    pub cancellation: CancellationToken,
}

impl RequestContext {
    /// Context for a specific caller with a fresh cancellation token.
    #[must_use]
    pub fn new(caller: CallerIdentity) -> Self {
        Self {
            caller,
            cancellation: CancellationToken::new(),
        }
    }

    /// Context for background work (jobs, consumers) tied to a shutdown token.
    #[must_use]
    pub fn system(cancellation: CancellationToken) -> Self {
        Self {
            caller: CallerIdentity::system(),
            cancellation,
        }
    }

    /// Replace the cancellation token.
    #[must_use]
    pub fn with_cancellation(mut self, cancellation: CancellationToken) -> Self {
        self.cancellation = cancellation;
        self
    }

    /// Whether the caller has cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

/// Handles exactly one request type.
#[async_trait]
pub trait RequestHandler<R: Request>: Send + Sync {
    /// Execute the request.
    ///
    /// # Errors
    ///
    /// Any [`PipelineError`]; the pipeline classifies it by kind.
    async fn handle(&self, request: &R, ctx: &RequestContext) -> Result<R::Response, PipelineError>;
}

/// A single validation failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationFailure {
    /// Field the failure applies to
    pub field: String,
    /// Human-readable message
    pub message: String,
}

impl ValidationFailure {
    /// Create a failure for `field`.
    #[must_use]
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Validates one request type; several validators may be registered per type.
#[async_trait]
pub trait Validator<R: Request>: Send + Sync {
    /// Return every failure found, or an empty list.
    async fn validate(&self, request: &R, ctx: &RequestContext) -> Vec<ValidationFailure>;
}

/// Produces a substitute response when the inner chain fails.
#[async_trait]
pub trait FallbackHandler<R: Request>: Send + Sync {
    /// Called with the error that escaped the retry layer.
    ///
    /// # Errors
    ///
    /// The fallback may fail in turn; that error replaces the original.
    async fn handle(
        &self,
        request: &R,
        error: &PipelineError,
        ctx: &RequestContext,
    ) -> Result<R::Response, PipelineError>;
}
