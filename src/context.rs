//! Per-request context handed to provider callbacks.

use crate::stop::InFlight;
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Provider-wide value produced by configuration, such as an API client.
pub type Meta = Arc<dyn Any + Send + Sync>;

/// Context for one provider operation.
///
/// Callbacks should watch [`CallContext::cancelled`] during long waits; it
/// fires when the engine stops the provider or the operation's timeout
/// elapses.
#[derive(Clone)]
pub struct CallContext {
    resource_type: String,
    token: CancellationToken,
    deadline: Option<Instant>,
    meta: Option<Meta>,
    _in_flight: Option<Arc<InFlight>>,
}

impl fmt::Debug for CallContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallContext")
            .field("resource_type", &self.resource_type)
            .field("cancelled", &self.token.is_cancelled())
            .field("deadline", &self.deadline)
            .field("has_meta", &self.meta.is_some())
            .finish()
    }
}

impl CallContext {
    /// A detached context, not tied to any stop signal.
    pub fn new(resource_type: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            token: CancellationToken::new(),
            deadline: None,
            meta: None,
            _in_flight: None,
        }
    }

    pub(crate) fn from_in_flight(resource_type: &str, in_flight: InFlight, meta: Option<Meta>) -> Self {
        Self {
            resource_type: resource_type.to_string(),
            token: in_flight.token().clone(),
            deadline: None,
            meta,
            _in_flight: Some(Arc::new(in_flight)),
        }
    }

    /// Attach provider meta.
    pub fn with_meta(mut self, meta: Meta) -> Self {
        self.meta = Some(meta);
        self
    }

    /// Derive a context that is also cancelled once `timeout` elapses. A zero
    /// timeout leaves the context unbounded.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        if timeout.is_zero() {
            return self.clone();
        }
        let deadline = Instant::now() + timeout;
        let token = self.token.child_token();
        let timer = token.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => timer.cancel(),
                _ = timer.cancelled() => {},
            }
        });
        Self {
            token,
            deadline: Some(self.deadline.map_or(deadline, |d| d.min(deadline))),
            ..self.clone()
        }
    }

    /// The resource or data source type the operation is for.
    pub fn resource_type(&self) -> &str {
        &self.resource_type
    }

    /// The cancellation token of this operation.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// True once the operation has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves when the operation is cancelled.
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    /// When the operation's timeout elapses, if it has one.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// The provider meta, downcast to its concrete type.
    pub fn meta<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.meta.as_ref().and_then(|m| m.downcast_ref::<T>())
    }

    pub(crate) fn raw_meta(&self) -> Option<Meta> {
        self.meta.clone()
    }
}
