//! Caller identity and deferred resolution
//!
//! `DeferredIdentity` wraps a shared future: the first consumer to poll it
//! runs the resolution, every later consumer (clones included) observes the
//! cached outcome. One handle is created per call and dropped with it, so
//! nothing is cached across calls.

use crate::decision::DenialReason;
use crate::errors::{VigilError, VigilResult};
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, trace};

/// Prefix applied to role names when stored as authorities.
pub const ROLE_PREFIX: &str = "ROLE_";

/// Resolved caller identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    principal: String,
    authorities: BTreeSet<String>,
    #[serde(default)]
    attributes: BTreeMap<String, Value>,
}

impl Identity {
    /// Create an identity with no authorities.
    pub fn new(principal: impl Into<String>) -> Self {
        Self {
            principal: principal.into(),
            authorities: BTreeSet::new(),
            attributes: BTreeMap::new(),
        }
    }

    /// Add an authority.
    pub fn with_authority(mut self, authority: impl Into<String>) -> Self {
        self.authorities.insert(authority.into());
        self
    }

    /// Add a role, stored as a `ROLE_`-prefixed authority.
    pub fn with_role(mut self, role: impl AsRef<str>) -> Self {
        self.authorities.insert(role_authority(role.as_ref()));
        self
    }

    /// Attach an attribute.
    pub fn with_attribute(mut self, key: impl Into<String>, value: Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    /// Principal name.
    pub fn principal(&self) -> &str {
        &self.principal
    }

    /// Granted authorities.
    pub fn authorities(&self) -> &BTreeSet<String> {
        &self.authorities
    }

    /// Attribute lookup.
    pub fn attribute(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    /// Returns `true` if the identity holds `authority`.
    pub fn has_authority(&self, authority: &str) -> bool {
        self.authorities.contains(authority)
    }

    /// Returns `true` if the identity holds any of `authorities`.
    pub fn has_any_authority<I, S>(&self, authorities: I) -> bool
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        authorities
            .into_iter()
            .any(|authority| self.has_authority(authority.as_ref()))
    }

    /// Returns `true` if the identity holds `role`; a missing prefix is added.
    pub fn has_role(&self, role: &str) -> bool {
        self.has_authority(&role_authority(role))
    }
}

fn role_authority(role: &str) -> String {
    if role.starts_with(ROLE_PREFIX) {
        role.to_string()
    } else {
        format!("{ROLE_PREFIX}{role}")
    }
}

/// Outcome of identity resolution; `None` means no identity is present.
pub type IdentityResolution = VigilResult<Option<Arc<Identity>>>;

/// Lazily-resolved reference to the caller's identity.
#[derive(Clone)]
pub struct DeferredIdentity {
    inner: Shared<BoxFuture<'static, IdentityResolution>>,
}

impl DeferredIdentity {
    /// Defer resolution to a future; it is polled at most once.
    pub fn new<F>(resolution: F) -> Self
    where
        F: Future<Output = IdentityResolution> + Send + 'static,
    {
        Self {
            inner: resolution.boxed().shared(),
        }
    }

    /// Defer resolution to a closure run on first access.
    pub fn from_fn<F>(resolve: F) -> Self
    where
        F: FnOnce() -> IdentityResolution + Send + 'static,
    {
        Self::new(async move { resolve() })
    }

    /// An identity that is already known.
    pub fn of(identity: Identity) -> Self {
        let identity = Arc::new(identity);
        Self::new(futures::future::ready(Ok(Some(identity))))
    }

    /// No identity present.
    pub fn absent() -> Self {
        Self::new(futures::future::ready(Ok(None)))
    }

    /// Resolve, suspending until the resolution completes.
    pub async fn resolve(&self) -> IdentityResolution {
        self.inner.clone().await
    }

    /// Resolve on the calling thread.
    ///
    /// Returns the cached outcome without blocking once any consumer has
    /// completed `resolve`. A resolution that suspends while the caller is
    /// itself running on a tokio runtime cannot complete from here; that is
    /// reported as a configuration error instead of blocking the runtime
    /// thread.
    pub fn resolve_blocking(&self) -> IdentityResolution {
        if let Some(outcome) = self.inner.peek() {
            return outcome.clone();
        }
        if let Some(outcome) = self.inner.clone().now_or_never() {
            return outcome;
        }
        if tokio::runtime::Handle::try_current().is_ok() {
            return Err(VigilError::configuration(
                "identity resolution suspended inside an async runtime; \
                 wrap the operation as a streaming call or resolve the identity before blocking",
            ));
        }
        trace!("Resolving identity on the calling thread");
        futures::executor::block_on(self.inner.clone())
    }

    /// Resolve on the calling thread for one authorization check.
    ///
    /// An absent identity or a failed resolution comes back as the denial
    /// reason the check reports. Configuration errors still propagate.
    pub fn require_blocking(&self) -> VigilResult<Result<Arc<Identity>, DenialReason>> {
        match self.resolve_blocking() {
            Ok(Some(identity)) => Ok(Ok(identity)),
            Ok(None) => Ok(Err(DenialReason::AuthenticationRequired)),
            Err(err) if err.is_configuration() => Err(err),
            Err(err) => {
                debug!(error = %err, "Identity resolution failed");
                Ok(Err(DenialReason::identity_unavailable(err.to_string())))
            }
        }
    }

    /// The identity, if resolution has completed with one present.
    ///
    /// Never triggers resolution.
    pub fn resolved(&self) -> Option<Arc<Identity>> {
        match self.inner.peek() {
            Some(Ok(Some(identity))) => Some(identity.clone()),
            _ => None,
        }
    }

    /// Returns `true` once resolution has completed.
    pub fn is_resolved(&self) -> bool {
        self.inner.peek().is_some()
    }
}

impl fmt::Debug for DeferredIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.inner.peek() {
            None => "pending".to_string(),
            Some(Ok(Some(identity))) => format!("resolved({})", identity.principal()),
            Some(Ok(None)) => "absent".to_string(),
            Some(Err(err)) => format!("failed({err})"),
        };
        f.debug_struct("DeferredIdentity")
            .field("state", &state)
            .finish()
    }
}

/// Source of caller identities.
///
/// Called once per intercepted call; the returned handle is resolved on demand.
pub trait IdentityProvider: Send + Sync {
    /// Deferred identity of the current caller.
    fn current_identity(&self) -> DeferredIdentity;
}

impl<F> IdentityProvider for F
where
    F: Fn() -> DeferredIdentity + Send + Sync,
{
    fn current_identity(&self) -> DeferredIdentity {
        self()
    }
}
