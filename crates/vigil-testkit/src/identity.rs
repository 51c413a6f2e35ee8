//! Identity providers for tests

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use vigil_core::{DeferredIdentity, Identity, IdentityProvider};

/// Hands out the same identity, or none, for every call.
#[derive(Debug, Clone, Default)]
pub struct StaticIdentityProvider {
    identity: Option<Identity>,
}

impl StaticIdentityProvider {
    /// Every call is made by `identity`.
    pub fn new(identity: Identity) -> Self {
        Self {
            identity: Some(identity),
        }
    }

    /// Every call is anonymous.
    pub fn anonymous() -> Self {
        Self::default()
    }
}

impl IdentityProvider for StaticIdentityProvider {
    fn current_identity(&self) -> DeferredIdentity {
        match &self.identity {
            Some(identity) => DeferredIdentity::of(identity.clone()),
            None => DeferredIdentity::absent(),
        }
    }
}

/// Counts how often resolution actually runs.
///
/// With [`yielding`](Self::yielding) the resolution suspends once before
/// completing, like a lookup against an asynchronous store. Only use that
/// mode from inside a tokio runtime.
#[derive(Debug, Clone)]
pub struct CountingIdentityProvider {
    identity: Arc<Identity>,
    yielding: bool,
    handles: Arc<AtomicUsize>,
    resolutions: Arc<AtomicUsize>,
}

impl CountingIdentityProvider {
    /// Resolve to `identity`, completing on first poll.
    pub fn new(identity: Identity) -> Self {
        Self {
            identity: Arc::new(identity),
            yielding: false,
            handles: Arc::new(AtomicUsize::new(0)),
            resolutions: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Suspend once during each resolution.
    pub fn yielding(mut self) -> Self {
        self.yielding = true;
        self
    }

    /// Handles given out so far, one per intercepted call.
    pub fn handles(&self) -> usize {
        self.handles.load(Ordering::SeqCst)
    }

    /// Resolutions run so far.
    pub fn resolutions(&self) -> usize {
        self.resolutions.load(Ordering::SeqCst)
    }

    /// The identity every resolution yields.
    pub fn identity(&self) -> &Arc<Identity> {
        &self.identity
    }
}

impl IdentityProvider for CountingIdentityProvider {
    fn current_identity(&self) -> DeferredIdentity {
        self.handles.fetch_add(1, Ordering::SeqCst);
        let identity = self.identity.clone();
        let resolutions = self.resolutions.clone();
        let yielding = self.yielding;
        DeferredIdentity::new(async move {
            if yielding {
                tokio::task::yield_now().await;
            }
            resolutions.fetch_add(1, Ordering::SeqCst);
            Ok(Some(identity))
        })
    }
}
