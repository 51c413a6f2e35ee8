//! Unified error system for Vigil
//!
//! A single error type covers the four failure classes an intercepted call can
//! produce. Configuration errors only ever surface while building interceptors;
//! the other three are the possible outcomes of a call.

use crate::decision::DenialReason;
use crate::ordering::InterceptorKind;
use std::fmt;
use std::sync::Arc;

/// Unified error type for all Vigil operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum VigilError {
    /// Invalid interceptor configuration, raised at setup time
    #[error("Configuration error: {message}")]
    Configuration {
        /// Error message describing the misconfiguration
        message: String,
    },

    /// A decision was denied
    #[error("Access denied at {stage}: {reason}")]
    Denied {
        /// Interception stage that produced the denial
        stage: InterceptorKind,
        /// Why access was denied
        reason: DenialReason,
    },

    /// An expression could not be evaluated
    #[error("Evaluation error: {message}")]
    Evaluation {
        /// Error message describing the evaluation failure
        message: String,
    },

    /// The protected operation itself failed
    #[error("Upstream failure: {0}")]
    Upstream(UpstreamFailure),
}

impl VigilError {
    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a denial error for the given stage
    pub fn denied(stage: InterceptorKind, reason: DenialReason) -> Self {
        Self::Denied { stage, reason }
    }

    /// Create an evaluation error
    pub fn evaluation(message: impl Into<String>) -> Self {
        Self::Evaluation {
            message: message.into(),
        }
    }

    /// Wrap a failure raised by the protected operation
    pub fn upstream(error: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Upstream(UpstreamFailure::new(error))
    }

    /// Wrap a plain message as an upstream failure
    pub fn upstream_message(message: impl Into<String>) -> Self {
        Self::Upstream(UpstreamFailure::new(MessageError(message.into())))
    }

    /// Returns `true` for denials
    pub fn is_denied(&self) -> bool {
        matches!(self, Self::Denied { .. })
    }

    /// Returns `true` for configuration errors
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration { .. })
    }

    /// Returns `true` for evaluation errors
    pub fn is_evaluation(&self) -> bool {
        matches!(self, Self::Evaluation { .. })
    }

    /// Returns `true` for upstream failures
    pub fn is_upstream(&self) -> bool {
        matches!(self, Self::Upstream(_))
    }

    /// Denial reason, if this is a denial.
    pub fn denial_reason(&self) -> Option<&DenialReason> {
        match self {
            Self::Denied { reason, .. } => Some(reason),
            _ => None,
        }
    }
}

/// Shared handle to the error raised by a protected operation.
///
/// Cloning shares the same underlying error instance.
#[derive(Clone)]
pub struct UpstreamFailure(Arc<dyn std::error::Error + Send + Sync>);

impl UpstreamFailure {
    /// Wrap an error.
    pub fn new(error: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self(Arc::new(error))
    }

    /// Borrow the wrapped error.
    pub fn inner(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
        self.0.as_ref()
    }

    /// Returns `true` if both handles point at the same error instance.
    pub fn same_instance(&self, other: &UpstreamFailure) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for UpstreamFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("UpstreamFailure").field(&self.0).finish()
    }
}

impl fmt::Display for UpstreamFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug)]
struct MessageError(String);

impl fmt::Display for MessageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for MessageError {}

/// Standard Result type for Vigil operations
pub type VigilResult<T> = std::result::Result<T, VigilError>;

impl From<toml::de::Error> for VigilError {
    fn from(err: toml::de::Error) -> Self {
        Self::configuration(format!("Invalid configuration: {err}"))
    }
}
