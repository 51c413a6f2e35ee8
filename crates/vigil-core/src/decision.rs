//! Authorization decisions
//!
//! A `Decision` is the outcome of one authorization check. Decisions are
//! ephemeral: produced and consumed within a single interception stage.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Structured denial reasons.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DenialReason {
    /// The check evaluated to false.
    AccessDenied {
        /// Optional human-readable detail (expression, authority list).
        detail: Option<String>,
    },
    /// No identity was present when one was needed.
    AuthenticationRequired,
    /// Resolving the caller identity failed.
    IdentityUnavailable {
        /// Why resolution failed.
        detail: Option<String>,
    },
    /// Manager-specific reason.
    Custom(String),
}

impl DenialReason {
    /// Access denied without detail.
    pub fn access_denied() -> Self {
        Self::AccessDenied { detail: None }
    }

    /// Access denied with a detail message.
    pub fn access_denied_with(detail: impl Into<String>) -> Self {
        Self::AccessDenied {
            detail: Some(detail.into()),
        }
    }

    /// Identity resolution failed with `detail`.
    pub fn identity_unavailable(detail: impl Into<String>) -> Self {
        Self::IdentityUnavailable {
            detail: Some(detail.into()),
        }
    }

    /// Returns `true` if the check could not establish who the caller is.
    pub fn is_identity_failure(&self) -> bool {
        matches!(
            self,
            Self::AuthenticationRequired | Self::IdentityUnavailable { .. }
        )
    }

    /// Manager-specific reason.
    pub fn custom(reason: impl Into<String>) -> Self {
        Self::Custom(reason.into())
    }

    /// Strip detail so the reason can be shown to untrusted callers.
    ///
    /// Identity failures keep their category so callers can still tell a
    /// missing or unresolvable identity apart from a refused one.
    pub fn terse(self) -> Self {
        match self {
            Self::AuthenticationRequired => Self::AuthenticationRequired,
            Self::IdentityUnavailable { .. } => Self::IdentityUnavailable { detail: None },
            Self::AccessDenied { .. } | Self::Custom(_) => Self::access_denied(),
        }
    }
}

impl fmt::Display for DenialReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DenialReason::AccessDenied { detail: None } => write!(f, "access denied"),
            DenialReason::AccessDenied {
                detail: Some(detail),
            } => write!(f, "access denied ({detail})"),
            DenialReason::AuthenticationRequired => write!(f, "authentication required"),
            DenialReason::IdentityUnavailable { detail: None } => write!(f, "identity unavailable"),
            DenialReason::IdentityUnavailable {
                detail: Some(detail),
            } => write!(f, "identity unavailable ({detail})"),
            DenialReason::Custom(reason) => write!(f, "{reason}"),
        }
    }
}

/// Decision from one authorization check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Decision {
    /// Access is granted.
    Granted,
    /// Access is denied with a reason.
    Denied {
        /// Why access was denied.
        reason: DenialReason,
    },
    /// The check has no opinion; the call continues.
    Abstained,
}

impl Decision {
    /// Create a granted decision.
    pub fn granted() -> Self {
        Self::Granted
    }

    /// Create a denied decision with a reason.
    pub fn denied(reason: DenialReason) -> Self {
        Self::Denied { reason }
    }

    /// Create an abstaining decision.
    pub fn abstained() -> Self {
        Self::Abstained
    }

    /// Map a boolean verdict onto granted / denied.
    pub fn from_verdict(granted: bool, reason: impl FnOnce() -> DenialReason) -> Self {
        if granted {
            Self::Granted
        } else {
            Self::Denied { reason: reason() }
        }
    }

    /// Returns `true` if the decision grants access.
    pub fn is_granted(&self) -> bool {
        matches!(self, Self::Granted)
    }

    /// Returns `true` if the decision denies access.
    pub fn is_denied(&self) -> bool {
        matches!(self, Self::Denied { .. })
    }

    /// Returns `true` if the call may continue.
    pub fn permits(&self) -> bool {
        !self.is_denied()
    }

    /// Returns the denial reason, if denied.
    pub fn denial_reason(&self) -> Option<&DenialReason> {
        match self {
            Self::Denied { reason } => Some(reason),
            Self::Granted | Self::Abstained => None,
        }
    }
}
