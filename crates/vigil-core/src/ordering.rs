//! Interceptor ordering table
//!
//! Stages always run in kind order: pre-filter, before-call, after-call,
//! post-filter. Within one kind, descriptors run by ascending priority and
//! ties keep registration order.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Interceptor kinds, in stage order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InterceptorKind {
    /// Filters a sequence argument before the call.
    PreFilter,
    /// Decides on the invocation before the call.
    BeforeCall,
    /// Decides on the invocation result after the call.
    AfterCall,
    /// Filters a sequence result after the call.
    PostFilter,
}

impl InterceptorKind {
    /// All kinds in stage order.
    pub const ALL: [InterceptorKind; 4] = [
        InterceptorKind::PreFilter,
        InterceptorKind::BeforeCall,
        InterceptorKind::AfterCall,
        InterceptorKind::PostFilter,
    ];

    /// Default priority for descriptors of this kind.
    pub fn default_priority(self) -> Priority {
        match self {
            InterceptorKind::PreFilter => Priority::PRE_FILTER,
            InterceptorKind::BeforeCall => Priority::BEFORE_CALL,
            InterceptorKind::AfterCall => Priority::AFTER_CALL,
            InterceptorKind::PostFilter => Priority::POST_FILTER,
        }
    }

    /// Returns `true` for stages that run before the underlying call.
    pub fn runs_before_call(self) -> bool {
        matches!(self, InterceptorKind::PreFilter | InterceptorKind::BeforeCall)
    }

    /// Returns `true` for element filtering stages.
    pub fn is_filter(self) -> bool {
        matches!(self, InterceptorKind::PreFilter | InterceptorKind::PostFilter)
    }
}

impl fmt::Display for InterceptorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InterceptorKind::PreFilter => write!(f, "pre-filter"),
            InterceptorKind::BeforeCall => write!(f, "before-call"),
            InterceptorKind::AfterCall => write!(f, "after-call"),
            InterceptorKind::PostFilter => write!(f, "post-filter"),
        }
    }
}

/// Numeric priority; lower runs first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Priority(i32);

impl Priority {
    /// Runs before every default priority.
    pub const FIRST: Priority = Priority(i32::MIN);
    /// Default pre-filter priority.
    pub const PRE_FILTER: Priority = Priority(100);
    /// Default before-call priority.
    pub const BEFORE_CALL: Priority = Priority(200);
    /// Default after-call priority.
    pub const AFTER_CALL: Priority = Priority(500);
    /// Default post-filter priority.
    pub const POST_FILTER: Priority = Priority(600);
    /// Runs after every default priority.
    pub const LAST: Priority = Priority(i32::MAX);

    /// Create a priority.
    pub const fn new(value: i32) -> Self {
        Self(value)
    }

    /// Raw value.
    pub fn value(self) -> i32 {
        self.0
    }
}

impl From<i32> for Priority {
    fn from(value: i32) -> Self {
        Self(value)
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Sort items of one kind by ascending priority, keeping registration order on ties.
pub fn order_by_priority<T>(items: &mut [(Priority, T)]) {
    // sort_by_key is stable
    items.sort_by_key(|(priority, _)| *priority);
}
