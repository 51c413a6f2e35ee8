//! # Vigil Guards - Interception Engine
//!
//! Wraps protected operations with expression-based authorization checks
//! and element filtering, for blocking calls and for asynchronous results
//! (deferred values, suspended computations and streams) alike.
//!
//! Build an [`Interceptor`] from an [`InterceptorRegistry`], then wrap each
//! protected operation with [`Interceptor::wrap`].

#![forbid(unsafe_code)]

pub mod guards;
pub mod prelude;

pub use guards::*;
