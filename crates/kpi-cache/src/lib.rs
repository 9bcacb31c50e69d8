#![doc = include_str!("../README.md")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

//! Request cache implementations for the clinic KPI service.
//!
//! This crate provides implementations of the [`RequestCache`] trait from `kpi-core`:
//!
//! - [`InMemoryRequestCache`] - De-duplicating in-memory cache with lazy TTL eviction
//! - [`NoopRequestCache`] - No-op cache that always fetches
//!
//! Time is injected through [`Clock`] so expiry can be tested without sleeping.

/// Time sources for TTL checks.
pub mod clock;
/// Request fingerprints.
pub mod key;
/// In-memory cache implementation.
pub mod memory;
/// No-op cache implementation.
pub mod noop;

// Re-export the trait for convenience
pub use kpi_core::RequestCache;

// Re-export implementations
pub use clock::{Clock, ManualClock, SystemClock};
pub use key::fingerprint;
pub use memory::InMemoryRequestCache;
pub use noop::NoopRequestCache;
