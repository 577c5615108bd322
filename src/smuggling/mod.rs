//! HTTP request smuggling: raw pipelined exchanges, marker detection, and
//! statistical revalidation.
//!
//! The detector refuses to classify on timing; the marker approach yields a
//! confirmable signal immune to latency jitter.

pub mod client;
pub mod detect;
pub mod payloads;

pub use client::{ExchangeTarget, RawClient, RawExchange};
pub use detect::SmugglingScanner;
pub use payloads::{Markers, SmugglingKind, SmugglingPayload, TeObfuscation};
