//! Concrete source adapters.
//!
//! One module per external source. Each adapter owns its credentials, query
//! construction and response parsing, and honors the non-throwing contract:
//! any fault inside `search` is logged and becomes an empty batch.

pub mod deepwire;
pub mod eventbrite;
pub mod seatgeek;
pub mod ticketmaster;

use chrono::{DateTime, Utc};

pub(crate) const USER_AGENT: &str = "whatson/0.3";

/// `2026-09-04T19:00:00Z`, the format every adapter's API accepts for
/// window bounds.
pub(crate) fn format_utc(dt: DateTime<Utc>) -> String {
    dt.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}
