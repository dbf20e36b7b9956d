//! Custom types shared by entities and API responses

use chrono::{DateTime as ChronoDateTime, Utc};

/// Database DateTime type used across all Tenantry crates
///
/// Maps to `TIMESTAMPTZ` on Postgres and ISO-8601 text on SQLite.
pub type DBDateTime = ChronoDateTime<Utc>;

/// Standard UTC DateTime type for API responses
/// (serializes as ISO 8601 with 'Z' suffix).
pub type UtcDateTime = ChronoDateTime<Utc>;
