//! Data models for the thumbnailer.
//!
//! Buckets and objects map to SQLite rows via `sqlx::FromRow`; notification
//! events and invocation outcomes travel as JSON via `serde`.

pub mod bucket;
pub mod event;
pub mod object;
pub mod outcome;
