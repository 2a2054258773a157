//! Core data models for the upload relay.
//!
//! These are plain values: sessions and parts owned by the multipart state
//! machine, tuning knobs built once at startup, and the CLI's directory
//! bookkeeping. They serialize as JSON via `serde` for logging and responses.

pub mod directory;
pub mod multipart;
pub mod transfer;
