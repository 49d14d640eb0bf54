//! Core domain model for driftwarden.
//!
//! Everything here is free of network I/O: the drift data model, the shape
//! similarity scorer, baseline document parsing, TOML configuration and the
//! append-only SQLite record store.

pub mod baseline;
pub mod config;
pub mod similarity;
pub mod store;
pub mod types;
