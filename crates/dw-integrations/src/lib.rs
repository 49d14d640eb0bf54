//! Boundaries to the systems driftwarden observes and reports to.
//!
//! Each collaborator is an `async_trait` seam with an HTTP implementation
//! and an in-process implementation for tests and offline runs:
//!
//! - [`environment::EnvironmentClient`]: probes and the correction endpoint
//! - [`baseline_source::BaselineSource`]: the durable baseline document
//! - [`secrets::SecretProvider`]: correction token lookup
//! - [`publisher::Publisher`]: alert and metrics topics

pub mod baseline_source;
pub mod environment;
pub mod error;
pub mod publisher;
pub mod secrets;

pub use error::{RemoteError, Result};
