//! kiln-server: HTTP surface of the Kiln job orchestrator.
//!
//! Exposes submit / poll / download / cleanup over axum and provides the
//! process-backed [`runner::CommandRunner`] that turns a script into a
//! zipped executable.

pub mod config;
pub mod error;
pub mod handlers;
pub mod router;
pub mod routes;
pub mod runner;
pub mod state;
