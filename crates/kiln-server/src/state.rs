use std::sync::Arc;

use kiln_core::Orchestrator;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// This is cheaply cloneable (inner data is behind `Arc`).
#[derive(Clone)]
pub struct AppState {
    /// Job orchestrator (submit, poll, artifacts, cleanup).
    pub orchestrator: Arc<Orchestrator>,
}
