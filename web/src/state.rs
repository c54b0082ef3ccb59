//! Application state shared across HTTP handlers.

use farepass_core::engine::RedemptionEngine;

/// State cloned into every handler.
///
/// The engine is itself cheaply cloneable (its components sit behind
/// `Arc`), so no extra wrapping is needed here.
#[derive(Clone)]
pub struct AppState {
    /// The redemption engine
    pub engine: RedemptionEngine,
}

impl AppState {
    /// Create the application state.
    #[must_use]
    pub fn new(engine: RedemptionEngine) -> Self {
        Self { engine }
    }
}
