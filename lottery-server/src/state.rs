//! Application state shared across all request handlers.

use lottery_core::draw::DrawEngine;
use lottery_core::framework::DatabaseProcessor;
use std::sync::Arc;

/// Application state that is shared across all request handlers.
///
/// This is cloneable and cheap to pass around (everything is behind Arc).
#[derive(Clone)]
pub struct AppState {
    /// Draw engine backed by Postgres and the message broker.
    pub engine: Arc<DrawEngine<DatabaseProcessor>>,
}

impl AppState {
    pub fn new(engine: DrawEngine<DatabaseProcessor>) -> Self {
        Self {
            engine: Arc::new(engine),
        }
    }
}
