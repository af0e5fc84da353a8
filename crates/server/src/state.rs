use crate::{config::Config, db::Database, realtime::RealtimeHub};
use shared::RowChange;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub config: Config,
    pub realtime: Arc<RealtimeHub>,
}

impl AppState {
    pub fn new(db: Database, config: Config) -> Self {
        Self {
            db,
            config,
            realtime: Arc::new(RealtimeHub::new()),
        }
    }

    /// Fan a committed change out to realtime subscribers
    pub fn publish(&self, change: Result<RowChange, serde_json::Error>) {
        match change {
            Ok(change) => {
                self.realtime.publish(change);
            }
            Err(e) => tracing::error!("Failed to encode row change: {}", e),
        }
    }
}
