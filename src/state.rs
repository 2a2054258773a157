use crate::{handlers::auth_handlers::SessionGate, services::relay::UploadRelay};
use std::{path::PathBuf, sync::Arc};

/// Shared state handed to every handler. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub relay: UploadRelay,
    pub sessions: Arc<SessionGate>,
    pub static_dir: PathBuf,
    /// Reported by the health endpoint.
    pub region: String,
}

impl AppState {
    pub fn bucket(&self) -> &str {
        self.relay.strategy().bucket()
    }
}
