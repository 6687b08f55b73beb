pub mod handlers;
pub mod server;

pub use server::{create_router, start_web_server};

use std::sync::Arc;

use crate::config::Config;
use crate::services::AcquisitionService;

// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub service: AcquisitionService,
}

impl AppState {
    pub fn new(config: Arc<Config>, service: AcquisitionService) -> Self {
        Self { config, service }
    }
}
