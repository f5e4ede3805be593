pub mod app;
pub mod config;
pub mod domain;
pub mod http;
pub mod infra;
pub mod jobs;

use std::sync::Arc;

use crate::app::notifications::NotificationSettings;
use crate::app::read_state::ReadStateStore;
use crate::infra::gateway::{Authenticator, RecordGateway};
use crate::infra::kv::KeyValueStore;

#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<dyn RecordGateway>,
    pub authenticator: Arc<dyn Authenticator>,
    pub kv: Arc<dyn KeyValueStore>,
    pub read_state: ReadStateStore,
    pub notification_settings: NotificationSettings,
    pub session_key: [u8; 32],
    pub session_ttl_minutes: u64,
}
