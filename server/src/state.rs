use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::hub::NotificationHub;
use crate::service::ParticipationService;
use crate::store::Store;

/// Handler-facing knobs taken from [`Config`].
#[derive(Debug, Clone, Copy)]
pub struct StreamSettings {
    pub keepalive: Duration,
    pub max_notification_page: usize,
}

impl From<&Config> for StreamSettings {
    fn from(config: &Config) -> Self {
        Self {
            keepalive: config.sse_keepalive,
            max_notification_page: config.max_notification_page,
        }
    }
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub hub: Arc<NotificationHub>,
    pub participation: Arc<ParticipationService>,
    pub settings: StreamSettings,
}

impl AppState {
    pub fn new(store: Arc<dyn Store>, settings: StreamSettings) -> Self {
        let hub = Arc::new(NotificationHub::default());
        let participation = Arc::new(ParticipationService::new(store.clone(), hub.clone()));
        Self {
            store,
            hub,
            participation,
            settings,
        }
    }
}
