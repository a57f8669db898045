use std::sync::Arc;

use crate::config::Config;
use crate::services::{Mailer, Notifier, RegistrationManager};
use crate::store::Store;

/// Everything a handler may touch. Built once at startup and cloned per request.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn Store>,
    pub registrations: RegistrationManager,
}

impl AppState {
    pub fn new(config: Config, store: Arc<dyn Store>, mailer: Arc<dyn Mailer>) -> Self {
        let notifier = Notifier::new(mailer);
        Self {
            config: Arc::new(config),
            registrations: RegistrationManager::new(Arc::clone(&store), notifier),
            store,
        }
    }
}
