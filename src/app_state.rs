use std::{sync::Arc, time::Duration};

use reqwest::Client;

use crate::{
    auth::JwtKeys,
    config::Config,
    db::DbPool,
    notifications::{Broadcaster, LogNotifier, MailServiceNotifier, Notifier},
};

#[derive(Clone)]
pub struct AppState {
    pub db_pool: DbPool,
    pub jwt_keys: JwtKeys,
    pub notifier: Arc<dyn Notifier>,
    pub broadcaster: Broadcaster,
    pub transaction_timeout: Duration,
}

impl AppState {
    pub fn new(config: &Config, db_pool: DbPool) -> Self {
        let http_client = Client::new();
        let notifier: Arc<dyn Notifier> = match &config.notifications.service_url {
            Some(url) => Arc::new(MailServiceNotifier::new(http_client.clone(), url.clone())),
            None => {
                tracing::info!("NOTIFICATION_SERVICE_URL not set, order confirmations go to the log");
                Arc::new(LogNotifier)
            }
        };

        Self {
            db_pool,
            jwt_keys: JwtKeys::from_secret(&config.auth.jwt_secret),
            notifier,
            broadcaster: Broadcaster::default(),
            transaction_timeout: config.database.transaction_timeout,
        }
    }
}
