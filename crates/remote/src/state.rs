use std::sync::Arc;

use crate::{auth::JwtService, config::RemoteServerConfig, store::Store};

#[derive(Clone)]
pub struct AppState {
    store: Arc<Store>,
    config: Arc<RemoteServerConfig>,
    jwt: Arc<JwtService>,
}

impl AppState {
    pub fn new(config: RemoteServerConfig) -> Self {
        let jwt = JwtService::new(config.jwt_secret.clone());
        Self {
            store: Arc::new(Store::new()),
            config: Arc::new(config),
            jwt: Arc::new(jwt),
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn config(&self) -> &RemoteServerConfig {
        &self.config
    }

    pub fn jwt(&self) -> Arc<JwtService> {
        Arc::clone(&self.jwt)
    }
}
