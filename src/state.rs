use std::sync::Arc;
use std::time::Duration;

use crate::auth::TokenService;
use crate::config::Config;
use crate::lm::{LanguageModel, OpenAiModel};
use crate::objects::{HttpObjectStore, ObjectStore};
use crate::store::Store;

/// Shared application state, injected into every handler.
pub struct AppState {
    pub config: Config,
    pub store: Store,
    pub objects: Arc<dyn ObjectStore>,
    pub lm: Arc<dyn LanguageModel>,
    pub tokens: TokenService,
}

impl AppState {
    pub async fn new() -> Arc<Self> {
        let config = Config::load();
        let timeout = Duration::from_secs(config.gateway_timeout_secs);

        let store = Store::open(&config.database_path)
            .await
            .expect("Database misconfigured!");
        let objects: Arc<dyn ObjectStore> = Arc::new(HttpObjectStore::new(&config, timeout));
        let lm: Arc<dyn LanguageModel> = Arc::new(OpenAiModel::new(&config, timeout));
        let tokens =
            TokenService::from_base64_key(&config.token_key).expect("Token key misconfigured!");

        Arc::new(Self {
            config,
            store,
            objects,
            lm,
            tokens,
        })
    }
}
