use std::{env, fmt::Display, fs::read_to_string, str::FromStr};

use tracing::{info, warn};

/// Runtime configuration, loaded once at startup. Secrets come from
/// `/run/secrets/<NAME>` with an environment-variable fallback.
#[derive(Clone)]
pub struct Config {
    pub port: u16,
    pub database_path: String,

    pub object_store_endpoint: String,
    pub object_store_bucket: String,
    /// Public host serving stored objects; note/card URLs are
    /// `https://{bucket}.{public_host}/{key}`.
    pub object_store_public_host: String,
    pub object_store_api_key: String,

    pub lm_endpoint: String,
    pub lm_api_key: String,

    /// 32-byte token sealing key, base64 encoded.
    pub token_key: String,

    pub cors_origins: Vec<String>,
    pub presign_ttl_secs: u64,
    pub gateway_timeout_secs: u64,
}

impl Config {
    pub fn load() -> Self {
        Self {
            port: try_load("RUST_PORT", "5000"),
            database_path: try_load("DATABASE_PATH", "notesage.db"),
            object_store_endpoint: try_load("OBJECT_STORE_ENDPOINT", "http://object-store:9000"),
            object_store_bucket: try_load("OBJECT_STORE_BUCKET", "notesage"),
            object_store_public_host: try_load("OBJECT_STORE_PUBLIC_HOST", "objects.notesage.app"),
            object_store_api_key: read_secret("OBJECT_STORE_API_KEY"),
            lm_endpoint: try_load("LM_ENDPOINT", "https://api.openai.com/v1"),
            lm_api_key: read_secret("LM_API_KEY"),
            token_key: read_secret("TOKEN_KEY"),
            cors_origins: try_load::<String>("CORS_ORIGINS", "http://localhost:3000")
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            presign_ttl_secs: try_load("PRESIGN_TTL_SECS", "3600"),
            gateway_timeout_secs: try_load("GATEWAY_TIMEOUT_SECS", "60"),
        }
    }
}

fn var(key: &str) -> Result<String, ()> {
    env::var(key).map_err(|_| {
        warn!("Environment variable {key} not found, using default");
    })
}

fn try_load<T: FromStr>(key: &str, default: &str) -> T
where
    T::Err: Display,
{
    var(key)
        .unwrap_or_else(|_| {
            info!("{key} not set, using default: {default}");
            default.to_string()
        })
        .parse()
        .map_err(|e| {
            warn!("Invalid {key} value: {e}");
        })
        .expect("Environment misconfigured!")
}

fn read_secret(secret_name: &str) -> String {
    let path = format!("/run/secrets/{secret_name}");

    read_to_string(&path)
        .map(|s| s.trim().to_string())
        .or_else(|e| {
            warn!("Failed to read {secret_name} from file: {e}");
            env::var(secret_name)
        })
        .expect("Secrets misconfigured!")
}
