//! Application configuration loaded from environment variables.
//!
//! Loaded once at startup and passed down explicitly: provider descriptors
//! and the merge policy are built from this struct at construction time.

use std::env;

/// Storage backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Firestore,
    Memory,
}

/// Whoop OAuth application settings.
#[derive(Debug, Clone)]
pub struct WhoopSettings {
    pub client_id: String,
    pub client_secret: String,
    /// Callback registered with Whoop for this deployment.
    pub redirect_uri: String,
    /// Scope override; `offline` is always added on top.
    pub default_scope: Option<String>,
    /// Base for `/oauth/oauth2/*` endpoints.
    pub oauth_base_url: String,
    /// Base for `/v2/*` data endpoints.
    pub api_base_url: String,
}

/// Application configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    // --- Environment Variables (non-sensitive) ---
    /// Frontend URL for OAuth redirects
    pub frontend_url: String,
    /// GCP project ID
    pub gcp_project_id: String,
    /// GCP region (KMS key location)
    pub gcp_region: String,
    /// Server port
    pub port: u16,
    pub store_backend: StoreBackend,
    /// Window (seconds) within which two observations of the same
    /// source/category are treated as the same record.
    pub merge_tolerance_secs: i64,

    // --- Secrets ---
    /// API key required on `/api/v1/users/*`
    pub api_key: String,
    /// HMAC key for signing the OAuth `state` parameter (raw bytes)
    pub oauth_state_key: Vec<u8>,
    /// Whoop credentials; Whoop is disabled when unset.
    pub whoop: Option<WhoopSettings>,
}

pub const DEFAULT_MERGE_TOLERANCE_SECS: i64 = 60;
const WHOOP_OAUTH_BASE_URL: &str = "https://api.prod.whoop.com/oauth/oauth2";
const WHOOP_API_BASE_URL: &str = "https://api.prod.whoop.com/developer";

impl Config {
    /// Config for testing only.
    pub fn test_default() -> Self {
        Self {
            frontend_url: "http://localhost:5173".to_string(),
            gcp_project_id: "test-project".to_string(),
            gcp_region: "us-west1".to_string(),
            port: 8080,
            store_backend: StoreBackend::Memory,
            merge_tolerance_secs: DEFAULT_MERGE_TOLERANCE_SECS,
            api_key: "test_api_key".to_string(),
            oauth_state_key: b"test_state_key_32_bytes_minimum!".to_vec(),
            whoop: Some(WhoopSettings {
                client_id: "whoop_client".to_string(),
                client_secret: "whoop_secret".to_string(),
                redirect_uri: "http://localhost:8080/api/v1/oauth/whoop/callback".to_string(),
                default_scope: None,
                oauth_base_url: WHOOP_OAUTH_BASE_URL.to_string(),
                api_base_url: WHOOP_API_BASE_URL.to_string(),
            }),
        }
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok(); // Load .env file if present

        let store_backend = match env::var("STORE_BACKEND")
            .unwrap_or_else(|_| "firestore".to_string())
            .as_str()
        {
            "firestore" => StoreBackend::Firestore,
            "memory" => StoreBackend::Memory,
            _ => return Err(ConfigError::Invalid("STORE_BACKEND")),
        };

        let merge_tolerance_secs = match env::var("MERGE_TOLERANCE_SECS") {
            Ok(raw) => raw
                .parse::<i64>()
                .ok()
                .filter(|secs| *secs >= 0)
                .ok_or(ConfigError::Invalid("MERGE_TOLERANCE_SECS"))?,
            Err(_) => DEFAULT_MERGE_TOLERANCE_SECS,
        };

        Ok(Self {
            // Non-sensitive config from env
            frontend_url: env::var("FRONTEND_URL")
                .unwrap_or_else(|_| "http://localhost:5173".to_string()),
            gcp_project_id: env::var("GCP_PROJECT_ID").unwrap_or_else(|_| "local-dev".to_string()),
            gcp_region: env::var("GCP_REGION").unwrap_or_else(|_| "us-west1".to_string()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .unwrap_or(8080),
            store_backend,
            merge_tolerance_secs,

            // Secrets
            api_key: env::var("API_KEY")
                .map(|v| v.trim().to_string())
                .map_err(|_| ConfigError::Missing("API_KEY"))?,
            oauth_state_key: env::var("OAUTH_STATE_KEY")
                .map_err(|_| ConfigError::Missing("OAUTH_STATE_KEY"))?
                .into_bytes(),
            whoop: whoop_from_env()?,
        })
    }
}

/// Whoop is optional: no client ID means the provider is not offered.
fn whoop_from_env() -> Result<Option<WhoopSettings>, ConfigError> {
    let Ok(client_id) = env::var("WHOOP_CLIENT_ID") else {
        return Ok(None);
    };

    Ok(Some(WhoopSettings {
        client_id: client_id.trim().to_string(),
        client_secret: env::var("WHOOP_CLIENT_SECRET")
            .map(|v| v.trim().to_string())
            .map_err(|_| ConfigError::Missing("WHOOP_CLIENT_SECRET"))?,
        redirect_uri: env::var("WHOOP_REDIRECT_URI")
            .map_err(|_| ConfigError::Missing("WHOOP_REDIRECT_URI"))?,
        default_scope: env::var("WHOOP_DEFAULT_SCOPE")
            .ok()
            .filter(|s| !s.trim().is_empty()),
        oauth_base_url: env::var("WHOOP_OAUTH_BASE_URL")
            .unwrap_or_else(|_| WHOOP_OAUTH_BASE_URL.to_string()),
        api_base_url: env::var("WHOOP_API_BASE_URL")
            .unwrap_or_else(|_| WHOOP_API_BASE_URL.to_string()),
    }))
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_from_env() {
        // Set required env vars for test
        env::set_var("API_KEY", " test_key ");
        env::set_var("OAUTH_STATE_KEY", "test_state_key_32_bytes_minimum!");
        env::set_var("WHOOP_CLIENT_ID", "whoop_id");
        env::set_var("WHOOP_CLIENT_SECRET", "whoop_secret");
        env::set_var("WHOOP_REDIRECT_URI", "http://localhost/cb");
        env::set_var("STORE_BACKEND", "memory");

        let config = Config::from_env().expect("Config should load");

        assert_eq!(config.api_key, "test_key");
        assert_eq!(config.port, 8080);
        assert_eq!(config.store_backend, StoreBackend::Memory);
        assert_eq!(config.merge_tolerance_secs, DEFAULT_MERGE_TOLERANCE_SECS);
        let whoop = config.whoop.expect("whoop settings");
        assert_eq!(whoop.client_id, "whoop_id");
        assert_eq!(whoop.oauth_base_url, WHOOP_OAUTH_BASE_URL);
    }
}
