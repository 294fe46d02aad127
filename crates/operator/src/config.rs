use serde::{Deserialize, Serialize};

/// Runtime configuration, loaded from the environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub alertmanager: AlertmanagerConfig,
    pub secret: SecretConfig,
    pub sync: SyncConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub addr: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertmanagerConfig {
    /// Base URL of the Alertmanager instance, e.g. http://alertmanager:9093
    pub url: String,
    /// Seconds to wait for the secret to propagate before asking
    /// Alertmanager to reload.
    pub reload_grace_secs: u64,
    /// Reload attempts after the grace period before giving up.
    pub reload_max_retries: u32,
    /// Request timeout for all Alertmanager HTTP calls.
    pub http_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretConfig {
    /// Secret holding the synthesized Alertmanager configuration.
    pub name: String,
    pub namespace: String,
    /// Name of the cluster-scoped Notifier singleton.
    pub notifier_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    pub interval_secs: u64,
}

impl Config {
    pub fn load() -> crate::Result<Self> {
        // Load environment variables from .env file if it exists
        let _ = dotenvy::dotenv();

        let config = Config {
            server: ServerConfig {
                addr: std::env::var("SERVER_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
            },
            alertmanager: AlertmanagerConfig {
                url: std::env::var("ALERTMANAGER_URL")
                    .unwrap_or_else(|_| "http://alertmanager:9093".to_string()),
                reload_grace_secs: env_parse("RELOAD_GRACE_SECS", 10)?,
                reload_max_retries: env_parse("RELOAD_MAX_RETRIES", 3)?,
                http_timeout_secs: env_parse("HTTP_TIMEOUT_SECS", 15)?,
            },
            secret: SecretConfig {
                name: std::env::var("CONFIG_SECRET_NAME")
                    .unwrap_or_else(|_| "alertmanager-config".to_string()),
                namespace: std::env::var("CONFIG_SECRET_NAMESPACE")
                    .unwrap_or_else(|_| "default".to_string()),
                notifier_name: std::env::var("NOTIFIER_NAME")
                    .unwrap_or_else(|_| "notifier".to_string()),
            },
            sync: SyncConfig {
                interval_secs: env_parse("SYNC_INTERVAL_SECS", 30)?,
            },
        };

        if config.alertmanager.url.is_empty() {
            return Err(crate::Error::Config(
                "ALERTMANAGER_URL must not be empty".to_string(),
            ));
        }
        if config.sync.interval_secs == 0 {
            return Err(crate::Error::Config(
                "SYNC_INTERVAL_SECS must be greater than zero".to_string(),
            ));
        }

        Ok(config)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> crate::Result<T> {
    match std::env::var(key) {
        Ok(v) => v
            .parse()
            .map_err(|_| crate::Error::Config(format!("{} is not a valid value for {}", v, key))),
        Err(_) => Ok(default),
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                addr: "0.0.0.0:8080".to_string(),
            },
            alertmanager: AlertmanagerConfig {
                url: "http://alertmanager:9093".to_string(),
                reload_grace_secs: 10,
                reload_max_retries: 3,
                http_timeout_secs: 15,
            },
            secret: SecretConfig {
                name: "alertmanager-config".to_string(),
                namespace: "default".to_string(),
                notifier_name: "notifier".to_string(),
            },
            sync: SyncConfig { interval_secs: 30 },
        }
    }
}
