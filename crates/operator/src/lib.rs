pub mod alertmanager;
pub mod config;
pub mod crd;
pub mod lifecycle;
pub mod metrics;
pub mod operator;
pub mod server;
pub mod sync;
pub mod synthesizer;
pub mod watch;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Kubernetes error: {0}")]
    Kube(#[from] kube::Error),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Config document error: {0}")]
    Document(#[from] serde_yaml::Error),
    #[error("Alertmanager error: {0}")]
    Alertmanager(String),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Invalid state transition: {0}")]
    InvalidState(String),
    #[error("Write conflict: {0}")]
    Conflict(String),
}

pub type Result<T> = std::result::Result<T, Error>;
