use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use kube::api::{Api, PostParams};
use kube::core::ObjectMeta;
use kube::Client;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::alertmanager::{AlertmanagerClient, ConfigDocument};
use crate::config::SecretConfig;
use crate::crd::{Alert, Notifier, Recipient};
use crate::metrics;
use crate::{Error, Result};

pub const CONFIG_FILE_NAME: &str = "config.yml";

/// Attempts per mutation before a persistent write conflict is surfaced.
const MAX_WRITE_ATTEMPTS: u32 = 5;

/// One mutation of the shared configuration document.
#[derive(Debug, Clone)]
pub enum ConfigOp {
    AddRoute(Alert),
    UpdateRoute(Alert),
    DeleteRoute { namespace: String, name: String },
    AddReceiver { recipient: Recipient, notifier: Option<Notifier> },
    UpdateReceiver { recipient: Recipient, notifier: Option<Notifier> },
    DeleteReceiver { name: String },
    UpdateGlobal(Notifier),
}

impl ConfigOp {
    pub fn apply(&self, doc: &mut ConfigDocument) {
        match self {
            ConfigOp::AddRoute(alert) => doc.add_route(alert),
            ConfigOp::UpdateRoute(alert) => doc.update_route(alert),
            ConfigOp::DeleteRoute { namespace, name } => doc.delete_route(namespace, name),
            ConfigOp::AddReceiver { recipient, notifier } => {
                doc.add_receiver(recipient, notifier.as_ref())
            }
            ConfigOp::UpdateReceiver { recipient, notifier } => {
                doc.update_receiver(recipient, notifier.as_ref())
            }
            ConfigOp::DeleteReceiver { name } => doc.delete_receiver(name),
            ConfigOp::UpdateGlobal(notifier) => doc.update_global(notifier),
        }
    }

    fn describe(&self) -> String {
        match self {
            ConfigOp::AddRoute(a) => format!("add-route {}", a.key()),
            ConfigOp::UpdateRoute(a) => format!("update-route {}", a.key()),
            ConfigOp::DeleteRoute { namespace, name } => {
                format!("delete-route {}/{}", namespace, name)
            }
            ConfigOp::AddReceiver { recipient, .. } => {
                format!("add-receiver {}", recipient.metadata.name.as_deref().unwrap_or(""))
            }
            ConfigOp::UpdateReceiver { recipient, .. } => {
                format!("update-receiver {}", recipient.metadata.name.as_deref().unwrap_or(""))
            }
            ConfigOp::DeleteReceiver { name } => format!("delete-receiver {}", name),
            ConfigOp::UpdateGlobal(_) => "update-global".to_string(),
        }
    }
}

/// Versioned access to the shared configuration blob. A write carries the
/// version observed at read time and fails with `Error::Conflict` when the
/// blob changed underneath, which is what makes concurrent synthesis safe.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    async fn read(&self) -> Result<(Vec<u8>, Option<String>)>;
    async fn write(&self, bytes: Vec<u8>, version: Option<String>) -> Result<()>;
}

/// ConfigStore backed by a Kubernetes Secret, with the secret's
/// resourceVersion as the concurrency token.
pub struct SecretConfigStore {
    api: Api<Secret>,
    name: String,
}

impl SecretConfigStore {
    pub fn new(client: Client, cfg: &SecretConfig) -> Self {
        Self {
            api: Api::namespaced(client, &cfg.namespace),
            name: cfg.name.clone(),
        }
    }

    fn secret(&self, bytes: Vec<u8>, version: Option<String>) -> Secret {
        let mut data = std::collections::BTreeMap::new();
        data.insert(CONFIG_FILE_NAME.to_string(), ByteString(bytes));
        Secret {
            metadata: ObjectMeta {
                name: Some(self.name.clone()),
                resource_version: version,
                ..Default::default()
            },
            data: Some(data),
            ..Default::default()
        }
    }
}

#[async_trait]
impl ConfigStore for SecretConfigStore {
    async fn read(&self) -> Result<(Vec<u8>, Option<String>)> {
        match self.api.get_opt(&self.name).await? {
            Some(secret) => {
                let bytes = secret
                    .data
                    .as_ref()
                    .and_then(|d| d.get(CONFIG_FILE_NAME))
                    .map(|b| b.0.clone())
                    .unwrap_or_default();
                Ok((bytes, secret.metadata.resource_version))
            }
            None => Ok((Vec::new(), None)),
        }
    }

    async fn write(&self, bytes: Vec<u8>, version: Option<String>) -> Result<()> {
        let result = match &version {
            // no version means the secret did not exist at read time
            None => {
                self.api
                    .create(&PostParams::default(), &self.secret(bytes, None))
                    .await
            }
            Some(_) => {
                self.api
                    .replace(
                        &self.name,
                        &PostParams::default(),
                        &self.secret(bytes, version.clone()),
                    )
                    .await
            }
        };

        match result {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(e)) if e.code == 409 => {
                Err(Error::Conflict(format!("secret {} changed during write", self.name)))
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Translates declarative change events into the shared configuration blob.
/// Each mutation is a full read-modify-write with optimistic concurrency;
/// a successful write schedules a deferred engine reload.
pub struct Synthesizer {
    store: Arc<dyn ConfigStore>,
    alertmanager: Arc<AlertmanagerClient>,
    shutdown: watch::Receiver<bool>,
}

impl Synthesizer {
    pub fn new(
        store: Arc<dyn ConfigStore>,
        alertmanager: Arc<AlertmanagerClient>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            store,
            alertmanager,
            shutdown,
        }
    }

    pub async fn synthesize(&self, op: &ConfigOp) -> Result<ConfigDocument> {
        let (doc, wrote) = self.apply_with_retry(op).await?;
        if !wrote {
            debug!("{} left the document unchanged", op.describe());
            return Ok(doc);
        }

        metrics::SYNTHESIS_OPS_TOTAL.inc();
        info!("applied {}", op.describe());
        let _ = Arc::clone(&self.alertmanager).schedule_reload(self.shutdown.clone());
        Ok(doc)
    }

    async fn apply_with_retry(&self, op: &ConfigOp) -> Result<(ConfigDocument, bool)> {
        for attempt in 1..=MAX_WRITE_ATTEMPTS {
            let (bytes, version) = self.store.read().await?;
            let mut doc = ConfigDocument::parse(&bytes)?;
            op.apply(&mut doc);

            // replayed events synthesize the same document; rewriting the
            // blob would trigger a pointless engine reload per replay
            let yaml = doc.to_yaml()?;
            if yaml.as_bytes() == &bytes[..] {
                return Ok((doc, false));
            }

            match self.store.write(yaml.into_bytes(), version).await {
                Ok(()) => return Ok((doc, true)),
                Err(Error::Conflict(msg)) => {
                    metrics::SYNTHESIS_CONFLICTS_TOTAL.inc();
                    debug!("write conflict on attempt {}: {}", attempt, msg);
                }
                Err(e) => return Err(e),
            }
        }

        warn!("{} still conflicting after {} attempts", op.describe(), MAX_WRITE_ATTEMPTS);
        Err(Error::Conflict(format!(
            "gave up applying {} after {} attempts",
            op.describe(),
            MAX_WRITE_ATTEMPTS
        )))
    }
}
