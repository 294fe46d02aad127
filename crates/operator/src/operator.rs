use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use kube::api::Api;
use kube::runtime::watcher;
use kube::{Client, ResourceExt};
use tokio::sync::watch as signal;
use tracing::{error, info, warn};

use crate::alertmanager::AlertmanagerClient;
use crate::config::Config;
use crate::crd::{Alert, Notifier, Recipient};
use crate::lifecycle::KubeAlertStore;
use crate::sync::Synchronizer;
use crate::synthesizer::{ConfigOp, Synthesizer};
use crate::watch::WatcherRegistry;
use crate::Result;

/// Root of the control plane: owns the three declarative-object feeds and
/// the synchronizer, and dispatches change events into the synthesizer and
/// the watcher registry.
pub struct Operator {
    client: Client,
    config: Config,
    synthesizer: Arc<Synthesizer>,
    registry: Arc<WatcherRegistry>,
    alertmanager: Arc<AlertmanagerClient>,
    shutdown: signal::Receiver<bool>,
}

impl Operator {
    pub fn new(
        client: Client,
        config: Config,
        synthesizer: Arc<Synthesizer>,
        registry: Arc<WatcherRegistry>,
        alertmanager: Arc<AlertmanagerClient>,
        shutdown: signal::Receiver<bool>,
    ) -> Self {
        Self {
            client,
            config,
            synthesizer,
            registry,
            alertmanager,
            shutdown,
        }
    }

    /// Run the feeds and the synchronizer until the shutdown signal fires.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        info!("starting operator");

        let synchronizer = Synchronizer::new(
            Arc::new(KubeAlertStore::new(self.client.clone())),
            self.alertmanager.clone(),
            Duration::from_secs(self.config.sync.interval_secs),
            self.shutdown.clone(),
        );

        let sync_task = tokio::spawn(synchronizer.run());
        let alert_task = tokio::spawn(Arc::clone(&self).run_alert_feed());
        let recipient_task = tokio::spawn(Arc::clone(&self).run_recipient_feed());
        let notifier_task = tokio::spawn(Arc::clone(&self).run_notifier_feed());

        let _ = tokio::join!(sync_task, alert_task, recipient_task, notifier_task);

        self.registry.stop_all();
        info!("operator stopped");
        Ok(())
    }

    async fn run_alert_feed(self: Arc<Self>) {
        let api: Api<Alert> = Api::all(self.client.clone());
        let mut stream = watcher(api, watcher::Config::default()).boxed();
        let mut shutdown = self.shutdown.clone();

        loop {
            tokio::select! {
                _ = shutdown.changed() => return,
                event = stream.next() => match event {
                    Some(Ok(watcher::Event::Applied(alert))) => {
                        self.handle_alert_applied(alert).await;
                    }
                    Some(Ok(watcher::Event::Deleted(alert))) => {
                        self.handle_alert_deleted(&alert).await;
                    }
                    Some(Ok(watcher::Event::Restarted(alerts))) => {
                        for alert in alerts {
                            self.handle_alert_applied(alert).await;
                        }
                    }
                    Some(Err(e)) => warn!("alert feed error, stream will retry: {}", e),
                    None => return,
                }
            }
        }
    }

    /// The feed does not distinguish add from update, so applied events map
    /// to the self-healing update path on both the document and the
    /// registry.
    async fn handle_alert_applied(&self, alert: Alert) {
        if let Err(e) = alert.validate() {
            warn!("skipping invalid alert {}: {}", alert.key(), e);
            return;
        }

        if let Err(e) = self
            .synthesizer
            .synthesize(&ConfigOp::UpdateRoute(alert.clone()))
            .await
        {
            error!("failed to synthesize route for {}: {}", alert.key(), e);
        }

        self.registry.on_alert_updated(alert).await;
    }

    async fn handle_alert_deleted(&self, alert: &Alert) {
        let namespace = alert.workspace();
        let name = alert.name_any();

        self.registry.on_alert_deleted(&namespace, &name);

        if let Err(e) = self
            .synthesizer
            .synthesize(&ConfigOp::DeleteRoute {
                namespace: namespace.clone(),
                name: name.clone(),
            })
            .await
        {
            error!("failed to delete route for {}/{}: {}", namespace, name, e);
        }
    }

    async fn run_recipient_feed(self: Arc<Self>) {
        let api: Api<Recipient> = Api::all(self.client.clone());
        let mut stream = watcher(api, watcher::Config::default()).boxed();
        let mut shutdown = self.shutdown.clone();

        loop {
            tokio::select! {
                _ = shutdown.changed() => return,
                event = stream.next() => match event {
                    Some(Ok(watcher::Event::Applied(recipient))) => {
                        self.handle_recipient_applied(recipient).await;
                    }
                    Some(Ok(watcher::Event::Deleted(recipient))) => {
                        let name = recipient.name_any();
                        if let Err(e) = self
                            .synthesizer
                            .synthesize(&ConfigOp::DeleteReceiver { name: name.clone() })
                            .await
                        {
                            error!("failed to delete receiver {}: {}", name, e);
                        }
                    }
                    Some(Ok(watcher::Event::Restarted(recipients))) => {
                        for recipient in recipients {
                            self.handle_recipient_applied(recipient).await;
                        }
                    }
                    Some(Err(e)) => warn!("recipient feed error, stream will retry: {}", e),
                    None => return,
                }
            }
        }
    }

    async fn handle_recipient_applied(&self, recipient: Recipient) {
        let notifier = match self.fetch_notifier().await {
            Ok(notifier) => notifier,
            Err(e) => {
                // receiver synthesis degrades to recipient-only fields
                warn!("could not fetch notifier defaults: {}", e);
                None
            }
        };

        let name = recipient.name_any();
        let channel = recipient.spec.channel.kind();
        if let Err(e) = self
            .synthesizer
            .synthesize(&ConfigOp::UpdateReceiver {
                recipient,
                notifier,
            })
            .await
        {
            error!("failed to synthesize {} receiver {}: {}", channel, name, e);
        }
    }

    async fn run_notifier_feed(self: Arc<Self>) {
        let api: Api<Notifier> = Api::all(self.client.clone());
        let mut stream = watcher(api, watcher::Config::default()).boxed();
        let mut shutdown = self.shutdown.clone();

        loop {
            tokio::select! {
                _ = shutdown.changed() => return,
                event = stream.next() => match event {
                    Some(Ok(watcher::Event::Applied(notifier))) => {
                        self.handle_notifier_applied(notifier).await;
                    }
                    Some(Ok(watcher::Event::Deleted(notifier))) => {
                        info!("notifier {} deleted, keeping last known globals", notifier.name_any());
                    }
                    Some(Ok(watcher::Event::Restarted(notifiers))) => {
                        for notifier in notifiers {
                            self.handle_notifier_applied(notifier).await;
                        }
                    }
                    Some(Err(e)) => warn!("notifier feed error, stream will retry: {}", e),
                    None => return,
                }
            }
        }
    }

    async fn handle_notifier_applied(&self, notifier: Notifier) {
        if notifier.name_any() != self.config.secret.notifier_name {
            warn!("ignoring notifier {}, expected {}", notifier.name_any(), self.config.secret.notifier_name);
            return;
        }

        if let Err(e) = self
            .synthesizer
            .synthesize(&ConfigOp::UpdateGlobal(notifier))
            .await
        {
            error!("failed to synthesize global settings: {}", e);
        }
    }

    async fn fetch_notifier(&self) -> Result<Option<Notifier>> {
        let api: Api<Notifier> = Api::all(self.client.clone());
        Ok(api.get_opt(&self.config.secret.notifier_name).await?)
    }
}
