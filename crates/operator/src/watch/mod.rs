pub mod node;
pub mod pod;
pub mod workload;

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::{Arc, Mutex};

use futures::StreamExt;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{Node, Pod};
use kube::api::Api;
use kube::runtime::watcher;
use kube::{Client, ResourceExt};
use serde::de::DeserializeOwned;
use tokio::sync::{watch as signal, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::alertmanager::EngineClient;
use crate::crd::{Alert, AlertState, TargetRule, TargetType};

/// Shared dependencies handed to every spawned watcher.
#[derive(Clone)]
pub struct WatchContext {
    pub client: Client,
    pub alertmanager: Arc<dyn EngineClient>,
    pub shutdown: signal::Receiver<bool>,
}

struct WatcherHandle {
    /// Live alert record shared with the watcher task; rule updates land
    /// here without recreating the subscription.
    alert: Arc<RwLock<Alert>>,
    stop: signal::Sender<bool>,
    task: JoinHandle<()>,
}

/// Owns the set of live target watchers, one per alert. The index is
/// guarded because alert feed callbacks and teardown race on it.
pub struct WatcherRegistry {
    ctx: WatchContext,
    watchers: Mutex<HashMap<String, WatcherHandle>>,
}

impl WatcherRegistry {
    pub fn new(ctx: WatchContext) -> Self {
        Self {
            ctx,
            watchers: Mutex::new(HashMap::new()),
        }
    }

    /// Start a watcher for a new alert. An alert already present is treated
    /// as an update so replayed add events cannot double-subscribe.
    pub async fn on_alert_added(&self, alert: Alert) {
        self.upsert(alert).await;
    }

    /// Replace the watcher's alert record in place; the underlying
    /// subscription keeps running, so the next event already evaluates the
    /// new rule. An alert without a watcher gets one.
    pub async fn on_alert_updated(&self, alert: Alert) {
        self.upsert(alert).await;
    }

    async fn upsert(&self, alert: Alert) {
        if let Err(e) = alert.validate() {
            warn!("not watching invalid alert {}: {}", alert.key(), e);
            return;
        }

        let key = alert.key();
        let existing = {
            let watchers = self.watchers.lock().unwrap();
            watchers.get(&key).map(|h| h.alert.clone())
        };
        if let Some(shared) = existing {
            *shared.write().await = alert;
            debug!("replaced rule for {}", key);
            return;
        }

        if let Some(handle) = self.spawn(alert) {
            let mut watchers = self.watchers.lock().unwrap();
            watchers.insert(key, handle);
        }
    }

    /// Stop the watcher and drop it from the index. Removal happens under
    /// the lock before the task is signalled, so a late event from the old
    /// watcher cannot reuse the freed slot.
    pub fn on_alert_deleted(&self, namespace: &str, name: &str) {
        let key = format!("{}/{}", namespace, name);
        let handle = {
            let mut watchers = self.watchers.lock().unwrap();
            watchers.remove(&key)
        };

        if let Some(handle) = handle {
            let _ = handle.stop.send(true);
            handle.task.abort();
            debug!("stopped watcher for {}", key);
        }
    }

    pub fn stop_all(&self) {
        let handles: Vec<_> = {
            let mut watchers = self.watchers.lock().unwrap();
            watchers.drain().collect()
        };
        for (key, handle) in handles {
            let _ = handle.stop.send(true);
            handle.task.abort();
            debug!("stopped watcher for {}", key);
        }
    }

    pub fn len(&self) -> usize {
        self.watchers.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn spawn(&self, alert: Alert) -> Option<WatcherHandle> {
        let shared = Arc::new(RwLock::new(alert.clone()));
        let (stop_tx, stop_rx) = signal::channel(false);
        let namespace = alert.workspace();
        let selector = format!("metadata.name={}", alert.spec.target_id);
        let client = self.ctx.client.clone();

        let task = match alert.spec.target_type {
            TargetType::Pod => {
                let api: Api<Pod> = Api::namespaced(client, &namespace);
                self.watch_task(api, selector, shared.clone(), stop_rx, |pod: &Pod, _: &Alert| {
                    pod::is_firing(pod)
                })
            }
            TargetType::Deployment => {
                let api: Api<Deployment> = Api::namespaced(client, &namespace);
                self.watch_task(api, selector, shared.clone(), stop_rx, |d: &Deployment, a: &Alert| {
                    workload::deployment_is_firing(d, workload_percentage(a))
                })
            }
            TargetType::Statefulset => {
                let api: Api<StatefulSet> = Api::namespaced(client, &namespace);
                self.watch_task(api, selector, shared.clone(), stop_rx, |s: &StatefulSet, a: &Alert| {
                    workload::statefulset_is_firing(s, workload_percentage(a))
                })
            }
            TargetType::Daemonset => {
                let api: Api<DaemonSet> = Api::namespaced(client, &namespace);
                self.watch_task(api, selector, shared.clone(), stop_rx, |d: &DaemonSet, a: &Alert| {
                    workload::daemonset_is_firing(d, workload_percentage(a))
                })
            }
            TargetType::Node => {
                // nodes are cluster-scoped
                let api: Api<Node> = Api::all(client);
                self.watch_task(api, selector, shared.clone(), stop_rx, |n: &Node, a: &Alert| {
                    match &a.spec.rule {
                        TargetRule::Node(rule) => node::is_firing(n, &rule.condition),
                        _ => false,
                    }
                })
            }
            TargetType::Metric => {
                // metric rules are evaluated on the engine's Prometheus side
                info!("no watcher for metric alert {}", alert.key());
                return None;
            }
        };

        info!("started {} watcher for {}", alert.spec.target_type.as_str(), alert.key());
        Some(WatcherHandle {
            alert: shared,
            stop: stop_tx,
            task,
        })
    }

    fn watch_task<K, F>(
        &self,
        api: Api<K>,
        selector: String,
        alert: Arc<RwLock<Alert>>,
        stop: signal::Receiver<bool>,
        eval: F,
    ) -> JoinHandle<()>
    where
        K: kube::Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
        F: Fn(&K, &Alert) -> bool + Send + Sync + 'static,
    {
        let alertmanager = self.ctx.alertmanager.clone();
        let shutdown = self.ctx.shutdown.clone();
        tokio::spawn(run_watch(api, selector, alert, alertmanager, shutdown, stop, eval))
    }
}

/// Long-lived evaluation loop over a field-selector-scoped watch on the
/// target resource. Only resource-version changes are evaluated, and only
/// while the owning alert is not Disabled.
async fn run_watch<K, F>(
    api: Api<K>,
    selector: String,
    alert: Arc<RwLock<Alert>>,
    alertmanager: Arc<dyn EngineClient>,
    mut shutdown: signal::Receiver<bool>,
    mut stop: signal::Receiver<bool>,
    eval: F,
) where
    K: kube::Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
    F: Fn(&K, &Alert) -> bool + Send + Sync + 'static,
{
    let config = watcher::Config::default().fields(&selector);
    let mut stream = watcher(api, config).boxed();
    let mut last_version: Option<String> = None;

    loop {
        tokio::select! {
            _ = stop.changed() => return,
            _ = shutdown.changed() => return,
            event = stream.next() => match event {
                Some(Ok(watcher::Event::Applied(obj))) => {
                    evaluate_target(&obj, &alert, &alertmanager, &mut last_version, &eval).await;
                }
                Some(Ok(watcher::Event::Deleted(_))) => {
                    last_version = None;
                }
                // a relist after a stream error may carry a change that
                // happened during the disconnect; the version gate drops the
                // objects we have already seen
                Some(Ok(watcher::Event::Restarted(objs))) => {
                    for obj in &objs {
                        evaluate_target(obj, &alert, &alertmanager, &mut last_version, &eval).await;
                    }
                }
                Some(Err(e)) => {
                    warn!("watch error, stream will retry: {}", e);
                }
                None => return,
            }
        }
    }
}

/// Evaluate one observed object against the owning alert's current rule.
/// Skipped when the resource version has not changed since the last
/// evaluation or the alert is Disabled.
async fn evaluate_target<K, F>(
    obj: &K,
    alert: &Arc<RwLock<Alert>>,
    alertmanager: &Arc<dyn EngineClient>,
    last_version: &mut Option<String>,
    eval: &F,
) where
    K: kube::Resource<DynamicType = ()>,
    F: Fn(&K, &Alert) -> bool,
{
    let version = obj.resource_version();
    if version.is_some() && version == *last_version {
        return;
    }
    *last_version = version;

    let snapshot = alert.read().await.clone();
    if snapshot.state() == AlertState::Disabled {
        return;
    }

    if eval(obj, &snapshot) {
        info!("{} is firing", snapshot.key());
        if let Err(e) = alertmanager.raise_alert(&snapshot).await {
            error!("failed to raise alert {}: {}", snapshot.key(), e);
        }
    } else {
        debug!("{} is ok", snapshot.key());
    }
}

fn workload_percentage(alert: &Alert) -> i32 {
    match &alert.spec.rule {
        TargetRule::Workload(rule) => rule.unavailable_percentage,
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alertmanager::ApiAlert;
    use crate::crd::alert::{AlertSpec, Severity, WorkloadRule};
    use crate::Result;
    use async_trait::async_trait;
    use k8s_openapi::api::apps::v1::{DeploymentSpec, DeploymentStatus};
    use kube::core::ObjectMeta;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct RecordingEngine {
        raised: AtomicUsize,
    }

    #[async_trait]
    impl EngineClient for RecordingEngine {
        async fn raise_alert(&self, _alert: &Alert) -> Result<()> {
            self.raised.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn list_alerts(&self, _filter: Option<&str>) -> Result<Vec<ApiAlert>> {
            Ok(Vec::new())
        }

        async fn create_silence(&self, _alert: &Alert) -> Result<()> {
            Ok(())
        }

        async fn remove_silences(&self, _alert: &Alert) -> Result<()> {
            Ok(())
        }
    }

    fn deployment_alert(percentage: i32) -> Alert {
        Alert {
            metadata: ObjectMeta {
                name: Some("a1".to_string()),
                namespace: Some("ns1".to_string()),
                ..Default::default()
            },
            spec: AlertSpec {
                description: "degraded".to_string(),
                severity: Severity::Warning,
                target_type: TargetType::Deployment,
                target_id: "web".to_string(),
                rule: TargetRule::Workload(WorkloadRule {
                    unavailable_percentage: percentage,
                }),
                recipient_id: "oncall".to_string(),
                advanced_options: None,
            },
            status: None,
        }
    }

    fn deployment(desired: i32, available: i32) -> Deployment {
        Deployment {
            spec: Some(DeploymentSpec {
                replicas: Some(desired),
                ..Default::default()
            }),
            status: Some(DeploymentStatus {
                available_replicas: Some(available),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    /// Rule updates flow through the shared alert record, so the same
    /// evaluation path changes behavior without a new subscription.
    #[tokio::test]
    async fn rule_update_changes_firing_without_resubscribing() {
        let shared = Arc::new(RwLock::new(deployment_alert(40)));
        let eval = |d: &Deployment, a: &Alert| {
            workload::deployment_is_firing(d, workload_percentage(a))
        };

        let observed = deployment(5, 4);
        // 40% tolerance: threshold 3, 4 available does not fire
        assert!(!eval(&observed, &*shared.read().await));

        *shared.write().await = deployment_alert(10);
        // 10% tolerance: threshold 4, the same observation now fires
        assert!(eval(&observed, &*shared.read().await));
    }

    /// A relist replays the last object seen plus anything that changed
    /// while the stream was down; only versions not yet evaluated may raise.
    #[tokio::test]
    async fn relisted_objects_pass_through_the_version_gate() {
        let typed = Arc::new(RecordingEngine::default());
        let engine: Arc<dyn EngineClient> = typed.clone();

        let shared = Arc::new(RwLock::new(deployment_alert(40)));
        let eval = |d: &Deployment, a: &Alert| {
            workload::deployment_is_firing(d, workload_percentage(a))
        };
        let mut last_version = None;

        let mut degraded = deployment(5, 3);
        degraded.metadata.resource_version = Some("7".to_string());

        evaluate_target(&degraded, &shared, &engine, &mut last_version, &eval).await;
        assert_eq!(typed.raised.load(Ordering::SeqCst), 1);

        // a resync replaying the same version is dropped
        evaluate_target(&degraded, &shared, &engine, &mut last_version, &eval).await;
        assert_eq!(typed.raised.load(Ordering::SeqCst), 1);

        // a relist carrying a change from the disconnect window raises
        degraded.metadata.resource_version = Some("8".to_string());
        evaluate_target(&degraded, &shared, &engine, &mut last_version, &eval).await;
        assert_eq!(typed.raised.load(Ordering::SeqCst), 2);
    }
}
