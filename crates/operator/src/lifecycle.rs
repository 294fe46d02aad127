use std::sync::Arc;

use async_trait::async_trait;
use kube::api::{Api, ListParams, Patch, PatchParams};
use kube::{Client, ResourceExt};
use serde_json::json;
use tracing::info;

use crate::alertmanager::EngineClient;
use crate::crd::{Alert, AlertState, AlertStatus};
use crate::{Error, Result};

/// Typed access to stored alerts. The production implementation talks to the
/// cluster; control-flow tests substitute recording doubles.
#[async_trait]
pub trait AlertStore: Send + Sync {
    async fn list(&self) -> Result<Vec<Alert>>;
    async fn write_status(&self, alert: &Alert, status: &AlertStatus) -> Result<()>;
}

/// AlertStore backed by the cluster. Status writes merge-patch the status
/// subresource and skip the call when the stored status already matches.
pub struct KubeAlertStore {
    client: Client,
}

impl KubeAlertStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl AlertStore for KubeAlertStore {
    async fn list(&self) -> Result<Vec<Alert>> {
        let api: Api<Alert> = Api::all(self.client.clone());
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn write_status(&self, alert: &Alert, status: &AlertStatus) -> Result<()> {
        if alert.status.as_ref() == Some(status) {
            return Ok(());
        }

        let api: Api<Alert> = Api::namespaced(self.client.clone(), &alert.workspace());
        api.patch_status(
            &alert.name_any(),
            &PatchParams::default(),
            &Patch::Merge(&json!({ "status": status })),
        )
        .await?;
        Ok(())
    }
}

/// User-triggered lifecycle actions on an alert; front-end services construct
/// this around the shared engine client and alert store. Guard violations are
/// rejected synchronously with no partial effect; silences are created and
/// removed in the engine before the stored state changes.
pub struct AlertLifecycle {
    store: Arc<dyn AlertStore>,
    alertmanager: Arc<dyn EngineClient>,
}

impl AlertLifecycle {
    pub fn new(store: Arc<dyn AlertStore>, alertmanager: Arc<dyn EngineClient>) -> Self {
        Self {
            store,
            alertmanager,
        }
    }

    pub async fn enable(&self, alert: &Alert) -> Result<()> {
        match alert.state() {
            AlertState::Enabled => Ok(()),
            AlertState::Disabled => {
                self.store.write_status(alert, &AlertStatus::default()).await?;
                info!("enabled alert {}", alert.key());
                Ok(())
            }
            state => Err(invalid("enable", alert, state)),
        }
    }

    pub async fn disable(&self, alert: &Alert) -> Result<()> {
        match alert.state() {
            AlertState::Disabled => Ok(()),
            AlertState::Enabled => {
                let status = AlertStatus {
                    state: AlertState::Disabled,
                    ..Default::default()
                };
                self.store.write_status(alert, &status).await?;
                info!("disabled alert {}", alert.key());
                Ok(())
            }
            state => Err(invalid("disable", alert, state)),
        }
    }

    /// Silence an actively firing alert: post the silence first, then record
    /// the state, so a failed engine call never leaves a phantom Suppressed.
    pub async fn silence(&self, alert: &Alert) -> Result<()> {
        guard_silence(alert)?;

        self.alertmanager.create_silence(alert).await?;
        let status = AlertStatus {
            state: AlertState::Suppressed,
            starts_at: alert.status.as_ref().and_then(|s| s.starts_at),
            ends_at: alert.status.as_ref().and_then(|s| s.ends_at),
        };
        self.store.write_status(alert, &status).await?;
        info!("silenced alert {}", alert.key());
        Ok(())
    }

    /// Remove the alert's silences in the engine, then return to Active. An
    /// orphaned silence would mask the next legitimate firing, so removal
    /// comes first.
    pub async fn unsilence(&self, alert: &Alert) -> Result<()> {
        guard_unsilence(alert)?;

        self.alertmanager.remove_silences(alert).await?;
        let status = AlertStatus {
            state: AlertState::Active,
            starts_at: alert.status.as_ref().and_then(|s| s.starts_at),
            ends_at: alert.status.as_ref().and_then(|s| s.ends_at),
        };
        self.store.write_status(alert, &status).await?;
        info!("unsilenced alert {}", alert.key());
        Ok(())
    }

    /// Deletion is only permitted from Disabled.
    pub fn ensure_deletable(&self, alert: &Alert) -> Result<()> {
        guard_delete(alert)
    }
}

pub(crate) fn guard_silence(alert: &Alert) -> Result<()> {
    match alert.state() {
        AlertState::Active => Ok(()),
        state => Err(invalid("silence", alert, state)),
    }
}

pub(crate) fn guard_unsilence(alert: &Alert) -> Result<()> {
    match alert.state() {
        AlertState::Suppressed => Ok(()),
        state => Err(invalid("unsilence", alert, state)),
    }
}

pub(crate) fn guard_delete(alert: &Alert) -> Result<()> {
    match alert.state() {
        AlertState::Disabled => Ok(()),
        state => Err(Error::InvalidState(format!(
            "alert {} must be disabled before deletion, current state is {}",
            alert.key(),
            state.as_str()
        ))),
    }
}

fn invalid(action: &str, alert: &Alert, state: AlertState) -> Error {
    Error::InvalidState(format!(
        "cannot {} alert {} in state {}",
        action,
        alert.key(),
        state.as_str()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alertmanager::ApiAlert;
    use crate::crd::alert::{AlertSpec, NodeRule, Severity, TargetRule};
    use crate::crd::TargetType;
    use kube::core::ObjectMeta;
    use std::sync::Mutex;

    fn alert_in_state(state: AlertState) -> Alert {
        Alert {
            metadata: ObjectMeta {
                name: Some("a1".to_string()),
                namespace: Some("ns1".to_string()),
                ..Default::default()
            },
            spec: AlertSpec {
                description: "node down".to_string(),
                severity: Severity::Critical,
                target_type: TargetType::Node,
                target_id: "node-1".to_string(),
                rule: TargetRule::Node(NodeRule {
                    condition: "NotReady".to_string(),
                }),
                recipient_id: "oncall".to_string(),
                advanced_options: None,
            },
            status: Some(AlertStatus {
                state,
                ..Default::default()
            }),
        }
    }

    /// Appends every engine and store call to a shared log so tests can
    /// assert ordering across the two collaborators.
    #[derive(Default)]
    struct CallLog {
        entries: Mutex<Vec<String>>,
    }

    impl CallLog {
        fn push(&self, entry: impl Into<String>) {
            self.entries.lock().unwrap().push(entry.into());
        }

        fn entries(&self) -> Vec<String> {
            self.entries.lock().unwrap().clone()
        }
    }

    struct RecordingEngine {
        log: Arc<CallLog>,
        fail_remove: bool,
    }

    #[async_trait]
    impl EngineClient for RecordingEngine {
        async fn raise_alert(&self, _alert: &Alert) -> Result<()> {
            self.log.push("raise_alert");
            Ok(())
        }

        async fn list_alerts(&self, _filter: Option<&str>) -> Result<Vec<ApiAlert>> {
            Ok(Vec::new())
        }

        async fn create_silence(&self, _alert: &Alert) -> Result<()> {
            self.log.push("create_silence");
            Ok(())
        }

        async fn remove_silences(&self, _alert: &Alert) -> Result<()> {
            self.log.push("remove_silences");
            if self.fail_remove {
                return Err(Error::Alertmanager("silence list unavailable".to_string()));
            }
            Ok(())
        }
    }

    struct RecordingStore {
        log: Arc<CallLog>,
    }

    #[async_trait]
    impl AlertStore for RecordingStore {
        async fn list(&self) -> Result<Vec<Alert>> {
            Ok(Vec::new())
        }

        async fn write_status(&self, _alert: &Alert, status: &AlertStatus) -> Result<()> {
            self.log.push(format!("status:{}", status.state.as_str()));
            Ok(())
        }
    }

    fn lifecycle(fail_remove: bool) -> (AlertLifecycle, Arc<CallLog>) {
        let log = Arc::new(CallLog::default());
        let lifecycle = AlertLifecycle::new(
            Arc::new(RecordingStore { log: log.clone() }),
            Arc::new(RecordingEngine {
                log: log.clone(),
                fail_remove,
            }),
        );
        (lifecycle, log)
    }

    #[test]
    fn delete_requires_disabled() {
        assert!(guard_delete(&alert_in_state(AlertState::Disabled)).is_ok());
        for state in [AlertState::Enabled, AlertState::Active, AlertState::Suppressed] {
            let err = guard_delete(&alert_in_state(state)).unwrap_err();
            assert!(matches!(err, Error::InvalidState(_)));
        }
    }

    #[test]
    fn silence_requires_active() {
        assert!(guard_silence(&alert_in_state(AlertState::Active)).is_ok());
        assert!(guard_silence(&alert_in_state(AlertState::Enabled)).is_err());
        assert!(guard_silence(&alert_in_state(AlertState::Suppressed)).is_err());
    }

    #[test]
    fn unsilence_requires_suppressed() {
        assert!(guard_unsilence(&alert_in_state(AlertState::Suppressed)).is_ok());
        assert!(guard_unsilence(&alert_in_state(AlertState::Active)).is_err());
    }

    #[tokio::test]
    async fn silence_posts_to_engine_before_recording_state() {
        let (lifecycle, log) = lifecycle(false);
        lifecycle
            .silence(&alert_in_state(AlertState::Active))
            .await
            .unwrap();
        assert_eq!(log.entries(), vec!["create_silence", "status:suppressed"]);
    }

    #[tokio::test]
    async fn unsilence_removes_silences_before_reverting() {
        let (lifecycle, log) = lifecycle(false);
        lifecycle
            .unsilence(&alert_in_state(AlertState::Suppressed))
            .await
            .unwrap();
        assert_eq!(log.entries(), vec!["remove_silences", "status:active"]);
    }

    #[tokio::test]
    async fn failed_silence_removal_keeps_alert_suppressed() {
        let (lifecycle, log) = lifecycle(true);
        let err = lifecycle
            .unsilence(&alert_in_state(AlertState::Suppressed))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Alertmanager(_)));
        // the status write never happens when removal fails
        assert_eq!(log.entries(), vec!["remove_silences"]);
    }
}
