use std::sync::Arc;
use std::time::Duration;

use kube::ResourceExt;
use tokio::sync::watch as signal;
use tracing::{debug, warn};

use crate::alertmanager::{ApiAlert, EngineClient};
use crate::crd::{Alert, AlertState, AlertStatus};
use crate::lifecycle::AlertStore;
use crate::metrics;
use crate::Result;

/// Periodic reconciler pulling the engine's live alert list into each
/// alert's stored state. One engine fetch and one CRD list per tick; a
/// failed engine fetch aborts the whole tick rather than reconciling
/// against partial data.
pub struct Synchronizer {
    store: Arc<dyn AlertStore>,
    alertmanager: Arc<dyn EngineClient>,
    interval: Duration,
    shutdown: signal::Receiver<bool>,
}

impl Synchronizer {
    pub fn new(
        store: Arc<dyn AlertStore>,
        alertmanager: Arc<dyn EngineClient>,
        interval: Duration,
        shutdown: signal::Receiver<bool>,
    ) -> Self {
        Self {
            store,
            alertmanager,
            interval,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = self.shutdown.changed() => return,
                _ = ticker.tick() => {
                    match self.tick().await {
                        Ok(()) => metrics::SYNC_TICKS_TOTAL.inc(),
                        Err(e) => warn!("sync tick aborted: {}", e),
                    }
                }
            }
        }
    }

    async fn tick(&self) -> Result<()> {
        let api_alerts = self.alertmanager.list_alerts(None).await?;

        for alert in self.store.list().await? {
            // Disabled is user-owned; the engine never overrides it
            if alert.state() == AlertState::Disabled {
                continue;
            }

            let status = desired_status(&alert, &api_alerts);
            if alert.status.as_ref() == Some(&status) {
                continue;
            }

            // Leaving Suppressed without an explicit unsilence means the
            // engine dropped the entry; clear its silences before the state
            // goes back, or they will mask the next firing.
            if alert.state() == AlertState::Suppressed && status.state == AlertState::Enabled {
                if let Err(e) = self.alertmanager.remove_silences(&alert).await {
                    warn!("keeping {} suppressed, silence removal failed: {}", alert.key(), e);
                    continue;
                }
            }

            debug!(
                "syncing {} from {} to {}",
                alert.key(),
                alert.state().as_str(),
                status.state.as_str()
            );
            if let Err(e) = self.store.write_status(&alert, &status).await {
                warn!("failed to update state of {}: {}", alert.key(), e);
            }
        }

        Ok(())
    }
}

/// Correlate one alert against the engine's live list and compute the
/// status it should carry.
pub fn desired_status(alert: &Alert, api_alerts: &[ApiAlert]) -> AlertStatus {
    let entry = api_alerts.iter().find(|a| {
        a.labels.get("alert_id") == Some(&alert.name_any())
            && a.labels.get("namespace") == Some(&alert.workspace())
    });

    match entry {
        Some(entry) => AlertStatus {
            state: if entry.is_suppressed() {
                AlertState::Suppressed
            } else {
                AlertState::Active
            },
            starts_at: entry.starts_at,
            ends_at: entry.ends_at,
        },
        None => AlertStatus::default(),
    }
}
