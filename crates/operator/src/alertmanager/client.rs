use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Months, Utc};
use kube::ResourceExt;
use reqwest::Client;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::alertmanager::types::{
    ApiAlert, ApiResponse, Matcher, PostableAlert, PostableSilence, Silence,
};
use crate::config::AlertmanagerConfig;
use crate::crd::Alert;
use crate::metrics;
use crate::{Error, Result};

const SILENCE_CREATED_BY: &str = "alertmanager-operator";

/// Pause between reload attempts once the grace period has elapsed.
const RELOAD_RETRY_SPACING: Duration = Duration::from_secs(5);

/// Engine operations the control loops depend on. The HTTP client below is
/// the production implementation; tests substitute recording doubles.
#[async_trait]
pub trait EngineClient: Send + Sync {
    /// Raise an alert into the engine, carrying the label set the
    /// synchronizer later correlates on.
    async fn raise_alert(&self, alert: &Alert) -> Result<()>;

    /// Fetch the engine's current alert list, optionally filtered by label
    /// matchers, e.g. `alert_id="a1",namespace="ns1"`.
    async fn list_alerts(&self, filter: Option<&str>) -> Result<Vec<ApiAlert>>;

    /// Create a silence scoped to this alert's identity with a far-future
    /// expiry; silences are removed explicitly, never allowed to lapse.
    async fn create_silence(&self, alert: &Alert) -> Result<()>;

    /// Remove every active silence matching this alert's identity. Leaving
    /// one behind would mask the next legitimate firing.
    async fn remove_silences(&self, alert: &Alert) -> Result<()>;
}

/// HTTP client for the external Alertmanager engine. All calls are bounded
/// by the configured request timeout.
pub struct AlertmanagerClient {
    base_url: String,
    client: Client,
    reload_grace: Duration,
    reload_max_retries: u32,
}

impl AlertmanagerClient {
    pub fn new(cfg: &AlertmanagerConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(cfg.http_timeout_secs))
            .build()?;

        Ok(Self {
            base_url: cfg.url.trim_end_matches('/').to_string(),
            client,
            reload_grace: Duration::from_secs(cfg.reload_grace_secs),
            reload_max_retries: cfg.reload_max_retries,
        })
    }

    /// Ask the engine to re-read its configuration from disk.
    pub async fn reload(&self) -> Result<()> {
        metrics::RELOAD_ATTEMPTS_TOTAL.inc();
        let resp = self
            .client
            .post(format!("{}/-/reload", self.base_url))
            .send()
            .await?;
        resp.error_for_status()?;
        info!("alertmanager configuration reloaded");
        Ok(())
    }

    /// Schedule a deferred reload. The secret propagates to the engine's
    /// disk through the kubelet with some latency, so the task waits a grace
    /// period first, then retries the reload a bounded number of times. The
    /// task stops early when the shutdown signal fires.
    pub fn schedule_reload(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let client = self;
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(client.reload_grace) => {}
                _ = shutdown.changed() => {
                    debug!("shutdown before reload grace period elapsed");
                    return;
                }
            }

            for attempt in 0..=client.reload_max_retries {
                if attempt > 0 {
                    tokio::select! {
                        _ = tokio::time::sleep(RELOAD_RETRY_SPACING) => {}
                        _ = shutdown.changed() => return,
                    }
                }
                match client.reload().await {
                    Ok(()) => return,
                    Err(e) => {
                        warn!("reload attempt {} failed: {}", attempt + 1, e);
                    }
                }
            }

            metrics::RELOAD_FAILURES_TOTAL.inc();
            error!(
                "giving up on reload after {} attempts",
                client.reload_max_retries + 1
            );
        })
    }

    pub async fn list_silences(&self, filter: &str) -> Result<Vec<Silence>> {
        let resp: ApiResponse<Silence> = self
            .client
            .get(format!("{}/api/v1/silences", self.base_url))
            .query(&[("filter", format!("{{{}}}", filter))])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        if resp.status != "success" {
            return Err(Error::Alertmanager(format!(
                "silence list returned status {}",
                resp.status
            )));
        }
        Ok(resp.data)
    }

    pub async fn delete_silence(&self, id: &str) -> Result<()> {
        let resp = self
            .client
            .delete(format!("{}/api/v1/silence/{}", self.base_url, id))
            .send()
            .await?;
        resp.error_for_status()?;
        Ok(())
    }
}

#[async_trait]
impl EngineClient for AlertmanagerClient {
    async fn raise_alert(&self, alert: &Alert) -> Result<()> {
        let mut labels = HashMap::new();
        labels.insert("namespace".to_string(), alert.workspace());
        labels.insert("alert_id".to_string(), alert.name_any());
        labels.insert("severity".to_string(), alert.spec.severity.as_str().to_string());
        labels.insert("target_id".to_string(), alert.spec.target_id.clone());
        labels.insert(
            "target_type".to_string(),
            alert.spec.target_type.as_str().to_string(),
        );
        labels.insert("description".to_string(), alert.spec.description.clone());

        let mut annotations = HashMap::new();
        annotations.insert("description".to_string(), alert.spec.description.clone());

        let body = vec![PostableAlert { labels, annotations }];
        let resp = self
            .client
            .post(format!("{}/api/alerts", self.base_url))
            .json(&body)
            .send()
            .await?;
        resp.error_for_status()?;

        metrics::ALERTS_RAISED_TOTAL.inc();
        debug!("raised alert {}", alert.key());
        Ok(())
    }

    async fn list_alerts(&self, filter: Option<&str>) -> Result<Vec<ApiAlert>> {
        let mut req = self.client.get(format!("{}/api/v1/alerts", self.base_url));
        if let Some(filter) = filter {
            req = req.query(&[("filter", format!("{{{}}}", filter))]);
        }

        let resp: ApiResponse<ApiAlert> = req.send().await?.error_for_status()?.json().await?;
        if resp.status != "success" {
            return Err(Error::Alertmanager(format!(
                "alert list returned status {}",
                resp.status
            )));
        }
        Ok(resp.data)
    }

    async fn create_silence(&self, alert: &Alert) -> Result<()> {
        let now = Utc::now();
        let silence = PostableSilence {
            matchers: identity_matchers(alert),
            starts_at: now,
            ends_at: now + Months::new(1200),
            created_by: SILENCE_CREATED_BY.to_string(),
            comment: format!("silence for alert {}", alert.key()),
        };

        let resp = self
            .client
            .post(format!("{}/api/v1/silences", self.base_url))
            .json(&silence)
            .send()
            .await?;
        resp.error_for_status()?;
        debug!("created silence for {}", alert.key());
        Ok(())
    }

    async fn remove_silences(&self, alert: &Alert) -> Result<()> {
        let filter = format!(
            "alert_id=\"{}\",namespace=\"{}\"",
            alert.name_any(),
            alert.workspace()
        );
        let silences = self.list_silences(&filter).await?;

        for silence in silences.iter().filter(|s| s.is_active()) {
            self.delete_silence(&silence.id).await?;
            debug!("deleted silence {} for {}", silence.id, alert.key());
        }
        Ok(())
    }
}

fn identity_matchers(alert: &Alert) -> Vec<Matcher> {
    vec![
        Matcher {
            name: "alert_id".to_string(),
            value: alert.name_any(),
            is_regex: false,
        },
        Matcher {
            name: "namespace".to_string(),
            value: alert.workspace(),
            is_regex: false,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AlertmanagerConfig;
    use crate::crd::alert::{AlertSpec, NodeRule, Severity, TargetRule, TargetType};
    use kube::core::ObjectMeta;

    fn test_alert() -> Alert {
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
            status: None,
        }
    }

    #[test]
    fn silences_are_scoped_to_alert_identity() {
        let matchers = identity_matchers(&test_alert());
        assert_eq!(matchers.len(), 2);
        assert!(matchers
            .iter()
            .any(|m| m.name == "alert_id" && m.value == "a1" && !m.is_regex));
        assert!(matchers
            .iter()
            .any(|m| m.name == "namespace" && m.value == "ns1" && !m.is_regex));
    }

    /// With a paused clock the grace period and the gaps between retries are
    /// the only timer waits, so the task must finish right after the last
    /// failed attempt rather than sleeping one more gap first.
    #[tokio::test(start_paused = true)]
    async fn reload_gives_up_without_a_trailing_delay() {
        let cfg = AlertmanagerConfig {
            // nothing listens on the discard port, every attempt fails fast
            url: "http://127.0.0.1:9".to_string(),
            reload_grace_secs: 10,
            reload_max_retries: 2,
            http_timeout_secs: 1,
        };
        let client = Arc::new(AlertmanagerClient::new(&cfg).unwrap());
        let (_tx, rx) = watch::channel(false);

        let started = tokio::time::Instant::now();
        client.schedule_reload(rx).await.unwrap();
        let elapsed = started.elapsed();

        // grace (10s) + two retry gaps (5s each); each attempt itself burns
        // at most the 1s request timeout
        assert!(elapsed >= Duration::from_secs(20));
        assert!(elapsed < Duration::from_secs(25));
    }
}
