use chrono::{DateTime, Utc};
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

#[derive(CustomResource, Debug, Serialize, Deserialize, Clone, JsonSchema)]
#[kube(
    group = "monitoring.alerting.io",
    version = "v1beta1",
    kind = "Alert",
    namespaced,
    status = "AlertStatus"
)]
pub struct AlertSpec {
    /// Human readable description, forwarded as an annotation on raised alerts
    pub description: String,

    #[serde(default)]
    pub severity: Severity,

    /// Kind of resource being monitored
    #[serde(rename = "targetType")]
    pub target_type: TargetType,

    /// Name of the monitored resource within the alert's namespace
    #[serde(rename = "targetId")]
    pub target_id: String,

    /// Firing rule; the populated variant must match targetType
    pub rule: TargetRule,

    /// Name of the Recipient this alert routes to
    #[serde(rename = "recipientId")]
    pub recipient_id: String,

    /// Optional per-route timing overrides
    #[serde(
        rename = "advancedOptions",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub advanced_options: Option<AdvancedOptions>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, JsonSchema, Default)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    #[default]
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum TargetType {
    Pod,
    Node,
    Deployment,
    Daemonset,
    Statefulset,
    Metric,
}

impl TargetType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetType::Pod => "pod",
            TargetType::Node => "node",
            TargetType::Deployment => "deployment",
            TargetType::Daemonset => "daemonset",
            TargetType::Statefulset => "statefulset",
            TargetType::Metric => "metric",
        }
    }
}

/// Exactly one variant is populated; serde's external tagging enforces it.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum TargetRule {
    Node(NodeRule),
    Workload(WorkloadRule),
    Metric(MetricRule),
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, JsonSchema)]
pub struct NodeRule {
    /// Node condition type that fires the alert when True. The special
    /// value "NotReady" fires when the Ready condition reports False.
    pub condition: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, JsonSchema)]
pub struct WorkloadRule {
    /// Percentage of replicas allowed to be unavailable before firing.
    /// A value of 0 means the rule is not configured and never fires.
    #[serde(rename = "unavailablePercentage")]
    pub unavailable_percentage: i32,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, JsonSchema)]
pub struct MetricRule {
    /// PromQL expression evaluated by the engine side, not by a watcher
    pub expression: String,
    pub comparison: String,
    pub threshold: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, JsonSchema, Default)]
pub struct AdvancedOptions {
    /// How long to wait before sending the first notification (group_wait)
    #[serde(rename = "initialWait", default, skip_serializing_if = "Option::is_none")]
    pub initial_wait: Option<String>,

    #[serde(
        rename = "groupInterval",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub group_interval: Option<String>,

    #[serde(
        rename = "repeatInterval",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub repeat_interval: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, JsonSchema, Default)]
#[serde(rename_all = "lowercase")]
pub enum AlertState {
    #[default]
    Enabled,
    Disabled,
    Active,
    Suppressed,
}

impl AlertState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertState::Enabled => "enabled",
            AlertState::Disabled => "disabled",
            AlertState::Active => "active",
            AlertState::Suppressed => "suppressed",
        }
    }

    /// Whether the engine currently reports this alert as firing.
    pub fn is_firing(&self) -> bool {
        matches!(self, AlertState::Active | AlertState::Suppressed)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, JsonSchema, Default)]
pub struct AlertStatus {
    #[serde(default)]
    pub state: AlertState,

    /// Firing window mirrored from the engine; unset while not firing
    #[serde(rename = "startsAt", default, skip_serializing_if = "Option::is_none")]
    pub starts_at: Option<DateTime<Utc>>,

    #[serde(rename = "endsAt", default, skip_serializing_if = "Option::is_none")]
    pub ends_at: Option<DateTime<Utc>>,
}

impl Alert {
    /// Current lifecycle state; a missing status means freshly created.
    pub fn state(&self) -> AlertState {
        self.status.as_ref().map(|s| s.state).unwrap_or_default()
    }

    pub fn workspace(&self) -> String {
        self.namespace().unwrap_or_else(|| "default".to_string())
    }

    /// Registry key, unique across namespaces.
    pub fn key(&self) -> String {
        format!("{}/{}", self.workspace(), self.name_any())
    }

    pub fn validate(&self) -> Result<()> {
        if self.spec.description.is_empty() {
            return Err(Error::Validation("alert is missing a description".into()));
        }
        if self.spec.recipient_id.is_empty() {
            return Err(Error::Validation("alert is missing a recipientId".into()));
        }
        if self.spec.target_id.is_empty() {
            return Err(Error::Validation("alert is missing a targetId".into()));
        }

        let matches = match (&self.spec.target_type, &self.spec.rule) {
            (TargetType::Node, TargetRule::Node(_)) => true,
            (
                TargetType::Deployment | TargetType::Daemonset | TargetType::Statefulset,
                TargetRule::Workload(_),
            ) => true,
            (TargetType::Metric, TargetRule::Metric(_)) => true,
            // Pod alerts evaluate container state and carry a workload rule slot
            // for symmetry, but any rule variant other than node/metric is accepted.
            (TargetType::Pod, TargetRule::Workload(_)) => true,
            _ => false,
        };
        if !matches {
            return Err(Error::Validation(format!(
                "rule does not match target type {}",
                self.spec.target_type.as_str()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::ObjectMeta;

    fn alert(target_type: TargetType, rule: TargetRule) -> Alert {
        Alert {
            metadata: ObjectMeta {
                name: Some("a1".to_string()),
                namespace: Some("ns1".to_string()),
                ..Default::default()
            },
            spec: AlertSpec {
                description: "deployment degraded".to_string(),
                severity: Severity::Critical,
                target_type,
                target_id: "web".to_string(),
                rule,
                recipient_id: "oncall".to_string(),
                advanced_options: None,
            },
            status: None,
        }
    }

    #[test]
    fn rule_must_match_target_type() {
        let ok = alert(
            TargetType::Deployment,
            TargetRule::Workload(WorkloadRule {
                unavailable_percentage: 40,
            }),
        );
        assert!(ok.validate().is_ok());

        let bad = alert(
            TargetType::Node,
            TargetRule::Workload(WorkloadRule {
                unavailable_percentage: 40,
            }),
        );
        assert!(matches!(bad.validate(), Err(Error::Validation(_))));
    }

    #[test]
    fn missing_status_defaults_to_enabled() {
        let a = alert(
            TargetType::Node,
            TargetRule::Node(NodeRule {
                condition: "OutOfDisk".to_string(),
            }),
        );
        assert_eq!(a.state(), AlertState::Enabled);
        assert!(!a.state().is_firing());
    }

    #[test]
    fn rule_serializes_with_single_variant() {
        let rule = TargetRule::Workload(WorkloadRule {
            unavailable_percentage: 40,
        });
        let json = serde_json::to_value(&rule).unwrap();
        assert_eq!(json["workload"]["unavailablePercentage"], 40);
    }
}
