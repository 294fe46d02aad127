use std::collections::BTreeMap;

use kube::ResourceExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::crd::{Alert, Notifier, Recipient, RecipientChannel};
use crate::Result;

pub const NAMESPACE_LABEL: &str = "namespace";
pub const ALERT_ID_LABEL: &str = "alert_id";

/// In-memory model of the Alertmanager configuration blob. Loaded fresh from
/// the shared secret for every mutation; never held as a long-lived singleton.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ConfigDocument {
    #[serde(default, skip_serializing_if = "GlobalConfig::is_empty")]
    pub global: GlobalConfig,

    #[serde(default)]
    pub route: Route,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub receivers: Vec<Receiver>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct GlobalConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolve_timeout: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub smtp_from: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub smtp_smarthost: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub smtp_auth_username: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub smtp_auth_password: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub smtp_auth_identity: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub smtp_require_tls: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slack_api_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pagerduty_url: Option<String>,
}

impl GlobalConfig {
    pub fn is_empty(&self) -> bool {
        *self == GlobalConfig::default()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Route {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver: Option<String>,

    #[serde(rename = "match", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub match_labels: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_wait: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_interval: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repeat_interval: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub routes: Vec<Route>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Receiver {
    pub name: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub email_configs: Vec<EmailConfig>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub slack_configs: Vec<SlackConfig>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pagerduty_configs: Vec<PagerdutyConfig>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub webhook_configs: Vec<WebhookConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct EmailConfig {
    pub to: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub smarthost: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct SlackConfig {
    pub channel: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct PagerdutyConfig {
    pub service_key: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct WebhookConfig {
    pub url: String,
}

impl ConfigDocument {
    /// Parse the stored blob. An empty blob yields a default document; a
    /// malformed non-empty blob is a hard error so existing routes and
    /// receivers are never silently dropped.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.iter().all(|b| b.is_ascii_whitespace()) {
            return Ok(ConfigDocument::default());
        }
        Ok(serde_yaml::from_slice(bytes)?)
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Add the leaf route for an alert under its namespace route. Idempotent:
    /// a second add with the same alert leaves the document unchanged.
    pub fn add_route(&mut self, alert: &Alert) {
        let namespace = alert.workspace();
        let name = alert.name_any();

        let ns_route = self.namespace_route_mut(&namespace);
        if ns_route
            .routes
            .iter()
            .any(|r| r.match_labels.get(ALERT_ID_LABEL) == Some(&name))
        {
            debug!("route for {}/{} already present", namespace, name);
            return;
        }

        ns_route.routes.push(leaf_route(alert));
    }

    /// Update the leaf route in place; a missing route is treated as an add
    /// so a lost add event heals on the next update.
    pub fn update_route(&mut self, alert: &Alert) {
        let namespace = alert.workspace();
        let name = alert.name_any();

        let ns_route = self.namespace_route_mut(&namespace);
        match ns_route
            .routes
            .iter_mut()
            .find(|r| r.match_labels.get(ALERT_ID_LABEL) == Some(&name))
        {
            Some(route) => {
                let fresh = leaf_route(alert);
                route.receiver = fresh.receiver;
                route.group_wait = fresh.group_wait;
                route.group_interval = fresh.group_interval;
                route.repeat_interval = fresh.repeat_interval;
            }
            None => ns_route.routes.push(leaf_route(alert)),
        }
    }

    /// Remove the leaf route for (namespace, name). Absent is success. The
    /// namespace route stays even when it no longer holds any leaves.
    pub fn delete_route(&mut self, namespace: &str, name: &str) {
        if let Some(ns_route) = self
            .route
            .routes
            .iter_mut()
            .find(|r| r.match_labels.get(NAMESPACE_LABEL) == Some(&namespace.to_string()))
        {
            ns_route
                .routes
                .retain(|r| r.match_labels.get(ALERT_ID_LABEL) != Some(&name.to_string()));
        }
    }

    /// Append a receiver synthesized from the recipient and the notifier's
    /// channel defaults. No-op when a receiver with this name exists.
    pub fn add_receiver(&mut self, recipient: &Recipient, notifier: Option<&Notifier>) {
        let name = recipient.name_any();
        if self.receivers.iter().any(|r| r.name == name) {
            debug!("receiver {} already present", name);
            return;
        }
        self.receivers.push(build_receiver(recipient, notifier));
    }

    /// Replace the receiver's channel configuration in place; missing
    /// receivers are added.
    pub fn update_receiver(&mut self, recipient: &Recipient, notifier: Option<&Notifier>) {
        let name = recipient.name_any();
        let fresh = build_receiver(recipient, notifier);
        match self.receivers.iter_mut().find(|r| r.name == name) {
            Some(receiver) => *receiver = fresh,
            None => self.receivers.push(fresh),
        }
    }

    /// Remove a receiver by name; absent is success.
    pub fn delete_receiver(&mut self, name: &str) {
        self.receivers.retain(|r| r.name != name);
    }

    /// Overwrite global fields from the notifier. Fields present in the
    /// notifier replace the stored value; absent fields are left unchanged.
    pub fn update_global(&mut self, notifier: &Notifier) {
        let spec = &notifier.spec;
        if let Some(timeout) = &spec.resolve_timeout {
            self.global.resolve_timeout = Some(timeout.clone());
        }
        if let Some(email) = &spec.email_config {
            self.global.smtp_from = Some(email.smtp_from.clone());
            self.global.smtp_smarthost = Some(email.smtp_smart_host.clone());
            if let Some(username) = &email.smtp_auth_username {
                self.global.smtp_auth_username = Some(username.clone());
            }
            if let Some(password) = &email.smtp_auth_password {
                self.global.smtp_auth_password = Some(password.clone());
            }
            if let Some(identity) = &email.smtp_auth_identity {
                self.global.smtp_auth_identity = Some(identity.clone());
            }
            self.global.smtp_require_tls = Some(email.smtp_require_tls);
        }
        if let Some(slack) = &spec.slack_config {
            self.global.slack_api_url = Some(slack.slack_api_url.clone());
        }
        if let Some(pagerduty) = &spec.pagerduty_config {
            self.global.pagerduty_url = Some(pagerduty.pagerduty_url.clone());
        }
    }

    fn namespace_route_mut(&mut self, namespace: &str) -> &mut Route {
        let position = self
            .route
            .routes
            .iter()
            .position(|r| r.match_labels.get(NAMESPACE_LABEL) == Some(&namespace.to_string()));

        match position {
            Some(i) => &mut self.route.routes[i],
            None => {
                let mut match_labels = BTreeMap::new();
                match_labels.insert(NAMESPACE_LABEL.to_string(), namespace.to_string());
                self.route.routes.push(Route {
                    match_labels,
                    ..Default::default()
                });
                self.route.routes.last_mut().unwrap()
            }
        }
    }
}

fn leaf_route(alert: &Alert) -> Route {
    let mut match_labels = BTreeMap::new();
    match_labels.insert(ALERT_ID_LABEL.to_string(), alert.name_any());

    let mut route = Route {
        receiver: Some(alert.spec.recipient_id.clone()),
        match_labels,
        ..Default::default()
    };

    if let Some(options) = &alert.spec.advanced_options {
        route.group_wait = valid_duration(options.initial_wait.as_deref());
        route.group_interval = valid_duration(options.group_interval.as_deref());
        route.repeat_interval = valid_duration(options.repeat_interval.as_deref());
    }

    route
}

/// Keep a timing string only when it parses as a duration; a bad value
/// degrades to unset instead of failing the whole synthesis.
fn valid_duration(value: Option<&str>) -> Option<String> {
    let value = value?;
    match humantime::parse_duration(value) {
        Ok(_) => Some(value.to_string()),
        Err(_) => {
            warn!("ignoring unparsable duration {:?}", value);
            None
        }
    }
}

fn build_receiver(recipient: &Recipient, notifier: Option<&Notifier>) -> Receiver {
    let mut receiver = Receiver {
        name: recipient.name_any(),
        ..Default::default()
    };

    match &recipient.spec.channel {
        RecipientChannel::Email(email) => {
            let defaults = notifier.and_then(|n| n.spec.email_config.as_ref());
            receiver.email_configs.push(EmailConfig {
                to: email.address.clone(),
                from: defaults.map(|d| d.smtp_from.clone()),
                smarthost: defaults.map(|d| d.smtp_smart_host.clone()),
            });
        }
        RecipientChannel::Slack(slack) => {
            receiver.slack_configs.push(SlackConfig {
                channel: slack.channel.clone(),
                api_url: notifier
                    .and_then(|n| n.spec.slack_config.as_ref())
                    .map(|d| d.slack_api_url.clone()),
            });
        }
        RecipientChannel::Pagerduty(pagerduty) => {
            receiver.pagerduty_configs.push(PagerdutyConfig {
                service_key: pagerduty.service_key.clone(),
                url: notifier
                    .and_then(|n| n.spec.pagerduty_config.as_ref())
                    .map(|d| d.pagerduty_url.clone()),
            });
        }
        RecipientChannel::Webhook(webhook) => {
            receiver.webhook_configs.push(WebhookConfig {
                url: webhook.url.clone(),
            });
        }
    }

    receiver
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::alert::{AdvancedOptions, AlertSpec, Severity, TargetRule, WorkloadRule};
    use crate::crd::notifier::{NotifierSpec, SlackConfigSpec};
    use crate::crd::recipient::{RecipientSpec, SlackRecipient};
    use crate::crd::TargetType;
    use kube::core::ObjectMeta;

    fn test_alert(name: &str, namespace: &str, recipient: &str) -> Alert {
        Alert {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            spec: AlertSpec {
                description: "test".to_string(),
                severity: Severity::Critical,
                target_type: TargetType::Deployment,
                target_id: "web".to_string(),
                rule: TargetRule::Workload(WorkloadRule {
                    unavailable_percentage: 40,
                }),
                recipient_id: recipient.to_string(),
                advanced_options: None,
            },
            status: None,
        }
    }

    fn slack_recipient(name: &str) -> Recipient {
        Recipient {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("ns1".to_string()),
                ..Default::default()
            },
            spec: RecipientSpec {
                channel: RecipientChannel::Slack(SlackRecipient {
                    channel: "#alerts".to_string(),
                }),
            },
        }
    }

    fn slack_notifier() -> Notifier {
        Notifier {
            metadata: ObjectMeta {
                name: Some("notifier".to_string()),
                ..Default::default()
            },
            spec: NotifierSpec {
                slack_config: Some(SlackConfigSpec {
                    slack_api_url: "https://hooks.slack.example/T000".to_string(),
                }),
                ..Default::default()
            },
        }
    }

    fn leaf<'a>(doc: &'a ConfigDocument, namespace: &str, name: &str) -> Option<&'a Route> {
        doc.route
            .routes
            .iter()
            .find(|r| r.match_labels.get(NAMESPACE_LABEL) == Some(&namespace.to_string()))?
            .routes
            .iter()
            .find(|r| r.match_labels.get(ALERT_ID_LABEL) == Some(&name.to_string()))
    }

    #[test]
    fn add_route_is_idempotent() {
        let alert = test_alert("a1", "ns1", "oncall");
        let mut once = ConfigDocument::default();
        once.add_route(&alert);

        let mut twice = ConfigDocument::default();
        twice.add_route(&alert);
        twice.add_route(&alert);

        assert_eq!(once, twice);
        assert_eq!(leaf(&once, "ns1", "a1").unwrap().receiver.as_deref(), Some("oncall"));
    }

    #[test]
    fn update_route_heals_missing_route_and_changes_receiver() {
        let mut doc = ConfigDocument::default();
        doc.update_route(&test_alert("a1", "ns1", "oncall"));
        assert!(leaf(&doc, "ns1", "a1").is_some());

        doc.update_route(&test_alert("a1", "ns1", "backup"));
        assert_eq!(leaf(&doc, "ns1", "a1").unwrap().receiver.as_deref(), Some("backup"));
        let ns_route = &doc.route.routes[0];
        assert_eq!(ns_route.routes.len(), 1);
    }

    #[test]
    fn delete_route_keeps_namespace_route() {
        let mut doc = ConfigDocument::default();
        doc.add_route(&test_alert("a1", "ns1", "oncall"));
        doc.delete_route("ns1", "a1");

        let ns_route = &doc.route.routes[0];
        assert_eq!(ns_route.match_labels.get(NAMESPACE_LABEL).unwrap(), "ns1");
        assert!(ns_route.routes.is_empty());
    }

    #[test]
    fn delete_route_of_unknown_alert_is_a_noop() {
        let mut doc = ConfigDocument::default();
        doc.add_route(&test_alert("a1", "ns1", "oncall"));
        let before = doc.clone();

        doc.delete_route("ns1", "never-added");
        doc.delete_route("other-ns", "a1");
        assert_eq!(doc, before);
    }

    #[test]
    fn advanced_options_copy_onto_route_and_bad_durations_are_dropped() {
        let mut alert = test_alert("a1", "ns1", "oncall");
        alert.spec.advanced_options = Some(AdvancedOptions {
            initial_wait: Some("30s".to_string()),
            group_interval: Some("not-a-duration".to_string()),
            repeat_interval: Some("4h".to_string()),
        });

        let mut doc = ConfigDocument::default();
        doc.add_route(&alert);

        let route = leaf(&doc, "ns1", "a1").unwrap();
        assert_eq!(route.group_wait.as_deref(), Some("30s"));
        assert_eq!(route.group_interval, None);
        assert_eq!(route.repeat_interval.as_deref(), Some("4h"));
    }

    #[test]
    fn receiver_merges_notifier_defaults() {
        let mut doc = ConfigDocument::default();
        let notifier = slack_notifier();
        doc.add_receiver(&slack_recipient("oncall"), Some(&notifier));

        assert_eq!(doc.receivers.len(), 1);
        let slack = &doc.receivers[0].slack_configs[0];
        assert_eq!(slack.channel, "#alerts");
        assert_eq!(slack.api_url.as_deref(), Some("https://hooks.slack.example/T000"));

        // adding again under the same name is a no-op
        doc.add_receiver(&slack_recipient("oncall"), Some(&notifier));
        assert_eq!(doc.receivers.len(), 1);
    }

    #[test]
    fn delete_receiver_by_name() {
        let mut doc = ConfigDocument::default();
        doc.add_receiver(&slack_recipient("oncall"), None);
        doc.delete_receiver("oncall");
        assert!(doc.receivers.is_empty());
        // absent is success
        doc.delete_receiver("oncall");
    }

    #[test]
    fn update_global_overwrites_present_fields_only() {
        let mut doc = ConfigDocument::default();
        doc.global.resolve_timeout = Some("5m".to_string());
        doc.global.pagerduty_url = Some("https://events.pagerduty.example".to_string());

        doc.update_global(&slack_notifier());

        assert_eq!(doc.global.slack_api_url.as_deref(), Some("https://hooks.slack.example/T000"));
        // fields absent from the notifier keep their stored values
        assert_eq!(doc.global.resolve_timeout.as_deref(), Some("5m"));
        assert_eq!(
            doc.global.pagerduty_url.as_deref(),
            Some("https://events.pagerduty.example")
        );
    }

    #[test]
    fn parse_rejects_malformed_blob_and_accepts_empty() {
        assert!(ConfigDocument::parse(b"").unwrap().receivers.is_empty());
        assert!(ConfigDocument::parse(b"  \n").is_ok());
        assert!(ConfigDocument::parse(b"receivers: {not valid").is_err());
    }

    #[test]
    fn roundtrips_through_yaml() {
        let mut doc = ConfigDocument::default();
        doc.add_receiver(&slack_recipient("oncall"), Some(&slack_notifier()));
        doc.add_route(&test_alert("a1", "ns1", "oncall"));

        let yaml = doc.to_yaml().unwrap();
        let parsed = ConfigDocument::parse(yaml.as_bytes()).unwrap();
        assert_eq!(parsed, doc);
    }
}
