use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Cluster-scoped singleton carrying per-channel global defaults. The
/// operator looks it up by the well-known name from the configuration.
#[derive(CustomResource, Debug, Serialize, Deserialize, Clone, Default, JsonSchema)]
#[kube(
    group = "monitoring.alerting.io",
    version = "v1beta1",
    kind = "Notifier"
)]
pub struct NotifierSpec {
    #[serde(
        rename = "resolveTimeout",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub resolve_timeout: Option<String>,

    #[serde(rename = "emailConfig", default, skip_serializing_if = "Option::is_none")]
    pub email_config: Option<EmailConfigSpec>,

    #[serde(rename = "slackConfig", default, skip_serializing_if = "Option::is_none")]
    pub slack_config: Option<SlackConfigSpec>,

    #[serde(
        rename = "pagerdutyConfig",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub pagerduty_config: Option<PagerDutyConfigSpec>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, JsonSchema)]
pub struct EmailConfigSpec {
    #[serde(rename = "smtpFrom")]
    pub smtp_from: String,

    #[serde(rename = "smtpSmartHost")]
    pub smtp_smart_host: String,

    #[serde(
        rename = "smtpAuthUsername",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub smtp_auth_username: Option<String>,

    #[serde(
        rename = "smtpAuthPassword",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub smtp_auth_password: Option<String>,

    #[serde(
        rename = "smtpAuthIdentity",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub smtp_auth_identity: Option<String>,

    #[serde(rename = "smtpRequireTls", default)]
    pub smtp_require_tls: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, JsonSchema)]
pub struct SlackConfigSpec {
    #[serde(rename = "slackApiUrl")]
    pub slack_api_url: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, JsonSchema)]
pub struct PagerDutyConfigSpec {
    #[serde(rename = "pagerdutyUrl")]
    pub pagerduty_url: String,
}
