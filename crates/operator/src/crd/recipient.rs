use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Serialize, Deserialize, Clone, JsonSchema)]
#[kube(
    group = "monitoring.alerting.io",
    version = "v1beta1",
    kind = "Recipient",
    namespaced
)]
pub struct RecipientSpec {
    /// Notification destination; exactly one channel is populated
    pub channel: RecipientChannel,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum RecipientChannel {
    Email(EmailRecipient),
    Slack(SlackRecipient),
    Pagerduty(PagerDutyRecipient),
    Webhook(WebhookRecipient),
}

impl RecipientChannel {
    pub fn kind(&self) -> &'static str {
        match self {
            RecipientChannel::Email(_) => "email",
            RecipientChannel::Slack(_) => "slack",
            RecipientChannel::Pagerduty(_) => "pagerduty",
            RecipientChannel::Webhook(_) => "webhook",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, JsonSchema)]
pub struct EmailRecipient {
    pub address: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, JsonSchema)]
pub struct SlackRecipient {
    pub channel: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, JsonSchema)]
pub struct PagerDutyRecipient {
    #[serde(rename = "serviceKey")]
    pub service_key: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, JsonSchema)]
pub struct WebhookRecipient {
    pub url: String,
}
