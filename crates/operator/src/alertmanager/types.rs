use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const SILENCE_STATE_ACTIVE: &str = "active";
pub const ALERT_STATE_SUPPRESSED: &str = "suppressed";

/// Envelope used by the v1 Alertmanager API for list responses.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiResponse<T> {
    pub status: String,
    #[serde(default)]
    pub data: Vec<T>,
}

/// One entry from GET /api/v1/alerts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiAlert {
    #[serde(default)]
    pub labels: HashMap<String, String>,

    #[serde(default)]
    pub annotations: HashMap<String, String>,

    #[serde(rename = "startsAt", default)]
    pub starts_at: Option<DateTime<Utc>>,

    #[serde(rename = "endsAt", default)]
    pub ends_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub status: ApiAlertStatus,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiAlertStatus {
    /// "active" or "suppressed"
    #[serde(default)]
    pub state: String,
}

impl ApiAlert {
    pub fn is_suppressed(&self) -> bool {
        self.status.state == ALERT_STATE_SUPPRESSED
    }
}

/// Payload entry for POST /api/alerts.
#[derive(Debug, Clone, Serialize)]
pub struct PostableAlert {
    pub labels: HashMap<String, String>,
    pub annotations: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Matcher {
    pub name: String,
    pub value: String,
    #[serde(rename = "isRegex")]
    pub is_regex: bool,
}

/// Silence creation body for POST /api/v1/silences.
#[derive(Debug, Clone, Serialize)]
pub struct PostableSilence {
    pub matchers: Vec<Matcher>,
    #[serde(rename = "startsAt")]
    pub starts_at: DateTime<Utc>,
    #[serde(rename = "endsAt")]
    pub ends_at: DateTime<Utc>,
    #[serde(rename = "createdBy")]
    pub created_by: String,
    pub comment: String,
}

/// One entry from GET /api/v1/silences.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Silence {
    pub id: String,
    #[serde(default)]
    pub matchers: Vec<Matcher>,
    #[serde(default)]
    pub status: SilenceStatus,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SilenceStatus {
    #[serde(default)]
    pub state: String,
}

impl Silence {
    pub fn is_active(&self) -> bool {
        self.status.state == SILENCE_STATE_ACTIVE
    }
}
