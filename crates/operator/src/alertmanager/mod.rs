pub mod client;
pub mod document;
pub mod types;

pub use client::{AlertmanagerClient, EngineClient};
pub use document::{ConfigDocument, ALERT_ID_LABEL, NAMESPACE_LABEL};
pub use types::{ApiAlert, Matcher, PostableAlert, PostableSilence, Silence};
