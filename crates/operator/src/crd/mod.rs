pub mod alert;
pub mod notifier;
pub mod recipient;

pub use alert::{Alert, AlertState, AlertStatus, Severity, TargetRule, TargetType};
pub use notifier::{Notifier, NotifierSpec};
pub use recipient::{Recipient, RecipientChannel};
