use k8s_openapi::api::core::v1::Node;

pub const NOT_READY_CONDITION: &str = "NotReady";

/// A node alert fires when the configured condition type reports True.
/// "NotReady" is not a real condition type; it fires when the Ready
/// condition reports False.
pub fn is_firing(node: &Node, condition: &str) -> bool {
    let conditions = match node.status.as_ref().and_then(|s| s.conditions.as_ref()) {
        Some(conditions) => conditions,
        None => return false,
    };

    conditions.iter().any(|c| {
        (c.type_ == condition && c.status == "True")
            || (condition == NOT_READY_CONDITION && c.type_ == "Ready" && c.status == "False")
    })
}
