use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};

/// Replica count below which a workload alert fires:
/// `(100 - unavailablePercentage) * desired / 100`, integer floor.
pub fn available_threshold(unavailable_percentage: i32, desired: i32) -> i32 {
    (100 - unavailable_percentage) * desired / 100
}

/// A percentage of 0 means the rule was never configured; such an alert
/// must not fire regardless of the observed counts.
pub fn is_firing(unavailable_percentage: i32, desired: i32, available: i32) -> bool {
    if unavailable_percentage == 0 {
        return false;
    }
    available <= available_threshold(unavailable_percentage, desired)
}

pub fn deployment_is_firing(deployment: &Deployment, unavailable_percentage: i32) -> bool {
    let desired = deployment
        .spec
        .as_ref()
        .and_then(|s| s.replicas)
        .unwrap_or(1);
    let available = deployment
        .status
        .as_ref()
        .and_then(|s| s.available_replicas)
        .unwrap_or(0);
    is_firing(unavailable_percentage, desired, available)
}

pub fn statefulset_is_firing(statefulset: &StatefulSet, unavailable_percentage: i32) -> bool {
    let desired = statefulset
        .spec
        .as_ref()
        .and_then(|s| s.replicas)
        .unwrap_or(1);
    let available = statefulset
        .status
        .as_ref()
        .and_then(|s| s.ready_replicas)
        .unwrap_or(0);
    is_firing(unavailable_percentage, desired, available)
}

pub fn daemonset_is_firing(daemonset: &DaemonSet, unavailable_percentage: i32) -> bool {
    let status = daemonset.status.as_ref();
    let desired = status.map(|s| s.desired_number_scheduled).unwrap_or(0);
    let available = status.map(|s| s.number_ready).unwrap_or(0);
    is_firing(unavailable_percentage, desired, available)
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::apps::v1::{DeploymentSpec, DeploymentStatus};

    #[test]
    fn threshold_uses_integer_floor() {
        // 5 replicas, 40% unavailable tolerance: floor(60 * 5 / 100) = 3
        assert_eq!(available_threshold(40, 5), 3);
        assert_eq!(available_threshold(10, 5), 4);
        assert_eq!(available_threshold(50, 3), 1);
    }

    #[test]
    fn fires_at_threshold_but_not_above() {
        assert!(is_firing(40, 5, 3));
        assert!(!is_firing(40, 5, 4));
    }

    #[test]
    fn zero_percentage_never_fires() {
        assert!(!is_firing(0, 5, 0));
    }

    #[test]
    fn deployment_counts_come_from_spec_and_status() {
        let deployment = Deployment {
            spec: Some(DeploymentSpec {
                replicas: Some(5),
                ..Default::default()
            }),
            status: Some(DeploymentStatus {
                available_replicas: Some(3),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(deployment_is_firing(&deployment, 40));
        assert!(!deployment_is_firing(&deployment, 0));
    }
}
