use k8s_openapi::api::core::v1::Pod;

/// A pod alert fires when any container is not in the Running state.
pub fn is_firing(pod: &Pod) -> bool {
    let statuses = pod
        .status
        .as_ref()
        .and_then(|s| s.container_statuses.as_ref());

    match statuses {
        Some(statuses) => statuses.iter().any(|status| {
            status
                .state
                .as_ref()
                .map(|state| state.running.is_none())
                .unwrap_or(true)
        }),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{
        ContainerState, ContainerStateRunning, ContainerStateWaiting, ContainerStatus, PodStatus,
    };

    fn pod_with_states(states: Vec<ContainerState>) -> Pod {
        Pod {
            status: Some(PodStatus {
                container_statuses: Some(
                    states
                        .into_iter()
                        .map(|state| ContainerStatus {
                            state: Some(state),
                            ..Default::default()
                        })
                        .collect(),
                ),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn running() -> ContainerState {
        ContainerState {
            running: Some(ContainerStateRunning::default()),
            ..Default::default()
        }
    }

    fn waiting() -> ContainerState {
        ContainerState {
            waiting: Some(ContainerStateWaiting::default()),
            ..Default::default()
        }
    }

    #[test]
    fn all_containers_running_does_not_fire() {
        assert!(!is_firing(&pod_with_states(vec![running(), running()])));
    }

    #[test]
    fn any_non_running_container_fires() {
        assert!(is_firing(&pod_with_states(vec![running(), waiting()])));
    }

    #[test]
    fn pod_without_status_does_not_fire() {
        assert!(!is_firing(&Pod::default()));
    }
}
