//! Which child objects to create or delete for a job.

use std::collections::BTreeSet;

use training_core::{CleanPodPolicy, TrainingJobSpec};

use crate::resources::replica_name;
use crate::status::ObservedPod;

/// Children to reconcile while a job is active.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChildPlan {
    /// `(replica type, index)` of pods to create.
    pub create_pods: Vec<(String, i32)>,
    pub create_services: Vec<(String, i32)>,
    pub delete_pods: Vec<String>,
    /// Services of replicas no longer declared.
    pub delete_services: Vec<String>,
}

/// Compare declared replicas with what exists.
///
/// Pods scheduled for restart are only deleted here; they are created again
/// once the old pod is gone. Pods and services outside the declared replicas
/// are removed.
pub fn plan_children(
    job_name: &str,
    spec: &TrainingJobSpec,
    pods: &[ObservedPod],
    services: &BTreeSet<String>,
    restart: &[String],
) -> ChildPlan {
    let mut plan = ChildPlan::default();
    let existing: BTreeSet<&str> = pods.iter().map(|p| p.name.as_str()).collect();
    let mut declared = BTreeSet::new();

    for (replica_type, replica) in &spec.replica_specs {
        for index in 0..replica.replicas.max(0) {
            let name = replica_name(job_name, replica_type, index);
            if !existing.contains(name.as_str()) {
                plan.create_pods.push((replica_type.clone(), index));
            }
            if !services.contains(&name) {
                plan.create_services.push((replica_type.clone(), index));
            }
            declared.insert(name);
        }
    }
    plan.delete_services = services.difference(&declared).cloned().collect();

    for pod in pods {
        let declared = spec
            .replica_spec(&pod.replica_type)
            .is_some_and(|(_, r)| pod.index < r.replicas);
        if !declared || restart.contains(&pod.name) {
            plan.delete_pods.push(pod.name.clone());
        }
    }

    plan
}

/// Children to remove once a job has finished.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CleanupPlan {
    pub delete_pods: Vec<String>,
    pub delete_services: Vec<String>,
}

pub fn plan_cleanup(
    policy: CleanPodPolicy,
    pods: &[ObservedPod],
    services: &BTreeSet<String>,
    terminate_active: bool,
) -> CleanupPlan {
    let delete_pods: Vec<String> = match policy {
        CleanPodPolicy::All => pods.iter().map(|p| p.name.clone()).collect(),
        CleanPodPolicy::Running => active(pods),
        CleanPodPolicy::None if terminate_active => active(pods),
        CleanPodPolicy::None => Vec::new(),
    };
    let delete_services = match policy {
        CleanPodPolicy::All => services.iter().cloned().collect(),
        _ => services
            .iter()
            .filter(|s| delete_pods.contains(s))
            .cloned()
            .collect(),
    };
    CleanupPlan {
        delete_pods,
        delete_services,
    }
}

fn active(pods: &[ObservedPod]) -> Vec<String> {
    pods.iter()
        .filter(|p| p.phase.is_active())
        .map(|p| p.name.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use training_core::ReplicaSpec;

    use crate::status::PodPhase;

    fn spec(workers: i32) -> TrainingJobSpec {
        TrainingJobSpec {
            replica_specs: BTreeMap::from([
                ("Master".to_string(), ReplicaSpec::default()),
                (
                    "Worker".to_string(),
                    ReplicaSpec {
                        replicas: workers,
                        ..Default::default()
                    },
                ),
            ]),
            ..Default::default()
        }
    }

    fn pod(replica_type: &str, index: i32, phase: PodPhase) -> ObservedPod {
        ObservedPod {
            name: replica_name("mnist", replica_type, index),
            replica_type: replica_type.to_ascii_lowercase(),
            index,
            phase,
            restarts: 0,
            exit_code: None,
        }
    }

    fn names(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn fresh_job_creates_everything() {
        let plan = plan_children("mnist", &spec(2), &[], &BTreeSet::new(), &[]);
        assert_eq!(
            plan.create_pods,
            vec![
                ("Master".to_string(), 0),
                ("Worker".to_string(), 0),
                ("Worker".to_string(), 1)
            ]
        );
        assert_eq!(plan.create_services, plan.create_pods);
        assert!(plan.delete_pods.is_empty());
    }

    #[test]
    fn complete_job_needs_nothing() {
        let pods = [
            pod("Master", 0, PodPhase::Running),
            pod("Worker", 0, PodPhase::Running),
        ];
        let services = names(&["mnist-master-0", "mnist-worker-0"]);
        assert_eq!(
            plan_children("mnist", &spec(1), &pods, &services, &[]),
            ChildPlan::default()
        );
    }

    #[test]
    fn restarted_pod_is_deleted_not_recreated() {
        let pods = [
            pod("Master", 0, PodPhase::Running),
            pod("Worker", 0, PodPhase::Failed),
        ];
        let services = names(&["mnist-master-0", "mnist-worker-0"]);
        let plan = plan_children(
            "mnist",
            &spec(1),
            &pods,
            &services,
            &["mnist-worker-0".to_string()],
        );
        assert_eq!(plan.delete_pods, vec!["mnist-worker-0".to_string()]);
        assert!(plan.create_pods.is_empty());
        assert!(plan.delete_services.is_empty());
    }

    #[test]
    fn scaled_down_replicas_are_removed() {
        let pods = [
            pod("Master", 0, PodPhase::Running),
            pod("Worker", 0, PodPhase::Running),
            pod("Worker", 1, PodPhase::Running),
            pod("PS", 0, PodPhase::Running),
        ];
        let services = names(&[
            "mnist-master-0",
            "mnist-worker-0",
            "mnist-worker-1",
            "mnist-worker-2",
            "mnist-ps-0",
        ]);
        let plan = plan_children("mnist", &spec(1), &pods, &services, &[]);
        assert_eq!(
            plan.delete_pods,
            vec!["mnist-worker-1".to_string(), "mnist-ps-0".to_string()]
        );
        // worker-2's pod is already gone but its service lingered.
        assert_eq!(
            plan.delete_services,
            vec![
                "mnist-ps-0".to_string(),
                "mnist-worker-1".to_string(),
                "mnist-worker-2".to_string()
            ]
        );
        assert!(plan.create_services.is_empty());
    }

    #[test]
    fn cleanup_follows_policy() {
        let pods = [
            pod("Master", 0, PodPhase::Succeeded),
            pod("Worker", 0, PodPhase::Running),
        ];
        let services = names(&["mnist-master-0", "mnist-worker-0"]);

        let all = plan_cleanup(CleanPodPolicy::All, &pods, &services, false);
        assert_eq!(all.delete_pods.len(), 2);
        assert_eq!(all.delete_services.len(), 2);

        let running = plan_cleanup(CleanPodPolicy::Running, &pods, &services, false);
        assert_eq!(running.delete_pods, vec!["mnist-worker-0".to_string()]);
        assert_eq!(running.delete_services, vec!["mnist-worker-0".to_string()]);

        let none = plan_cleanup(CleanPodPolicy::None, &pods, &services, false);
        assert_eq!(none, CleanupPlan::default());
    }

    #[test]
    fn limit_failures_stop_active_pods_regardless_of_policy() {
        let pods = [
            pod("Master", 0, PodPhase::Running),
            pod("Worker", 0, PodPhase::Pending),
            pod("Worker", 1, PodPhase::Failed),
        ];
        let plan = plan_cleanup(CleanPodPolicy::None, &pods, &BTreeSet::new(), true);
        assert_eq!(
            plan.delete_pods,
            vec!["mnist-master-0".to_string(), "mnist-worker-0".to_string()]
        );
    }
}
