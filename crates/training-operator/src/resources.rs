//! Pods and headless services for each replica of a job.

use k8s_openapi::api::core::v1::{EnvVar, Pod, Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::{Resource, ResourceExt};
use training_core::labels::{is_master_role, replica_labels};
use training_core::{TrainingJob, TrainingJobSpec};
use training_scheduler::GangScheduler;

use crate::error::{Error, Result};

/// Name shared by a replica's pod and service: `<job>-<type>-<index>`.
pub fn replica_name(job_name: &str, replica_type: &str, index: i32) -> String {
    format!("{}-{}-{}", job_name, replica_type.to_ascii_lowercase(), index)
}

/// Replica types in rank order with their replica counts: the master role
/// first, then the remaining types by name.
pub fn rank_order(spec: &TrainingJobSpec) -> Vec<(&str, i32)> {
    let mut order: Vec<(&str, i32)> = spec
        .replica_specs
        .iter()
        .map(|(k, v)| (k.as_str(), v.replicas))
        .collect();
    order.sort_by_key(|(k, _)| !is_master_role(k));
    order
}

pub fn rank(spec: &TrainingJobSpec, replica_type: &str, index: i32) -> Option<i32> {
    let mut offset = 0;
    for (k, replicas) in rank_order(spec) {
        if k.eq_ignore_ascii_case(replica_type) {
            return (index < replicas).then_some(offset + index);
        }
        offset += replicas;
    }
    None
}

/// Service name of the rank 0 replica, which hosts the rendezvous.
pub fn master_addr(job_name: &str, spec: &TrainingJobSpec) -> Option<String> {
    rank_order(spec)
        .into_iter()
        .find(|(_, replicas)| *replicas > 0)
        .map(|(k, _)| replica_name(job_name, k, 0))
}

fn replica_env(job_name: &str, spec: &TrainingJobSpec, replica_type: &str, index: i32) -> Vec<EnvVar> {
    let rank = rank(spec, replica_type, index).unwrap_or(index);
    let mut vars = vec![
        ("TRAINING_JOB_NAME", job_name.to_string()),
        ("REPLICA_TYPE", replica_type.to_ascii_lowercase()),
        ("REPLICA_INDEX", index.to_string()),
        ("WORLD_SIZE", spec.total_replicas().to_string()),
        ("RANK", rank.to_string()),
        ("MASTER_PORT", spec.port.to_string()),
    ];
    if let Some(addr) = master_addr(job_name, spec) {
        vars.push(("MASTER_ADDR", addr));
    }
    vars.into_iter()
        .map(|(name, value)| EnvVar {
            name: name.to_string(),
            value: Some(value),
            ..Default::default()
        })
        .collect()
}

fn child_meta(job: &TrainingJob, replica_type: &str, index: i32) -> Result<ObjectMeta> {
    let job_name = job.name_any();
    Ok(ObjectMeta {
        name: Some(replica_name(&job_name, replica_type, index)),
        namespace: Some(job.namespace().ok_or(Error::MissingNamespace)?),
        labels: Some(replica_labels(&job_name, replica_type, index)),
        owner_references: Some(job.controller_owner_ref(&()).into_iter().collect()),
        ..Default::default()
    })
}

fn undeclared(replica_type: &str) -> Error {
    Error::Core(training_core::Error::InvalidReplicaSpec {
        replica_type: replica_type.to_string(),
        message: "not declared in replicaSpecs".to_string(),
    })
}

/// Build the pod for replica `index` of `replica_type` from its template.
///
/// Variables already set by the template win over the injected ones.
pub fn build_pod(
    job: &TrainingJob,
    replica_type: &str,
    index: i32,
    scheduler: GangScheduler,
) -> Result<Pod> {
    let job_name = job.name_any();
    let (replica_type, replica) = job
        .spec
        .replica_spec(replica_type)
        .ok_or_else(|| undeclared(replica_type))?;

    let template = replica.template.clone();
    let child = child_meta(job, replica_type, index)?;
    let mut metadata = template.metadata.unwrap_or_default();
    metadata.name = child.name;
    metadata.generate_name = None;
    metadata.namespace = child.namespace;
    metadata.owner_references = child.owner_references;
    metadata
        .labels
        .get_or_insert_with(Default::default)
        .extend(child.labels.unwrap_or_default());
    scheduler.mark_pod(&mut metadata, &job_name);

    let mut spec = template.spec.unwrap_or_default();
    spec.restart_policy = Some(replica.restart_policy.pod_restart_policy().to_string());
    if let Some(scheduler_name) = scheduler.scheduler_name() {
        spec.scheduler_name = Some(scheduler_name.to_string());
    }

    let env = replica_env(&job_name, &job.spec, replica_type, index);
    for container in &mut spec.containers {
        let vars = container.env.get_or_insert_with(Vec::new);
        for var in &env {
            if !vars.iter().any(|v| v.name == var.name) {
                vars.push(var.clone());
            }
        }
    }

    Ok(Pod {
        metadata,
        spec: Some(spec),
        ..Default::default()
    })
}

/// Headless service giving replica `index` a stable DNS name.
pub fn build_service(job: &TrainingJob, replica_type: &str, index: i32) -> Result<Service> {
    let (replica_type, _) = job
        .spec
        .replica_spec(replica_type)
        .ok_or_else(|| undeclared(replica_type))?;
    let metadata = child_meta(job, replica_type, index)?;
    let selector = metadata.labels.clone();

    Ok(Service {
        metadata,
        spec: Some(ServiceSpec {
            cluster_ip: Some("None".to_string()),
            selector,
            publish_not_ready_addresses: Some(true),
            ports: Some(vec![ServicePort {
                name: Some("training-port".to_string()),
                port: job.spec.port,
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use k8s_openapi::api::core::v1::{Container, PodSpec, PodTemplateSpec};
    use training_core::labels::{JOB_ROLE_LABEL, REPLICA_INDEX_LABEL};
    use training_core::{ReplicaSpec, RestartPolicy};
    use training_scheduler::VOLCANO_GROUP_ANNOTATION;

    fn template() -> PodTemplateSpec {
        PodTemplateSpec {
            metadata: Some(ObjectMeta {
                labels: Some(BTreeMap::from([("team".to_string(), "vision".to_string())])),
                ..Default::default()
            }),
            spec: Some(PodSpec {
                containers: vec![Container {
                    name: "pytorch".to_string(),
                    image: Some("trainer:latest".to_string()),
                    env: Some(vec![EnvVar {
                        name: "MASTER_PORT".to_string(),
                        value: Some("1234".to_string()),
                        ..Default::default()
                    }]),
                    ..Default::default()
                }],
                ..Default::default()
            }),
        }
    }

    fn test_job() -> TrainingJob {
        let spec = TrainingJobSpec {
            replica_specs: BTreeMap::from([
                (
                    "Master".to_string(),
                    ReplicaSpec {
                        replicas: 1,
                        template: template(),
                        restart_policy: RestartPolicy::OnFailure,
                    },
                ),
                (
                    "Worker".to_string(),
                    ReplicaSpec {
                        replicas: 2,
                        template: template(),
                        restart_policy: RestartPolicy::ExitCode,
                    },
                ),
            ]),
            ..Default::default()
        };
        let mut job = TrainingJob::new("mnist", spec);
        job.metadata.namespace = Some("ml".to_string());
        job.metadata.uid = Some("uid-1".to_string());
        job
    }

    fn env_of(pod: &Pod) -> BTreeMap<String, String> {
        pod.spec.as_ref().unwrap().containers[0]
            .env
            .as_ref()
            .unwrap()
            .iter()
            .map(|v| (v.name.clone(), v.value.clone().unwrap_or_default()))
            .collect()
    }

    #[test]
    fn ranks_put_master_first() {
        let job = test_job();
        assert_eq!(rank(&job.spec, "Master", 0), Some(0));
        assert_eq!(rank(&job.spec, "Worker", 0), Some(1));
        assert_eq!(rank(&job.spec, "worker", 1), Some(2));
        assert_eq!(rank(&job.spec, "Worker", 2), None);
        assert_eq!(master_addr("mnist", &job.spec).as_deref(), Some("mnist-master-0"));
    }

    #[test]
    fn worker_pod_carries_identity() {
        let job = test_job();
        let pod = build_pod(&job, "Worker", 1, GangScheduler::None).unwrap();

        assert_eq!(pod.metadata.name.as_deref(), Some("mnist-worker-1"));
        assert_eq!(pod.metadata.namespace.as_deref(), Some("ml"));
        let labels = pod.metadata.labels.as_ref().unwrap();
        assert_eq!(labels["team"], "vision");
        assert_eq!(labels[REPLICA_INDEX_LABEL], "1");
        assert!(!labels.contains_key(JOB_ROLE_LABEL));

        let owners = pod.metadata.owner_references.as_ref().unwrap();
        assert_eq!(owners[0].name, "mnist");

        let spec = pod.spec.as_ref().unwrap();
        assert_eq!(spec.restart_policy.as_deref(), Some("Never"));
        assert!(spec.scheduler_name.is_none());

        let env = env_of(&pod);
        assert_eq!(env["WORLD_SIZE"], "3");
        assert_eq!(env["RANK"], "2");
        assert_eq!(env["MASTER_ADDR"], "mnist-master-0");
        assert_eq!(env["MASTER_PORT"], "1234");
    }

    #[test]
    fn master_pod_keeps_kubelet_restarts() {
        let job = test_job();
        let pod = build_pod(&job, "master", 0, GangScheduler::None).unwrap();
        assert_eq!(pod.metadata.name.as_deref(), Some("mnist-master-0"));
        assert_eq!(
            pod.spec.as_ref().unwrap().restart_policy.as_deref(),
            Some("OnFailure")
        );
        assert_eq!(pod.metadata.labels.as_ref().unwrap()[JOB_ROLE_LABEL], "master");
    }

    #[test]
    fn gang_scheduled_pod() {
        let job = test_job();
        let pod = build_pod(&job, "Worker", 0, GangScheduler::Volcano).unwrap();
        assert_eq!(
            pod.spec.as_ref().unwrap().scheduler_name.as_deref(),
            Some("volcano")
        );
        assert_eq!(
            pod.metadata.annotations.as_ref().unwrap()[VOLCANO_GROUP_ANNOTATION],
            "mnist"
        );
    }

    #[test]
    fn undeclared_replica_type_is_an_error() {
        let job = test_job();
        assert!(build_pod(&job, "PS", 0, GangScheduler::None).is_err());
    }

    #[test]
    fn missing_namespace_is_an_error() {
        let mut job = test_job();
        job.metadata.namespace = None;
        assert!(matches!(
            build_service(&job, "Worker", 0),
            Err(Error::MissingNamespace)
        ));
    }

    #[test]
    fn headless_service_selects_its_pod() {
        let job = test_job();
        let svc = build_service(&job, "Worker", 1).unwrap();
        let pod = build_pod(&job, "Worker", 1, GangScheduler::None).unwrap();

        assert_eq!(svc.metadata.name, pod.metadata.name);
        let spec = svc.spec.unwrap();
        assert_eq!(spec.cluster_ip.as_deref(), Some("None"));
        assert_eq!(spec.ports.unwrap()[0].port, 23456);
        let pod_labels = pod.metadata.labels.unwrap();
        for (k, v) in spec.selector.unwrap() {
            assert_eq!(pod_labels[&k], v);
        }
    }
}
