//! `PodGroup` serialization types and compilation from a `TrainingJob`.
//!
//! Volcano (`scheduling.volcano.sh/v1beta1`) and scheduler-plugins
//! (`scheduling.x-k8s.io/v1alpha1`) share the `minMember` contract; only
//! Volcano understands queues and priority classes.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{Resource, ResourceExt};
use serde::{Deserialize, Serialize};
use training_core::TrainingJob;
use training_core::labels::job_labels;

use crate::gang::GangScheduler;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PodGroup {
    pub api_version: String,
    pub kind: String,
    pub metadata: PodGroupMetadata,
    pub spec: PodGroupSpec,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PodGroupMetadata {
    pub name: String,
    pub namespace: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub owner_references: Vec<OwnerReference>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PodGroupSpec {
    pub min_member: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority_class_name: Option<String>,
}

/// Compile the `PodGroup` gating `job`'s pods, or `None` without a gang
/// scheduler.
///
/// `minMember` is the scheduling policy's `minAvailable` when set, otherwise
/// every replica of the job.
pub fn compile_pod_group(job: &TrainingJob, scheduler: GangScheduler) -> Option<PodGroup> {
    let api_version = scheduler.pod_group_version()?.group_version().to_string();
    let name = job.name_any();
    let namespace = job.namespace().unwrap_or_else(|| "default".to_string());

    let policy = job.spec.run_policy.scheduling_policy.clone().unwrap_or_default();
    let min_member = policy
        .min_available
        .unwrap_or_else(|| job.spec.total_replicas());

    let (queue, priority_class_name) = match scheduler {
        GangScheduler::Volcano => (policy.queue, policy.priority_class),
        _ => (None, None),
    };

    Some(PodGroup {
        api_version,
        kind: "PodGroup".to_string(),
        metadata: PodGroupMetadata {
            labels: job_labels(&name),
            name,
            namespace,
            owner_references: job.controller_owner_ref(&()).into_iter().collect(),
        },
        spec: PodGroupSpec {
            min_member,
            queue,
            priority_class_name,
        },
    })
}
