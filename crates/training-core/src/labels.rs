//! Labels stamped on every child resource of a job, and the selectors built
//! from them.

use std::collections::BTreeMap;

use crate::GROUP;

pub const GROUP_NAME_LABEL: &str = "group-name";
pub const JOB_NAME_LABEL: &str = "training.kubeflow.org/job-name";
pub const REPLICA_TYPE_LABEL: &str = "training.kubeflow.org/replica-type";
pub const REPLICA_INDEX_LABEL: &str = "training.kubeflow.org/replica-index";
pub const JOB_ROLE_LABEL: &str = "training.kubeflow.org/job-role";

const MASTER_ROLES: [&str; 3] = ["master", "chief", "launcher"];

/// Replica types that coordinate the job: their success is the job's success.
pub fn is_master_role(replica_type: &str) -> bool {
    MASTER_ROLES.contains(&replica_type.to_ascii_lowercase().as_str())
}

/// Labels shared by every resource owned by `job_name`.
pub fn job_labels(job_name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (GROUP_NAME_LABEL.to_string(), GROUP.to_string()),
        (JOB_NAME_LABEL.to_string(), job_name.to_string()),
    ])
}

/// Labels for the pod and service of one replica.
pub fn replica_labels(job_name: &str, replica_type: &str, index: i32) -> BTreeMap<String, String> {
    let mut labels = job_labels(job_name);
    labels.insert(
        REPLICA_TYPE_LABEL.to_string(),
        replica_type.to_ascii_lowercase(),
    );
    labels.insert(REPLICA_INDEX_LABEL.to_string(), index.to_string());
    if index == 0 && is_master_role(replica_type) {
        labels.insert(JOB_ROLE_LABEL.to_string(), "master".to_string());
    }
    labels
}

/// Narrows a job's pods to a subset.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PodSelector {
    /// Only the pod labelled `job-role=master`.
    pub master: bool,
    pub replica_type: Option<String>,
    pub replica_index: Option<i32>,
}

impl PodSelector {
    pub fn master() -> Self {
        Self {
            master: true,
            ..Self::default()
        }
    }

    pub fn labels(&self, job_name: &str) -> BTreeMap<String, String> {
        let mut labels = job_labels(job_name);
        if self.master {
            labels.insert(JOB_ROLE_LABEL.to_string(), "master".to_string());
        }
        if let Some(replica_type) = &self.replica_type {
            labels.insert(
                REPLICA_TYPE_LABEL.to_string(),
                replica_type.to_ascii_lowercase(),
            );
        }
        if let Some(index) = self.replica_index {
            labels.insert(REPLICA_INDEX_LABEL.to_string(), index.to_string());
        }
        labels
    }
}

/// Render labels as an equality-based selector, `k=v,k=v` in key order.
pub fn to_selector(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}
