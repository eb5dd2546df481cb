use std::collections::BTreeMap;
use std::fmt;

use k8s_openapi::api::core::v1::PodTemplateSpec;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::condition::{JobCondition, JobConditionType, has_condition};
use crate::discovery::GroupVersionForDiscovery;
use crate::error::{Error, Result};
use crate::labels::is_master_role;

pub const DEFAULT_PORT: i32 = 23456;

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
#[kube(
    group = "kubeflow.org",
    version = "v1",
    kind = "TrainingJob",
    plural = "trainingjobs",
    shortname = "tj",
    namespaced,
    status = "TrainingJobStatus",
    printcolumn = r#"{"name":"State","type":"string","jsonPath":".status.conditions[-1:].type"}"#,
    printcolumn = r#"{"name":"Restarts","type":"integer","jsonPath":".status.restartCount"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct TrainingJobSpec {
    /// Replica type (`Master`, `Worker`, ...) to its pod template.
    pub replica_specs: BTreeMap<String, ReplicaSpec>,
    #[serde(default)]
    pub run_policy: RunPolicy,
    /// Rendezvous port exposed by every replica service.
    #[serde(default = "default_port")]
    pub port: i32,
}

fn default_port() -> i32 {
    DEFAULT_PORT
}

fn default_replicas() -> i32 {
    1
}

impl Default for TrainingJobSpec {
    fn default() -> Self {
        Self {
            replica_specs: BTreeMap::new(),
            run_policy: RunPolicy::default(),
            port: DEFAULT_PORT,
        }
    }
}

impl TrainingJobSpec {
    pub fn total_replicas(&self) -> i32 {
        self.replica_specs.values().map(|r| r.replicas).sum()
    }

    /// The replica type whose success decides the job, if one is declared.
    pub fn master_replica_type(&self) -> Option<&str> {
        self.replica_specs
            .keys()
            .find(|k| is_master_role(k))
            .map(String::as_str)
    }

    /// Look up a replica spec by type, ignoring case.
    pub fn replica_spec(&self, replica_type: &str) -> Option<(&str, &ReplicaSpec)> {
        self.replica_specs
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(replica_type))
            .map(|(k, v)| (k.as_str(), v))
    }

    pub fn validate(&self) -> Result<()> {
        if self.replica_specs.is_empty() {
            return Err(Error::NoReplicaSpecs);
        }
        let masters = self
            .replica_specs
            .keys()
            .filter(|k| is_master_role(k))
            .count();
        if masters > 1 {
            return Err(Error::InvalidReplicaSpec {
                replica_type: self.master_replica_type().unwrap_or_default().to_string(),
                message: "only one of Master, Chief or Launcher may be declared".to_string(),
            });
        }
        for (replica_type, spec) in &self.replica_specs {
            if spec.replicas < 0 {
                return Err(Error::InvalidReplicaSpec {
                    replica_type: replica_type.clone(),
                    message: format!("replicas must not be negative, got {}", spec.replicas),
                });
            }
            if is_master_role(replica_type) && spec.replicas != 1 {
                return Err(Error::InvalidReplicaSpec {
                    replica_type: replica_type.clone(),
                    message: format!("must have exactly 1 replica, got {}", spec.replicas),
                });
            }
            let has_containers = spec
                .template
                .spec
                .as_ref()
                .is_some_and(|pod| !pod.containers.is_empty());
            if !has_containers {
                return Err(Error::InvalidReplicaSpec {
                    replica_type: replica_type.clone(),
                    message: "template must declare at least one container".to_string(),
                });
            }
        }
        if self.total_replicas() == 0 {
            return Err(Error::NoReplicaSpecs);
        }
        self.run_policy.validate()
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReplicaSpec {
    #[serde(default = "default_replicas")]
    pub replicas: i32,
    #[serde(default)]
    pub template: PodTemplateSpec,
    #[serde(default)]
    pub restart_policy: RestartPolicy,
}

impl Default for ReplicaSpec {
    fn default() -> Self {
        Self {
            replicas: 1,
            template: PodTemplateSpec::default(),
            restart_policy: RestartPolicy::default(),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq, JsonSchema)]
pub enum RestartPolicy {
    Always,
    OnFailure,
    #[default]
    Never,
    /// Restart only on exit codes that signal a retryable failure (128-255).
    ExitCode,
}

impl RestartPolicy {
    /// The policy the kubelet applies to the pod itself. `ExitCode` is
    /// handled by the operator, so the kubelet never restarts those pods.
    pub fn pod_restart_policy(self) -> &'static str {
        match self {
            RestartPolicy::Always => "Always",
            RestartPolicy::OnFailure => "OnFailure",
            RestartPolicy::Never | RestartPolicy::ExitCode => "Never",
        }
    }
}

impl fmt::Display for RestartPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RestartPolicy::Always => "Always",
            RestartPolicy::OnFailure => "OnFailure",
            RestartPolicy::Never => "Never",
            RestartPolicy::ExitCode => "ExitCode",
        };
        f.write_str(s)
    }
}

/// Exit codes above 127 come from signals (OOM kill, preemption) and are
/// worth another attempt.
pub fn is_retryable_exit_code(code: i32) -> bool {
    (128..=255).contains(&code)
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RunPolicy {
    #[serde(default)]
    pub clean_pod_policy: CleanPodPolicy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_seconds_after_finished: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_deadline_seconds: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backoff_limit: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduling_policy: Option<SchedulingPolicy>,
}

/// Longest accepted `activeDeadlineSeconds`: ten years.
pub const MAX_ACTIVE_DEADLINE_SECONDS: i64 = 10 * 365 * 24 * 60 * 60;

impl RunPolicy {
    pub fn validate(&self) -> Result<()> {
        if let Some(deadline) = self.active_deadline_seconds {
            if !(1..=MAX_ACTIVE_DEADLINE_SECONDS).contains(&deadline) {
                return Err(Error::InvalidRunPolicy {
                    field: "activeDeadlineSeconds",
                    message: format!(
                        "must be between 1 and {MAX_ACTIVE_DEADLINE_SECONDS}, got {deadline}"
                    ),
                });
            }
        }
        if let Some(ttl) = self.ttl_seconds_after_finished.filter(|ttl| *ttl < 0) {
            return Err(Error::InvalidRunPolicy {
                field: "ttlSecondsAfterFinished",
                message: format!("must not be negative, got {ttl}"),
            });
        }
        if let Some(limit) = self.backoff_limit.filter(|limit| *limit < 0) {
            return Err(Error::InvalidRunPolicy {
                field: "backoffLimit",
                message: format!("must not be negative, got {limit}"),
            });
        }
        Ok(())
    }
}

/// Which pods are deleted once a job finishes.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq, JsonSchema)]
pub enum CleanPodPolicy {
    All,
    Running,
    #[default]
    None,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SchedulingPolicy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_available: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority_class: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TrainingJobStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<JobCondition>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub replica_statuses: BTreeMap<String, ReplicaStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_time: Option<String>,
    /// Pods the operator deleted to restart them.
    #[serde(default)]
    pub restart_count: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
    /// Discovery entry of the API version this status was written through.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub served_version: Option<GroupVersionForDiscovery>,
}

impl TrainingJobStatus {
    pub fn last_condition(&self) -> Option<&JobCondition> {
        self.conditions.last()
    }

    pub fn has_condition(&self, type_: JobConditionType) -> bool {
        has_condition(&self.conditions, type_)
    }

    pub fn is_finished(&self) -> bool {
        self.has_condition(JobConditionType::Succeeded) || self.has_condition(JobConditionType::Failed)
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReplicaStatus {
    #[serde(default)]
    pub active: i32,
    #[serde(default)]
    pub succeeded: i32,
    #[serde(default)]
    pub failed: i32,
}

impl TrainingJob {
    /// Type of the most recent condition, `""` before the first is recorded.
    pub fn state(&self) -> &str {
        self.status
            .as_ref()
            .and_then(|s| s.last_condition())
            .map(|c| c.type_.as_str())
            .unwrap_or("")
    }

    pub fn is_finished(&self) -> bool {
        self.status.as_ref().is_some_and(TrainingJobStatus::is_finished)
    }
}
