//! Job lifecycle state machine.
//!
//! Derives the next `TrainingJobStatus` from the pods observed for a job:
//! Created → Running ⇄ Restarting → Succeeded | Failed. Terminal states are
//! never left. Everything here is pure; the controller applies the outcome.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use training_core::condition::set_condition;
use training_core::job::is_retryable_exit_code;
use training_core::labels::{REPLICA_INDEX_LABEL, REPLICA_TYPE_LABEL};
use training_core::{
    JobCondition, JobConditionType, ReplicaStatus, RestartPolicy, TrainingJob, TrainingJobSpec,
    TrainingJobStatus,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PodPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl PodPhase {
    fn parse(phase: Option<&str>) -> Self {
        match phase {
            Some("Pending") => PodPhase::Pending,
            Some("Running") => PodPhase::Running,
            Some("Succeeded") => PodPhase::Succeeded,
            Some("Failed") => PodPhase::Failed,
            _ => PodPhase::Unknown,
        }
    }

    pub fn is_active(self) -> bool {
        matches!(self, PodPhase::Pending | PodPhase::Running)
    }
}

/// What the state machine needs to know about one replica pod.
#[derive(Clone, Debug, PartialEq)]
pub struct ObservedPod {
    pub name: String,
    /// Lower-case replica type, as labelled.
    pub replica_type: String,
    pub index: i32,
    pub phase: PodPhase,
    /// Container restarts performed by the kubelet.
    pub restarts: i32,
    /// First non-zero exit code among terminated containers.
    pub exit_code: Option<i32>,
}

impl ObservedPod {
    /// `None` for pods missing replica labels and for pods already being
    /// deleted.
    pub fn from_pod(pod: &Pod) -> Option<Self> {
        if pod.metadata.deletion_timestamp.is_some() {
            return None;
        }
        let labels = pod.metadata.labels.as_ref()?;
        let replica_type = labels.get(REPLICA_TYPE_LABEL)?.clone();
        let index = labels.get(REPLICA_INDEX_LABEL)?.parse().ok()?;

        let status = pod.status.as_ref();
        let containers = status
            .and_then(|s| s.container_statuses.as_deref())
            .unwrap_or_default();
        let restarts = containers.iter().map(|c| c.restart_count).sum();
        let exit_code = containers
            .iter()
            .filter_map(|c| c.state.as_ref()?.terminated.as_ref())
            .map(|t| t.exit_code)
            .find(|code| *code != 0);

        Some(Self {
            name: pod.name_any(),
            replica_type,
            index,
            phase: PodPhase::parse(status.and_then(|s| s.phase.as_deref())),
            restarts,
            exit_code,
        })
    }
}

/// Outcome of one step of the state machine.
#[derive(Clone, Debug, PartialEq)]
pub struct Transition {
    pub status: TrainingJobStatus,
    /// Failed pods to delete so that they are created again.
    pub restart: Vec<String>,
    /// The job failed on a run policy limit; its active pods must stop even
    /// when the clean pod policy would keep them.
    pub terminate_active: bool,
}

impl Transition {
    pub fn is_finished(&self) -> bool {
        self.status.is_finished()
    }
}

pub fn replica_statuses(
    spec: &TrainingJobSpec,
    pods: &[ObservedPod],
) -> BTreeMap<String, ReplicaStatus> {
    spec.replica_specs
        .iter()
        .map(|(replica_type, replica)| {
            let mut counts = ReplicaStatus::default();
            // Pods left over from a scale-down are about to be deleted.
            for pod in pods.iter().filter(|p| {
                p.replica_type.eq_ignore_ascii_case(replica_type) && p.index < replica.replicas
            }) {
                match pod.phase {
                    PodPhase::Pending | PodPhase::Running => counts.active += 1,
                    PodPhase::Succeeded => counts.succeeded += 1,
                    PodPhase::Failed => counts.failed += 1,
                    PodPhase::Unknown => {}
                }
            }
            (replica_type.clone(), counts)
        })
        .collect()
}

fn is_succeeded(spec: &TrainingJobSpec, statuses: &BTreeMap<String, ReplicaStatus>) -> bool {
    let succeeded = |replica_type: &str| statuses.get(replica_type).map_or(0, |s| s.succeeded);

    if let Some(master) = spec.master_replica_type() {
        let replicas = spec.replica_specs[master].replicas;
        return replicas > 0 && succeeded(master) >= replicas;
    }

    let mut any = false;
    for (replica_type, replica) in &spec.replica_specs {
        if replica.replicas == 0 {
            continue;
        }
        any = true;
        if succeeded(replica_type) < replica.replicas {
            return false;
        }
    }
    any
}

fn parse_time(value: Option<&str>) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value?)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

/// Time from `now` until `secs` after `from`. `None` when the instant is past
/// what chrono can represent, which callers treat as no limit at all.
fn remaining(from: DateTime<Utc>, secs: i64, now: DateTime<Utc>) -> Option<Duration> {
    let end = from.checked_add_signed(TimeDelta::try_seconds(secs)?)?;
    Some((end - now).to_std().unwrap_or(Duration::ZERO))
}

/// Time left before `activeDeadlineSeconds` runs out, if one is set.
pub fn deadline_remaining(
    status: &TrainingJobStatus,
    active_deadline_seconds: Option<i64>,
    now: DateTime<Utc>,
) -> Option<Duration> {
    let start = parse_time(status.start_time.as_deref())?;
    remaining(start, active_deadline_seconds?, now)
}

/// Time left before a finished job is deleted, if a TTL is set.
pub fn ttl_remaining(
    status: &TrainingJobStatus,
    ttl_seconds_after_finished: Option<i32>,
    now: DateTime<Utc>,
) -> Option<Duration> {
    let completed = parse_time(status.completion_time.as_deref())?;
    remaining(completed, i64::from(ttl_seconds_after_finished?), now)
}

fn finish(
    status: &mut TrainingJobStatus,
    type_: JobConditionType,
    reason: &str,
    message: String,
    now: DateTime<Utc>,
) {
    status.completion_time.get_or_insert_with(|| now.to_rfc3339());
    set_condition(&mut status.conditions, JobCondition::new(type_, reason, message, now));
}

/// Advance `job`'s status given the pods currently observed for it.
pub fn next_status(job: &TrainingJob, pods: &[ObservedPod], now: DateTime<Utc>) -> Transition {
    let name = job.name_any();
    let spec = &job.spec;
    let mut status = job.status.clone().unwrap_or_default();

    if status.is_finished() {
        return Transition {
            status,
            restart: Vec::new(),
            terminate_active: false,
        };
    }

    status.replica_statuses = replica_statuses(spec, pods);
    status.start_time.get_or_insert_with(|| now.to_rfc3339());
    set_condition(
        &mut status.conditions,
        JobCondition::new(
            JobConditionType::Created,
            "JobCreated",
            format!("TrainingJob {name} is created."),
            now,
        ),
    );

    let mut restart = Vec::new();
    let mut failure = None;
    let mut kubelet_restarts = 0;
    for pod in pods {
        let Some((replica_type, replica)) = spec
            .replica_spec(&pod.replica_type)
            .filter(|(_, r)| pod.index < r.replicas)
        else {
            continue;
        };
        match replica.restart_policy {
            RestartPolicy::Always | RestartPolicy::OnFailure => {
                kubelet_restarts += pod.restarts;
                if pod.phase == PodPhase::Failed {
                    restart.push(pod.name.clone());
                }
            }
            RestartPolicy::ExitCode if pod.phase == PodPhase::Failed => match pod.exit_code {
                Some(code) if !is_retryable_exit_code(code) => {
                    failure.get_or_insert_with(|| {
                        format!(
                            "TrainingJob {name} has failed because {replica_type} replica {} exited with code {code}.",
                            pod.index
                        )
                    });
                }
                _ => restart.push(pod.name.clone()),
            },
            RestartPolicy::Never if pod.phase == PodPhase::Failed => {
                failure.get_or_insert_with(|| {
                    format!(
                        "TrainingJob {name} has failed because {replica_type} replica {} failed.",
                        pod.index
                    )
                });
            }
            _ => {}
        }
    }

    let policy = &spec.run_policy;
    if let Some(message) = failure {
        finish(&mut status, JobConditionType::Failed, "JobFailed", message, now);
        return Transition {
            status,
            restart: Vec::new(),
            terminate_active: false,
        };
    }

    let total_restarts = kubelet_restarts + status.restart_count + restart.len() as i32;
    let over_backoff = policy.backoff_limit.is_some_and(|limit| total_restarts > limit);
    let past_deadline = deadline_remaining(&status, policy.active_deadline_seconds, now)
        .is_some_and(|left| left.is_zero());
    if over_backoff || past_deadline {
        let (reason, message) = if over_backoff {
            (
                "BackoffLimitExceeded",
                format!("TrainingJob {name} has failed because it has reached the specified backoff limit."),
            )
        } else {
            (
                "DeadlineExceeded",
                format!("TrainingJob {name} has failed because it was active longer than specified deadline."),
            )
        };
        finish(&mut status, JobConditionType::Failed, reason, message, now);
        return Transition {
            status,
            restart: Vec::new(),
            terminate_active: true,
        };
    }

    if is_succeeded(spec, &status.replica_statuses) {
        finish(
            &mut status,
            JobConditionType::Succeeded,
            "JobSucceeded",
            format!("TrainingJob {name} successfully completed."),
            now,
        );
        return Transition {
            status,
            restart: Vec::new(),
            terminate_active: false,
        };
    }

    if !restart.is_empty() {
        status.restart_count += restart.len() as i32;
        set_condition(
            &mut status.conditions,
            JobCondition::new(
                JobConditionType::Restarting,
                "JobRestarting",
                format!("TrainingJob {name} is restarting because {} replica(s) failed.", restart.len()),
                now,
            ),
        );
    } else if pods.iter().any(|p| p.phase == PodPhase::Running) {
        set_condition(
            &mut status.conditions,
            JobCondition::new(
                JobConditionType::Running,
                "JobRunning",
                format!("TrainingJob {name} is running."),
                now,
            ),
        );
    }

    Transition {
        status,
        restart,
        terminate_active: false,
    }
}
