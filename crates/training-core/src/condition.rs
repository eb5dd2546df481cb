//! Job conditions and the rules for recording them.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum JobConditionType {
    Created,
    Running,
    Restarting,
    Succeeded,
    Failed,
}

impl JobConditionType {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobConditionType::Succeeded | JobConditionType::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobConditionType::Created => "Created",
            JobConditionType::Running => "Running",
            JobConditionType::Restarting => "Restarting",
            JobConditionType::Succeeded => "Succeeded",
            JobConditionType::Failed => "Failed",
        }
    }
}

impl fmt::Display for JobConditionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobConditionType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "created" => Ok(JobConditionType::Created),
            "running" => Ok(JobConditionType::Running),
            "restarting" => Ok(JobConditionType::Restarting),
            "succeeded" => Ok(JobConditionType::Succeeded),
            "failed" => Ok(JobConditionType::Failed),
            _ => Err(Error::UnknownConditionType(s.to_string())),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct JobCondition {
    #[serde(rename = "type")]
    pub type_: JobConditionType,
    pub status: ConditionStatus,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_update_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,
}

impl JobCondition {
    pub fn new(
        type_: JobConditionType,
        reason: impl Into<String>,
        message: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        let timestamp = now.to_rfc3339();
        Self {
            type_,
            status: ConditionStatus::True,
            reason: reason.into(),
            message: message.into(),
            last_update_time: Some(timestamp.clone()),
            last_transition_time: Some(timestamp),
        }
    }

    pub fn is_true(&self) -> bool {
        self.status == ConditionStatus::True
    }
}

/// Record `condition` on `conditions`.
///
/// Re-recording an identical condition is a no-op so that status writes stay
/// quiet between transitions. Entering `Running` retires `Restarting` and vice
/// versa; entering a terminal condition retires both.
pub fn set_condition(conditions: &mut Vec<JobCondition>, mut condition: JobCondition) {
    if let Some(existing) = conditions.iter().find(|c| c.type_ == condition.type_) {
        if existing.status == condition.status
            && existing.reason == condition.reason
            && existing.message == condition.message
        {
            return;
        }
        if existing.status == condition.status {
            condition.last_transition_time = existing.last_transition_time.clone();
        }
    }

    let retired: &[JobConditionType] = match condition.type_ {
        JobConditionType::Running => &[JobConditionType::Restarting],
        JobConditionType::Restarting => &[JobConditionType::Running],
        JobConditionType::Succeeded | JobConditionType::Failed => {
            &[JobConditionType::Running, JobConditionType::Restarting]
        }
        JobConditionType::Created => &[],
    };
    for c in conditions.iter_mut() {
        if retired.contains(&c.type_) && c.is_true() {
            c.status = ConditionStatus::False;
            c.last_update_time = condition.last_update_time.clone();
            c.last_transition_time = condition.last_update_time.clone();
        }
    }

    conditions.retain(|c| c.type_ != condition.type_);
    conditions.push(condition);
}

/// Whether `conditions` holds `type_` with status `True`.
pub fn has_condition(conditions: &[JobCondition], type_: JobConditionType) -> bool {
    conditions.iter().any(|c| c.type_ == type_ && c.is_true())
}
