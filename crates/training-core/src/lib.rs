//! Types shared by the training operator and its client: the `TrainingJob`
//! custom resource, job conditions, child-resource labels and the discovery
//! documents used to confirm the training API is served.

pub mod condition;
pub mod discovery;
pub mod error;
pub mod job;
pub mod labels;

pub use condition::{ConditionStatus, JobCondition, JobConditionType};
pub use discovery::{ApiGroup, ApiGroupList, GroupVersionForDiscovery};
pub use error::{Error, Result};
pub use job::{
    CleanPodPolicy, ReplicaSpec, ReplicaStatus, RestartPolicy, RunPolicy, SchedulingPolicy,
    TrainingJob, TrainingJobSpec, TrainingJobStatus,
};

pub const GROUP: &str = "kubeflow.org";
pub const VERSION: &str = "v1";
pub const PLURAL: &str = "trainingjobs";

/// Discovery entry for the API version this crate's types are written against.
pub fn served_version() -> Result<GroupVersionForDiscovery> {
    GroupVersionForDiscovery::from_parts(GROUP, VERSION)
}
