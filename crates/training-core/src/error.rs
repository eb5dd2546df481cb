use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// The version segment of `groupVersion` disagrees with `version`.
    #[error("malformed discovery entry: groupVersion {group_version:?} does not end with version {version:?}")]
    MalformedDiscoveryEntry {
        group_version: String,
        version: String,
    },

    /// A discovery entry listed under a group it does not belong to.
    #[error("discovery entry {group_version:?} listed under group {group:?}")]
    ForeignDiscoveryEntry {
        group: String,
        group_version: String,
    },

    #[error("job has no replica specs")]
    NoReplicaSpecs,

    #[error("invalid replica spec {replica_type:?}: {message}")]
    InvalidReplicaSpec {
        replica_type: String,
        message: String,
    },

    #[error("invalid runPolicy.{field}: {message}")]
    InvalidRunPolicy {
        field: &'static str,
        message: String,
    },

    #[error("unknown gang scheduler {0:?}, expected one of none, volcano, scheduler-plugins")]
    UnknownGangScheduler(String),

    #[error("unknown condition type {0:?}")]
    UnknownConditionType(String),
}

pub type Result<T> = std::result::Result<T, Error>;
