//! Gang scheduling for training jobs.
//!
//! Selects the gang scheduler named by the operator's configuration and
//! compiles the `PodGroup` that makes it admit a job's pods all-or-nothing.
//! Pure compilation; applying the object is the controller's job.

mod gang;
mod pod_group;

pub use gang::{GangScheduler, SCHEDULER_PLUGINS_GROUP_LABEL, VOLCANO_GROUP_ANNOTATION};
pub use pod_group::{PodGroup, PodGroupMetadata, PodGroupSpec, compile_pod_group};
