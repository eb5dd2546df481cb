use std::fmt;
use std::str::FromStr;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::core::{ApiResource, GroupVersionKind};
use training_core::{Error, GroupVersionForDiscovery};

/// Volcano reads the group from this pod annotation.
pub const VOLCANO_GROUP_ANNOTATION: &str = "scheduling.k8s.io/group-name";
/// The scheduler-plugins coscheduling plugin reads the group from this pod label.
pub const SCHEDULER_PLUGINS_GROUP_LABEL: &str = "scheduling.x-k8s.io/pod-group";

/// Which gang scheduler, if any, admits a job's pods all-or-nothing.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum GangScheduler {
    #[default]
    None,
    Volcano,
    SchedulerPlugins,
}

impl GangScheduler {
    /// `schedulerName` for the job's pods.
    pub fn scheduler_name(self) -> Option<&'static str> {
        match self {
            GangScheduler::None => None,
            GangScheduler::Volcano => Some("volcano"),
            GangScheduler::SchedulerPlugins => Some("scheduler-plugins-scheduler"),
        }
    }

    /// Discovery entry of the `PodGroup` API this scheduler consumes.
    pub fn pod_group_version(self) -> Option<GroupVersionForDiscovery> {
        let (group, version) = match self {
            GangScheduler::None => return None,
            GangScheduler::Volcano => ("scheduling.volcano.sh", "v1beta1"),
            GangScheduler::SchedulerPlugins => ("scheduling.x-k8s.io", "v1alpha1"),
        };
        GroupVersionForDiscovery::from_parts(group, version).ok()
    }

    pub fn pod_group_resource(self) -> Option<ApiResource> {
        let gv = self.pod_group_version()?;
        let gvk = GroupVersionKind::gvk(gv.group(), gv.version(), "PodGroup");
        Some(ApiResource::from_gvk_with_plural(&gvk, "podgroups"))
    }

    /// Tie a pod to the job's `PodGroup`.
    pub fn mark_pod(self, meta: &mut ObjectMeta, group_name: &str) {
        match self {
            GangScheduler::None => {}
            GangScheduler::Volcano => {
                meta.annotations
                    .get_or_insert_with(Default::default)
                    .insert(VOLCANO_GROUP_ANNOTATION.to_string(), group_name.to_string());
            }
            GangScheduler::SchedulerPlugins => {
                meta.labels
                    .get_or_insert_with(Default::default)
                    .insert(SCHEDULER_PLUGINS_GROUP_LABEL.to_string(), group_name.to_string());
            }
        }
    }
}

impl FromStr for GangScheduler {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "none" => Ok(GangScheduler::None),
            "volcano" => Ok(GangScheduler::Volcano),
            "scheduler-plugins" => Ok(GangScheduler::SchedulerPlugins),
            other => Err(Error::UnknownGangScheduler(other.to_string())),
        }
    }
}

impl fmt::Display for GangScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            GangScheduler::None => "none",
            GangScheduler::Volcano => "volcano",
            GangScheduler::SchedulerPlugins => "scheduler-plugins",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ci_values() {
        assert_eq!("none".parse::<GangScheduler>().unwrap(), GangScheduler::None);
        assert_eq!("".parse::<GangScheduler>().unwrap(), GangScheduler::None);
        assert_eq!("Volcano".parse::<GangScheduler>().unwrap(), GangScheduler::Volcano);
        assert_eq!(
            "scheduler-plugins".parse::<GangScheduler>().unwrap(),
            GangScheduler::SchedulerPlugins
        );
        assert!("kueue".parse::<GangScheduler>().is_err());
    }

    #[test]
    fn pod_group_resource_per_scheduler() {
        assert!(GangScheduler::None.pod_group_resource().is_none());

        let ar = GangScheduler::Volcano.pod_group_resource().unwrap();
        assert_eq!(ar.api_version, "scheduling.volcano.sh/v1beta1");
        assert_eq!(ar.plural, "podgroups");

        let ar = GangScheduler::SchedulerPlugins.pod_group_resource().unwrap();
        assert_eq!(ar.group, "scheduling.x-k8s.io");
    }

    #[test]
    fn marks_pods_the_way_each_scheduler_reads_them() {
        let mut meta = ObjectMeta::default();
        GangScheduler::Volcano.mark_pod(&mut meta, "mnist");
        assert_eq!(meta.annotations.unwrap()[VOLCANO_GROUP_ANNOTATION], "mnist");

        let mut meta = ObjectMeta::default();
        GangScheduler::SchedulerPlugins.mark_pod(&mut meta, "mnist");
        assert_eq!(meta.labels.unwrap()[SCHEDULER_PLUGINS_GROUP_LABEL], "mnist");

        let mut meta = ObjectMeta::default();
        GangScheduler::None.mark_pod(&mut meta, "mnist");
        assert_eq!(meta, ObjectMeta::default());
    }
}
