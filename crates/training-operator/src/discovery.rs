use std::time::Duration;

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::{
    Client, CustomResourceExt,
    api::{Api, Patch, PatchParams},
    runtime::wait::{await_condition, conditions},
};
use training_core::{ApiGroupList, GROUP, GroupVersionForDiscovery, PLURAL, TrainingJob, VERSION};

use crate::error::{Error, Result};

const CRD_ESTABLISH_TIMEOUT: Duration = Duration::from_secs(10);

pub fn crd_name() -> String {
    format!("{PLURAL}.{GROUP}")
}

/// Apply the TrainingJob CRD and wait until the API server serves it.
pub async fn install_crd(client: Client, field_manager: &str) -> Result<()> {
    let crds: Api<CustomResourceDefinition> = Api::all(client);
    let name = crd_name();

    crds.patch(
        &name,
        &PatchParams::apply(field_manager).force(),
        &Patch::Apply(TrainingJob::crd()),
    )
    .await?;

    tokio::time::timeout(
        CRD_ESTABLISH_TIMEOUT,
        await_condition(crds, &name, conditions::is_crd_established()),
    )
    .await
    .map_err(|_| Error::CrdNotEstablished(name.clone()))??;

    tracing::info!(crd = %name, "CRD established");
    Ok(())
}

/// Pick the training API entry out of a discovery document.
///
/// Malformed entries are skipped rather than trusted.
pub fn select_served_version(groups: &ApiGroupList) -> Result<GroupVersionForDiscovery> {
    let wanted = training_core::served_version()?;
    groups
        .find_group(GROUP)
        .and_then(|group| group.serves(VERSION))
        .cloned()
        .ok_or_else(|| Error::GroupNotServed(wanted.to_string()))
}

/// Ask the API server which version of the training API it serves.
pub async fn served_version(client: &Client) -> Result<GroupVersionForDiscovery> {
    let groups = ApiGroupList::from(client.list_api_groups().await?);
    for group in &groups.groups {
        if let Err(err) = group.validate() {
            tracing::warn!(group = %group.name, error = %err, "ignoring malformed discovery entries");
        }
    }
    let served = select_served_version(&groups)?;
    tracing::info!(group_version = %served, "training API is served");
    Ok(served)
}

#[cfg(test)]
mod tests {
    use super::*;
    use training_core::ApiGroup;

    fn group(name: &str, entries: &[(&str, &str)]) -> ApiGroup {
        let versions: Vec<GroupVersionForDiscovery> = entries
            .iter()
            .map(|(gv, v)| {
                serde_json::from_value(serde_json::json!({ "groupVersion": gv, "version": v }))
                    .unwrap()
            })
            .collect();
        ApiGroup {
            name: name.to_string(),
            preferred_version: versions.first().cloned(),
            versions,
        }
    }

    #[test]
    fn crd_name_is_plural_dot_group() {
        assert_eq!(crd_name(), "trainingjobs.kubeflow.org");
    }

    #[test]
    fn selects_training_group() {
        let list = ApiGroupList {
            groups: vec![
                group("batch", &[("batch/v1", "v1")]),
                group("kubeflow.org", &[("kubeflow.org/v1", "v1")]),
            ],
            ..Default::default()
        };
        let served = select_served_version(&list).unwrap();
        assert_eq!(served.group_version(), "kubeflow.org/v1");
        assert_eq!(served.version(), "v1");
    }

    #[test]
    fn missing_group_is_not_served() {
        let list = ApiGroupList {
            groups: vec![group("batch", &[("batch/v1", "v1")])],
            ..Default::default()
        };
        let err = select_served_version(&list).unwrap_err();
        assert!(matches!(err, Error::GroupNotServed(gv) if gv == "kubeflow.org/v1"));
    }

    #[test]
    fn malformed_entry_is_not_trusted() {
        let list = ApiGroupList {
            groups: vec![group("kubeflow.org", &[("kubeflow.org/v2", "v1")])],
            ..Default::default()
        };
        assert!(select_served_version(&list).is_err());
    }
}
