use k8s_openapi::apimachinery::pkg::apis::meta::v1 as metav1;
use serde_json::json;
use training_core::{ApiGroupList, Error, GroupVersionForDiscovery, served_version};

#[test]
fn wire_names_are_preserved() {
    let entry = GroupVersionForDiscovery::new("batch/v1", "v1").unwrap();
    let value = serde_json::to_value(&entry).unwrap();
    assert_eq!(value, json!({"groupVersion": "batch/v1", "version": "v1"}));

    let back: GroupVersionForDiscovery = serde_json::from_value(value).unwrap();
    assert_eq!(back, entry);
}

#[test]
fn missing_fields_decode_to_empty_strings() {
    let entry: GroupVersionForDiscovery = serde_json::from_value(json!({})).unwrap();
    assert_eq!(entry, GroupVersionForDiscovery::default());
    assert!(entry.validate().is_ok());
}

#[test]
fn specified_validation_cases() {
    let cases = [
        ("batch/v1", "v1", true),
        ("batch/v1", "v2", false),
        ("", "", true),
        ("v1", "v1", true),
        ("v1", "v2", false),
    ];
    for (group_version, version, ok) in cases {
        let result = GroupVersionForDiscovery::new(group_version, version);
        assert_eq!(result.is_ok(), ok, "{group_version:?} / {version:?}");
        if !ok {
            assert!(matches!(result, Err(Error::MalformedDiscoveryEntry { .. })));
        }
    }
}

#[test]
fn api_server_group_list_converts() {
    let list = metav1::APIGroupList {
        groups: vec![metav1::APIGroup {
            name: "kubeflow.org".to_string(),
            preferred_version: Some(metav1::GroupVersionForDiscovery {
                group_version: "kubeflow.org/v1".to_string(),
                version: "v1".to_string(),
            }),
            versions: vec![metav1::GroupVersionForDiscovery {
                group_version: "kubeflow.org/v1".to_string(),
                version: "v1".to_string(),
            }],
            ..Default::default()
        }],
    };

    let groups = ApiGroupList::from(list);
    let group = groups.find_group("kubeflow.org").unwrap();
    assert!(group.validate().is_ok());
    assert_eq!(group.serves("v1"), Some(&served_version().unwrap()));
    assert_eq!(groups.valid_entries().count(), 1);
}

#[test]
fn group_list_document_decodes() {
    let doc = json!({
        "kind": "APIGroupList",
        "apiVersion": "v1",
        "groups": [
            {
                "name": "batch",
                "versions": [{"groupVersion": "batch/v1", "version": "v1"}],
                "preferredVersion": {"groupVersion": "batch/v1", "version": "v1"}
            }
        ]
    });
    let list: ApiGroupList = serde_json::from_value(doc).unwrap();
    assert_eq!(list.groups[0].preferred_version.as_ref().unwrap().group(), "batch");
    assert!(list.find_group("apps").is_none());
}
