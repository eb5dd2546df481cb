use proptest::prelude::*;
use serde::Serialize;
use serde::de::DeserializeOwned;
use training_core::{ApiGroup, ApiGroupList, GroupVersionForDiscovery};

const VERSION_RE: &str = "v[1-9][0-9]{0,2}((alpha|beta)[1-9])?";
const GROUP_RE: &str = "[a-z][a-z0-9-]{0,11}(\\.[a-z][a-z0-9-]{0,11}){0,2}";

fn through_json<T: Serialize + DeserializeOwned>(value: &T) -> T {
    serde_json::from_value(serde_json::to_value(value).unwrap()).unwrap()
}

fn entry(group: &str, version: &str) -> GroupVersionForDiscovery {
    GroupVersionForDiscovery::from_parts(group, version).unwrap()
}

fn entries() -> impl Strategy<Value = GroupVersionForDiscovery> {
    prop_oneof![
        VERSION_RE.prop_map(|v| entry("", &v)),
        (GROUP_RE, VERSION_RE).prop_map(|(g, v)| entry(&g, &v)),
        Just(GroupVersionForDiscovery::default()),
    ]
}

fn groups() -> impl Strategy<Value = ApiGroup> {
    (
        GROUP_RE,
        prop::collection::vec(VERSION_RE, 0..4),
        prop::option::of(VERSION_RE),
    )
        .prop_map(|(name, versions, preferred)| ApiGroup {
            versions: versions.iter().map(|v| entry(&name, v)).collect(),
            preferred_version: preferred.map(|v| entry(&name, &v)),
            name,
        })
}

#[test]
fn empty_entry_survives_json() {
    let empty = GroupVersionForDiscovery::default();
    assert_eq!(through_json(&empty), empty);
    assert_eq!(through_json(&ApiGroupList::default()), ApiGroupList::default());
}

proptest! {
    #[test]
    fn core_entries_survive_json(version in VERSION_RE) {
        let core = entry("", &version);
        prop_assert_eq!(core.group_version(), version.as_str());
        prop_assert_eq!(through_json(&core), core);
    }

    #[test]
    fn grouped_entries_survive_json(group in GROUP_RE, version in VERSION_RE) {
        let grouped = entry(&group, &version);
        let back = through_json(&grouped);
        prop_assert_eq!(back.group(), group.as_str());
        prop_assert_eq!(back, grouped);
    }

    #[test]
    fn multi_slash_entries_survive_json(prefix in "[a-z]{1,6}(/[a-z]{1,6}){1,3}", version in VERSION_RE) {
        let nested = GroupVersionForDiscovery::new(format!("{prefix}/{version}"), version.clone()).unwrap();
        prop_assert_eq!(nested.group(), prefix.as_str());
        prop_assert_eq!(through_json(&nested), nested.clone());
        prop_assert_eq!(nested.to_string().parse::<GroupVersionForDiscovery>().unwrap(), nested);
    }

    #[test]
    fn any_entry_survives_json(e in entries()) {
        let back = through_json(&e);
        prop_assert!(back.validate().is_ok());
        prop_assert_eq!(back, e);
    }

    #[test]
    fn groups_survive_json(group in groups()) {
        let back = through_json(&group);
        prop_assert!(back.validate().is_ok());
        prop_assert_eq!(back, group);
    }

    #[test]
    fn group_lists_survive_json(groups in prop::collection::vec(groups(), 0..5)) {
        let list = ApiGroupList { groups, ..ApiGroupList::default() };
        let back = through_json(&list);
        prop_assert_eq!(back.valid_entries().count(), list.valid_entries().count());
        prop_assert_eq!(back, list);
    }
}
