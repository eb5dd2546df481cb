//! Discovery document types.
//!
//! An API server answers `/apis` with a list of groups, each naming the
//! versions it serves as `groupVersion`/`version` pairs. The operator uses
//! these to confirm the training API is served and stamps the served pair
//! onto every job status it writes.

use std::fmt;
use std::str::FromStr;

use k8s_openapi::apimachinery::pkg::apis::meta::v1 as metav1;
use schemars::{JsonSchema, Schema};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::{Error, Result};

/// A single `group/version` pair served by the API server.
///
/// Immutable once built. Decoding never validates; call [`validate`] on
/// entries that came off the wire.
///
/// [`validate`]: GroupVersionForDiscovery::validate
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
#[schemars(transform = require_wire_fields)]
pub struct GroupVersionForDiscovery {
    /// `"<group>/<version>"`, or only `"<version>"` for the core group.
    #[serde(default)]
    group_version: String,
    /// The version segment of `group_version`.
    #[serde(default)]
    version: String,
}

/// Both fields are always written, so the published schema lists them as
/// required even though decoding falls back to `""`.
fn require_wire_fields(schema: &mut Schema) {
    schema.insert("required".to_string(), json!(["groupVersion", "version"]));
}

impl GroupVersionForDiscovery {
    /// Build an entry, rejecting a `version` that is not the suffix of
    /// `group_version`.
    pub fn new(group_version: impl Into<String>, version: impl Into<String>) -> Result<Self> {
        let entry = Self {
            group_version: group_version.into(),
            version: version.into(),
        };
        entry.validate()?;
        Ok(entry)
    }

    /// Build an entry from its parts. An empty group yields the core form
    /// where `groupVersion` is the bare version.
    pub fn from_parts(group: &str, version: &str) -> Result<Self> {
        let group_version = if group.is_empty() {
            version.to_string()
        } else {
            format!("{group}/{version}")
        };
        Self::new(group_version, version)
    }

    pub fn group_version(&self) -> &str {
        &self.group_version
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// The group segment, `""` for the core group.
    pub fn group(&self) -> &str {
        self.group_version
            .rsplit_once('/')
            .map(|(group, _)| group)
            .unwrap_or("")
    }

    /// An entry with both fields empty is the schema default and is accepted.
    pub fn is_empty(&self) -> bool {
        self.group_version.is_empty() && self.version.is_empty()
    }

    pub fn validate(&self) -> Result<()> {
        if self.group_version.is_empty() {
            return Ok(());
        }
        let suffix = self
            .group_version
            .rsplit('/')
            .next()
            .unwrap_or(&self.group_version);
        if suffix != self.version {
            return Err(Error::MalformedDiscoveryEntry {
                group_version: self.group_version.clone(),
                version: self.version.clone(),
            });
        }
        Ok(())
    }
}

impl fmt::Display for GroupVersionForDiscovery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.group_version)
    }
}

impl FromStr for GroupVersionForDiscovery {
    type Err = Error;

    /// Parse `"group/version"` or a bare core `"version"`. The version is
    /// whatever follows the final `/`, so the result always passes
    /// [`GroupVersionForDiscovery::validate`].
    fn from_str(s: &str) -> Result<Self> {
        let version = s.rsplit('/').next().unwrap_or(s);
        Self::new(s, version)
    }
}

impl From<metav1::GroupVersionForDiscovery> for GroupVersionForDiscovery {
    fn from(entry: metav1::GroupVersionForDiscovery) -> Self {
        Self {
            group_version: entry.group_version,
            version: entry.version,
        }
    }
}

/// One API group and the versions it serves.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiGroup {
    pub name: String,
    #[serde(default)]
    pub versions: Vec<GroupVersionForDiscovery>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_version: Option<GroupVersionForDiscovery>,
}

impl ApiGroup {
    /// Validate every entry, and that each one is listed under its own group.
    pub fn validate(&self) -> Result<()> {
        for entry in self.versions.iter().chain(self.preferred_version.iter()) {
            entry.validate()?;
            if !self.name.is_empty() && !entry.is_empty() && entry.group() != self.name {
                return Err(Error::ForeignDiscoveryEntry {
                    group: self.name.clone(),
                    group_version: entry.group_version.clone(),
                });
            }
        }
        Ok(())
    }

    /// The entry for `version`, if it is served and well formed.
    pub fn serves(&self, version: &str) -> Option<&GroupVersionForDiscovery> {
        self.versions
            .iter()
            .find(|entry| entry.version == version && entry.validate().is_ok())
    }
}

impl From<metav1::APIGroup> for ApiGroup {
    fn from(group: metav1::APIGroup) -> Self {
        Self {
            name: group.name,
            versions: group.versions.into_iter().map(Into::into).collect(),
            preferred_version: group.preferred_version.map(Into::into),
        }
    }
}

/// The `/apis` discovery document.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiGroupList {
    pub api_version: String,
    pub kind: String,
    #[serde(default)]
    pub groups: Vec<ApiGroup>,
}

impl Default for ApiGroupList {
    fn default() -> Self {
        Self {
            api_version: "v1".to_string(),
            kind: "APIGroupList".to_string(),
            groups: Vec::new(),
        }
    }
}

impl ApiGroupList {
    pub fn find_group(&self, name: &str) -> Option<&ApiGroup> {
        self.groups.iter().find(|group| group.name == name)
    }

    /// Every served entry across all groups that passes validation.
    pub fn valid_entries(&self) -> impl Iterator<Item = &GroupVersionForDiscovery> {
        self.groups
            .iter()
            .flat_map(|group| group.versions.iter())
            .filter(|entry| entry.validate().is_ok())
    }
}

impl From<metav1::APIGroupList> for ApiGroupList {
    fn from(list: metav1::APIGroupList) -> Self {
        Self {
            groups: list.groups.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }
}
