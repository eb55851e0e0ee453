//! Deployment manifest data model: `AssetType`, `AssetId`, `Asset`,
//! `Deployment` (spec §3 / §6).

use edge_error::{ErrorCode, OrchestratorError};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// The five asset kinds a deployment can declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetType {
    /// The user script itself.
    Script,
    /// An ML model.
    Model,
    /// A static JSON document.
    Document,
    /// A retriever, always composed of exactly three children.
    Retriever,
    /// An LLM, materialised on disk as a folder rather than a single file.
    Llm,
}

impl AssetType {
    /// The on-disk filename suffix for this asset kind (spec §6). `Llm`
    /// assets materialise as a folder rather than a single file; the suffix
    /// is still used to name that folder.
    pub fn suffix(&self) -> &'static str {
        match self {
            AssetType::Script => ".task",
            AssetType::Model => ".model",
            AssetType::Document => ".doc",
            AssetType::Retriever => ".retriever",
            AssetType::Llm => ".llm",
        }
    }

    /// True if this kind's on-disk artefact is a directory rather than a
    /// single file.
    pub fn is_directory_artifact(&self) -> bool {
        matches!(self, AssetType::Llm)
    }

    /// Stable ordinal used only to give `AssetId` a total order; not a
    /// wire format and not persisted.
    fn ordinal(self) -> u8 {
        match self {
            AssetType::Script => 0,
            AssetType::Model => 1,
            AssetType::Document => 2,
            AssetType::Retriever => 3,
            AssetType::Llm => 4,
        }
    }
}

/// Identifies an asset uniquely within one deployment: `(name, version,
/// type)`, totally ordered lexicographically in that field order (spec §3).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AssetId {
    /// Asset name.
    pub name: String,
    /// Asset version string.
    pub version: String,
    /// Asset kind.
    #[serde(rename = "type")]
    pub asset_type: AssetType,
}

impl AssetId {
    /// Construct an identifier.
    pub fn new(name: impl Into<String>, version: impl Into<String>, asset_type: AssetType) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            asset_type,
        }
    }

    /// The on-disk filename (or folder name, for `Llm`): `<name><version><suffix>`.
    pub fn on_disk_filename(&self) -> String {
        format!("{}{}{}", self.name, self.version, self.asset_type.suffix())
    }
}

impl PartialOrd for AssetId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for AssetId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.name
            .cmp(&other.name)
            .then_with(|| self.version.cmp(&other.version))
            .then_with(|| self.asset_type.ordinal().cmp(&other.asset_type.ordinal()))
    }
}

/// A remote location, as declared by the control plane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebLocation {
    /// Remote path/URL.
    pub path: String,
    /// Whether fetching requires authenticated/private access.
    #[serde(rename = "isPrivate")]
    pub is_private: bool,
}

/// An on-disk location, populated once an asset has been materialised.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    /// Absolute or home-dir-relative path.
    pub path: String,
}

/// One node in the deployment's asset DAG (spec §3, §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Asset {
    /// Stable identity.
    #[serde(flatten)]
    pub id: AssetId,
    /// Remote location declared by the control plane.
    pub location: WebLocation,
    /// On-disk location once downloaded; absent until then.
    #[serde(rename = "locationOnDisk", skip_serializing_if = "Option::is_none", default)]
    pub location_on_disk: Option<Location>,
    /// Control-plane-supplied metadata, opaque to this crate.
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    /// Declared child assets (arguments), e.g. a retriever's three children.
    #[serde(rename = "arguments", default)]
    pub children: Vec<Asset>,
    /// True if this asset is served by the host OS rather than fetched.
    #[serde(rename = "osProvided", default)]
    pub os_provided: bool,
}

impl Asset {
    /// Validate the structural invariants from spec §3:
    /// non-leaf children are distinct, a `Retriever` is always non-leaf with
    /// exactly three children, and a `Script` may have no children but is
    /// not required to.
    pub fn validate(&self) -> Result<(), OrchestratorError> {
        if self.id.asset_type == AssetType::Retriever && self.children.len() != 3 {
            return Err(OrchestratorError::new(
                ErrorCode::ConfigInvalid,
                format!(
                    "retriever asset '{}' must have exactly 3 children, found {}",
                    self.id.name,
                    self.children.len()
                ),
            ));
        }
        let mut seen = std::collections::HashSet::new();
        for child in &self.children {
            if !seen.insert(&child.id) {
                return Err(OrchestratorError::new(
                    ErrorCode::ConfigInvalid,
                    format!("asset '{}' declares duplicate child '{}'", self.id.name, child.id.name),
                ));
            }
            child.validate()?;
        }
        Ok(())
    }
}

/// An immutable deployment: a script plus a flat list of top-level module
/// assets (each of which may itself carry children) (spec §3, §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deployment {
    /// Deployment identifier. `-1` denotes "absent".
    pub id: i32,
    /// Whether this deployment must replace the active generation
    /// synchronously rather than via the shadow path.
    #[serde(rename = "forceUpdate")]
    pub force_update: bool,
    /// Opaque caching token from the control plane.
    #[serde(rename = "eTag")]
    pub etag: String,
    /// The script asset.
    pub script: Asset,
    /// Top-level module assets.
    #[serde(default)]
    pub modules: Vec<Asset>,
}

impl Deployment {
    /// The sentinel "no deployment yet" value.
    pub fn absent() -> Self {
        Self {
            id: -1,
            force_update: false,
            etag: String::new(),
            script: Asset {
                id: AssetId::new("", "", AssetType::Script),
                location: WebLocation {
                    path: String::new(),
                    is_private: false,
                },
                location_on_disk: None,
                metadata: serde_json::Map::new(),
                children: Vec::new(),
                os_provided: false,
            },
            modules: Vec::new(),
        }
    }

    /// True if this is the sentinel "absent" deployment.
    pub fn is_absent(&self) -> bool {
        self.id == -1
    }

    /// Validate every asset in the deployment's DAG.
    pub fn validate(&self) -> Result<(), OrchestratorError> {
        self.script.validate()?;
        for module in &self.modules {
            module.validate()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn asset_id_orders_lexicographically_by_name_then_version_then_type() {
        let a = AssetId::new("alpha", "1", AssetType::Model);
        let b = AssetId::new("alpha", "2", AssetType::Model);
        let c = AssetId::new("beta", "1", AssetType::Model);
        assert!(a < b);
        assert!(b < c);
        assert!(a < c);
    }

    #[test]
    fn on_disk_filename_uses_suffix_per_type() {
        let id = AssetId::new("m", "1", AssetType::Model);
        assert_eq!(id.on_disk_filename(), "m1.model");
        let id = AssetId::new("s", "2", AssetType::Script);
        assert_eq!(id.on_disk_filename(), "s2.task");
    }

    fn leaf_asset(name: &str, asset_type: AssetType) -> Asset {
        Asset {
            id: AssetId::new(name, "1", asset_type),
            location: WebLocation {
                path: format!("/{name}"),
                is_private: false,
            },
            location_on_disk: None,
            metadata: serde_json::Map::new(),
            children: Vec::new(),
            os_provided: false,
        }
    }

    #[test]
    fn retriever_requires_exactly_three_children() {
        let mut retriever = leaf_asset("r", AssetType::Retriever);
        assert!(retriever.validate().is_err());
        retriever.children = vec![
            leaf_asset("embed-model", AssetType::Model),
            leaf_asset("embed-store", AssetType::Document),
            leaf_asset("doc", AssetType::Document),
        ];
        assert!(retriever.validate().is_ok());
    }

    #[test]
    fn duplicate_children_are_rejected() {
        let mut parent = leaf_asset("p", AssetType::Model);
        let child = leaf_asset("c", AssetType::Model);
        parent.children = vec![child.clone(), child];
        assert!(parent.validate().is_err());
    }

    #[test]
    fn deployment_absent_sentinel() {
        let d = Deployment::absent();
        assert!(d.is_absent());
        assert_eq!(d.id, -1);
    }

    #[test]
    fn deployment_roundtrips_through_json() {
        let mut d = Deployment::absent();
        d.id = 7;
        d.modules.push(leaf_asset("m", AssetType::Model));
        let json = serde_json::to_string(&d).unwrap();
        let back: Deployment = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, 7);
        assert_eq!(back.modules.len(), 1);
        assert_eq!(back.modules[0].id.name, "m");
    }
}
