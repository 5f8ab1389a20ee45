// Copyright (c) 2026 Palisade Contributors
// SPDX-License-Identifier: Apache-2.0

//! Cluster-state capability.
//!
//! The join service needs three things from the cluster: the current
//! Kubernetes components reference, the component list behind that
//! reference, and a way to register a node as pending admission. The
//! default implementation reads records mounted into the pod
//! filesystem and spools registrations as JSON records consumed by the
//! node admission controller.

use std::fs;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use palisade_core::{CoreError, CoreResult};
use palisade_protocol::pb;
use serde::{Deserialize, Serialize};

pub const COMPONENTS_REF_RECORD: &str = "components-ref";
pub const COMPONENTS_DIR: &str = "components";
pub const JOINING_NODES_DIR: &str = "joining-nodes";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Component {
    pub url: String,
    pub hash: String,
    pub install_path: String,
    #[serde(default)]
    pub extract: bool,
}

impl Component {
    pub fn to_proto(&self) -> pb::KubernetesComponent {
        pb::KubernetesComponent {
            url: self.url.clone(),
            hash: self.hash.clone(),
            install_path: self.install_path.clone(),
            extract: self.extract,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentsBundle {
    pub kubernetes_version: String,
    pub components: Vec<Component>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JoiningNodeRecord {
    pub name: String,
    pub components_ref: String,
    pub is_control_plane: bool,
    pub registered_at_unix: u64,
}

/// Capability over the external cluster store. Implementations must be
/// safe for concurrent use; the join service handles requests in
/// parallel.
pub trait ClusterBackend: Send + Sync {
    /// Current components reference from the cluster's node-version record.
    fn components_ref(&self) -> CoreResult<String>;

    /// Concrete component list behind `reference`.
    fn components(&self, reference: &str) -> CoreResult<ComponentsBundle>;

    /// Registers a node as pending admission. Last mutating step of a
    /// join: if this fails the whole ticket fails.
    fn register_joining_node(&self, record: &JoiningNodeRecord) -> CoreResult<()>;
}

/// Backend over records mounted into the pod filesystem.
pub struct MountedRecordsBackend {
    records_dir: PathBuf,
}

impl MountedRecordsBackend {
    pub fn new(records_dir: PathBuf) -> Self {
        Self { records_dir }
    }
}

impl ClusterBackend for MountedRecordsBackend {
    fn components_ref(&self) -> CoreResult<String> {
        let path = self.records_dir.join(COMPONENTS_REF_RECORD);
        let raw = fs::read_to_string(&path)
            .map_err(|e| CoreError::Dependency(format!("reading components reference: {e}")))?;
        let reference = raw.trim().to_string();
        if reference.is_empty() {
            return Err(CoreError::Dependency(
                "components reference record is empty".to_string(),
            ));
        }
        Ok(reference)
    }

    fn components(&self, reference: &str) -> CoreResult<ComponentsBundle> {
        validate_record_name(reference)?;
        let path = self
            .records_dir
            .join(COMPONENTS_DIR)
            .join(format!("{reference}.json"));
        let raw = fs::read(&path)
            .map_err(|e| CoreError::Dependency(format!("reading components record: {e}")))?;
        serde_json::from_slice(&raw)
            .map_err(|e| CoreError::Dependency(format!("parsing components record: {e}")))
    }

    fn register_joining_node(&self, record: &JoiningNodeRecord) -> CoreResult<()> {
        validate_record_name(&record.name)?;
        let dir = self.records_dir.join(JOINING_NODES_DIR);
        fs::create_dir_all(&dir)
            .map_err(|e| CoreError::Dependency(format!("creating joining-nodes dir: {e}")))?;
        let payload = serde_json::to_vec_pretty(record)
            .map_err(|e| CoreError::Dependency(format!("encoding joining-node record: {e}")))?;
        fs::write(dir.join(format!("{}.json", record.name)), payload)
            .map_err(|e| CoreError::Dependency(format!("writing joining-node record: {e}")))
    }
}

pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn validate_record_name(name: &str) -> CoreResult<()> {
    if name.is_empty()
        || name == ".."
        || name.contains('/')
        || name.contains('\\')
        || name.contains('\0')
    {
        return Err(CoreError::InvalidRequest(format!(
            "record name {name:?} is not a valid file name"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn backend_with_records() -> (TempDir, MountedRecordsBackend) {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(COMPONENTS_REF_RECORD), "k8s-1.30.2-abc\n").unwrap();
        fs::create_dir_all(dir.path().join(COMPONENTS_DIR)).unwrap();
        let bundle = ComponentsBundle {
            kubernetes_version: "1.30.2".to_string(),
            components: vec![Component {
                url: "https://dl.k8s.io/v1.30.2/kubelet".to_string(),
                hash: "sha256:7ac0".to_string(),
                install_path: "/usr/bin/kubelet".to_string(),
                extract: false,
            }],
        };
        fs::write(
            dir.path().join(COMPONENTS_DIR).join("k8s-1.30.2-abc.json"),
            serde_json::to_vec(&bundle).unwrap(),
        )
        .unwrap();
        let backend = MountedRecordsBackend::new(dir.path().to_path_buf());
        (dir, backend)
    }

    #[test]
    fn components_roundtrip() {
        let (_dir, backend) = backend_with_records();
        let reference = backend.components_ref().unwrap();
        assert_eq!(reference, "k8s-1.30.2-abc");
        let bundle = backend.components(&reference).unwrap();
        assert_eq!(bundle.kubernetes_version, "1.30.2");
        assert_eq!(bundle.components.len(), 1);
    }

    #[test]
    fn missing_reference_record_is_a_dependency_failure() {
        let dir = TempDir::new().unwrap();
        let backend = MountedRecordsBackend::new(dir.path().to_path_buf());
        let err = backend.components_ref().unwrap_err();
        assert!(matches!(err, CoreError::Dependency(_)));
    }

    #[test]
    fn registration_writes_a_record() {
        let (dir, backend) = backend_with_records();
        let record = JoiningNodeRecord {
            name: "worker-1".to_string(),
            components_ref: "k8s-1.30.2-abc".to_string(),
            is_control_plane: false,
            registered_at_unix: unix_now(),
        };
        backend.register_joining_node(&record).unwrap();

        let raw = fs::read(dir.path().join(JOINING_NODES_DIR).join("worker-1.json")).unwrap();
        let parsed: JoiningNodeRecord = serde_json::from_slice(&raw).unwrap();
        assert_eq!(parsed, record);
    }

    #[test]
    fn hostile_node_names_are_rejected() {
        let (_dir, backend) = backend_with_records();
        for name in ["", "..", "a/b", "a\\b"] {
            let record = JoiningNodeRecord {
                name: name.to_string(),
                components_ref: "r".to_string(),
                is_control_plane: false,
                registered_at_unix: 0,
            };
            let err = backend.register_joining_node(&record).unwrap_err();
            assert!(matches!(err, CoreError::InvalidRequest(_)), "{name:?}");
        }
    }
}
