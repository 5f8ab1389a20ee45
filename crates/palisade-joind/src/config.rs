// Copyright (c) 2026 Palisade Contributors
// SPDX-License-Identifier: Apache-2.0

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use palisade_core::kdf::MasterSecret;
use palisade_protocol::JOIN_SERVICE_PORT;

/// Daemon configuration. All paths default to the standard mounts of a
/// join-service pod; a JSON config file can override any of them.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct JoindConfig {
    pub listen: String,
    pub attestation_provider: String,
    pub master_secret_path: PathBuf,
    pub measurement_salt_path: PathBuf,
    pub kubelet_ca_cert_path: PathBuf,
    pub kubelet_ca_key_path: PathBuf,
    pub records_dir: PathBuf,
    pub control_plane_files_dir: PathBuf,
    pub additional_principals_path: PathBuf,
}

impl Default for JoindConfig {
    fn default() -> Self {
        Self {
            listen: format!("0.0.0.0:{JOIN_SERVICE_PORT}"),
            attestation_provider: "insecure-dev".to_string(),
            master_secret_path: PathBuf::from("/etc/palisade/master-secret.json"),
            measurement_salt_path: PathBuf::from("/etc/palisade/measurement-salt"),
            kubelet_ca_cert_path: PathBuf::from("/etc/kubernetes/pki/ca.crt"),
            kubelet_ca_key_path: PathBuf::from("/etc/kubernetes/pki/ca.key"),
            records_dir: PathBuf::from("/var/run/palisade/records"),
            control_plane_files_dir: PathBuf::from("/etc/kubernetes/pki"),
            additional_principals_path: PathBuf::from("/etc/palisade/ssh-principals"),
        }
    }
}

impl JoindConfig {
    pub fn load(path: Option<&Path>) -> Result<Self, Box<dyn std::error::Error>> {
        match path {
            Some(path) => {
                let payload = fs::read(path)?;
                Ok(serde_json::from_slice(&payload)?)
            }
            None => Ok(Self::default()),
        }
    }

    /// Reads and parses the master secret file this config points at.
    pub fn read_master_secret(&self) -> Result<MasterSecret, Box<dyn std::error::Error>> {
        let payload = fs::read(&self.master_secret_path)?;
        Ok(serde_json::from_slice(&payload)?)
    }
}
