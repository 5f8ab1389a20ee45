// Copyright (c) 2026 Palisade Contributors
// SPDX-License-Identifier: Apache-2.0

//! State-disk unlocking. The delivered key is handed to cryptsetup on
//! stdin; it never appears on the command line or in the environment.

use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DiskError {
    #[error("running cryptsetup: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("cryptsetup failed with {code}: {stderr}")]
    Failed { code: i32, stderr: String },

    #[error("cryptsetup terminated by signal")]
    Terminated,
}

/// Capability for mapping an encrypted device. Split out so the daemon
/// can run without a real device in tests and development.
pub trait DiskMapper: Send + Sync {
    fn open(&self, device: &Path, mapper_name: &str, key: &[u8]) -> Result<(), DiskError>;
}

/// Maps a LUKS2 device via the cryptsetup binary.
pub struct CryptsetupMapper {
    binary: PathBuf,
}

impl CryptsetupMapper {
    pub fn new() -> Self {
        Self {
            binary: PathBuf::from("cryptsetup"),
        }
    }
}

impl Default for CryptsetupMapper {
    fn default() -> Self {
        Self::new()
    }
}

impl DiskMapper for CryptsetupMapper {
    fn open(&self, device: &Path, mapper_name: &str, key: &[u8]) -> Result<(), DiskError> {
        let mut child = Command::new(&self.binary)
            .arg("open")
            .arg("--type")
            .arg("luks2")
            .arg("--key-file")
            .arg("-")
            .arg(device)
            .arg(mapper_name)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()?;

        if let Some(stdin) = child.stdin.as_mut() {
            stdin.write_all(key)?;
        }
        drop(child.stdin.take());

        let output = child.wait_with_output()?;
        if output.status.success() {
            return Ok(());
        }
        match output.status.code() {
            Some(code) => Err(DiskError::Failed {
                code,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            }),
            None => Err(DiskError::Terminated),
        }
    }
}
