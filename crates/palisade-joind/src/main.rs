// Copyright [2026] [Palisade Contributors]
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// Copyright (c) 2026 Palisade Contributors
// SPDX-License-Identifier: Apache-2.0

#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![forbid(unsafe_code)]

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tonic::transport::Server;
use tracing_subscriber::EnvFilter;

use palisade_attest::{validator_for_name, AttestedGuard};
use palisade_core::kdf::{MasterSecretOracle, MEASUREMENT_SALT_LENGTH};
use palisade_core::kubelet::KubeletCa;
use palisade_joind::config::JoindConfig;
use palisade_joind::kubernetes::MountedRecordsBackend;
use palisade_joind::server::JoinServer;
use palisade_joind::token::SpooledTokenSource;
use palisade_protocol::pb::join_service_server::JoinServiceServer;

#[derive(Parser, Debug)]
#[command(name = "palisade-joind", about = "Palisade join ticket service")]
struct Args {
    /// Path to a JSON config file. Defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log filter, e.g. "info" or "palisade_joind=debug".
    #[arg(long, default_value = "info")]
    log: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&args.log)?)
        .init();

    let config = JoindConfig::load(args.config.as_deref())?;

    let oracle = MasterSecretOracle::new(config.read_master_secret()?)?;

    let measurement_salt = fs::read(&config.measurement_salt_path)?;
    if measurement_salt.len() != MEASUREMENT_SALT_LENGTH {
        return Err(format!(
            "measurement salt must be {MEASUREMENT_SALT_LENGTH} bytes, got {}",
            measurement_salt.len()
        )
        .into());
    }

    let kubelet_ca = KubeletCa::load(
        &fs::read_to_string(&config.kubelet_ca_cert_path)?,
        &fs::read_to_string(&config.kubelet_ca_key_path)?,
    )?;

    let server = JoinServer::new(
        Arc::new(oracle),
        measurement_salt,
        Arc::new(kubelet_ca),
        Arc::new(SpooledTokenSource::new(config.records_dir.clone())),
        Arc::new(MountedRecordsBackend::new(config.records_dir.clone())),
        config.additional_principals_path.clone(),
        config.control_plane_files_dir.clone(),
    );

    let validator = validator_for_name(&config.attestation_provider)?;
    let guard = AttestedGuard::new(validator);

    let addr = config.listen.parse()?;
    tracing::info!(%addr, provider = %config.attestation_provider, "join service listening");
    Server::builder()
        .add_service(JoinServiceServer::with_interceptor(server, guard))
        .serve(addr)
        .await?;

    Ok(())
}
