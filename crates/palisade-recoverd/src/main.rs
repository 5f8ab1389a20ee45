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

use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use palisade_attest::{validator_for_name, AttestedGuard};
use palisade_protocol::RECOVERY_PORT;
use palisade_recoverd::disk::{CryptsetupMapper, DiskMapper as _};
use palisade_recoverd::server::{serve_until_recovered, RecoveryPeer};

#[derive(Parser, Debug)]
#[command(name = "palisade-recoverd", about = "Palisade recovery peer")]
struct Args {
    /// Address to listen on for recovery pushes.
    #[arg(long, default_value_t = format!("0.0.0.0:{RECOVERY_PORT}"))]
    listen: String,

    /// UUID of the locked state disk.
    #[arg(long)]
    disk_uuid: String,

    /// Encrypted device to unlock once a key arrives. When omitted the
    /// daemon only waits for the key and exits, for development setups
    /// where unlocking happens elsewhere.
    #[arg(long)]
    device: Option<PathBuf>,

    /// Device-mapper name for the unlocked disk.
    #[arg(long, default_value = "state")]
    mapper_name: String,

    /// Attestation provider gating the recovery channel.
    #[arg(long, default_value = "insecure-dev")]
    attestation_provider: String,

    /// Log filter, e.g. "info" or "palisade_recoverd=debug".
    #[arg(long, default_value = "info")]
    log: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&args.log)?)
        .init();

    let validator = validator_for_name(&args.attestation_provider)?;
    let guard = AttestedGuard::new(validator);
    let peer = RecoveryPeer::new(args.disk_uuid.clone());

    let listener = tokio::net::TcpListener::bind(&args.listen).await?;
    tracing::info!(listen = %args.listen, disk_uuid = %args.disk_uuid, "waiting for recovery push");

    let keys = serve_until_recovered(listener, guard, peer).await?;

    match args.device {
        Some(device) => {
            CryptsetupMapper::new().open(&device, &args.mapper_name, &keys.state_disk_key)?;
            tracing::info!(device = %device.display(), mapper = %args.mapper_name, "state disk unlocked");
        }
        None => {
            tracing::info!("key delivered, no device configured, exiting");
        }
    }

    Ok(())
}
