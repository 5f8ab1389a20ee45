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
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use palisade_attest::DEV_ATTESTATION_DOCUMENT;
use palisade_core::kdf::{MasterSecret, MasterSecretOracle};
use palisadectl::recover::{
    next_sequential_endpoint, with_default_port, GrpcRecoveryDoer, Recoverer,
};

#[derive(Parser, Debug)]
#[command(name = "palisadectl", about = "Operator CLI for Palisade clusters")]
struct Cli {
    /// Log filter, e.g. "info" or "palisadectl=debug".
    #[arg(long, default_value = "warn")]
    log: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Push state-disk keys to control-plane nodes locked out after a
    /// full-cluster reboot.
    Recover {
        /// First recovery endpoint, `host[:port]`. An IPv4 address is
        /// walked octet by octet; a hostname is treated as a load
        /// balancer and revisited.
        #[arg(long)]
        endpoint: String,

        /// Path to the cluster master secret file written at init.
        #[arg(long)]
        master_secret: PathBuf,

        /// Path to the attestation document to present. The insecure
        /// development document is used when omitted.
        #[arg(long)]
        attestation_document: Option<PathBuf>,

        /// Per-attempt timeout in seconds.
        #[arg(long, default_value_t = 60)]
        attempt_timeout_secs: u64,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&cli.log)?)
        .init();

    match cli.command {
        Command::Recover {
            endpoint,
            master_secret,
            attestation_document,
            attempt_timeout_secs,
        } => {
            let secret: MasterSecret = serde_json::from_slice(&fs::read(&master_secret)?)?;
            let oracle = MasterSecretOracle::new(secret)?;
            let document = match attestation_document {
                Some(path) => fs::read(path)?,
                None => DEV_ATTESTATION_DOCUMENT.to_vec(),
            };

            let cancel = CancellationToken::new();
            let signal_cancel = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    signal_cancel.cancel();
                }
            });

            let mut recoverer = Recoverer::new(
                GrpcRecoveryDoer::new(oracle, document),
                next_sequential_endpoint,
                Duration::from_secs(attempt_timeout_secs),
                cancel,
            );
            let recovered = recoverer
                .run(with_default_port(&endpoint), || {
                    println!("Pushed recovery key.")
                })
                .await?;
            if recovered == 0 {
                println!("No control-plane nodes in need of recovery found.");
            }
        }
    }

    Ok(())
}
