// Copyright (c) 2026 Palisade Contributors
// SPDX-License-Identifier: Apache-2.0

//! Kubeadm bootstrap tokens.
//!
//! Every join ticket carries a single-use bootstrap token in kubeadm's
//! `<6 chars>.<16 chars>` format, the API server endpoint, and the
//! CA certificate hash joining nodes pin during TLS bootstrap.

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use rand::Rng as _;
use sha2::{Digest as _, Sha256};

use palisade_core::{CoreError, CoreResult};

pub const JOIN_TOKEN_TTL: Duration = Duration::from_secs(15 * 60);

const TOKEN_ID_LENGTH: usize = 6;
const TOKEN_SECRET_LENGTH: usize = 16;
const TOKEN_CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

pub const API_SERVER_ENDPOINT_RECORD: &str = "api-server-endpoint";

/// A bootstrap token as handed to a joining node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapToken {
    pub api_server_endpoint: String,
    pub token: String,
    pub ca_cert_hash: String,
}

/// Capability for minting bootstrap tokens. The production
/// implementation registers the token with the cluster so the API
/// server accepts it; test doubles just fabricate one.
pub trait JoinTokenSource: Send + Sync {
    fn bootstrap_token(&self, ca_cert_der: &[u8]) -> CoreResult<BootstrapToken>;
}

/// Token source over the records directory: reads the API server
/// endpoint record and spools the minted token for the admission
/// controller to register before the node redeems it.
pub struct SpooledTokenSource {
    records_dir: PathBuf,
}

impl SpooledTokenSource {
    pub fn new(records_dir: PathBuf) -> Self {
        Self { records_dir }
    }
}

impl JoinTokenSource for SpooledTokenSource {
    fn bootstrap_token(&self, ca_cert_der: &[u8]) -> CoreResult<BootstrapToken> {
        let endpoint_path = self.records_dir.join(API_SERVER_ENDPOINT_RECORD);
        let api_server_endpoint = fs::read_to_string(&endpoint_path)
            .map_err(|e| CoreError::Dependency(format!("reading API server endpoint: {e}")))?
            .trim()
            .to_string();
        if api_server_endpoint.is_empty() {
            return Err(CoreError::Dependency(
                "API server endpoint record is empty".to_string(),
            ));
        }

        let token = generate_token();
        let tokens_dir = self.records_dir.join("bootstrap-tokens");
        fs::create_dir_all(&tokens_dir)
            .map_err(|e| CoreError::Dependency(format!("creating bootstrap-tokens dir: {e}")))?;
        let token_id = &token[..TOKEN_ID_LENGTH];
        let ttl_secs = JOIN_TOKEN_TTL.as_secs();
        fs::write(
            tokens_dir.join(token_id),
            format!("{token}\nttl-seconds: {ttl_secs}\n"),
        )
        .map_err(|e| CoreError::Dependency(format!("spooling bootstrap token: {e}")))?;

        Ok(BootstrapToken {
            api_server_endpoint,
            token,
            ca_cert_hash: discovery_ca_cert_hash(ca_cert_der),
        })
    }
}

/// Hash joining nodes pin against the cluster CA during TLS bootstrap,
/// in kubeadm's `sha256:<hex>` discovery format.
pub fn discovery_ca_cert_hash(ca_cert_der: &[u8]) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(ca_cert_der)))
}

fn generate_token() -> String {
    let mut rng = rand::thread_rng();
    let mut draw = |n: usize| -> String {
        (0..n)
            .map(|_| TOKEN_CHARSET[rng.gen_range(0..TOKEN_CHARSET.len())] as char)
            .collect()
    };
    let id = draw(TOKEN_ID_LENGTH);
    let secret = draw(TOKEN_SECRET_LENGTH);
    format!("{id}.{secret}")
}
