// Copyright (c) 2026 Palisade Contributors
// SPDX-License-Identifier: Apache-2.0

//! Emergency SSH certificate authority.
//!
//! The CA key pair is re-derived from a KMS seed on every request, so
//! there is no long-lived signing key at rest. The derivation must be
//! reproducible byte-for-byte: no ambient randomness enters key
//! generation (the certificate nonce is random, the key pair is not).

use ssh_key::certificate::{Builder as CertificateBuilder, CertType, Certificate};
use ssh_key::private::Ed25519Keypair;
use ssh_key::{PrivateKey, PublicKey};

use crate::error::{CoreError, CoreResult};
use crate::kdf::ED25519_SEED_LENGTH;

const HOST_CERT_KEY_ID: &str = "palisade-emergency-host-cert";

/// Validity bounds approximating OpenSSH's "always valid" certificate:
/// emergency access must not depend on wall-clock sanity of a node
/// that just came back from a cold reboot. The upper bound is
/// 9999-12-31T23:59:59Z, the latest time the certificate encoding
/// accepts.
const VALID_AFTER_UNIX: u64 = 0;
const VALID_BEFORE_UNIX: u64 = 253_402_300_799;

pub struct EmergencySshCa {
    signing_key: PrivateKey,
}

impl EmergencySshCa {
    /// Derives the CA key pair from `seed`. Same seed, same key pair.
    pub fn from_seed(seed: &[u8; ED25519_SEED_LENGTH]) -> Self {
        let keypair = Ed25519Keypair::from_seed(seed);
        Self {
            signing_key: PrivateKey::from(keypair),
        }
    }

    /// The CA public key in authorized-keys format, for installation as
    /// a trusted host-certificate authority on operator machines.
    pub fn authorized_public_key(&self) -> CoreResult<Vec<u8>> {
        PublicKey::from(&self.signing_key)
            .to_openssh()
            .map(String::into_bytes)
            .map_err(|e| CoreError::Signing(format!("encoding CA public key: {e}")))
    }

    /// Signs an SSH host certificate for `host_public_key` (wire format)
    /// with the given principal list. Returns the certificate in
    /// authorized-keys line format. Nothing is persisted; the caller is
    /// responsible for delivering the certificate to the node.
    pub fn issue_host_certificate(
        &self,
        principals: &[String],
        host_public_key: &[u8],
    ) -> CoreResult<Vec<u8>> {
        let public = PublicKey::from_bytes(host_public_key)
            .map_err(|e| CoreError::Signing(format!("parsing host public key: {e}")))?;

        let nonce: [u8; 32] = rand::random();
        let mut builder = CertificateBuilder::new(
            nonce.to_vec(),
            public.key_data().clone(),
            VALID_AFTER_UNIX,
            VALID_BEFORE_UNIX,
        )
        .map_err(sign_err)?;
        builder.cert_type(CertType::Host).map_err(sign_err)?;
        builder.key_id(HOST_CERT_KEY_ID).map_err(sign_err)?;

        let mut added = false;
        for principal in principals {
            let principal = principal.trim();
            if principal.is_empty() {
                continue;
            }
            builder.valid_principal(principal).map_err(sign_err)?;
            added = true;
        }
        if !added {
            builder.all_principals_valid().map_err(sign_err)?;
        }

        let certificate: Certificate = builder.sign(&self.signing_key).map_err(sign_err)?;
        certificate
            .to_openssh()
            .map(String::into_bytes)
            .map_err(sign_err)
    }
}

fn sign_err(err: ssh_key::Error) -> CoreError {
    CoreError::Signing(format!("building host certificate: {err}"))
}
