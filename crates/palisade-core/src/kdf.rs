// Copyright (c) 2026 Palisade Contributors
// SPDX-License-Identifier: Apache-2.0

//! Deterministic key derivation.
//!
//! All secrets handed out by the join service and re-derived during
//! recovery come from HKDF-SHA256 over the cluster master secret. Two
//! derivations with the same (master secret, salt, context, length) are
//! bit-identical, which is what lets an operator re-derive a node's
//! disk key after a full-cluster reboot without any secret store.

use hkdf::Hkdf;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{CoreError, CoreResult};

/// Context label for the per-request measurement secret.
pub const MEASUREMENT_SECRET_CONTEXT: &str = "measurement-secret";

/// Context prefix for state-disk keys. The prefix keeps disk UUIDs in
/// their own label space; no UUID can collide with another context.
pub const DISK_KEY_CONTEXT_PREFIX: &str = "disk-key-";

/// Context label for the emergency SSH CA seed.
pub const SSH_CA_SEED_CONTEXT: &str = "emergency-ssh-ca";

pub const DERIVED_KEY_LENGTH: usize = 32;
pub const STATE_DISK_KEY_LENGTH: usize = 32;
pub const ED25519_SEED_LENGTH: usize = 32;
pub const MEASUREMENT_SALT_LENGTH: usize = 32;

const MIN_MASTER_SECRET_LENGTH: usize = 16;

/// Capability for deriving named keys. Implementations must be pure:
/// a failed derivation is fatal to the calling request and is never
/// replaced by a random or cached value.
pub trait KeyOracle: Send + Sync {
    fn derive_key(&self, context: &str, length: usize) -> CoreResult<Vec<u8>>;
}

/// The cluster master secret as written at cluster init. Key and salt
/// are base64 in the JSON file; both are wiped from memory on drop.
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct MasterSecret {
    #[serde(with = "b64")]
    pub key: Vec<u8>,
    #[serde(with = "b64")]
    pub salt: Vec<u8>,
}

mod b64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        STANDARD.decode(raw.as_bytes()).map_err(serde::de::Error::custom)
    }
}

/// HKDF-SHA256 oracle over the cluster master secret.
#[derive(Clone)]
pub struct MasterSecretOracle {
    secret: MasterSecret,
}

impl MasterSecretOracle {
    pub fn new(secret: MasterSecret) -> CoreResult<Self> {
        if secret.key.len() < MIN_MASTER_SECRET_LENGTH {
            return Err(CoreError::InvalidRequest(format!(
                "master secret key must be at least {MIN_MASTER_SECRET_LENGTH} bytes"
            )));
        }
        Ok(Self { secret })
    }
}

impl KeyOracle for MasterSecretOracle {
    fn derive_key(&self, context: &str, length: usize) -> CoreResult<Vec<u8>> {
        if length == 0 {
            return Err(CoreError::InvalidRequest(
                "derived key length must be non-zero".to_string(),
            ));
        }
        let hk = Hkdf::<Sha256>::new(Some(&self.secret.salt), &self.secret.key);
        let mut okm = vec![0u8; length];
        hk.expand(context.as_bytes(), &mut okm)
            .map_err(|e| CoreError::Dependency(format!("hkdf expand: {e}")))?;
        Ok(okm)
    }
}

/// Fixes the label space over any [`KeyOracle`].
pub struct SecretDeriver<'a> {
    oracle: &'a dyn KeyOracle,
}

impl<'a> SecretDeriver<'a> {
    pub fn new(oracle: &'a dyn KeyOracle) -> Self {
        Self { oracle }
    }

    /// Fresh measurement secret; derived on every request, never persisted.
    pub fn measurement_secret(&self) -> CoreResult<Vec<u8>> {
        self.oracle
            .derive_key(MEASUREMENT_SECRET_CONTEXT, DERIVED_KEY_LENGTH)
    }

    /// Symmetric key for the state disk identified by `disk_uuid`. UUIDs
    /// are normalized to lowercase so the same disk always maps to the
    /// same key regardless of how the caller renders the UUID.
    pub fn state_disk_key(&self, disk_uuid: &str) -> CoreResult<Vec<u8>> {
        let disk_uuid = disk_uuid.trim();
        if disk_uuid.is_empty() {
            return Err(CoreError::InvalidRequest(
                "disk UUID must not be empty".to_string(),
            ));
        }
        let context = format!(
            "{DISK_KEY_CONTEXT_PREFIX}{}",
            disk_uuid.to_ascii_lowercase()
        );
        self.oracle.derive_key(&context, STATE_DISK_KEY_LENGTH)
    }

    /// Seed for the emergency SSH CA key pair.
    pub fn ssh_ca_seed(&self) -> CoreResult<[u8; ED25519_SEED_LENGTH]> {
        let bytes = self
            .oracle
            .derive_key(SSH_CA_SEED_CONTEXT, ED25519_SEED_LENGTH)?;
        bytes
            .try_into()
            .map_err(|_| CoreError::Dependency("oracle returned a short seed".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn oracle(key: &[u8], salt: &[u8]) -> MasterSecretOracle {
        MasterSecretOracle::new(MasterSecret {
            key: key.to_vec(),
            salt: salt.to_vec(),
        })
        .unwrap()
    }

    #[test]
    fn state_disk_key_is_deterministic() {
        let a = oracle(&[0u8; 32], &[1u8; 32]);
        let b = oracle(&[0u8; 32], &[1u8; 32]);
        let deriver_a = SecretDeriver::new(&a);
        let deriver_b = SecretDeriver::new(&b);

        let uuid = "6aa6379e-94b7-4f7e-9b9f-77e9fb5b7a6a";
        let key_a = deriver_a.state_disk_key(uuid).unwrap();
        let key_b = deriver_b.state_disk_key(uuid).unwrap();
        assert_eq!(key_a, key_b);
        assert_eq!(key_a.len(), STATE_DISK_KEY_LENGTH);
    }

    #[test]
    fn disk_uuid_casing_does_not_change_the_key() {
        let o = oracle(b"super-secret-master-key", b"cluster-salt");
        let deriver = SecretDeriver::new(&o);
        let lower = deriver.state_disk_key("abcd-ef01").unwrap();
        let upper = deriver.state_disk_key("ABCD-EF01").unwrap();
        assert_eq!(lower, upper);
    }

    #[test]
    fn distinct_uuids_yield_distinct_keys() {
        let o = oracle(&[7u8; 32], &[9u8; 32]);
        let deriver = SecretDeriver::new(&o);
        let one = deriver.state_disk_key("disk-one").unwrap();
        let two = deriver.state_disk_key("disk-two").unwrap();
        assert_ne!(one, two);
    }

    #[test]
    fn contexts_are_separated() {
        let o = oracle(&[7u8; 32], &[9u8; 32]);
        let deriver = SecretDeriver::new(&o);
        let measurement = deriver.measurement_secret().unwrap();
        let disk = deriver.state_disk_key("measurement-secret").unwrap();
        assert_ne!(measurement, disk);
    }

    #[test]
    fn different_salt_changes_output() {
        let a = oracle(&[0u8; 32], &[1u8; 32]);
        let b = oracle(&[0u8; 32], &[2u8; 32]);
        let key_a = SecretDeriver::new(&a).state_disk_key("uuid").unwrap();
        let key_b = SecretDeriver::new(&b).state_disk_key("uuid").unwrap();
        assert_ne!(key_a, key_b);
    }

    #[test]
    fn empty_disk_uuid_is_rejected() {
        let o = oracle(&[0u8; 32], &[1u8; 32]);
        let err = SecretDeriver::new(&o).state_disk_key("  ").unwrap_err();
        assert!(matches!(err, CoreError::InvalidRequest(_)));
    }

    #[test]
    fn zero_length_derivation_is_rejected() {
        let o = oracle(&[0u8; 32], &[1u8; 32]);
        let err = o.derive_key("context", 0).unwrap_err();
        assert!(matches!(err, CoreError::InvalidRequest(_)));
    }

    #[test]
    fn short_master_secret_is_rejected() {
        // The oracle type stays out of Debug so keys never render; take
        // the error side without formatting the Ok side.
        let err = MasterSecretOracle::new(MasterSecret {
            key: vec![0u8; 8],
            salt: vec![1u8; 32],
        })
        .err()
        .unwrap();
        assert!(matches!(err, CoreError::InvalidRequest(_)));
    }

    #[test]
    fn master_secret_file_roundtrips_base64() {
        let secret = MasterSecret {
            key: vec![0xAB; 32],
            salt: vec![0xCD; 32],
        };
        let json = serde_json::to_string(&secret).unwrap();
        assert!(json.is_ascii());
        let parsed: MasterSecret = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.key, secret.key);
        assert_eq!(parsed.salt, secret.salt);
    }
}
