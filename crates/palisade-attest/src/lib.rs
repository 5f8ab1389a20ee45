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

//! Attested-channel boundary.
//!
//! Every Palisade RPC surface is gated on remote attestation of the
//! peer. The verification algorithm itself lives behind
//! [`AttestationValidator`]; this crate only enforces that a request
//! carrying no valid attestation document is refused before any
//! application-level handler runs.

#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]
#![forbid(unsafe_code)]

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use thiserror::Error;
use tonic::metadata::MetadataValue;
use tonic::service::Interceptor;
use tonic::{Request, Status};

pub const ATTESTATION_METADATA_KEY: &str = "x-palisade-attestation";

/// Attestation document presented by peers in development clusters.
pub const DEV_ATTESTATION_DOCUMENT: &[u8] = b"palisade-insecure-dev-attestation";

#[derive(Debug, Error)]
pub enum AttestError {
    #[error("attestation document rejected: {0}")]
    Rejected(String),

    #[error("malformed attestation document: {0}")]
    Malformed(String),

    #[error("unsupported attestation provider: {0}")]
    UnsupportedProvider(String),
}

/// Capability for validating a peer's attestation document.
pub trait AttestationValidator: Send + Sync {
    fn validate(&self, document: &[u8]) -> Result<(), AttestError>;
}

/// Server-side gate: refuses any request whose attestation metadata is
/// missing, undecodable, or rejected by the injected validator.
#[derive(Clone)]
pub struct AttestedGuard {
    validator: Arc<dyn AttestationValidator>,
}

impl AttestedGuard {
    pub fn new(validator: Arc<dyn AttestationValidator>) -> Self {
        Self { validator }
    }
}

impl Interceptor for AttestedGuard {
    fn call(&mut self, request: Request<()>) -> Result<Request<()>, Status> {
        let Some(value) = request.metadata().get(ATTESTATION_METADATA_KEY) else {
            return Err(Status::unauthenticated("missing attestation document"));
        };
        let Ok(encoded) = value.to_str() else {
            return Err(Status::unauthenticated("invalid attestation metadata"));
        };
        let document = STANDARD
            .decode(encoded.as_bytes())
            .map_err(|_| Status::unauthenticated("invalid attestation metadata"))?;
        self.validator.validate(&document).map_err(|err| {
            tracing::warn!(error = %err, "refusing unattested peer");
            Status::unauthenticated("attestation validation failed")
        })?;
        Ok(request)
    }
}

/// Client-side interceptor that attaches the local attestation document
/// to every outgoing request on the connection.
pub fn attestation_interceptor(
    document: Vec<u8>,
) -> impl FnMut(Request<()>) -> Result<Request<()>, Status> + Clone {
    let encoded = STANDARD.encode(&document);
    move |mut request: Request<()>| {
        let value = MetadataValue::try_from(encoded.as_str())
            .map_err(|_| Status::internal("attestation document is not valid metadata"))?;
        request
            .metadata_mut()
            .insert(ATTESTATION_METADATA_KEY, value);
        Ok(request)
    }
}

/// Selects a validator implementation by provider name. Hardware
/// backends (SNP, TDX) are wired in by the deployment; only the
/// development validator ships here.
pub fn validator_for_name(name: &str) -> Result<Arc<dyn AttestationValidator>, AttestError> {
    if name.eq_ignore_ascii_case("insecure-dev") {
        return Ok(Arc::new(InsecureDevValidator));
    }
    Err(AttestError::UnsupportedProvider(name.to_string()))
}

/// Accepts any document. Development clusters only.
pub struct InsecureDevValidator;

impl AttestationValidator for InsecureDevValidator {
    fn validate(&self, _document: &[u8]) -> Result<(), AttestError> {
        tracing::warn!("insecure-dev attestation validator accepted a peer without verification");
        Ok(())
    }
}

/// Deterministic issuer/validator pair for tests.
pub struct FakeIssuer {
    id: String,
}

impl FakeIssuer {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }

    pub fn issue(&self) -> Vec<u8> {
        format!("palisade-fake-attestation:{}", self.id).into_bytes()
    }
}

pub struct FakeValidator {
    expected: Vec<u8>,
}

impl FakeValidator {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            expected: FakeIssuer::new(id).issue(),
        }
    }
}

impl AttestationValidator for FakeValidator {
    fn validate(&self, document: &[u8]) -> Result<(), AttestError> {
        if document == self.expected.as_slice() {
            Ok(())
        } else {
            Err(AttestError::Rejected(
                "document does not match expected measurement".to_string(),
            ))
        }
    }
}
