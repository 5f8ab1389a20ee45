// Copyright (c) 2026 Palisade Contributors
// SPDX-License-Identifier: Apache-2.0

//! Kubelet certificate authority: signs X.509 certificates from the
//! certificate signing request a joining node submits with its ticket
//! request, and extracts the node name from the CSR subject.

use rcgen::{
    BasicConstraints, Certificate, CertificateParams, CertificateSigningRequestParams, DnType,
    DnValue, IsCa, KeyPair, KeyUsagePurpose,
};

use crate::error::{CoreError, CoreResult};

/// Kubelet certificates carry their node name as
/// `system:node:<name>` in the subject common name.
const NODE_NAME_PREFIX: &str = "system:node:";

pub struct KubeletCa {
    cert: Certificate,
    key: KeyPair,
}

impl KubeletCa {
    /// Loads the cluster's kubelet CA from PEM-encoded certificate and key.
    pub fn load(ca_cert_pem: &str, ca_key_pem: &str) -> CoreResult<Self> {
        let key = KeyPair::from_pem(ca_key_pem)
            .map_err(|e| CoreError::Dependency(format!("parsing kubelet CA key: {e}")))?;
        let params = CertificateParams::from_ca_cert_pem(ca_cert_pem)
            .map_err(|e| CoreError::Dependency(format!("parsing kubelet CA certificate: {e}")))?;
        let cert = params
            .self_signed(&key)
            .map_err(|e| CoreError::Dependency(format!("rebuilding kubelet CA: {e}")))?;
        Ok(Self { cert, key })
    }

    /// Generates a fresh CA. Used at cluster init and in tests.
    pub fn generate(common_name: &str) -> CoreResult<Self> {
        let key = KeyPair::generate()
            .map_err(|e| CoreError::Dependency(format!("generating kubelet CA key: {e}")))?;
        let mut params = CertificateParams::default();
        params
            .distinguished_name
            .push(DnType::CommonName, common_name);
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::CrlSign,
        ];
        let cert = params
            .self_signed(&key)
            .map_err(|e| CoreError::Dependency(format!("self-signing kubelet CA: {e}")))?;
        Ok(Self { cert, key })
    }

    pub fn cert_pem(&self) -> String {
        self.cert.pem()
    }

    pub fn cert_der(&self) -> Vec<u8> {
        self.cert.der().to_vec()
    }

    pub fn key_pem(&self) -> String {
        self.key.serialize_pem()
    }

    /// Signs a kubelet certificate from a PEM-encoded CSR.
    pub fn sign_csr(&self, csr_pem: &[u8]) -> CoreResult<Vec<u8>> {
        let csr = parse_csr(csr_pem)?;
        let signed = csr
            .signed_by(&self.cert, &self.key)
            .map_err(|e| CoreError::Signing(format!("signing kubelet certificate: {e}")))?;
        Ok(signed.pem().into_bytes())
    }
}

/// Extracts the node name from the subject common name of a PEM-encoded
/// CSR. The `system:node:` prefix is stripped when present.
pub fn node_name_from_csr(csr_pem: &[u8]) -> CoreResult<String> {
    let csr = parse_csr(csr_pem)?;
    let common_name = match csr.params.distinguished_name.get(&DnType::CommonName) {
        Some(DnValue::Utf8String(s)) => s.clone(),
        Some(DnValue::PrintableString(s)) => s.as_str().to_owned(),
        _ => {
            return Err(CoreError::InvalidRequest(
                "certificate request subject has no common name".to_string(),
            ))
        }
    };
    let name = common_name
        .strip_prefix(NODE_NAME_PREFIX)
        .unwrap_or(&common_name);
    if name.is_empty() {
        return Err(CoreError::InvalidRequest(
            "certificate request contains an empty node name".to_string(),
        ));
    }
    Ok(name.to_string())
}

fn parse_csr(csr_pem: &[u8]) -> CoreResult<CertificateSigningRequestParams> {
    let pem = std::str::from_utf8(csr_pem).map_err(|_| {
        CoreError::InvalidRequest("certificate request is not valid UTF-8 PEM".to_string())
    })?;
    CertificateSigningRequestParams::from_pem(pem)
        .map_err(|e| CoreError::InvalidRequest(format!("parsing certificate request: {e}")))
}
