// Copyright (c) 2026 Palisade Contributors
// SPDX-License-Identifier: Apache-2.0

//! gRPC surface of the join service.
//!
//! A ticket is assembled in a fixed order: derive secrets, sign the SSH
//! host certificate, sign the kubelet certificate, collect cluster
//! state, mint the bootstrap token, and only then register the node.
//! Registration is the single mutating step; any earlier failure leaves
//! the cluster untouched.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use tonic::{Request, Response, Status};

use palisade_core::kdf::{KeyOracle, SecretDeriver};
use palisade_core::kubelet::{node_name_from_csr, KubeletCa};
use palisade_core::ssh::EmergencySshCa;
use palisade_core::{CoreError, CoreResult};
use palisade_protocol::pb;
use palisade_protocol::pb::join_service_server::JoinService;

use crate::kubernetes::{unix_now, ClusterBackend, JoiningNodeRecord};
use crate::token::JoinTokenSource;

/// Control-plane credentials shipped to a joining control-plane node,
/// relative to the control-plane files directory.
const CONTROL_PLANE_FILES: &[&str] = &[
    "ca.crt",
    "ca.key",
    "sa.key",
    "sa.pub",
    "front-proxy-ca.crt",
    "front-proxy-ca.key",
    "etcd/ca.crt",
    "etcd/ca.key",
];

/// Capability for signing kubelet certificates. Split from [`KubeletCa`]
/// so tests can substitute a deterministic signer.
pub trait CertificateAuthority: Send + Sync {
    fn sign_kubelet_csr(&self, csr_pem: &[u8]) -> CoreResult<Vec<u8>>;
    fn ca_cert_der(&self) -> Vec<u8>;
}

impl CertificateAuthority for KubeletCa {
    fn sign_kubelet_csr(&self, csr_pem: &[u8]) -> CoreResult<Vec<u8>> {
        self.sign_csr(csr_pem)
    }

    fn ca_cert_der(&self) -> Vec<u8> {
        self.cert_der()
    }
}

pub struct JoinServer {
    oracle: Arc<dyn KeyOracle>,
    measurement_salt: Vec<u8>,
    ca: Arc<dyn CertificateAuthority>,
    tokens: Arc<dyn JoinTokenSource>,
    cluster: Arc<dyn ClusterBackend>,
    additional_principals_path: PathBuf,
    control_plane_files_dir: PathBuf,
}

impl JoinServer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        oracle: Arc<dyn KeyOracle>,
        measurement_salt: Vec<u8>,
        ca: Arc<dyn CertificateAuthority>,
        tokens: Arc<dyn JoinTokenSource>,
        cluster: Arc<dyn ClusterBackend>,
        additional_principals_path: PathBuf,
        control_plane_files_dir: PathBuf,
    ) -> Self {
        Self {
            oracle,
            measurement_salt,
            ca,
            tokens,
            cluster,
            additional_principals_path,
            control_plane_files_dir,
        }
    }

    /// Principals from the request plus the operator-maintained file.
    /// The file is re-read per request so principal changes take effect
    /// without a restart.
    fn host_certificate_principals(&self, from_request: &[String]) -> Vec<String> {
        let mut principals: Vec<String> = from_request
            .iter()
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect();
        match fs::read_to_string(&self.additional_principals_path) {
            Ok(raw) => {
                for principal in raw.split([',', '\n', '\r']) {
                    let principal = principal.trim();
                    if !principal.is_empty() && !principals.iter().any(|p| p == principal) {
                        principals.push(principal.to_string());
                    }
                }
            }
            Err(err) => {
                tracing::warn!(
                    path = %self.additional_principals_path.display(),
                    error = %err,
                    "could not read additional principals file, issuing without it"
                );
            }
        }
        principals
    }

    fn control_plane_files(&self) -> CoreResult<Vec<pb::ControlPlaneCertOrKey>> {
        let mut files = Vec::with_capacity(CONTROL_PLANE_FILES.len());
        for name in CONTROL_PLANE_FILES {
            let data = fs::read(self.control_plane_files_dir.join(name)).map_err(|e| {
                CoreError::Dependency(format!("reading control-plane file {name}: {e}"))
            })?;
            files.push(pb::ControlPlaneCertOrKey {
                name: (*name).to_string(),
                data,
            });
        }
        Ok(files)
    }
}

fn to_status(err: CoreError) -> Status {
    match err {
        CoreError::InvalidRequest(msg) => Status::invalid_argument(msg),
        other => Status::internal(other.to_string()),
    }
}

#[tonic::async_trait]
impl JoinService for JoinServer {
    async fn issue_join_ticket(
        &self,
        request: Request<pb::IssueJoinTicketRequest>,
    ) -> Result<Response<pb::IssueJoinTicketResponse>, Status> {
        let req = request.into_inner();
        tracing::info!(is_control_plane = req.is_control_plane, "join ticket requested");

        if req.certificate_request.is_empty() {
            return Err(Status::invalid_argument("certificate request is missing"));
        }
        if req.host_public_key.is_empty() {
            return Err(Status::invalid_argument("host public key is missing"));
        }

        let deriver = SecretDeriver::new(self.oracle.as_ref());
        let measurement_secret = deriver.measurement_secret().map_err(to_status)?;
        let state_disk_key = deriver.state_disk_key(&req.disk_uuid).map_err(to_status)?;

        let ssh_ca = EmergencySshCa::from_seed(&deriver.ssh_ca_seed().map_err(to_status)?);
        let authorized_ca_public_key = ssh_ca.authorized_public_key().map_err(to_status)?;
        let principals = self.host_certificate_principals(&req.host_certificate_principals);
        let host_certificate = ssh_ca
            .issue_host_certificate(&principals, &req.host_public_key)
            .map_err(to_status)?;
        tracing::debug!(principals = principals.len(), "issued SSH host certificate");

        let node_name = node_name_from_csr(&req.certificate_request).map_err(to_status)?;
        let kubelet_cert = self
            .ca
            .sign_kubelet_csr(&req.certificate_request)
            .map_err(to_status)?;
        tracing::debug!(node = %node_name, "signed kubelet certificate");

        let components_ref = self.cluster.components_ref().map_err(to_status)?;
        let bundle = self.cluster.components(&components_ref).map_err(to_status)?;

        let control_plane_files = if req.is_control_plane {
            self.control_plane_files().map_err(to_status)?
        } else {
            Vec::new()
        };

        let token = self
            .tokens
            .bootstrap_token(&self.ca.ca_cert_der())
            .map_err(to_status)?;

        // Last mutating step. Everything above is side-effect free, so a
        // failure here fails the whole ticket without partial state.
        self.cluster
            .register_joining_node(&JoiningNodeRecord {
                name: node_name.clone(),
                components_ref,
                is_control_plane: req.is_control_plane,
                registered_at_unix: unix_now(),
            })
            .map_err(to_status)?;
        tracing::info!(node = %node_name, "issued join ticket");

        Ok(Response::new(pb::IssueJoinTicketResponse {
            state_disk_key,
            measurement_salt: self.measurement_salt.clone(),
            measurement_secret,
            kubelet_cert,
            api_server_endpoint: token.api_server_endpoint,
            token: token.token,
            discovery_token_ca_cert_hash: token.ca_cert_hash,
            control_plane_files,
            kubernetes_version: bundle.kubernetes_version,
            kubernetes_components: bundle.components.iter().map(|c| c.to_proto()).collect(),
            authorized_ca_public_key,
            host_certificate,
        }))
    }

    async fn issue_rejoin_ticket(
        &self,
        request: Request<pb::IssueRejoinTicketRequest>,
    ) -> Result<Response<pb::IssueRejoinTicketResponse>, Status> {
        let req = request.into_inner();
        tracing::info!("rejoin ticket requested");

        let deriver = SecretDeriver::new(self.oracle.as_ref());
        let state_disk_key = deriver.state_disk_key(&req.disk_uuid).map_err(to_status)?;
        let measurement_secret = deriver.measurement_secret().map_err(to_status)?;

        Ok(Response::new(pb::IssueRejoinTicketResponse {
            state_disk_key,
            measurement_secret,
        }))
    }
}
