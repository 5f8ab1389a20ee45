// Copyright (c) 2026 Palisade Contributors
// SPDX-License-Identifier: Apache-2.0

//! Recovery orchestration.
//!
//! Walks control-plane recovery endpoints, re-derives each node's
//! state-disk key from the cluster master secret, and pushes it over an
//! attested channel. Unavailable endpoints are retried once and then
//! treated as "nothing left to recover"; transport handshake failures
//! are retried until the node's recovery peer comes up.

use std::net::Ipv4Addr;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tonic::transport::{Channel, Endpoint};
use tonic::{Code, Status};

use palisade_attest::attestation_interceptor;
use palisade_core::kdf::{KeyOracle, SecretDeriver};
use palisade_core::CoreError;
use palisade_protocol::pb::recovery_client::RecoveryClient;
use palisade_protocol::pb::{recover_message, RecoverMessage};
use palisade_protocol::RECOVERY_PORT;

/// A node whose recovery peer is up but whose gRPC transport is still
/// settling reports this in its status message. Such attempts are
/// retried without limit; the peer will come up.
const HANDSHAKE_FAILURE_PATTERN: &str = "authentication handshake failed";

/// An unavailable endpoint is retried this many times before the walk
/// concludes there is nothing left to recover.
const MAX_UNAVAILABLE_RETRIES: usize = 1;

#[derive(Debug, Error)]
pub enum PushError {
    #[error(transparent)]
    Rpc(#[from] Status),

    #[error("recovery protocol violation: {0}")]
    Protocol(String),

    #[error(transparent)]
    Derivation(#[from] CoreError),
}

/// Terminal failure of a recovery walk. Keys already pushed stay
/// pushed; `recovered` reports how many.
#[derive(Debug, Error)]
#[error("recovery failed after {recovered} pushed key(s): {source}")]
pub struct RecoveryRunError {
    pub recovered: usize,
    #[source]
    pub source: PushError,
}

/// One key push to one endpoint. Split behind a trait so the retry
/// logic can be exercised without a network.
#[allow(async_fn_in_trait)]
pub trait RecoveryDoer {
    async fn push(&mut self, endpoint: &str) -> Result<(), PushError>;
}

enum AttemptClass {
    Unavailable,
    TransientHandshake,
    Fatal,
}

fn classify(err: &PushError) -> AttemptClass {
    match err {
        // The handshake pattern only means "not ready yet" on an
        // Unavailable status; any other code is a real failure no
        // matter what the message says.
        PushError::Rpc(status) if status.code() == Code::Unavailable => {
            if status.message().contains(HANDSHAKE_FAILURE_PATTERN) {
                AttemptClass::TransientHandshake
            } else {
                AttemptClass::Unavailable
            }
        }
        _ => AttemptClass::Fatal,
    }
}

pub struct Recoverer<D, A> {
    doer: D,
    advance: A,
    attempt_timeout: Duration,
    cancel: CancellationToken,
}

impl<D, A> Recoverer<D, A>
where
    D: RecoveryDoer,
    A: FnMut(&str) -> Option<String>,
{
    pub fn new(doer: D, advance: A, attempt_timeout: Duration, cancel: CancellationToken) -> Self {
        Self {
            doer,
            advance,
            attempt_timeout,
            cancel,
        }
    }

    /// Walks endpoints starting at `endpoint` until an endpoint stays
    /// unavailable, the advance rule runs out, or the token is
    /// cancelled. `on_pushed` fires after each delivered key. Returns
    /// how many keys were pushed.
    pub async fn run(
        &mut self,
        endpoint: String,
        mut on_pushed: impl FnMut(),
    ) -> Result<usize, RecoveryRunError> {
        let mut recovered = 0usize;
        let mut endpoint = endpoint;
        'walk: loop {
            let mut unavailable_retries = 0usize;
            loop {
                let attempt = tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => {
                        tracing::info!("recovery cancelled");
                        break 'walk;
                    }
                    attempt = tokio::time::timeout(
                        self.attempt_timeout,
                        self.doer.push(&endpoint),
                    ) => attempt,
                };
                match attempt {
                    // A hung attempt is indistinguishable from an
                    // unreachable endpoint.
                    Err(_elapsed) => {
                        tracing::debug!(%endpoint, "attempt timed out");
                        if unavailable_retries < MAX_UNAVAILABLE_RETRIES {
                            unavailable_retries += 1;
                            continue;
                        }
                        break 'walk;
                    }
                    Ok(Ok(())) => {
                        recovered += 1;
                        on_pushed();
                        tracing::info!(%endpoint, "recovery key pushed");
                        break;
                    }
                    Ok(Err(err)) => match classify(&err) {
                        AttemptClass::TransientHandshake => {
                            tracing::debug!(%endpoint, "handshake not ready, retrying");
                            continue;
                        }
                        AttemptClass::Unavailable if unavailable_retries < MAX_UNAVAILABLE_RETRIES => {
                            tracing::debug!(%endpoint, "endpoint unavailable, retrying once");
                            unavailable_retries += 1;
                            continue;
                        }
                        AttemptClass::Unavailable => {
                            tracing::debug!(%endpoint, "endpoint still unavailable, stopping");
                            break 'walk;
                        }
                        AttemptClass::Fatal => {
                            return Err(RecoveryRunError {
                                recovered,
                                source: err,
                            });
                        }
                    },
                }
            }
            match (self.advance)(&endpoint) {
                Some(next) => endpoint = next,
                None => break,
            }
        }
        Ok(recovered)
    }
}

/// Pushes a key over gRPC: opens the stream with the measurement
/// secret, derives the key for whatever disk UUID the peer announces,
/// sends it, and treats a clean stream close as the acknowledgement.
pub struct GrpcRecoveryDoer<O> {
    oracle: O,
    attestation_document: Vec<u8>,
}

impl<O: KeyOracle> GrpcRecoveryDoer<O> {
    pub fn new(oracle: O, attestation_document: Vec<u8>) -> Self {
        Self {
            oracle,
            attestation_document,
        }
    }
}

impl<O: KeyOracle> RecoveryDoer for GrpcRecoveryDoer<O> {
    async fn push(&mut self, endpoint: &str) -> Result<(), PushError> {
        let channel: Channel = Endpoint::from_shared(format!("http://{endpoint}"))
            .map_err(|e| PushError::Protocol(format!("invalid endpoint {endpoint}: {e}")))?
            .connect_lazy();
        let mut client = RecoveryClient::with_interceptor(
            channel,
            attestation_interceptor(self.attestation_document.clone()),
        );

        let deriver = SecretDeriver::new(&self.oracle);
        let (tx, rx) = mpsc::channel(2);
        let sent = tx
            .send(RecoverMessage {
                request: Some(recover_message::Request::MeasurementSecret(
                    deriver.measurement_secret()?,
                )),
            })
            .await;
        if sent.is_err() {
            return Err(PushError::Protocol("request stream closed".to_string()));
        }

        let mut responses = client
            .recover(ReceiverStream::new(rx))
            .await?
            .into_inner();
        let announced = responses.message().await?.ok_or_else(|| {
            PushError::Protocol("peer closed the stream before announcing its disk".to_string())
        })?;

        let state_disk_key = deriver.state_disk_key(&announced.disk_uuid)?;
        tx.send(RecoverMessage {
            request: Some(recover_message::Request::StateDiskKey(state_disk_key)),
        })
        .await
        .map_err(|_| PushError::Protocol("peer went away before taking the key".to_string()))?;
        drop(tx);

        // Drain to the clean close; an error frame is the refusal.
        while responses.message().await?.is_some() {}
        Ok(())
    }
}

/// Walks a control-plane subnet by incrementing the final IPv4 octet.
/// A named endpoint is assumed to be a load balancer and is revisited
/// until it reports unavailable.
pub fn next_sequential_endpoint(endpoint: &str) -> Option<String> {
    let (host, port) = endpoint.rsplit_once(':')?;
    match host.parse::<Ipv4Addr>() {
        Ok(ip) => {
            let [a, b, c, d] = ip.octets();
            if d == u8::MAX {
                return None;
            }
            Some(format!("{}:{port}", Ipv4Addr::new(a, b, c, d + 1)))
        }
        Err(_) => Some(endpoint.to_string()),
    }
}

/// Appends the default recovery port when the operator gave a bare host.
pub fn with_default_port(endpoint: &str) -> String {
    if endpoint.contains(':') {
        endpoint.to_string()
    } else {
        format!("{endpoint}:{RECOVERY_PORT}")
    }
}
