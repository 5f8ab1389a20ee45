// Copyright (c) 2026 Palisade Contributors
// SPDX-License-Identifier: Apache-2.0

//! Recovery stream handling.
//!
//! The exchange is strictly ordered: the pusher opens with its
//! measurement secret, the peer answers with the UUID of the locked
//! disk, the pusher derives and sends the matching state-disk key, and
//! the peer closes the stream cleanly as the acknowledgement. A repeat
//! delivery of the same key is acknowledged again; a different key for
//! the same disk is refused.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, Notify};
use tokio_stream::wrappers::{ReceiverStream, TcpListenerStream};
use tonic::{Request, Response, Status, Streaming};

use palisade_attest::AttestedGuard;
use palisade_core::kdf::{DERIVED_KEY_LENGTH, STATE_DISK_KEY_LENGTH};
use palisade_protocol::pb::recovery_server::{Recovery, RecoveryServer};
use palisade_protocol::pb::{recover_message, RecoverMessage, RecoverResponse};

/// Key material delivered by a successful recovery push.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveredKeys {
    pub measurement_secret: Vec<u8>,
    pub state_disk_key: Vec<u8>,
}

struct PeerInner {
    disk_uuid: String,
    delivered: Mutex<Option<RecoveredKeys>>,
    done: Notify,
}

/// One recovery peer for one locked disk. Cloning shares the peer; any
/// clone can serve streams while another waits on [`RecoveryPeer::recovered`].
#[derive(Clone)]
pub struct RecoveryPeer {
    inner: Arc<PeerInner>,
}

impl RecoveryPeer {
    pub fn new(disk_uuid: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(PeerInner {
                disk_uuid: disk_uuid.into(),
                delivered: Mutex::new(None),
                done: Notify::new(),
            }),
        }
    }

    pub fn disk_uuid(&self) -> &str {
        &self.inner.disk_uuid
    }

    /// Records a delivered key. Idempotent for the same key; a
    /// conflicting key for the same disk is refused.
    fn accept_delivery(&self, keys: RecoveredKeys) -> Result<(), Status> {
        let mut delivered = self.inner.delivered.lock();
        match delivered.as_ref() {
            None => {
                *delivered = Some(keys);
                self.inner.done.notify_waiters();
                tracing::info!("state disk key delivered");
                Ok(())
            }
            Some(existing) if *existing == keys => {
                tracing::debug!("repeat delivery of the same key acknowledged");
                Ok(())
            }
            Some(_) => Err(Status::failed_precondition(
                "a different key was already delivered for this disk",
            )),
        }
    }

    /// Resolves once a key has been delivered.
    pub async fn recovered(&self) -> RecoveredKeys {
        loop {
            let notified = self.inner.done.notified();
            if let Some(keys) = self.inner.delivered.lock().clone() {
                return keys;
            }
            notified.await;
        }
    }
}

#[tonic::async_trait]
impl Recovery for RecoveryPeer {
    type RecoverStream = ReceiverStream<Result<RecoverResponse, Status>>;

    async fn recover(
        &self,
        request: Request<Streaming<RecoverMessage>>,
    ) -> Result<Response<Self::RecoverStream>, Status> {
        let mut stream = request.into_inner();

        let first = stream.message().await?.ok_or_else(|| {
            Status::invalid_argument("stream closed before the measurement secret")
        })?;
        let Some(recover_message::Request::MeasurementSecret(measurement_secret)) = first.request
        else {
            return Err(Status::invalid_argument(
                "first message must be the measurement secret",
            ));
        };
        if measurement_secret.len() != DERIVED_KEY_LENGTH {
            return Err(Status::invalid_argument(format!(
                "measurement secret must be {DERIVED_KEY_LENGTH} bytes"
            )));
        }

        let (tx, rx) = mpsc::channel(2);
        if tx
            .send(Ok(RecoverResponse {
                disk_uuid: self.inner.disk_uuid.clone(),
            }))
            .await
            .is_err()
        {
            return Err(Status::aborted("pusher went away"));
        }

        let peer = self.clone();
        tokio::spawn(async move {
            let outcome = async {
                let second = stream.message().await?.ok_or_else(|| {
                    Status::invalid_argument("stream closed before the state disk key")
                })?;
                let Some(recover_message::Request::StateDiskKey(state_disk_key)) = second.request
                else {
                    return Err(Status::invalid_argument(
                        "second message must be the state disk key",
                    ));
                };
                if state_disk_key.len() != STATE_DISK_KEY_LENGTH {
                    return Err(Status::invalid_argument(format!(
                        "state disk key must be {STATE_DISK_KEY_LENGTH} bytes"
                    )));
                }
                peer.accept_delivery(RecoveredKeys {
                    measurement_secret,
                    state_disk_key,
                })
            }
            .await;

            // On success tx is dropped and the clean close acknowledges
            // the delivery to the pusher.
            if let Err(status) = outcome {
                tracing::warn!(code = ?status.code(), "recovery stream refused");
                let _ = tx.send(Err(status)).await;
            }
        });

        Ok(Response::new(ReceiverStream::new(rx)))
    }
}

/// Serves recovery streams on `listener` until a key is delivered, then
/// drains in-flight streams and returns the delivered keys.
pub async fn serve_until_recovered(
    listener: tokio::net::TcpListener,
    guard: AttestedGuard,
    peer: RecoveryPeer,
) -> Result<RecoveredKeys, tonic::transport::Error> {
    let shutdown = peer.clone();
    tonic::transport::Server::builder()
        .add_service(RecoveryServer::with_interceptor(peer.clone(), guard))
        .serve_with_incoming_shutdown(TcpListenerStream::new(listener), async move {
            shutdown.recovered().await;
        })
        .await?;
    Ok(peer.recovered().await)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(fill: u8) -> RecoveredKeys {
        RecoveredKeys {
            measurement_secret: vec![fill; DERIVED_KEY_LENGTH],
            state_disk_key: vec![fill; STATE_DISK_KEY_LENGTH],
        }
    }

    #[test]
    fn first_delivery_is_accepted() {
        let peer = RecoveryPeer::new("disk-a");
        peer.accept_delivery(keys(1)).unwrap();
    }

    #[test]
    fn repeat_delivery_of_the_same_key_is_idempotent() {
        let peer = RecoveryPeer::new("disk-a");
        peer.accept_delivery(keys(1)).unwrap();
        peer.accept_delivery(keys(1)).unwrap();
    }

    #[test]
    fn conflicting_delivery_is_refused() {
        let peer = RecoveryPeer::new("disk-a");
        peer.accept_delivery(keys(1)).unwrap();
        let err = peer.accept_delivery(keys(2)).unwrap_err();
        assert_eq!(err.code(), tonic::Code::FailedPrecondition);
    }

    #[tokio::test]
    async fn recovered_resolves_after_delivery() {
        let peer = RecoveryPeer::new("disk-a");
        let waiter = {
            let peer = peer.clone();
            tokio::spawn(async move { peer.recovered().await })
        };
        tokio::task::yield_now().await;
        peer.accept_delivery(keys(3)).unwrap();
        assert_eq!(waiter.await.unwrap(), keys(3));
    }

    #[tokio::test]
    async fn recovered_resolves_immediately_when_already_delivered() {
        let peer = RecoveryPeer::new("disk-a");
        peer.accept_delivery(keys(4)).unwrap();
        assert_eq!(peer.recovered().await, keys(4));
    }
}
