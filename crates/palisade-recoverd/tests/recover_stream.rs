// Copyright (c) 2026 Palisade Contributors
// SPDX-License-Identifier: Apache-2.0

//! Recovery exchange over a real gRPC channel.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_stream::wrappers::{ReceiverStream, TcpListenerStream};
use tokio_stream::StreamExt as _;
use tonic::transport::{Channel, Server};
use tonic::{Code, Request, Status};

use palisade_attest::{attestation_interceptor, AttestedGuard, FakeIssuer, FakeValidator};
use palisade_protocol::pb::recovery_client::RecoveryClient;
use palisade_protocol::pb::recovery_server::RecoveryServer;
use palisade_protocol::pb::{recover_message, RecoverMessage};
use palisade_recoverd::server::{serve_until_recovered, RecoveryPeer};

const CLUSTER_ID: &str = "recovery-itest";
const DISK_UUID: &str = "9c1f7a2e-3d4b-4f60-8a11-2b3c4d5e6f70";

type AttestedRecoveryClient = RecoveryClient<
    tonic::service::interceptor::InterceptedService<
        Channel,
        Box<dyn FnMut(Request<()>) -> Result<Request<()>, Status> + Send>,
    >,
>;

async fn start_peer() -> (RecoveryPeer, Channel) {
    let peer = RecoveryPeer::new(DISK_UUID);
    let guard = AttestedGuard::new(Arc::new(FakeValidator::new(CLUSTER_ID)));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let service = peer.clone();
    tokio::spawn(
        Server::builder()
            .add_service(RecoveryServer::with_interceptor(service, guard))
            .serve_with_incoming(TcpListenerStream::new(listener)),
    );

    let channel = Channel::from_shared(format!("http://{addr}"))
        .unwrap()
        .connect()
        .await
        .unwrap();
    (peer, channel)
}

fn attested_client(channel: Channel) -> AttestedRecoveryClient {
    RecoveryClient::with_interceptor(
        channel,
        Box::new(attestation_interceptor(
            FakeIssuer::new(CLUSTER_ID).issue(),
        )),
    )
}

/// Runs the full pusher side of the exchange and returns the UUID the
/// peer announced.
async fn push_key(
    client: &mut AttestedRecoveryClient,
    measurement_secret: Vec<u8>,
    state_disk_key: Vec<u8>,
) -> Result<String, Status> {
    let (tx, rx) = mpsc::channel(2);
    tx.send(RecoverMessage {
        request: Some(recover_message::Request::MeasurementSecret(
            measurement_secret,
        )),
    })
    .await
    .unwrap();

    let mut responses = client.recover(ReceiverStream::new(rx)).await?.into_inner();
    let announced = responses
        .next()
        .await
        .ok_or_else(|| Status::aborted("peer closed before announcing its disk"))??;

    tx.send(RecoverMessage {
        request: Some(recover_message::Request::StateDiskKey(state_disk_key)),
    })
    .await
    .unwrap();
    drop(tx);

    // Clean close is the acknowledgement; an error frame is a refusal.
    while let Some(frame) = responses.next().await {
        frame?;
    }
    Ok(announced.disk_uuid)
}

#[tokio::test]
async fn key_push_is_acknowledged_and_delivered() {
    let (peer, channel) = start_peer().await;
    let mut client = attested_client(channel);

    let uuid = push_key(&mut client, vec![1u8; 32], vec![2u8; 32])
        .await
        .unwrap();
    assert_eq!(uuid, DISK_UUID);

    let keys = peer.recovered().await;
    assert_eq!(keys.measurement_secret, vec![1u8; 32]);
    assert_eq!(keys.state_disk_key, vec![2u8; 32]);
}

#[tokio::test]
async fn repeat_push_of_the_same_key_is_acknowledged() {
    let (_peer, channel) = start_peer().await;
    let mut client = attested_client(channel);

    push_key(&mut client, vec![1u8; 32], vec![2u8; 32])
        .await
        .unwrap();
    push_key(&mut client, vec![1u8; 32], vec![2u8; 32])
        .await
        .unwrap();
}

#[tokio::test]
async fn conflicting_key_is_refused() {
    let (_peer, channel) = start_peer().await;
    let mut client = attested_client(channel);

    push_key(&mut client, vec![1u8; 32], vec![2u8; 32])
        .await
        .unwrap();
    let err = push_key(&mut client, vec![1u8; 32], vec![3u8; 32])
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::FailedPrecondition);
}

#[tokio::test]
async fn out_of_order_stream_is_invalid() {
    let (_peer, channel) = start_peer().await;
    let mut client = attested_client(channel);

    let (tx, rx) = mpsc::channel(2);
    tx.send(RecoverMessage {
        request: Some(recover_message::Request::StateDiskKey(vec![2u8; 32])),
    })
    .await
    .unwrap();
    drop(tx);

    let err = client.recover(ReceiverStream::new(rx)).await.unwrap_err();
    assert_eq!(err.code(), Code::InvalidArgument);
}

#[tokio::test]
async fn short_key_is_invalid() {
    let (_peer, channel) = start_peer().await;
    let mut client = attested_client(channel);

    let err = push_key(&mut client, vec![1u8; 32], vec![2u8; 7])
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::InvalidArgument);
}

#[tokio::test]
async fn unattested_push_is_refused() {
    let (_peer, channel) = start_peer().await;
    let mut client = RecoveryClient::new(channel);

    let (tx, rx) = mpsc::channel(2);
    tx.send(RecoverMessage {
        request: Some(recover_message::Request::MeasurementSecret(vec![1u8; 32])),
    })
    .await
    .unwrap();
    drop(tx);

    let err = client.recover(ReceiverStream::new(rx)).await.unwrap_err();
    assert_eq!(err.code(), Code::Unauthenticated);
}

#[tokio::test]
async fn serve_until_recovered_returns_the_delivered_keys() {
    let peer = RecoveryPeer::new(DISK_UUID);
    let guard = AttestedGuard::new(Arc::new(FakeValidator::new(CLUSTER_ID)));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let serving = tokio::spawn(serve_until_recovered(listener, guard, peer));

    let channel = Channel::from_shared(format!("http://{addr}"))
        .unwrap()
        .connect()
        .await
        .unwrap();
    let mut client = attested_client(channel);
    push_key(&mut client, vec![5u8; 32], vec![6u8; 32])
        .await
        .unwrap();

    let keys = serving.await.unwrap().unwrap();
    assert_eq!(keys.state_disk_key, vec![6u8; 32]);
}
