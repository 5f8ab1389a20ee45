// Copyright (c) 2026 Palisade Contributors
// SPDX-License-Identifier: Apache-2.0

//! Recovery walk against a live recovery peer.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use palisade_attest::{AttestedGuard, FakeIssuer, FakeValidator};
use palisade_core::kdf::{MasterSecret, MasterSecretOracle, SecretDeriver};
use palisade_recoverd::server::{serve_until_recovered, RecoveryPeer};
use palisadectl::recover::{GrpcRecoveryDoer, Recoverer};

const CLUSTER_ID: &str = "ctl-e2e";
const DISK_UUID: &str = "0b4f2a9d-6c3e-45f1-b7a8-1c2d3e4f5a6b";

fn oracle() -> MasterSecretOracle {
    MasterSecretOracle::new(MasterSecret {
        key: vec![23u8; 32],
        salt: vec![29u8; 32],
    })
    .unwrap()
}

fn recoverer_for(
    document: Vec<u8>,
) -> Recoverer<GrpcRecoveryDoer<MasterSecretOracle>, fn(&str) -> Option<String>> {
    fn stop(_: &str) -> Option<String> {
        None
    }
    Recoverer::new(
        GrpcRecoveryDoer::new(oracle(), document),
        stop as fn(&str) -> Option<String>,
        Duration::from_secs(10),
        CancellationToken::new(),
    )
}

#[tokio::test]
async fn pushed_key_matches_the_peer_disk_uuid() {
    let peer = RecoveryPeer::new(DISK_UUID);
    let guard = AttestedGuard::new(Arc::new(FakeValidator::new(CLUSTER_ID)));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let serving = tokio::spawn(serve_until_recovered(listener, guard, peer));

    let mut recoverer = recoverer_for(FakeIssuer::new(CLUSTER_ID).issue());
    let recovered = recoverer.run(addr.to_string(), || {}).await.unwrap();
    assert_eq!(recovered, 1);

    let keys = serving.await.unwrap().unwrap();
    let o = oracle();
    let expected = SecretDeriver::new(&o).state_disk_key(DISK_UUID).unwrap();
    assert_eq!(keys.state_disk_key, expected);
    assert_eq!(
        keys.measurement_secret,
        SecretDeriver::new(&o).measurement_secret().unwrap()
    );
}

#[tokio::test]
async fn closed_port_means_nothing_to_recover() {
    // Bind and drop to get a port that refuses connections.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let mut recoverer = recoverer_for(FakeIssuer::new(CLUSTER_ID).issue());
    let recovered = recoverer.run(addr.to_string(), || {}).await.unwrap();
    assert_eq!(recovered, 0);
}

#[tokio::test]
async fn wrong_attestation_document_is_fatal() {
    let peer = RecoveryPeer::new(DISK_UUID);
    let guard = AttestedGuard::new(Arc::new(FakeValidator::new(CLUSTER_ID)));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(serve_until_recovered(listener, guard, peer));

    let mut recoverer = recoverer_for(FakeIssuer::new("someone-else").issue());
    let err = recoverer.run(addr.to_string(), || {}).await.unwrap_err();
    assert_eq!(err.recovered, 0);
}
