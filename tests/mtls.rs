//! Channel-credential tests: peer chains injected the way the TLS
//! acceptor would attach them to requests.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use rcgen::ExtendedKeyUsagePurpose;

mod common;
use common::*;

const BILLING: &str = "spiffe://mesh.local/ns/prod/sa/billing";

fn whoami_with_peer(peer: TlsPeerInfo) -> Request<Body> {
    Request::builder()
        .uri("/whoami")
        .extension(peer)
        .body(Body::empty())
        .unwrap()
}

fn mtls_app() -> TestApp {
    TestAppBuilder::new(AuthPolicy {
        allow_any: true,
        ..Default::default()
    })
    .allow_principal(BILLING, &["payments.read"])
    .build()
}

#[tokio::test]
async fn test_valid_chain_authenticates() {
    let ca = TestCa::new();
    let app = mtls_app();
    let peer = ca.peer_info(ca.issue_leaf(BILLING));

    let body = expect_json(app.router, whoami_with_peer(peer), StatusCode::OK).await;
    assert_eq!(body["method"], "mtls");
    assert_eq!(body["principal_id"], BILLING);
}

#[tokio::test]
async fn test_chain_from_untrusted_ca_is_unauthorized() {
    let trusted_ca = TestCa::new();
    let rogue_ca = TestCa::new();
    let app = mtls_app();

    // Leaf signed by a different root than the bundle trusts.
    let peer = TlsPeerInfo {
        peer_chain_der: vec![rogue_ca.issue_leaf(BILLING)],
        trust_bundle_pem: trusted_ca.cert_pem.clone(),
    };
    let body = expect_json(app.router, whoami_with_peer(peer), StatusCode::UNAUTHORIZED).await;
    assert_eq!(body["error"], "Unauthorized");
}

#[tokio::test]
async fn test_unknown_principal_is_unauthorized() {
    let ca = TestCa::new();
    let app = mtls_app();
    let peer = ca.peer_info(ca.issue_leaf("spiffe://mesh.local/ns/prod/sa/rogue"));

    expect_json(app.router, whoami_with_peer(peer), StatusCode::UNAUTHORIZED).await;
}

#[tokio::test]
async fn test_leaf_without_client_auth_is_unauthorized() {
    let ca = TestCa::new();
    let app = mtls_app();
    let leaf = ca.issue_leaf_with_ekus(BILLING, &[ExtendedKeyUsagePurpose::ServerAuth]);

    expect_json(
        app.router,
        whoami_with_peer(ca.peer_info(leaf)),
        StatusCode::UNAUTHORIZED,
    )
    .await;
}

#[tokio::test]
async fn test_required_mtls_rejects_plaintext_requests() {
    let app = TestAppBuilder::new(AuthPolicy {
        require_mtls: true,
        ..Default::default()
    })
    .allow_principal(BILLING, &["payments.read"])
    .build();

    // A valid API key cannot substitute for the required channel proof.
    let (_, plaintext) = app.key_store.create("ingest", Default::default(), None);
    let request = Request::builder()
        .uri("/whoami")
        .header("Authorization", format!("Bearer {plaintext}"))
        .body(Body::empty())
        .unwrap();
    expect_json(app.router, request, StatusCode::UNAUTHORIZED).await;
}

#[tokio::test]
async fn test_handshake_without_peer_certificate() {
    let ca = TestCa::new();
    let app = mtls_app();
    let peer = TlsPeerInfo {
        peer_chain_der: vec![],
        trust_bundle_pem: ca.cert_pem.clone(),
    };

    expect_json(app.router, whoami_with_peer(peer), StatusCode::UNAUTHORIZED).await;
}
