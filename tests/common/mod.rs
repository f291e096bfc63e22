//! Test utilities and fixtures for Meshguard integration tests

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, Response, StatusCode};
use axum::Router;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use http_body_util::BodyExt;
use jwt_simple::prelude::{Claims, Ed25519KeyPair, EdDSAKeyPairLike};
use rcgen::string::Ia5String;
use rcgen::{
    BasicConstraints, CertificateParams, DnType, ExtendedKeyUsagePurpose, IsCa, Issuer, KeyPair,
    KeyUsagePurpose, SanType,
};
use serde_json::Value;
use tower::ServiceExt;

pub use meshguard::authorizer::RoleAuthorizer;
pub use meshguard::certstore::CertificateStore;
pub use meshguard::config::{AuthPolicy, TrustedIssuer};
pub use meshguard::context::{AuthContext, AuthMethod};
pub use meshguard::error::AuthError;
pub use meshguard::handlers;
pub use meshguard::keystore::KeyStore;
pub use meshguard::metrics;
pub use meshguard::middleware::AppState;
pub use meshguard::resilience::{CircuitBreaker, RetryPolicy};
pub use meshguard::resolvers::oidc::JwksCache;
pub use meshguard::resolvers::{
    ApiKeyResolver, CombinedResolver, JwtResolver, MtlsResolver, OidcResolver, RequestCredentials,
    TlsPeerInfo,
};
pub use meshguard::tasks;

use meshguard::metrics::MetricsRecorder;
use meshguard::resolvers::jwt::ServiceTokenClaims;

/// Recorder that counts authentication decision events.
#[derive(Default)]
pub struct CountingRecorder {
    auth_requests: AtomicUsize,
    auth_errors: AtomicUsize,
}

impl CountingRecorder {
    pub fn auth_requests(&self) -> usize {
        self.auth_requests.load(Ordering::SeqCst)
    }

    pub fn auth_errors(&self) -> usize {
        self.auth_errors.load(Ordering::SeqCst)
    }
}

impl MetricsRecorder for CountingRecorder {
    fn auth_request(&self, _method: &str, _result: &str) {
        self.auth_requests.fetch_add(1, Ordering::SeqCst);
    }

    fn auth_error(&self, _method: &str, _reason: &str) {
        self.auth_errors.fetch_add(1, Ordering::SeqCst);
    }

    fn circuit_breaker_state(&self, _name: &str, _state: &str) {}

    fn cert_expiry_seconds(&self, _kind: &str, _seconds: i64) {}
}

/// Self-signed CA that can mint workload leaf certificates.
pub struct TestCa {
    pub cert_pem: String,
    key: KeyPair,
}

impl TestCa {
    pub fn new() -> Self {
        let mut params = CertificateParams::new(vec![]).unwrap();
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params
            .distinguished_name
            .push(DnType::CommonName, "test-root");
        params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];
        let key = KeyPair::generate().unwrap();
        let cert = params.self_signed(&key).unwrap();
        Self {
            cert_pem: cert.pem(),
            key,
        }
    }

    /// Leaf certificate (DER) for a SPIFFE workload identity.
    pub fn issue_leaf(&self, spiffe: &str) -> Vec<u8> {
        self.issue_leaf_with_ekus(
            spiffe,
            &[
                ExtendedKeyUsagePurpose::ClientAuth,
                ExtendedKeyUsagePurpose::ServerAuth,
            ],
        )
    }

    pub fn issue_leaf_with_ekus(&self, spiffe: &str, ekus: &[ExtendedKeyUsagePurpose]) -> Vec<u8> {
        let mut params = CertificateParams::new(vec![]).unwrap();
        params
            .distinguished_name
            .push(DnType::CommonName, "workload");
        params.subject_alt_names = vec![SanType::URI(Ia5String::try_from(spiffe).unwrap())];
        params.extended_key_usages = ekus.to_vec();
        let key = KeyPair::generate().unwrap();
        let issuer = Issuer::from_ca_cert_pem(&self.cert_pem, &self.key).unwrap();
        let cert = params.signed_by(&key, &issuer).unwrap();
        cert.der().to_vec()
    }

    pub fn peer_info(&self, leaf_der: Vec<u8>) -> TlsPeerInfo {
        TlsPeerInfo {
            peer_chain_der: vec![leaf_der],
            trust_bundle_pem: self.cert_pem.clone(),
        }
    }
}

/// Self-signed leaf PEM pair that passes certificate-store validation
/// (DigitalSignature usage plus ServerAuth and ClientAuth EKUs).
pub fn storable_leaf_pem(lifetime_secs: i64) -> (String, String) {
    let mut params = CertificateParams::new(vec![]).unwrap();
    params
        .distinguished_name
        .push(DnType::CommonName, "test-workload");
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.key_usages = vec![
        KeyUsagePurpose::DigitalSignature,
        KeyUsagePurpose::KeyEncipherment,
    ];
    params.extended_key_usages = vec![
        ExtendedKeyUsagePurpose::ServerAuth,
        ExtendedKeyUsagePurpose::ClientAuth,
    ];
    let not_before = time::OffsetDateTime::now_utc() - time::Duration::seconds(60);
    params.not_before = not_before;
    params.not_after = not_before + time::Duration::seconds(lifetime_secs);
    let key = KeyPair::generate().unwrap();
    let cert = params.self_signed(&key).unwrap();
    (cert.pem(), key.serialize_pem())
}

pub fn service_signing_key() -> Ed25519KeyPair {
    Ed25519KeyPair::generate()
}

pub fn service_public_key_b64(key_pair: &Ed25519KeyPair) -> String {
    BASE64.encode(key_pair.public_key().to_bytes())
}

/// Mint a signed first-party service token.
pub fn mint_service_token(key_pair: &Ed25519KeyPair, service_id: &str, roles: &[&str]) -> String {
    let claims = Claims::with_custom_claims(
        ServiceTokenClaims {
            service_id: service_id.to_string(),
            roles: roles.iter().map(|r| r.to_string()).collect(),
        },
        jwt_simple::prelude::Duration::from_hours(1),
    );
    key_pair.sign(claims).unwrap()
}

/// Retry policy with short delays so failure tests stay fast.
pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_retries: 1,
        base_delay: Duration::from_millis(5),
        max_delay: Duration::from_millis(10),
        jitter_fraction: 0.0,
    }
}

pub struct TestApp {
    pub router: Router,
    pub key_store: Arc<KeyStore>,
    pub cert_store: Arc<CertificateStore>,
}

pub struct TestAppBuilder {
    policy: AuthPolicy,
    mtls_principals: HashSet<String>,
    mtls_roles: HashMap<String, HashSet<String>>,
    service_key_b64: Option<String>,
    issuers: Vec<TrustedIssuer>,
    bypass_paths: HashSet<String>,
    metrics: Option<Arc<dyn MetricsRecorder>>,
}

impl TestAppBuilder {
    pub fn new(policy: AuthPolicy) -> Self {
        Self {
            policy,
            mtls_principals: HashSet::new(),
            mtls_roles: HashMap::new(),
            service_key_b64: None,
            issuers: Vec::new(),
            bypass_paths: ["/health".to_string()].into_iter().collect(),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, recorder: Arc<dyn MetricsRecorder>) -> Self {
        self.metrics = Some(recorder);
        self
    }

    pub fn allow_principal(mut self, spiffe: &str, roles: &[&str]) -> Self {
        self.mtls_principals.insert(spiffe.to_string());
        self.mtls_roles.insert(
            spiffe.to_string(),
            roles.iter().map(|r| r.to_string()).collect(),
        );
        self
    }

    pub fn with_service_key(mut self, key_pair: &Ed25519KeyPair) -> Self {
        self.service_key_b64 = Some(service_public_key_b64(key_pair));
        self
    }

    pub fn with_issuer(mut self, issuer: TrustedIssuer) -> Self {
        self.issuers.push(issuer);
        self
    }

    pub fn build(self) -> TestApp {
        let key_store = Arc::new(KeyStore::new());
        let cert_store = Arc::new(CertificateStore::new(0.8));

        let mut resolver = CombinedResolver::new(self.policy)
            .with_api_key(ApiKeyResolver::new(key_store.clone()));

        if !self.mtls_principals.is_empty() {
            resolver = resolver.with_mtls(MtlsResolver::new(
                self.mtls_principals,
                self.mtls_roles,
            ));
        }

        if let Some(key_b64) = &self.service_key_b64 {
            resolver = resolver.with_jwt(JwtResolver::from_config(key_b64, "EdDSA").unwrap());
        }

        if !self.issuers.is_empty() {
            let cache = Arc::new(
                JwksCache::new(Duration::from_secs(3600), Duration::from_secs(2)).unwrap(),
            );
            let breaker = Arc::new(CircuitBreaker::new(
                "jwks",
                5,
                Duration::from_secs(30),
                metrics::noop(),
            ));
            resolver = resolver.with_oidc(OidcResolver::new(
                self.issuers,
                cache,
                breaker,
                fast_retry(),
                Duration::from_secs(2),
            ));
        }

        let state = AppState {
            resolver: Arc::new(resolver),
            authorizer: RoleAuthorizer,
            cert_store: cert_store.clone(),
            key_store: key_store.clone(),
            bypass_paths: Arc::new(self.bypass_paths),
            metrics: self.metrics.unwrap_or_else(metrics::noop),
        };

        TestApp {
            router: handlers::router(state),
            key_store,
            cert_store,
        }
    }
}

/// Default setup: allow-any policy with API keys and a service JWT key.
pub fn default_app(service_key: &Ed25519KeyPair) -> TestApp {
    TestAppBuilder::new(AuthPolicy {
        allow_any: true,
        ..Default::default()
    })
    .with_service_key(service_key)
    .build()
}

pub async fn send(router: Router, request: Request<Body>) -> Response<Body> {
    router.oneshot(request).await.unwrap()
}

pub async fn body_json(response: Response<Body>) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

pub async fn expect_json(router: Router, request: Request<Body>, status: StatusCode) -> Value {
    let response = send(router, request).await;
    assert_eq!(response.status(), status);
    body_json(response).await
}
