use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use meshguard::authorizer::RoleAuthorizer;
use meshguard::certstore::CertificateStore;
use meshguard::config::Config;
use meshguard::handlers;
use meshguard::keystore::KeyStore;
use meshguard::metrics::{LogRecorder, MetricsRecorder};
use meshguard::middleware::AppState;
use meshguard::resilience::{CircuitBreaker, RetryPolicy};
use meshguard::resolvers::oidc::JwksCache;
use meshguard::resolvers::{
    ApiKeyResolver, CombinedResolver, JwtResolver, MtlsResolver, OidcResolver,
};
use meshguard::tasks::{FileMaterialLoader, JwksRefreshTask, MaterialLoader, RotationTask};

#[derive(Parser, Debug)]
#[command(name = "meshguard")]
#[command(about = "Workload authentication and authorization sidecar for zero-trust meshes")]
struct Cli {
    /// Provision a dev API key at startup and print it (dev mode only)
    #[arg(long)]
    seed: bool,
}

fn seed_dev_key(key_store: &KeyStore) {
    if !key_store.is_empty() {
        tracing::info!("Key store already has entries, skipping seed");
        return;
    }

    let roles: HashSet<String> = ["service".to_string(), "admin".to_string()]
        .into_iter()
        .collect();
    let (record, plaintext) = key_store.create("dev-key", roles, None);

    tracing::info!("============================================");
    tracing::info!("DEV API KEY PROVISIONED");
    tracing::info!("Key ID: {}", record.id);
    tracing::info!("API Key: {}", plaintext);
    tracing::info!("============================================");
    tracing::info!("SAVE THIS KEY - IT WILL NOT BE SHOWN AGAIN");
    tracing::info!("============================================");
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "meshguard=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();

    if config.dev_mode {
        tracing::info!("Running in DEVELOPMENT mode");
    }

    let metrics: Arc<dyn MetricsRecorder> = Arc::new(LogRecorder);

    // Certificate lifecycle
    let cert_store = Arc::new(CertificateStore::new(config.rotation_threshold));
    let loader: Option<Arc<dyn MaterialLoader>> = match (
        &config.cert_path,
        &config.key_path,
        &config.trust_bundle_path,
    ) {
        (Some(cert), Some(key), Some(bundle)) => Some(Arc::new(FileMaterialLoader::new(
            PathBuf::from(cert),
            PathBuf::from(key),
            PathBuf::from(bundle),
        ))),
        _ => None,
    };
    if let Some(loader) = &loader {
        let material = loader
            .load()
            .expect("Failed to load certificate material at startup");
        cert_store
            .store(
                &material.leaf_pem,
                &material.key_pem,
                &material.trust_bundle_pem,
            )
            .expect("Startup certificate material failed validation");
        tracing::info!("Certificate material loaded");
    } else if config.policy.require_mtls {
        tracing::warn!(
            "mTLS is required but CERT_PATH/KEY_PATH/TRUST_BUNDLE_PATH are not all set"
        );
    }

    // Key store
    let key_store = Arc::new(KeyStore::new());
    if cli.seed {
        if !config.dev_mode {
            tracing::warn!("--seed flag ignored: not in dev mode (set MESHGUARD_ENV=dev)");
        } else {
            seed_dev_key(&key_store);
        }
    }

    // Resilience around identity-provider calls
    let breaker = Arc::new(CircuitBreaker::new(
        "jwks",
        config.breaker_failure_threshold,
        config.breaker_open_timeout,
        metrics.clone(),
    ));
    let retry = RetryPolicy {
        max_retries: config.retry_max_retries,
        base_delay: config.retry_base_delay,
        max_delay: config.retry_max_delay,
        jitter_fraction: config.retry_jitter_fraction,
    };

    // Resolvers per configuration
    let mut resolver = CombinedResolver::new(config.policy)
        .with_api_key(ApiKeyResolver::new(key_store.clone()));

    if config.policy.mtls_enabled() && !config.mtls_allowed_principals.is_empty() {
        resolver = resolver.with_mtls(MtlsResolver::new(
            config.mtls_allowed_principals.clone(),
            config.mtls_role_map.clone(),
        ));
    }

    if let Some(public_key) = &config.service_jwt_public_key {
        let jwt = JwtResolver::from_config(public_key, &config.service_jwt_algorithm)
            .expect("Invalid SERVICE_JWT_PUBLIC_KEY configuration");
        resolver = resolver.with_jwt(jwt);
    }

    let mut jwks_cache: Option<Arc<JwksCache>> = None;
    let mut jwks_urls: Vec<String> = Vec::new();
    if !config.trusted_issuers.is_empty() {
        let cache = Arc::new(
            JwksCache::new(config.jwks_refresh_interval, config.jwks_fetch_timeout)
                .expect("Failed to build JWKS cache"),
        );
        let oidc = OidcResolver::new(
            config.trusted_issuers.clone(),
            cache.clone(),
            breaker.clone(),
            retry.clone(),
            config.jwks_fetch_timeout,
        );
        jwks_urls = oidc.jwks_urls();
        jwks_cache = Some(cache);
        resolver = resolver.with_oidc(oidc);
    }

    let state = AppState {
        resolver: Arc::new(resolver),
        authorizer: RoleAuthorizer,
        cert_store: cert_store.clone(),
        key_store: key_store.clone(),
        bypass_paths: Arc::new(config.bypass_paths.clone()),
        metrics: metrics.clone(),
    };

    // Background maintenance
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    if let Some(loader) = loader {
        RotationTask::new(
            cert_store.clone(),
            loader,
            config.rotation_check_interval,
            metrics.clone(),
        )
        .spawn(shutdown_rx.clone());
        tracing::info!(
            interval_secs = config.rotation_check_interval.as_secs(),
            "Certificate rotation task started"
        );
    }
    if let Some(cache) = jwks_cache {
        JwksRefreshTask::new(cache, jwks_urls, config.jwks_refresh_interval)
            .spawn(shutdown_rx.clone());
        tracing::info!(
            interval_secs = config.jwks_refresh_interval.as_secs(),
            "JWKS refresh task started"
        );
    }

    let app = handlers::router(state).layer(TraceLayer::new_for_http());

    let addr = config.addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Meshguard listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Failed to start server");

    let _ = shutdown_tx.send(true);
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    tracing::info!("Shutdown signal received, stopping server...");
}
