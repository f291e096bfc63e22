//! Background maintenance loops: certificate rotation checks and JWKS
//! refreshes. Each loop is a thin timer around a `tick` method so the
//! decision logic stays testable without sleeping.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::certstore::CertificateStore;
use crate::error::{AuthError, Result};
use crate::metrics::MetricsRecorder;
use crate::resolvers::oidc::JwksCache;

/// Fresh certificate material for a rotation attempt.
pub struct LoadedMaterial {
    pub leaf_pem: String,
    pub key_pem: String,
    pub trust_bundle_pem: String,
}

/// Where rotation checks get candidate material from.
pub trait MaterialLoader: Send + Sync {
    fn load(&self) -> Result<LoadedMaterial>;
}

/// Reads PEM files off disk; an external agent (cert-manager, SPIRE
/// agent, a cron job) is expected to replace them in place.
pub struct FileMaterialLoader {
    cert_path: PathBuf,
    key_path: PathBuf,
    trust_bundle_path: PathBuf,
}

impl FileMaterialLoader {
    pub fn new(cert_path: PathBuf, key_path: PathBuf, trust_bundle_path: PathBuf) -> Self {
        Self {
            cert_path,
            key_path,
            trust_bundle_path,
        }
    }
}

impl MaterialLoader for FileMaterialLoader {
    fn load(&self) -> Result<LoadedMaterial> {
        let read = |path: &PathBuf| {
            std::fs::read_to_string(path).map_err(|e| {
                AuthError::Internal(format!("failed to read {}: {}", path.display(), e))
            })
        };
        Ok(LoadedMaterial {
            leaf_pem: read(&self.cert_path)?,
            key_pem: read(&self.key_path)?,
            trust_bundle_pem: read(&self.trust_bundle_path)?,
        })
    }
}

pub struct RotationTask {
    store: Arc<CertificateStore>,
    loader: Arc<dyn MaterialLoader>,
    interval: Duration,
    metrics: Arc<dyn MetricsRecorder>,
}

impl RotationTask {
    pub fn new(
        store: Arc<CertificateStore>,
        loader: Arc<dyn MaterialLoader>,
        interval: Duration,
        metrics: Arc<dyn MetricsRecorder>,
    ) -> Self {
        Self {
            store,
            loader,
            interval,
            metrics,
        }
    }

    /// One rotation check. Returns whether new material was installed.
    pub fn tick(&self) -> Result<bool> {
        if let Some((_, remaining)) = self.store.expiry_info() {
            self.metrics.cert_expiry_seconds("leaf", remaining);
        }

        if !self.store.rotation_due() {
            return Ok(false);
        }

        let material = self.loader.load()?;
        let rotated = self.store.rotate(
            &material.leaf_pem,
            &material.key_pem,
            &material.trust_bundle_pem,
        )?;
        if rotated {
            tracing::info!("certificate material rotated");
        }
        Ok(rotated)
    }

    pub fn spawn(self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = self.tick() {
                            tracing::warn!(error = %e, "certificate rotation check failed");
                        }
                    }
                    _ = shutdown.changed() => {
                        tracing::debug!("rotation task stopping");
                        break;
                    }
                }
            }
        })
    }
}

pub struct JwksRefreshTask {
    cache: Arc<JwksCache>,
    jwks_urls: Vec<String>,
    interval: Duration,
}

impl JwksRefreshTask {
    pub fn new(cache: Arc<JwksCache>, jwks_urls: Vec<String>, interval: Duration) -> Self {
        Self {
            cache,
            jwks_urls,
            interval,
        }
    }

    /// Refresh every configured endpoint once. A provider outage here
    /// is logged and absorbed; request-path lookups keep serving the
    /// last good keys.
    pub async fn tick(&self) {
        for url in &self.jwks_urls {
            match self.cache.refresh(url).await {
                Ok(count) => {
                    tracing::debug!(url = %url, keys = count, "JWKS refreshed");
                }
                Err(e) => {
                    tracing::warn!(url = %url, error = %e, "JWKS refresh failed");
                }
            }
        }
    }

    pub fn spawn(self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => self.tick().await,
                    _ = shutdown.changed() => {
                        tracing::debug!("JWKS refresh task stopping");
                        break;
                    }
                }
            }
        })
    }
}
