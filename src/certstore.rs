//! Storage and rotation for this workload's own TLS identity.
//!
//! The store validates material once at store time and never again on
//! reads, so the invariant is "no certificate failing validation is
//! ever stored". Reads are lock-cheap (many concurrent TLS handshakes
//! take the read path); writes swap an `Arc` under a briefly-held
//! write lock. All cryptographic parsing happens before the lock is
//! taken.

use std::sync::{Arc, RwLock};

use x509_parser::prelude::*;
use zeroize::Zeroizing;

use crate::error::{AuthError, Result};

/// The workload's current X.509 identity material. Replaced wholesale
/// on rotation, never mutated in place.
pub struct CertificateMaterial {
    pub leaf_pem: String,
    pub key_pem: Zeroizing<String>,
    pub trust_bundle_pem: String,
    /// Leaf validity window (Unix timestamps).
    pub not_before: i64,
    pub not_after: i64,
    /// When this material was installed.
    pub last_rotation: i64,
}

impl CertificateMaterial {
    /// Fraction of the leaf's validity lifetime elapsed at `now`
    /// (0.0 to 1.0+).
    pub fn elapsed_fraction(&self, now: i64) -> f64 {
        let lifetime = (self.not_after - self.not_before) as f64;
        if lifetime <= 0.0 {
            return 1.0;
        }
        (now - self.not_before) as f64 / lifetime
    }

    /// Seconds until the leaf expires at `now`.
    pub fn remaining_secs(&self, now: i64) -> i64 {
        self.not_after - now
    }
}

type NowFn = Box<dyn Fn() -> i64 + Send + Sync>;

fn system_now() -> i64 {
    chrono::Utc::now().timestamp()
}

pub struct CertificateStore {
    material: RwLock<Option<Arc<CertificateMaterial>>>,
    rotation_threshold: f64,
    now_fn: NowFn,
}

impl CertificateStore {
    pub fn new(rotation_threshold: f64) -> Self {
        Self::with_clock(rotation_threshold, Box::new(system_now))
    }

    /// Construct with an injected clock so rotation-threshold tests
    /// can move time instead of sleeping.
    pub fn with_clock(rotation_threshold: f64, now_fn: NowFn) -> Self {
        Self {
            material: RwLock::new(None),
            rotation_threshold,
            now_fn,
        }
    }

    /// Validate and install new identity material. On any validation
    /// failure the previously held material is left untouched.
    pub fn store(
        &self,
        leaf_pem: &str,
        key_pem: &str,
        trust_bundle_pem: &str,
    ) -> Result<()> {
        let now = (self.now_fn)();
        let (not_before, not_after) = validate_leaf(leaf_pem, now)?;

        let new = Arc::new(CertificateMaterial {
            leaf_pem: leaf_pem.to_string(),
            key_pem: Zeroizing::new(key_pem.to_string()),
            trust_bundle_pem: trust_bundle_pem.to_string(),
            not_before,
            not_after,
            last_rotation: now,
        });

        // Critical section is a pointer swap; validation already done.
        let mut guard = self
            .material
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = Some(new);

        tracing::info!(
            not_before,
            not_after,
            "certificate material installed"
        );
        Ok(())
    }

    /// Current material, or `NoCertificate` if none was ever stored.
    /// Read-only and side-effect free.
    pub fn get(&self) -> Result<Arc<CertificateMaterial>> {
        let guard = self
            .material
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        guard.clone().ok_or(AuthError::NoCertificate)
    }

    /// Whether the held leaf has passed the rotation threshold.
    /// False when nothing is stored (there is nothing to rotate; the
    /// initial install goes through `store`).
    pub fn rotation_due(&self) -> bool {
        match self.get() {
            Ok(material) => {
                material.elapsed_fraction((self.now_fn)()) >= self.rotation_threshold
            }
            Err(_) => false,
        }
    }

    /// Install `new_leaf`/`new_key` if rotation is due. Returns
    /// `Ok(false)` (no-op) when the current material has not yet
    /// reached the threshold; callers re-fetch fresh material from
    /// the identity authority only after that signal. Returns
    /// `Ok(true)` when the new material was validated and installed.
    pub fn rotate(
        &self,
        new_leaf_pem: &str,
        new_key_pem: &str,
        new_trust_bundle_pem: &str,
    ) -> Result<bool> {
        match self.get() {
            Ok(current) => {
                let fraction = current.elapsed_fraction((self.now_fn)());
                if fraction < self.rotation_threshold {
                    tracing::debug!(
                        elapsed_fraction = fraction,
                        threshold = self.rotation_threshold,
                        "rotation not yet due"
                    );
                    return Ok(false);
                }
            }
            // Nothing held yet: treat rotation as the initial install.
            Err(AuthError::NoCertificate) => {}
            Err(e) => return Err(e),
        }

        self.store(new_leaf_pem, new_key_pem, new_trust_bundle_pem)?;
        tracing::info!("certificate rotated");
        Ok(true)
    }

    /// (not_after, seconds remaining) of the held leaf, for the expiry
    /// gauge. None when nothing is stored.
    pub fn expiry_info(&self) -> Option<(i64, i64)> {
        let material = self.get().ok()?;
        let now = (self.now_fn)();
        Some((material.not_after, material.remaining_secs(now)))
    }
}

/// Parse and validate a PEM leaf certificate: validity window at `now`,
/// `DigitalSignature` key usage, and both `ServerAuth` and `ClientAuth`
/// extended key usages. Returns the validity window on success.
fn validate_leaf(leaf_pem: &str, now: i64) -> Result<(i64, i64)> {
    let der = parse_first_pem_block(leaf_pem)?;
    let (_, cert) = X509Certificate::from_der(&der)
        .map_err(|e| AuthError::CertificateParse(format!("failed to parse certificate: {}", e)))?;

    let not_before = cert.validity().not_before.timestamp();
    let not_after = cert.validity().not_after.timestamp();

    if now > not_after {
        return Err(AuthError::CertificateExpired);
    }
    if now < not_before {
        return Err(AuthError::CertificateNotYetValid);
    }

    let key_usage = cert
        .key_usage()
        .map_err(|e| AuthError::CertificateParse(format!("bad key usage extension: {}", e)))?;
    match key_usage {
        Some(ku) if ku.value.digital_signature() => {}
        _ => return Err(AuthError::InvalidKeyUsage),
    }

    let eku = cert
        .extended_key_usage()
        .map_err(|e| AuthError::CertificateParse(format!("bad EKU extension: {}", e)))?;
    match eku {
        Some(eku) if eku.value.server_auth && eku.value.client_auth => {}
        _ => return Err(AuthError::MissingExtendedKeyUsage),
    }

    Ok((not_before, not_after))
}

/// Decode the first PEM block of a certificate.
pub(crate) fn parse_first_pem_block(pem_data: &str) -> Result<Vec<u8>> {
    let block = ::pem::parse(pem_data)
        .map_err(|e| AuthError::CertificateParse(format!("invalid PEM: {}", e)))?;
    Ok(block.contents().to_vec())
}
