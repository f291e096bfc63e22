//! Channel-bound authentication from the peer's TLS certificate chain.

use std::collections::{HashMap, HashSet};

use x509_parser::certificate::X509Certificate;
use x509_parser::extensions::GeneralName;
use x509_parser::prelude::FromDer;

use crate::context::{AuthContext, AuthMethod};
use crate::error::{AuthError, Result};

/// What the TLS acceptor learned about the peer, attached to the
/// request before routing. `peer_chain_der` is leaf-first; an empty
/// chain means the handshake completed without a client certificate.
#[derive(Debug, Clone)]
pub struct TlsPeerInfo {
    pub peer_chain_der: Vec<Vec<u8>>,
    pub trust_bundle_pem: String,
}

pub struct MtlsResolver {
    allowed_principals: HashSet<String>,
    role_map: HashMap<String, HashSet<String>>,
}

impl MtlsResolver {
    pub fn new(
        allowed_principals: HashSet<String>,
        role_map: HashMap<String, HashSet<String>>,
    ) -> Self {
        Self {
            allowed_principals,
            role_map,
        }
    }

    pub fn resolve(&self, tls: Option<&TlsPeerInfo>) -> Result<AuthContext> {
        let tls = tls.ok_or(AuthError::NoTls)?;
        if tls.peer_chain_der.is_empty() {
            return Err(AuthError::NoPeerCertificate);
        }

        let now = chrono::Utc::now().timestamp();
        let expires_at = verify_chain(&tls.peer_chain_der, &tls.trust_bundle_pem, now)?;
        let principal = extract_identity(&tls.peer_chain_der[0])?;

        if !self.allowed_principals.contains(&principal) {
            return Err(AuthError::PrincipalNotAllowed(principal));
        }

        let roles = self.role_map.get(&principal).cloned().unwrap_or_default();

        Ok(AuthContext {
            method: AuthMethod::Mtls,
            principal_id: principal,
            roles,
            expires_at: Some(expires_at),
        })
    }
}

/// Verify the presented chain leaf-first against the trust bundle:
/// every certificate inside its validity window, every signature
/// linking to the next certificate, and the last one signed by a
/// bundle root. Returns the leaf's notAfter on success.
fn verify_chain(chain_der: &[Vec<u8>], trust_bundle_pem: &str, now: i64) -> Result<i64> {
    let root_ders: Vec<Vec<u8>> = pem::parse_many(trust_bundle_pem)
        .map_err(|e| AuthError::ChainInvalid(format!("trust bundle: {e}")))?
        .into_iter()
        .filter(|b| b.tag() == "CERTIFICATE")
        .map(|b| b.contents().to_vec())
        .collect();
    if root_ders.is_empty() {
        return Err(AuthError::ChainInvalid("empty trust bundle".to_string()));
    }

    let mut parsed = Vec::with_capacity(chain_der.len());
    for der in chain_der {
        let (_, cert) = X509Certificate::from_der(der)
            .map_err(|e| AuthError::ChainInvalid(format!("peer certificate: {e}")))?;
        parsed.push(cert);
    }

    for cert in &parsed {
        let not_before = cert.validity().not_before.timestamp();
        let not_after = cert.validity().not_after.timestamp();
        if now < not_before {
            return Err(AuthError::ChainInvalid(
                "certificate not yet valid".to_string(),
            ));
        }
        if now > not_after {
            return Err(AuthError::ChainInvalid("certificate expired".to_string()));
        }
    }

    // Workload leaves must be marked for client authentication.
    let leaf = &parsed[0];
    let client_auth = leaf
        .extended_key_usage()
        .ok()
        .flatten()
        .map(|eku| eku.value.client_auth)
        .unwrap_or(false);
    if !client_auth {
        return Err(AuthError::ChainInvalid(
            "leaf not marked for client authentication".to_string(),
        ));
    }

    // Only CA certificates may issue. Without this check any workload
    // leaf could sign a certificate carrying another allowed identity.
    for (i, cert) in parsed.iter().enumerate().skip(1) {
        if !may_issue(cert, i - 1) {
            return Err(AuthError::ChainInvalid(
                "issuer is not a CA certificate".to_string(),
            ));
        }
    }

    for pair in parsed.windows(2) {
        pair[0]
            .verify_signature(Some(pair[1].public_key()))
            .map_err(|_| AuthError::ChainInvalid("broken signature link".to_string()))?;
    }

    let top = parsed
        .last()
        .ok_or_else(|| AuthError::ChainInvalid("empty chain".to_string()))?;
    let mut anchored = false;
    for root_der in &root_ders {
        let (_, root) = match X509Certificate::from_der(root_der) {
            Ok(parsed) => parsed,
            Err(_) => continue,
        };
        if !may_issue(&root, parsed.len() - 1) {
            continue;
        }
        if top.verify_signature(Some(root.public_key())).is_ok() {
            anchored = true;
            break;
        }
    }
    if !anchored {
        return Err(AuthError::ChainInvalid(
            "chain does not terminate at a trusted root".to_string(),
        ));
    }

    Ok(parsed[0].validity().not_after.timestamp())
}

/// Whether `cert` may act as an issuer with `intermediates_below` CA
/// certificates between it and the leaf: basicConstraints CA=true, a
/// satisfied pathLenConstraint, and keyCertSign when KeyUsage is
/// present.
fn may_issue(cert: &X509Certificate<'_>, intermediates_below: usize) -> bool {
    let ca = match cert.basic_constraints() {
        Ok(Some(bc)) => {
            bc.value.ca
                && bc
                    .value
                    .path_len_constraint
                    .map(|max| intermediates_below as u32 <= max)
                    .unwrap_or(true)
        }
        _ => false,
    };
    if !ca {
        return false;
    }
    match cert.key_usage() {
        Ok(Some(ku)) => ku.value.key_cert_sign(),
        Ok(None) => true,
        Err(_) => false,
    }
}

/// SPIFFE URI SAN when present, otherwise the subject Common Name.
fn extract_identity(leaf_der: &[u8]) -> Result<String> {
    let (_, cert) = X509Certificate::from_der(leaf_der)
        .map_err(|e| AuthError::ChainInvalid(format!("peer certificate: {e}")))?;

    if let Ok(Some(san)) = cert.subject_alternative_name() {
        for name in &san.value.general_names {
            if let GeneralName::URI(uri) = name {
                if uri.starts_with("spiffe://") {
                    return Ok(uri.to_string());
                }
            }
        }
    }

    if let Some(cn) = cert
        .subject()
        .iter_common_name()
        .next()
        .and_then(|attr| attr.as_str().ok())
    {
        if !cn.is_empty() {
            return Ok(cn.to_string());
        }
    }

    Err(AuthError::ChainInvalid(
        "peer certificate carries no identity".to_string(),
    ))
}
