//! First-party service JWT validation.
//!
//! Verifies tokens minted by the mesh's own control plane against a
//! statically configured public key. The signing algorithm is pinned
//! at startup; a token advertising any other algorithm is rejected
//! before signature verification.

use std::collections::HashSet;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use jwt_simple::prelude::{
    Duration, EdDSAPublicKeyLike, Ed25519PublicKey, JWTClaims, RS256PublicKey, RSAPublicKeyLike,
    Token, VerificationOptions,
};
use serde::{Deserialize, Serialize};

use crate::context::{AuthContext, AuthMethod};
use crate::error::{AuthError, Result};

use super::classify_token_failure;

/// Custom claims carried by service tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceTokenClaims {
    #[serde(default)]
    pub service_id: String,
    #[serde(default)]
    pub roles: Vec<String>,
}

enum ServiceJwtKey {
    Ed25519(Ed25519PublicKey),
    Rs256(RS256PublicKey),
}

pub struct JwtResolver {
    key: ServiceJwtKey,
    expected_alg: String,
}

impl JwtResolver {
    /// Build a resolver from config material: raw 32-byte Ed25519
    /// public keys arrive base64-encoded, RSA keys as PEM.
    pub fn from_config(public_key: &str, algorithm: &str) -> Result<Self> {
        let key = match algorithm {
            "EdDSA" => {
                let bytes = BASE64.decode(public_key.trim()).map_err(|e| {
                    AuthError::Internal(format!("invalid service JWT public key encoding: {e}"))
                })?;
                let key = Ed25519PublicKey::from_bytes(&bytes).map_err(|e| {
                    AuthError::Internal(format!("invalid Ed25519 public key: {e}"))
                })?;
                ServiceJwtKey::Ed25519(key)
            }
            "RS256" => {
                let key = RS256PublicKey::from_pem(public_key).map_err(|e| {
                    AuthError::Internal(format!("invalid RS256 public key: {e}"))
                })?;
                ServiceJwtKey::Rs256(key)
            }
            other => {
                return Err(AuthError::Internal(format!(
                    "unsupported service JWT algorithm: {other}"
                )))
            }
        };
        Ok(Self {
            key,
            expected_alg: algorithm.to_string(),
        })
    }

    pub fn resolve(&self, token: &str) -> Result<AuthContext> {
        let metadata = Token::decode_metadata(token)
            .map_err(|e| AuthError::TokenInvalid(format!("invalid token header: {e}")))?;

        if metadata.algorithm() != self.expected_alg {
            return Err(AuthError::AlgorithmMismatch {
                expected: self.expected_alg.clone(),
                got: metadata.algorithm().to_string(),
            });
        }

        // Expiry and not-before are enforced exactly, no leeway.
        let options = VerificationOptions {
            time_tolerance: Some(Duration::from_secs(0)),
            ..Default::default()
        };

        let verified: JWTClaims<ServiceTokenClaims> = match &self.key {
            ServiceJwtKey::Ed25519(key) => key.verify_token(token, Some(options)),
            ServiceJwtKey::Rs256(key) => key.verify_token(token, Some(options)),
        }
        .map_err(|e| classify_token_failure(token, e.to_string()))?;

        if verified.custom.service_id.is_empty() {
            return Err(AuthError::MissingClaims("service_id"));
        }
        if verified.custom.roles.is_empty() {
            return Err(AuthError::MissingClaims("roles"));
        }

        Ok(AuthContext {
            method: AuthMethod::Jwt,
            principal_id: verified.custom.service_id,
            roles: verified.custom.roles.into_iter().collect::<HashSet<_>>(),
            expires_at: verified.expires_at.map(|d| d.as_secs() as i64),
        })
    }
}
