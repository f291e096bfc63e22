//! OIDC token validation against external identity providers.
//!
//! Provider public keys come from each issuer's JWKS endpoint and are
//! cached in memory. On-path lookups serve a cached key even when the
//! entry is past its refresh interval (the background refresher keeps
//! it current); the network is only touched when the kid is genuinely
//! unknown, and every such fetch goes through the circuit breaker and
//! retry policy so a flapping provider degrades to fast 503s instead
//! of piling up latency.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use jwt_simple::prelude::{JWTClaims, RS256PublicKey, RSAPublicKeyLike, Token, VerificationOptions};
use serde::{Deserialize, Serialize};

use crate::config::TrustedIssuer;
use crate::error::{AuthError, Result};
use crate::context::{AuthContext, AuthMethod};
use crate::resilience::{CircuitBreaker, RetryPolicy};

use super::classify_token_failure;

struct CachedJwks {
    keys: HashMap<String, RS256PublicKey>,
    fetched_at: Instant,
}

impl CachedJwks {
    fn is_stale(&self, ttl: Duration) -> bool {
        self.fetched_at.elapsed() > ttl
    }
}

enum Lookup {
    Hit(RS256PublicKey),
    /// Fresh entry without the kid. Refetching would let an attacker
    /// with an arbitrary kid drive traffic to the provider.
    KnownMissing,
    NeedsFetch,
}

/// Per-process JWKS cache keyed by endpoint URL.
pub struct JwksCache {
    cache: RwLock<HashMap<String, CachedJwks>>,
    client: reqwest::Client,
    refresh_interval: Duration,
}

impl JwksCache {
    pub fn new(refresh_interval: Duration, fetch_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(fetch_timeout)
            .build()
            .map_err(|e| AuthError::Internal(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            cache: RwLock::new(HashMap::new()),
            client,
            refresh_interval,
        })
    }

    fn lookup(&self, jwks_url: &str, kid: &str) -> Lookup {
        let cache = self.cache.read().unwrap_or_else(|p| p.into_inner());
        match cache.get(jwks_url) {
            Some(cached) => match cached.keys.get(kid) {
                Some(key) => Lookup::Hit(key.clone()),
                None if !cached.is_stale(self.refresh_interval) => Lookup::KnownMissing,
                None => Lookup::NeedsFetch,
            },
            None => Lookup::NeedsFetch,
        }
    }

    fn install(&self, jwks_url: &str, keys: HashMap<String, RS256PublicKey>) {
        let mut cache = self.cache.write().unwrap_or_else(|p| p.into_inner());
        cache.insert(
            jwks_url.to_string(),
            CachedJwks {
                keys,
                fetched_at: Instant::now(),
            },
        );
    }

    /// Fetch the endpoint once and replace the cached entry. Used by
    /// the background refresher; on-path fetches add resilience around
    /// this in `get_key`.
    pub async fn refresh(&self, jwks_url: &str) -> Result<usize> {
        let keys = self.fetch_jwks(jwks_url).await?;
        let count = keys.len();
        self.install(jwks_url, keys);
        Ok(count)
    }

    async fn get_key(
        &self,
        jwks_url: &str,
        kid: &str,
        breaker: &CircuitBreaker,
        retry: &RetryPolicy,
        deadline: Option<Instant>,
    ) -> Result<RS256PublicKey> {
        match self.lookup(jwks_url, kid) {
            Lookup::Hit(key) => return Ok(key),
            Lookup::KnownMissing => return Err(AuthError::UnknownKey),
            Lookup::NeedsFetch => {}
        }

        let keys = breaker
            .execute(|| retry.run("jwks_fetch", deadline, || self.fetch_jwks(jwks_url)))
            .await?;
        let key = keys.get(kid).cloned();
        self.install(jwks_url, keys);
        key.ok_or(AuthError::UnknownKey)
    }

    async fn fetch_jwks(&self, url: &str) -> Result<HashMap<String, RS256PublicKey>> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| AuthError::ProviderUnavailable(format!("JWKS request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(AuthError::ProviderUnavailable(format!(
                "HTTP {} from JWKS endpoint",
                response.status()
            )));
        }

        let jwks: JwksResponse = response.json().await.map_err(|e| {
            AuthError::ProviderUnavailable(format!("failed to parse JWKS JSON: {e}"))
        })?;

        let mut keys = HashMap::new();
        for jwk in jwks.keys {
            if jwk.kty != "RSA" {
                continue;
            }
            if let Some(ref alg) = jwk.alg {
                if alg != "RS256" {
                    continue;
                }
            }
            let kid = match jwk.kid {
                Some(ref k) => k.clone(),
                None => continue,
            };
            match parse_rsa_public_key(&jwk.n, &jwk.e) {
                Ok(public_key) => {
                    keys.insert(kid, public_key);
                }
                Err(e) => {
                    tracing::warn!("skipping unparseable JWK with kid '{}': {}", kid, e);
                }
            }
        }

        if keys.is_empty() {
            return Err(AuthError::ProviderUnavailable(
                "no usable RS256 keys in JWKS".to_string(),
            ));
        }

        Ok(keys)
    }
}

/// JWKS response structure (RFC 7517)
#[derive(Debug, Deserialize)]
struct JwksResponse {
    keys: Vec<Jwk>,
}

#[derive(Debug, Deserialize)]
struct Jwk {
    kty: String,
    kid: Option<String>,
    alg: Option<String>,
    /// RSA modulus, base64url
    #[serde(default)]
    n: String,
    /// RSA exponent, base64url
    #[serde(default)]
    e: String,
}

/// Parse an RSA public key from base64url-encoded n and e components.
fn parse_rsa_public_key(n_b64: &str, e_b64: &str) -> Result<RS256PublicKey> {
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine;

    let n_bytes = URL_SAFE_NO_PAD
        .decode(n_b64)
        .map_err(|e| AuthError::ProviderUnavailable(format!("invalid base64url for 'n': {e}")))?;
    let e_bytes = URL_SAFE_NO_PAD
        .decode(e_b64)
        .map_err(|e| AuthError::ProviderUnavailable(format!("invalid base64url for 'e': {e}")))?;

    let der = build_rsa_public_key_der(&n_bytes, &e_bytes);

    RS256PublicKey::from_der(&der)
        .map_err(|e| AuthError::ProviderUnavailable(format!("failed to parse RSA key: {e}")))
}

/// Build a DER SubjectPublicKeyInfo wrapping a PKCS#1 RSAPublicKey
/// (SEQUENCE of INTEGER n, INTEGER e).
fn build_rsa_public_key_der(n: &[u8], e: &[u8]) -> Vec<u8> {
    fn encode_integer(bytes: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        // High bit set would read as negative; pad with a zero byte.
        let needs_padding = !bytes.is_empty() && (bytes[0] & 0x80) != 0;
        let len = bytes.len() + usize::from(needs_padding);

        out.push(0x02); // INTEGER
        encode_length(&mut out, len);
        if needs_padding {
            out.push(0x00);
        }
        out.extend_from_slice(bytes);
        out
    }

    fn encode_length(out: &mut Vec<u8>, len: usize) {
        if len < 128 {
            out.push(len as u8);
        } else if len < 256 {
            out.push(0x81);
            out.push(len as u8);
        } else {
            out.push(0x82);
            out.push((len >> 8) as u8);
            out.push((len & 0xff) as u8);
        }
    }

    let n_der = encode_integer(n);
    let e_der = encode_integer(e);

    let mut rsa_key = Vec::new();
    rsa_key.push(0x30); // SEQUENCE
    encode_length(&mut rsa_key, n_der.len() + e_der.len());
    rsa_key.extend_from_slice(&n_der);
    rsa_key.extend_from_slice(&e_der);

    // AlgorithmIdentifier for rsaEncryption: 1.2.840.113549.1.1.1
    let algorithm_id = [
        0x30, 0x0d, // SEQUENCE
        0x06, 0x09, // OID
        0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x01, 0x01, // rsaEncryption
        0x05, 0x00, // NULL
    ];

    let mut bit_string = Vec::new();
    bit_string.push(0x03); // BIT STRING
    encode_length(&mut bit_string, rsa_key.len() + 1);
    bit_string.push(0x00); // unused bits
    bit_string.extend_from_slice(&rsa_key);

    let mut result = Vec::new();
    result.push(0x30); // SEQUENCE
    encode_length(&mut result, algorithm_id.len() + bit_string.len());
    result.extend_from_slice(&algorithm_id);
    result.extend_from_slice(&bit_string);

    result
}

/// Custom claims we read off provider tokens. Role-bearing claims
/// vary by provider, so both `roles` and `groups` contribute.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct OidcTokenClaims {
    #[serde(default)]
    roles: Vec<String>,
    #[serde(default)]
    groups: Vec<String>,
}

pub struct OidcResolver {
    issuers: Vec<TrustedIssuer>,
    cache: Arc<JwksCache>,
    breaker: Arc<CircuitBreaker>,
    retry: RetryPolicy,
    fetch_budget: Duration,
}

impl OidcResolver {
    pub fn new(
        issuers: Vec<TrustedIssuer>,
        cache: Arc<JwksCache>,
        breaker: Arc<CircuitBreaker>,
        retry: RetryPolicy,
        fetch_budget: Duration,
    ) -> Self {
        Self {
            issuers,
            cache,
            breaker,
            retry,
            fetch_budget,
        }
    }

    pub fn handles_issuer(&self, issuer: &str) -> bool {
        self.issuers.iter().any(|i| i.issuer == issuer)
    }

    pub fn jwks_urls(&self) -> Vec<String> {
        self.issuers.iter().map(|i| i.jwks_url.clone()).collect()
    }

    pub async fn resolve(&self, token: &str) -> Result<AuthContext> {
        let metadata = Token::decode_metadata(token)
            .map_err(|e| AuthError::TokenInvalid(format!("invalid token header: {e}")))?;
        let kid = metadata.key_id().ok_or(AuthError::MissingKey)?;

        let issuer = super::decode_unverified_claims(token)
            .and_then(|c| c.get("iss").and_then(|v| v.as_str().map(String::from)))
            .ok_or(AuthError::MissingClaims("iss"))?;

        let trusted = self
            .issuers
            .iter()
            .find(|i| i.issuer == issuer)
            .ok_or(AuthError::UntrustedIssuer)?;

        let deadline = Instant::now() + self.fetch_budget;
        let public_key = self
            .cache
            .get_key(
                &trusted.jwks_url,
                kid,
                &self.breaker,
                &self.retry,
                Some(deadline),
            )
            .await?;

        let mut allowed_issuers = HashSet::new();
        allowed_issuers.insert(trusted.issuer.clone());
        let mut allowed_audiences = HashSet::new();
        allowed_audiences.insert(trusted.audience.clone());

        let options = VerificationOptions {
            allowed_issuers: Some(allowed_issuers),
            allowed_audiences: Some(allowed_audiences),
            time_tolerance: Some(jwt_simple::prelude::Duration::from_secs(0)),
            ..Default::default()
        };

        let verified: JWTClaims<OidcTokenClaims> = public_key
            .verify_token(token, Some(options))
            .map_err(|e| classify_token_failure(token, e.to_string()))?;

        let subject = match verified.subject {
            Some(sub) if !sub.is_empty() => sub,
            _ => return Err(AuthError::MissingClaims("sub")),
        };

        let roles: HashSet<String> = verified
            .custom
            .roles
            .into_iter()
            .chain(verified.custom.groups)
            .collect();

        Ok(AuthContext {
            method: AuthMethod::Oidc,
            principal_id: subject,
            roles,
            expires_at: verified.expires_at.map(|d| d.as_secs() as i64),
        })
    }
}
