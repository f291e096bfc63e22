//! Credential resolvers.
//!
//! Each leaf resolver validates one credential type into a normalized
//! `AuthContext`. `CombinedResolver` dispatches to them per policy:
//! explicitly required methods combine with AND semantics, `allow_any`
//! with OR semantics, and mTLS wins when several succeed (the
//! channel-bound proof is the stronger one).

pub mod api_key;
pub mod jwt;
pub mod mtls;
pub mod oidc;

pub use api_key::ApiKeyResolver;
pub use jwt::JwtResolver;
pub use mtls::{MtlsResolver, TlsPeerInfo};
pub use oidc::OidcResolver;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;

use crate::config::AuthPolicy;
use crate::context::{AuthContext, AuthMethod};
use crate::error::{AuthError, Result};

/// The raw credentials one request arrived with, as handed over by the
/// transport and the HTTP layer.
#[derive(Debug, Clone, Default)]
pub struct RequestCredentials {
    /// TLS session info; None means a plaintext connection.
    pub tls: Option<TlsPeerInfo>,
    /// Value of `Authorization: Bearer ...`, if present.
    pub bearer: Option<String>,
    /// Value of `X-API-Key`, if present.
    pub api_key: Option<String>,
}

/// The bearer slot carries both JWTs and opaque API keys; the contract
/// for telling them apart is exactly three non-empty base64url
/// segments. Anything else is treated as an opaque key.
pub fn looks_like_jwt(token: &str) -> bool {
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 3 {
        return false;
    }
    parts.iter().all(|seg| {
        !seg.is_empty()
            && seg
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_' || b == b'=')
    })
}

/// Decode a JWT payload without verifying the signature. Used only to
/// route tokens (issuer lookup) and to classify verification failures;
/// never to grant access.
pub(crate) fn decode_unverified_claims(token: &str) -> Option<serde_json::Value> {
    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload).ok()?;
    serde_json::from_slice(&bytes).ok()
}

/// Turn a generic signature-verification failure into the precise
/// temporal error when the unverified claims show the cause.
pub(crate) fn classify_token_failure(token: &str, fallback: String) -> AuthError {
    if let Some(claims) = decode_unverified_claims(token) {
        let now = chrono::Utc::now().timestamp();
        if let Some(exp) = claims.get("exp").and_then(|v| v.as_i64()) {
            if exp <= now {
                return AuthError::TokenExpired;
            }
        }
        if let Some(nbf) = claims.get("nbf").and_then(|v| v.as_i64()) {
            if nbf > now {
                return AuthError::TokenNotYetValid;
            }
        }
    }
    AuthError::TokenInvalid(fallback)
}

pub struct CombinedResolver {
    policy: AuthPolicy,
    mtls: Option<MtlsResolver>,
    jwt: Option<JwtResolver>,
    api_key: Option<ApiKeyResolver>,
    oidc: Option<OidcResolver>,
}

impl CombinedResolver {
    pub fn new(policy: AuthPolicy) -> Self {
        Self {
            policy,
            mtls: None,
            jwt: None,
            api_key: None,
            oidc: None,
        }
    }

    pub fn with_mtls(mut self, resolver: MtlsResolver) -> Self {
        self.mtls = Some(resolver);
        self
    }

    pub fn with_jwt(mut self, resolver: JwtResolver) -> Self {
        self.jwt = Some(resolver);
        self
    }

    pub fn with_api_key(mut self, resolver: ApiKeyResolver) -> Self {
        self.api_key = Some(resolver);
        self
    }

    pub fn with_oidc(mut self, resolver: OidcResolver) -> Self {
        self.oidc = Some(resolver);
        self
    }

    pub fn policy(&self) -> &AuthPolicy {
        &self.policy
    }

    /// Classify one request's credentials into an `AuthContext`, or
    /// the error that explains the rejection.
    pub async fn resolve(&self, creds: &RequestCredentials) -> Result<AuthContext> {
        // 1. Channel credential first, deterministically.
        let mtls_result = self.attempt_mtls(creds);

        // 2. Bearer-style credential, routed by shape.
        let bearer_result = self.attempt_bearer(creds).await;

        // 3. Combine per policy.
        self.combine(mtls_result, bearer_result)
    }

    fn attempt_mtls(&self, creds: &RequestCredentials) -> Option<Result<AuthContext>> {
        if !self.policy.mtls_enabled() {
            return None;
        }
        let resolver = self.mtls.as_ref()?;
        match (&creds.tls, self.policy.require_mtls) {
            (Some(_), _) => Some(resolver.resolve(creds.tls.as_ref())),
            // A missing TLS session only counts as a failure when the
            // policy demands the channel proof.
            (None, true) => Some(Err(AuthError::NoTls)),
            (None, false) => None,
        }
    }

    async fn attempt_bearer(
        &self,
        creds: &RequestCredentials,
    ) -> Option<(AuthMethod, Result<AuthContext>)> {
        // The dedicated header means "opaque API key", unless the
        // policy requires a bearer-based method and the bearer slot is
        // also populated; the required method then takes precedence.
        if let Some(key) = &creds.api_key {
            let bearer_required = self.policy.require_jwt || self.policy.require_oidc;
            if !(bearer_required && creds.bearer.is_some()) {
                return Some((AuthMethod::ApiKey, self.resolve_api_key(key)));
            }
        }

        let token = creds.bearer.as_deref()?;

        if !looks_like_jwt(token) {
            return Some((AuthMethod::ApiKey, self.resolve_api_key(token)));
        }

        // JWT-shaped: a token from a trusted OIDC issuer goes to the
        // OIDC resolver, anything else to the first-party verifier.
        let issuer = decode_unverified_claims(token)
            .and_then(|c| c.get("iss").and_then(|v| v.as_str().map(String::from)));
        if let (Some(iss), Some(oidc)) = (&issuer, &self.oidc) {
            if oidc.handles_issuer(iss) {
                return Some((AuthMethod::Oidc, oidc.resolve(token).await));
            }
        }

        match &self.jwt {
            Some(jwt) => Some((AuthMethod::Jwt, jwt.resolve(token))),
            None => Some((
                AuthMethod::Jwt,
                Err(AuthError::TokenInvalid(
                    "no first-party JWT verifier configured".to_string(),
                )),
            )),
        }
    }

    fn resolve_api_key(&self, presented: &str) -> Result<AuthContext> {
        match &self.api_key {
            Some(resolver) => resolver.resolve(presented),
            None => Err(AuthError::UnknownKey),
        }
    }

    fn combine(
        &self,
        mtls_result: Option<Result<AuthContext>>,
        bearer_result: Option<(AuthMethod, Result<AuthContext>)>,
    ) -> Result<AuthContext> {
        let policy = &self.policy;

        // AND semantics: a required method that did not succeed fails
        // the request outright, regardless of other successes.
        if policy.require_mtls {
            match mtls_result {
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e),
                None => return Err(AuthError::NoTls),
            }
        }
        if policy.require_jwt {
            match bearer_result {
                Some((AuthMethod::Jwt, Ok(_))) => {}
                Some((AuthMethod::Jwt, Err(e))) => return Err(e),
                _ => return Err(AuthError::MissingToken),
            }
        }
        if policy.require_oidc {
            match bearer_result {
                Some((AuthMethod::Oidc, Ok(_))) => {}
                Some((AuthMethod::Oidc, Err(e))) => return Err(e),
                _ => return Err(AuthError::MissingToken),
            }
        }

        let any_required = policy.require_mtls || policy.require_jwt || policy.require_oidc;
        let mtls_ctx = mtls_result.as_ref().and_then(|r| r.as_ref().ok()).cloned();
        let bearer_ctx = bearer_result
            .as_ref()
            .and_then(|(_, r)| r.as_ref().ok())
            .cloned();

        if any_required {
            // All required methods passed; prefer the channel-bound one.
            return mtls_ctx
                .or(bearer_ctx)
                .ok_or(AuthError::AuthenticationFailed);
        }

        if policy.allow_any {
            if let Some(ctx) = mtls_ctx.or(bearer_ctx) {
                return Ok(ctx);
            }

            // Nothing succeeded. Transient dependency failures keep
            // their 503 semantics; otherwise surface the most specific
            // rejection we saw, or a plain 401 when nothing was even
            // attempted.
            let attempts: Vec<AuthError> = mtls_result
                .into_iter()
                .chain(bearer_result.into_iter().map(|(_, r)| r))
                .filter_map(|r| r.err())
                .collect();

            if let Some(pos) = attempts.iter().position(|e| {
                matches!(
                    e,
                    AuthError::CircuitOpen(_)
                        | AuthError::ProviderUnavailable(_)
                        | AuthError::Canceled
                )
            }) {
                let mut attempts = attempts;
                return Err(attempts.swap_remove(pos));
            }

            let mut attempts = attempts;
            return Err(if attempts.is_empty() {
                AuthError::AuthenticationFailed
            } else {
                attempts.swap_remove(0)
            });
        }

        Err(AuthError::AuthenticationFailed)
    }
}
