use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AuthError {
    // Client input errors (malformed requests, never retried)
    #[error("bad request: {0}")]
    BadRequest(String),

    // Authentication failures (401)
    #[error("authentication failed")]
    AuthenticationFailed,

    #[error("no TLS session on connection")]
    NoTls,

    #[error("no peer certificate presented")]
    NoPeerCertificate,

    #[error("peer certificate chain invalid: {0}")]
    ChainInvalid(String),

    #[error("principal '{0}' is not allowed")]
    PrincipalNotAllowed(String),

    #[error("missing bearer token")]
    MissingToken,

    #[error("token algorithm mismatch: expected {expected}, got {got}")]
    AlgorithmMismatch { expected: String, got: String },

    #[error("token verification failed: {0}")]
    TokenInvalid(String),

    #[error("token expired")]
    TokenExpired,

    #[error("token not yet valid")]
    TokenNotYetValid,

    #[error("missing required claim: {0}")]
    MissingClaims(&'static str),

    #[error("token issuer is not trusted")]
    UntrustedIssuer,

    #[error("missing API key")]
    MissingKey,

    #[error("unknown API key")]
    UnknownKey,

    #[error("API key expired")]
    ExpiredKey,

    #[error("API key revoked")]
    RevokedKey,

    // Authorization failures (403)
    #[error("forbidden: {0}")]
    Forbidden(String),

    // Certificate store
    #[error("no certificate stored")]
    NoCertificate,

    #[error("certificate expired")]
    CertificateExpired,

    #[error("certificate not yet valid")]
    CertificateNotYetValid,

    #[error("certificate missing required key usage")]
    InvalidKeyUsage,

    #[error("certificate missing required extended key usage")]
    MissingExtendedKeyUsage,

    #[error("certificate parse error: {0}")]
    CertificateParse(String),

    // Transient dependency failures (503)
    #[error("circuit breaker '{0}' is open")]
    CircuitOpen(String),

    #[error("identity provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("operation canceled")]
    Canceled,

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, AuthError>;

impl AuthError {
    /// Short reason code for metrics and structured logs.
    pub fn reason(&self) -> &'static str {
        match self {
            AuthError::BadRequest(_) => "bad_request",
            AuthError::AuthenticationFailed => "authentication_failed",
            AuthError::NoTls => "no_tls",
            AuthError::NoPeerCertificate => "no_peer_certificate",
            AuthError::ChainInvalid(_) => "chain_invalid",
            AuthError::PrincipalNotAllowed(_) => "principal_not_allowed",
            AuthError::MissingToken => "missing_token",
            AuthError::AlgorithmMismatch { .. } => "algorithm_mismatch",
            AuthError::TokenInvalid(_) => "token_invalid",
            AuthError::TokenExpired => "token_expired",
            AuthError::TokenNotYetValid => "token_not_yet_valid",
            AuthError::MissingClaims(_) => "missing_claims",
            AuthError::UntrustedIssuer => "untrusted_issuer",
            AuthError::MissingKey => "missing_key",
            AuthError::UnknownKey => "unknown_key",
            AuthError::ExpiredKey => "expired_key",
            AuthError::RevokedKey => "revoked_key",
            AuthError::Forbidden(_) => "forbidden",
            AuthError::NoCertificate => "no_certificate",
            AuthError::CertificateExpired => "certificate_expired",
            AuthError::CertificateNotYetValid => "certificate_not_yet_valid",
            AuthError::InvalidKeyUsage => "invalid_key_usage",
            AuthError::MissingExtendedKeyUsage => "missing_extended_key_usage",
            AuthError::CertificateParse(_) => "certificate_parse",
            AuthError::CircuitOpen(_) => "circuit_open",
            AuthError::ProviderUnavailable(_) => "provider_unavailable",
            AuthError::Canceled => "canceled",
            AuthError::Internal(_) => "internal",
        }
    }

    /// Whether a failure is worth retrying. Only remote-dependency
    /// failures qualify; bad credentials stay bad.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AuthError::ProviderUnavailable(_) | AuthError::Internal(_)
        )
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AuthError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AuthError::Forbidden(_) => StatusCode::FORBIDDEN,
            AuthError::CircuitOpen(_)
            | AuthError::ProviderUnavailable(_)
            | AuthError::Canceled => StatusCode::SERVICE_UNAVAILABLE,
            AuthError::NoCertificate
            | AuthError::CertificateExpired
            | AuthError::CertificateNotYetValid
            | AuthError::InvalidKeyUsage
            | AuthError::MissingExtendedKeyUsage
            | AuthError::CertificateParse(_)
            | AuthError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::UNAUTHORIZED,
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status();

        let (error, details) = match &self {
            AuthError::BadRequest(msg) => ("Bad request", Some(msg.clone())),
            AuthError::Forbidden(msg) => ("Forbidden", Some(msg.clone())),
            AuthError::CircuitOpen(_) | AuthError::ProviderUnavailable(_) | AuthError::Canceled => {
                tracing::warn!("request failed on dependency: {}", self);
                ("Service unavailable", None)
            }
            e if status == StatusCode::INTERNAL_SERVER_ERROR => {
                tracing::error!("internal error: {}", e);
                ("Internal server error", None)
            }
            // 401s get a uniform body; the reason goes to logs, not the caller
            _ => ("Unauthorized", None),
        };

        let body = Json(ErrorResponse {
            error: error.to_string(),
            details,
        });

        (status, body).into_response()
    }
}
