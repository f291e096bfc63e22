//! Request-scoped authentication context.
//!
//! An `AuthContext` is produced once per successfully authenticated
//! request and inserted into the request's extensions. It is never
//! mutated after creation.

use std::collections::HashSet;

use serde::Serialize;

/// How a request was authenticated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    Mtls,
    Jwt,
    ApiKey,
    Oidc,
}

impl AuthMethod {
    /// Label for metrics and structured logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthMethod::Mtls => "mtls",
            AuthMethod::Jwt => "jwt",
            AuthMethod::ApiKey => "api_key",
            AuthMethod::Oidc => "oidc",
        }
    }
}

/// The normalized result of authenticating one request.
#[derive(Debug, Clone, Serialize)]
pub struct AuthContext {
    pub method: AuthMethod,
    pub principal_id: String,
    pub roles: HashSet<String>,
    /// Unix timestamp after which the backing credential is no longer
    /// valid, when the credential carries one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
}

impl AuthContext {
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_labels() {
        assert_eq!(AuthMethod::Mtls.as_str(), "mtls");
        assert_eq!(AuthMethod::ApiKey.as_str(), "api_key");
    }

    #[test]
    fn test_has_role() {
        let ctx = AuthContext {
            method: AuthMethod::Jwt,
            principal_id: "svc-a".to_string(),
            roles: ["admin".to_string()].into_iter().collect(),
            expires_at: None,
        };
        assert!(ctx.has_role("admin"));
        assert!(!ctx.has_role("user"));
    }
}
