use std::collections::{HashMap, HashSet};
use std::env;
use std::time::Duration;

/// An OIDC issuer this workload accepts tokens from.
#[derive(Debug, Clone)]
pub struct TrustedIssuer {
    pub issuer: String,
    pub jwks_url: String,
    pub audience: String,
}

/// Which authentication methods are required / accepted per request.
#[derive(Debug, Clone, Copy, Default)]
pub struct AuthPolicy {
    pub require_mtls: bool,
    pub require_jwt: bool,
    pub require_oidc: bool,
    pub allow_any: bool,
}

impl AuthPolicy {
    /// mTLS is attempted when it is either required or one of the
    /// "any" options.
    pub fn mtls_enabled(&self) -> bool {
        self.require_mtls || self.allow_any
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub dev_mode: bool,

    pub policy: AuthPolicy,
    /// Request paths that skip authentication entirely.
    pub bypass_paths: HashSet<String>,

    // Certificate lifecycle
    pub cert_path: Option<String>,
    pub key_path: Option<String>,
    pub trust_bundle_path: Option<String>,
    pub rotation_threshold: f64,
    pub rotation_check_interval: Duration,

    // mTLS policy
    pub mtls_allowed_principals: HashSet<String>,
    pub mtls_role_map: HashMap<String, HashSet<String>>,

    // First-party JWT
    pub service_jwt_public_key: Option<String>,
    pub service_jwt_algorithm: String,

    // OIDC
    pub trusted_issuers: Vec<TrustedIssuer>,
    pub jwks_refresh_interval: Duration,
    pub jwks_fetch_timeout: Duration,

    // Resilience
    pub breaker_failure_threshold: u32,
    pub breaker_open_timeout: Duration,
    pub retry_max_retries: u32,
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,
    pub retry_jitter_fraction: f64,
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let dev_mode = env::var("MESHGUARD_ENV")
            .map(|v| v == "dev" || v == "development")
            .unwrap_or(false);

        let host = env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port: u16 = env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(3000);

        Self {
            host,
            port,
            dev_mode,
            policy: AuthPolicy {
                require_mtls: env_bool("REQUIRE_MTLS", false),
                require_jwt: env_bool("REQUIRE_JWT", false),
                require_oidc: env_bool("REQUIRE_OIDC", false),
                allow_any: env_bool("ALLOW_ANY", true),
            },
            bypass_paths: env::var("BYPASS_PATHS")
                .unwrap_or_else(|_| "/health".to_string())
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            cert_path: env::var("CERT_PATH").ok(),
            key_path: env::var("KEY_PATH").ok(),
            trust_bundle_path: env::var("TRUST_BUNDLE_PATH").ok(),
            rotation_threshold: env_parse("CERT_ROTATION_THRESHOLD", 0.8),
            rotation_check_interval: Duration::from_secs(env_parse(
                "ROTATION_CHECK_INTERVAL_SECS",
                300,
            )),
            mtls_allowed_principals: env::var("MTLS_ALLOWED_PRINCIPALS")
                .unwrap_or_default()
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            mtls_role_map: parse_role_map(&env::var("MTLS_ROLE_MAP").unwrap_or_default()),
            service_jwt_public_key: env::var("SERVICE_JWT_PUBLIC_KEY").ok(),
            service_jwt_algorithm: env::var("SERVICE_JWT_ALGORITHM")
                .unwrap_or_else(|_| "EdDSA".to_string()),
            trusted_issuers: parse_issuers(&env::var("OIDC_ISSUERS").unwrap_or_default()),
            jwks_refresh_interval: Duration::from_secs(env_parse(
                "JWKS_REFRESH_INTERVAL_SECS",
                300,
            )),
            jwks_fetch_timeout: Duration::from_secs(env_parse("JWKS_FETCH_TIMEOUT_SECS", 5)),
            breaker_failure_threshold: env_parse("BREAKER_FAILURE_THRESHOLD", 5),
            breaker_open_timeout: Duration::from_secs(env_parse("BREAKER_OPEN_TIMEOUT_SECS", 30)),
            retry_max_retries: env_parse("RETRY_MAX_RETRIES", 2),
            retry_base_delay: Duration::from_millis(env_parse("RETRY_BASE_DELAY_MS", 100)),
            retry_max_delay: Duration::from_millis(env_parse("RETRY_MAX_DELAY_MS", 2000)),
            retry_jitter_fraction: env_parse("RETRY_JITTER_FRACTION", 0.2),
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn env_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .map(|v| matches!(v.as_str(), "1" | "true" | "yes"))
        .unwrap_or(default)
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Parse a principal→roles map of the form
/// `principal=role1,role2;other-principal=role3`.
fn parse_role_map(raw: &str) -> HashMap<String, HashSet<String>> {
    raw.split(';')
        .filter_map(|entry| {
            let (principal, roles) = entry.split_once('=')?;
            let principal = principal.trim();
            if principal.is_empty() {
                return None;
            }
            let roles: HashSet<String> = roles
                .split(',')
                .map(|r| r.trim().to_string())
                .filter(|r| !r.is_empty())
                .collect();
            Some((principal.to_string(), roles))
        })
        .collect()
}

/// Parse trusted OIDC issuers of the form
/// `issuer|jwks_url|audience;issuer2|jwks_url2|audience2`.
fn parse_issuers(raw: &str) -> Vec<TrustedIssuer> {
    raw.split(';')
        .filter_map(|entry| {
            let mut parts = entry.split('|').map(str::trim);
            let issuer = parts.next()?.to_string();
            let jwks_url = parts.next()?.to_string();
            let audience = parts.next()?.to_string();
            if issuer.is_empty() || jwks_url.is_empty() {
                return None;
            }
            Some(TrustedIssuer {
                issuer,
                jwks_url,
                audience,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_role_map() {
        let map = parse_role_map(
            "spiffe://mesh/billing=service,billing;spiffe://mesh/frontend=service",
        );
        assert_eq!(map.len(), 2);
        let billing = &map["spiffe://mesh/billing"];
        assert!(billing.contains("service"));
        assert!(billing.contains("billing"));
        assert_eq!(map["spiffe://mesh/frontend"].len(), 1);
    }

    #[test]
    fn test_parse_role_map_ignores_garbage() {
        let map = parse_role_map("no-equals-sign;=missing-principal;ok=role");
        assert_eq!(map.len(), 1);
        assert!(map.contains_key("ok"));
    }

    #[test]
    fn test_parse_issuers() {
        let issuers = parse_issuers(
            "https://idp.example.com|https://idp.example.com/jwks|meshguard;\
             https://other.example.com|https://other.example.com/keys|api",
        );
        assert_eq!(issuers.len(), 2);
        assert_eq!(issuers[0].issuer, "https://idp.example.com");
        assert_eq!(issuers[1].audience, "api");
    }

    #[test]
    fn test_parse_issuers_empty() {
        assert!(parse_issuers("").is_empty());
    }
}
