use std::collections::HashSet;
use std::sync::Arc;

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};

use crate::authorizer::RoleAuthorizer;
use crate::certstore::CertificateStore;
use crate::error::AuthError;
use crate::keystore::KeyStore;
use crate::metrics::MetricsRecorder;
use crate::resolvers::{CombinedResolver, RequestCredentials, TlsPeerInfo};
use crate::util::{extract_api_key_header, extract_bearer_token, extract_request_info};

#[derive(Clone)]
pub struct AppState {
    pub resolver: Arc<CombinedResolver>,
    pub authorizer: RoleAuthorizer,
    pub cert_store: Arc<CertificateStore>,
    pub key_store: Arc<KeyStore>,
    pub bypass_paths: Arc<HashSet<String>>,
    pub metrics: Arc<dyn MetricsRecorder>,
}

/// Best-effort label for which method a failed request attempted.
fn attempted_method(creds: &RequestCredentials) -> &'static str {
    if creds.api_key.is_some() {
        return "api_key";
    }
    if let Some(bearer) = &creds.bearer {
        if crate::resolvers::looks_like_jwt(bearer) {
            return "jwt";
        }
        return "api_key";
    }
    if creds.tls.is_some() {
        return "mtls";
    }
    "none"
}

/// Authentication gate for every non-bypass route. On success the
/// resolved `AuthContext` rides the request extensions; handlers and
/// role checks read it from there.
pub async fn authenticate(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let path = request.uri().path().to_string();
    if state.bypass_paths.contains(&path) {
        return Ok(next.run(request).await);
    }

    let headers = request.headers();
    let credentials = RequestCredentials {
        tls: request.extensions().get::<TlsPeerInfo>().cloned(),
        bearer: extract_bearer_token(headers).map(String::from),
        api_key: extract_api_key_header(headers).map(String::from),
    };

    match state.resolver.resolve(&credentials).await {
        Ok(ctx) => {
            state.metrics.auth_request(ctx.method.as_str(), "success");
            tracing::debug!(
                principal = %ctx.principal_id,
                method = ctx.method.as_str(),
                path,
                "request authenticated"
            );
            request.extensions_mut().insert(ctx);
            Ok(next.run(request).await)
        }
        Err(e) => {
            let method = attempted_method(&credentials);
            let (ip, user_agent) = extract_request_info(headers);
            state.metrics.auth_request(method, "failure");
            state.metrics.auth_error(method, e.reason());
            tracing::warn!(
                method,
                reason = e.reason(),
                path,
                ip = ip.as_deref().unwrap_or("-"),
                user_agent = user_agent.as_deref().unwrap_or("-"),
                "request rejected"
            );
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attempted_method_labels() {
        let mut creds = RequestCredentials::default();
        assert_eq!(attempted_method(&creds), "none");

        creds.bearer = Some("mg_opaque".to_string());
        assert_eq!(attempted_method(&creds), "api_key");

        creds.bearer = Some("eyJhbGciOiJFZERTQSJ9.eyJzdWIiOiJ4In0.c2ln".to_string());
        assert_eq!(attempted_method(&creds), "jwt");

        creds.api_key = Some("mg_header".to_string());
        assert_eq!(attempted_method(&creds), "api_key");
    }
}
