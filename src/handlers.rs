//! HTTP surface: health, identity introspection, and API key admin.

use std::collections::HashSet;

use axum::{
    extract::{Path, State},
    response::Json,
    routing::{delete, get, post},
    Extension, Router,
};
use serde::Deserialize;
use serde_json::json;

use crate::context::AuthContext;
use crate::error::{AuthError, Result};
use crate::middleware::{authenticate, AppState};

/// Full router with the authentication gate applied. Paths listed in
/// the configured bypass set skip the gate inside the middleware.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/whoami", get(whoami))
        .route("/admin/keys", post(create_key))
        .route("/admin/keys/{key_id}", delete(revoke_key))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            authenticate,
        ))
        .with_state(state)
}

/// Liveness plus certificate expiry, for probes and dashboards.
pub async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let certificate = state.cert_store.expiry_info().map(|(not_after, remaining)| {
        json!({
            "not_after": not_after,
            "remaining_secs": remaining,
        })
    });
    Json(json!({
        "status": "ok",
        "certificate": certificate,
    }))
}

/// Echo the resolved identity. Useful for debugging mesh policy.
pub async fn whoami(Extension(ctx): Extension<AuthContext>) -> Json<AuthContext> {
    Json(ctx)
}

#[derive(Deserialize)]
pub struct CreateKeyRequest {
    pub name: String,
    #[serde(default)]
    pub roles: HashSet<String>,
    pub expires_at: Option<i64>,
}

pub async fn create_key(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Json(req): Json<CreateKeyRequest>,
) -> Result<Json<serde_json::Value>> {
    state.authorizer.require(Some(&ctx), &["admin"])?;
    if req.name.is_empty() {
        return Err(AuthError::BadRequest("key name must not be empty".into()));
    }

    let (record, plaintext) = state.key_store.create(&req.name, req.roles, req.expires_at);
    tracing::info!(key_id = %record.id, name = %record.name, actor = %ctx.principal_id, "API key created");

    // The plaintext appears in this response and nowhere else.
    Ok(Json(json!({
        "key": record,
        "api_key": plaintext,
    })))
}

pub async fn revoke_key(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(key_id): Path<String>,
) -> Result<Json<serde_json::Value>> {
    state.authorizer.require(Some(&ctx), &["admin"])?;
    if !state.key_store.revoke(&key_id) {
        return Err(AuthError::BadRequest(format!("unknown key id: {key_id}")));
    }
    tracing::info!(key_id = %key_id, actor = %ctx.principal_id, "API key revoked");
    Ok(Json(json!({ "revoked": key_id })))
}
