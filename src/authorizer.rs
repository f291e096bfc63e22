//! Role-based authorization over resolved identities.

use crate::context::AuthContext;
use crate::error::{AuthError, Result};

/// Grants access when the caller holds at least one of the roles a
/// route demands. Authentication and authorization stay distinct: a
/// missing identity is a 401, a present identity without the role is
/// a 403.
#[derive(Debug, Clone, Copy, Default)]
pub struct RoleAuthorizer;

impl RoleAuthorizer {
    /// An empty `required` list means the route needs authentication
    /// but no particular role.
    pub fn require(&self, ctx: Option<&AuthContext>, required: &[&str]) -> Result<()> {
        let ctx = ctx.ok_or(AuthError::AuthenticationFailed)?;

        if required.is_empty() {
            return Ok(());
        }

        if required.iter().any(|role| ctx.has_role(role)) {
            return Ok(());
        }

        Err(AuthError::Forbidden(format!(
            "principal '{}' lacks required role (one of: {})",
            ctx.principal_id,
            required.join(", ")
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::AuthMethod;

    fn ctx_with_roles(roles: &[&str]) -> AuthContext {
        AuthContext {
            method: AuthMethod::Jwt,
            principal_id: "billing".to_string(),
            roles: roles.iter().map(|r| r.to_string()).collect(),
            expires_at: None,
        }
    }

    #[test]
    fn test_unauthenticated_is_rejected() {
        let authorizer = RoleAuthorizer;
        assert!(matches!(
            authorizer.require(None, &["payments.read"]),
            Err(AuthError::AuthenticationFailed)
        ));
    }

    #[test]
    fn test_empty_requirement_passes_authenticated() {
        let authorizer = RoleAuthorizer;
        let ctx = ctx_with_roles(&[]);
        assert!(authorizer.require(Some(&ctx), &[]).is_ok());
    }

    #[test]
    fn test_any_matching_role_suffices() {
        let authorizer = RoleAuthorizer;
        let ctx = ctx_with_roles(&["payments.read"]);
        assert!(authorizer
            .require(Some(&ctx), &["payments.write", "payments.read"])
            .is_ok());
    }

    #[test]
    fn test_no_matching_role_is_forbidden() {
        let authorizer = RoleAuthorizer;
        let ctx = ctx_with_roles(&["telemetry.write"]);
        assert!(matches!(
            authorizer.require(Some(&ctx), &["payments.read"]),
            Err(AuthError::Forbidden(_))
        ));
    }
}
