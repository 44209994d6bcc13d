use crate::errors::ServiceError;
use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use std::str::FromStr;
use uuid::Uuid;

/// Caller role, forwarded by the edge gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum Role {
    Customer,
    Provider,
    Admin,
}

/// Identity established upstream and forwarded in trusted headers
///
/// The gateway terminates authentication; this service only reads the
/// `x-user-id`, `x-user-email` and `x-user-role` headers it injects.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub id: Uuid,
    pub email: String,
    pub role: Role,
}

impl AuthenticatedUser {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Ownership guard; admins can act on any resource
    pub fn can_access(&self, owner_id: Uuid) -> bool {
        self.is_admin() || self.id == owner_id
    }

    pub fn require_admin(&self) -> Result<(), ServiceError> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(ServiceError::Forbidden("admin role required".to_string()))
        }
    }

    pub fn require_role(&self, role: Role) -> Result<(), ServiceError> {
        if self.role == role || self.is_admin() {
            Ok(())
        } else {
            Err(ServiceError::Forbidden(format!("{} role required", role)))
        }
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthenticatedUser
where
    S: Send + Sync,
{
    type Rejection = ServiceError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let id = header_value(parts, "x-user-id")?;
        let id = Uuid::parse_str(&id)
            .map_err(|_| ServiceError::Unauthorized("invalid x-user-id header".to_string()))?;

        let email = header_value(parts, "x-user-email")?;

        let role = header_value(parts, "x-user-role")?;
        let role = Role::from_str(&role)
            .map_err(|_| ServiceError::Unauthorized("unrecognized x-user-role header".to_string()))?;

        Ok(Self { id, email, role })
    }
}

fn header_value(parts: &Parts, name: &str) -> Result<String, ServiceError> {
    parts
        .headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .ok_or_else(|| ServiceError::Unauthorized(format!("missing {} header", name)))
}
