use serde::Serialize;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};
use crate::models::common::Role;

/// Caller identity resolved at the edge from the bearer token. Handlers
/// receive it explicitly; nothing below the edge reads ambient state.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Session {
    pub user_id: Uuid,
    pub tenant_id: Option<Uuid>,
    pub role: Role,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    pub fn new(user_id: Uuid, tenant_id: Option<Uuid>, role: Role, expires_at: DateTime<Utc>) -> Self {
        Self {
            user_id,
            tenant_id,
            role,
            expires_at,
        }
    }

    pub fn tenant(&self) -> BillingResult<Uuid> {
        self.tenant_id
            .ok_or_else(|| BillingError::Forbidden("session is not bound to a school".to_string()))
    }

    pub fn require_platform_admin(&self) -> BillingResult<()> {
        match self.role {
            Role::PlatformAdmin => Ok(()),
            Role::SchoolAdmin | Role::Teacher | Role::Parent => Err(BillingError::Forbidden(
                "platform administrator role required".to_string(),
            )),
        }
    }

    /// Billing mutations belong to the school's own administrator.
    pub fn require_billing_admin(&self, tenant_id: Uuid) -> BillingResult<()> {
        match self.role {
            Role::SchoolAdmin if self.tenant_id == Some(tenant_id) => Ok(()),
            Role::SchoolAdmin => Err(BillingError::Forbidden(
                "cannot manage billing of another school".to_string(),
            )),
            Role::PlatformAdmin | Role::Teacher | Role::Parent => Err(BillingError::Forbidden(
                "school administrator role required".to_string(),
            )),
        }
    }

    pub fn require_tenant_read(&self, tenant_id: Uuid) -> BillingResult<()> {
        match self.role {
            Role::PlatformAdmin => Ok(()),
            Role::SchoolAdmin | Role::Teacher | Role::Parent if self.tenant_id == Some(tenant_id) => Ok(()),
            Role::SchoolAdmin | Role::Teacher | Role::Parent => Err(BillingError::Forbidden(
                "cannot read another school's billing".to_string(),
            )),
        }
    }
}
