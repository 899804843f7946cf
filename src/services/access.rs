use serde::Serialize;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};
use crate::models::{
    session::Session,
    subscription::{Subscription, SubscriptionStatus},
};
use crate::services::database::DatabaseService;

#[derive(Debug, Serialize)]
pub struct AccessStatus {
    pub tenant_id: Uuid,
    pub has_access: bool,
    pub subscription: Option<Subscription>,
}

/// Gate for tenant-scoped features. Only an `active` subscription opens it;
/// pending and past-due tenants are sent to billing.
#[derive(Clone)]
pub struct AccessGate {
    db: DatabaseService,
}

impl AccessGate {
    pub fn new(db: DatabaseService) -> Self {
        Self { db }
    }

    pub async fn has_access(&self, tenant_id: &Uuid) -> bool {
        matches!(
            self.db.get_open_subscription(tenant_id).await,
            Some(Subscription { status: SubscriptionStatus::Active, .. })
        )
    }

    pub async fn require_access(&self, session: &Session) -> BillingResult<()> {
        let tenant_id = session.tenant()?;
        if self.has_access(&tenant_id).await {
            return Ok(());
        }
        log::debug!("Access denied for tenant {} (user {})", tenant_id, session.user_id);
        Err(BillingError::SubscriptionRequired(tenant_id))
    }

    pub async fn status(&self, tenant_id: Uuid) -> AccessStatus {
        let subscription = self.db.get_open_subscription(&tenant_id).await;
        AccessStatus {
            tenant_id,
            has_access: matches!(&subscription, Some(s) if s.status == SubscriptionStatus::Active),
            subscription,
        }
    }
}
