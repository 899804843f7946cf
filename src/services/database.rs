use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::error::{BillingError, BillingResult};
use crate::models::{
    plan::SubscriptionPlan,
    subscription::{Subscription, SubscriptionStatus},
};

/// Relational-style store for plans and subscriptions. Each method runs in
/// one critical section, so the uniqueness constraints below hold under
/// concurrent requests without any locking in the callers:
///
/// - plan names are unique (case-insensitive)
/// - a tenant holds at most one open subscription
/// - a payment intent reference activates at most one subscription
/// - a plan referenced by any subscription cannot be deleted
#[derive(Clone, Default)]
pub struct DatabaseService {
    tables: Arc<RwLock<Tables>>,
}

#[derive(Default)]
struct Tables {
    plans: Vec<SubscriptionPlan>,
    subscriptions: Vec<Subscription>,
    consumed_intents: HashMap<String, Uuid>,
}

impl Tables {
    fn plan_name_taken(&self, name: &str, except: Option<Uuid>) -> bool {
        self.plans
            .iter()
            .any(|p| Some(p.id) != except && p.has_name(name))
    }

    fn subscription_mut(&mut self, id: &Uuid) -> BillingResult<&mut Subscription> {
        self.subscriptions
            .iter_mut()
            .find(|s| s.id == *id)
            .ok_or_else(|| BillingError::NotFound(format!("Subscription {}", id)))
    }
}

impl DatabaseService {
    pub fn new() -> Self {
        Self::default()
    }

    // Plan operations
    pub async fn insert_plan(&self, plan: SubscriptionPlan) -> BillingResult<SubscriptionPlan> {
        let mut tables = self.tables.write().await;
        if tables.plan_name_taken(&plan.name, None) {
            return Err(BillingError::validation(
                "name",
                format!("a plan named '{}' already exists", plan.name),
            ));
        }

        tables.plans.push(plan.clone());
        log::info!("Created plan: {} ({})", plan.name, plan.id);
        Ok(plan)
    }

    /// All plans in insertion order.
    pub async fn list_plans(&self) -> Vec<SubscriptionPlan> {
        self.tables.read().await.plans.clone()
    }

    /// Applies `change` to a copy of the plan and commits it only if the
    /// result still satisfies the name constraint.
    pub async fn update_plan<F>(&self, plan_id: &Uuid, change: F) -> BillingResult<SubscriptionPlan>
    where
        F: FnOnce(&mut SubscriptionPlan),
    {
        let mut tables = self.tables.write().await;
        let index = tables
            .plans
            .iter()
            .position(|p| p.id == *plan_id)
            .ok_or_else(|| BillingError::NotFound(format!("Plan {}", plan_id)))?;

        let mut updated = tables.plans[index].clone();
        change(&mut updated);
        if tables.plan_name_taken(&updated.name, Some(updated.id)) {
            return Err(BillingError::validation(
                "name",
                format!("a plan named '{}' already exists", updated.name),
            ));
        }

        tables.plans[index] = updated.clone();
        log::info!("Updated plan: {} ({}) active={}", updated.name, updated.id, updated.active);
        Ok(updated)
    }

    pub async fn delete_plan(&self, plan_id: &Uuid) -> BillingResult<()> {
        let mut tables = self.tables.write().await;
        let index = tables
            .plans
            .iter()
            .position(|p| p.id == *plan_id)
            .ok_or_else(|| BillingError::NotFound(format!("Plan {}", plan_id)))?;

        let references = tables.subscriptions.iter().filter(|s| s.plan_id == *plan_id).count();
        if references > 0 {
            return Err(BillingError::Conflict(format!(
                "plan {} is referenced by {} subscription(s); deactivate it instead",
                plan_id, references
            )));
        }

        let removed = tables.plans.remove(index);
        log::info!("Deleted plan: {} ({})", removed.name, removed.id);
        Ok(())
    }

    // Subscription operations
    pub async fn insert_subscription(&self, subscription: Subscription) -> BillingResult<Subscription> {
        let mut tables = self.tables.write().await;
        if let Some(existing) = tables
            .subscriptions
            .iter()
            .find(|s| s.tenant_id == subscription.tenant_id && s.status.is_open())
        {
            return Err(BillingError::Conflict(format!(
                "tenant {} already has subscription {} in status {:?}",
                subscription.tenant_id, existing.id, existing.status
            )));
        }

        tables.subscriptions.push(subscription.clone());
        log::info!(
            "Created subscription: ID={}, Tenant={}, Plan={}, Amount={}",
            subscription.id, subscription.tenant_id, subscription.plan_name, subscription.amount
        );
        Ok(subscription)
    }

    pub async fn get_subscription(&self, subscription_id: &Uuid) -> Option<Subscription> {
        let tables = self.tables.read().await;
        tables.subscriptions.iter().find(|s| s.id == *subscription_id).cloned()
    }

    pub async fn get_open_subscription(&self, tenant_id: &Uuid) -> Option<Subscription> {
        let tables = self.tables.read().await;
        tables
            .subscriptions
            .iter()
            .find(|s| s.tenant_id == *tenant_id && s.status.is_open())
            .cloned()
    }

    /// Newest first.
    pub async fn get_subscriptions_by_tenant(&self, tenant_id: &Uuid) -> Vec<Subscription> {
        let tables = self.tables.read().await;
        let mut subscriptions: Vec<_> = tables
            .subscriptions
            .iter()
            .filter(|s| s.tenant_id == *tenant_id)
            .cloned()
            .collect();
        subscriptions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        subscriptions
    }

    pub async fn get_subscriptions_by_status(&self, status: SubscriptionStatus) -> Vec<Subscription> {
        let tables = self.tables.read().await;
        tables
            .subscriptions
            .iter()
            .filter(|s| s.status == status)
            .cloned()
            .collect()
    }

    /// Read-modify-write of one subscription. `change` sees the current row
    /// and may reject the transition; nothing is written on error.
    pub async fn update_subscription<T, F>(&self, subscription_id: &Uuid, change: F) -> BillingResult<T>
    where
        F: FnOnce(&mut Subscription) -> BillingResult<T>,
    {
        let mut tables = self.tables.write().await;
        let row = tables.subscription_mut(subscription_id)?;
        let mut updated = row.clone();
        let out = change(&mut updated)?;
        *row = updated;
        Ok(out)
    }

    /// Applies a captured payment to the subscription it was opened for,
    /// recording the intent as consumed. The intent must be the one currently
    /// recorded on the row; a renewal reserves its intent there before
    /// charging. Returns `false` when this intent had already been applied to
    /// the same subscription, in which case nothing changes.
    pub async fn apply_payment<F>(
        &self,
        subscription_id: &Uuid,
        intent_ref: &str,
        apply: F,
    ) -> BillingResult<(Subscription, bool)>
    where
        F: FnOnce(&mut Subscription),
    {
        let mut tables = self.tables.write().await;
        match tables.consumed_intents.get(intent_ref).copied() {
            Some(owner) if owner == *subscription_id => {
                let current = tables.subscription_mut(subscription_id)?.clone();
                return Ok((current, false));
            }
            Some(owner) => {
                return Err(BillingError::Conflict(format!(
                    "payment intent {} was already used by subscription {}",
                    intent_ref, owner
                )));
            }
            None => {}
        }

        let row = tables.subscription_mut(subscription_id)?;
        if row.status == SubscriptionStatus::Canceled {
            return Err(BillingError::Conflict(format!(
                "subscription {} is canceled and cannot accept a payment",
                subscription_id
            )));
        }
        if row.payment_intent_ref.as_deref() != Some(intent_ref) {
            return Err(BillingError::Conflict(format!(
                "payment intent {} is no longer current for subscription {}",
                intent_ref, subscription_id
            )));
        }
        apply(row);
        let updated = row.clone();

        tables
            .consumed_intents
            .insert(intent_ref.to_string(), *subscription_id);
        Ok((updated, true))
    }

    pub async fn intent_owner(&self, intent_ref: &str) -> Option<Uuid> {
        self.tables.read().await.consumed_intents.get(intent_ref).copied()
    }

    /// Deletes a pending subscription that never completed payment.
    pub async fn discard_pending(&self, subscription_id: &Uuid) -> BillingResult<bool> {
        let mut tables = self.tables.write().await;
        let before = tables.subscriptions.len();
        tables.subscriptions.retain(|s| {
            !(s.id == *subscription_id && s.status == SubscriptionStatus::PendingPayment)
        });
        Ok(tables.subscriptions.len() < before)
    }

    /// Deletes one pending subscription if it is still untouched for `ttl`
    /// and still waiting on `intent_ref`. A row that moved on since the
    /// caller looked at it is kept.
    pub async fn discard_abandoned(
        &self,
        subscription_id: &Uuid,
        intent_ref: Option<&str>,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> bool {
        let mut tables = self.tables.write().await;
        let before = tables.subscriptions.len();
        tables.subscriptions.retain(|s| {
            !(s.id == *subscription_id
                && s.is_abandoned(now, ttl)
                && s.payment_intent_ref.as_deref() == intent_ref)
        });
        tables.subscriptions.len() < before
    }

    // Utility methods
    pub async fn get_statistics(&self) -> DatabaseStats {
        let tables = self.tables.read().await;
        let count = |status: SubscriptionStatus| {
            tables.subscriptions.iter().filter(|s| s.status == status).count() as u64
        };

        DatabaseStats {
            total_plans: tables.plans.len() as u64,
            total_subscriptions: tables.subscriptions.len() as u64,
            active_subscriptions: count(SubscriptionStatus::Active),
            pending_subscriptions: count(SubscriptionStatus::PendingPayment),
            past_due_subscriptions: count(SubscriptionStatus::PastDue),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct DatabaseStats {
    pub total_plans: u64,
    pub total_subscriptions: u64,
    pub active_subscriptions: u64,
    pub pending_subscriptions: u64,
    pub past_due_subscriptions: u64,
}
