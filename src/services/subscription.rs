use std::sync::Arc;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::config::BillingSettings;
use crate::error::{BillingError, BillingResult};
use crate::models::{
    common::BillingCycle,
    payment::{CancelOutcome, IntentPurpose, IntentRequest, PaymentIntent},
    subscription::{Subscription, SubscriptionStatus},
};
use crate::services::{
    catalog::PlanCatalog,
    database::DatabaseService,
    gateway::{GatewayError, IntentContext, PaymentGateway},
};

#[derive(Debug, Serialize)]
pub struct StartedSubscription {
    pub subscription: Subscription,
    pub payment_intent: PaymentIntent,
}

/// What happened to a confirmation attempt. A decline is a normal outcome.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Completion {
    Activated { subscription: Subscription },
    Declined { subscription: Subscription, reason: String },
    /// The intent was applied earlier and no longer backs the current
    /// period; nothing changed.
    AlreadyApplied { subscription: Subscription },
}

impl Completion {
    /// Outcome for an intent that was already consumed by this subscription.
    fn replayed(subscription: Subscription, intent_ref: &str) -> Self {
        let current = subscription.status == SubscriptionStatus::Active
            && subscription.payment_intent_ref.as_deref() == Some(intent_ref);
        if current {
            Completion::Activated { subscription }
        } else {
            Completion::AlreadyApplied { subscription }
        }
    }

    pub fn subscription(&self) -> &Subscription {
        match self {
            Completion::Activated { subscription }
            | Completion::Declined { subscription, .. }
            | Completion::AlreadyApplied { subscription } => subscription,
        }
    }

    pub fn succeeded(&self) -> bool {
        matches!(self, Completion::Activated { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RenewalOutcome {
    Renewed { end_date: Option<DateTime<Utc>> },
    PastDue { reason: String },
    /// Charged, but the subscription changed before the period could be
    /// extended; the charge was given back.
    Refunded { reason: String },
    Skipped,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct SweepReport {
    pub renewed: usize,
    pub moved_past_due: usize,
    pub refunded: usize,
    pub reclaimed: usize,
    pub activated: usize,
    pub expired: usize,
    pub errors: usize,
}

/// Owns every subscription transition. Nothing else writes subscription rows.
#[derive(Clone)]
pub struct SubscriptionManager {
    db: DatabaseService,
    catalog: PlanCatalog,
    gateway: Arc<dyn PaymentGateway>,
    settings: BillingSettings,
}

impl SubscriptionManager {
    pub fn new(
        db: DatabaseService,
        catalog: PlanCatalog,
        gateway: Arc<dyn PaymentGateway>,
        settings: BillingSettings,
    ) -> Self {
        Self {
            db,
            catalog,
            gateway,
            settings,
        }
    }

    pub fn gateway_name(&self) -> &'static str {
        self.gateway.name()
    }

    pub async fn start_subscription(
        &self,
        tenant_id: Uuid,
        plan_name: &str,
        billing_cycle: BillingCycle,
    ) -> BillingResult<StartedSubscription> {
        let plan = self.catalog.find_by_name(plan_name).await?;
        if !plan.active {
            return Err(BillingError::InactivePlan(plan.name));
        }

        // Reserve the tenant's slot first; the store rejects a second open
        // subscription, so concurrent starts cannot both get this far.
        let pending = Subscription::new(tenant_id, &plan, billing_cycle, &self.settings.currency);
        let pending = self.db.insert_subscription(pending).await?;

        let context = IntentContext {
            subscription_id: pending.id,
            tenant_id,
            currency: &self.settings.currency,
            generation: pending.generation(),
        };
        let intent = match self.gateway.create_payment_intent(&plan, billing_cycle, context).await {
            Ok(intent) => intent,
            Err(e) => {
                log::warn!("Payment intent failed for subscription {}: {}", pending.id, e);
                self.db.discard_pending(&pending.id).await?;
                return Err(e.into());
            }
        };

        let reference = intent.reference.clone();
        let subscription = self
            .db
            .update_subscription(&pending.id, |s| {
                s.payment_intent_ref = Some(reference);
                s.updated_at = Utc::now();
                Ok(s.clone())
            })
            .await?;

        log::info!(
            "Subscription {} pending payment: tenant={} plan={} cycle={} amount={}",
            subscription.id, tenant_id, subscription.plan_name, billing_cycle, subscription.amount
        );

        Ok(StartedSubscription {
            subscription,
            payment_intent: intent,
        })
    }

    pub async fn complete_subscription(
        &self,
        subscription_id: &Uuid,
        intent_ref: &str,
        payment_method: Option<&str>,
    ) -> BillingResult<Completion> {
        // Replays of an already-applied intent return the current state
        // without touching the processor.
        if let Some(owner) = self.db.intent_owner(intent_ref).await {
            if owner == *subscription_id {
                log::info!("Intent {} already applied to subscription {}", intent_ref, owner);
                let subscription = self.get_subscription(subscription_id).await?;
                return Ok(Completion::replayed(subscription, intent_ref));
            }
            return Err(BillingError::Conflict(format!(
                "payment intent {} belongs to another subscription",
                intent_ref
            )));
        }

        // Active is let through: a concurrent confirmation of this same intent
        // may have landed since the check above, and apply_payment settles it.
        let subscription = self.get_subscription(subscription_id).await?;
        if subscription.status == SubscriptionStatus::Canceled {
            return Err(BillingError::Conflict(format!(
                "subscription {} is canceled",
                subscription_id
            )));
        }
        if subscription.payment_intent_ref.as_deref() != Some(intent_ref) {
            return Err(BillingError::validation(
                "payment_intent_ref",
                "does not match the subscription's current payment intent",
            ));
        }

        let confirmation = self.gateway.confirm_payment(intent_ref, payment_method).await?;

        if !confirmation.succeeded {
            let reason = confirmation
                .reason
                .unwrap_or_else(|| "payment was declined".to_string());
            log::info!("Payment declined for subscription {}: {}", subscription_id, reason);

            let recorded = reason.clone();
            let subscription = self
                .db
                .update_subscription(subscription_id, |s| {
                    s.record_decline(recorded, Utc::now());
                    Ok(s.clone())
                })
                .await?;
            return Ok(Completion::Declined { subscription, reason });
        }

        let method = confirmation.payment_method;
        let (subscription, applied) = self
            .db
            .apply_payment(subscription_id, intent_ref, |s| s.activate(Utc::now(), method))
            .await?;

        if !applied {
            return Ok(Completion::replayed(subscription, intent_ref));
        }
        log::info!(
            "Subscription {} active until {:?}",
            subscription.id, subscription.end_date
        );
        Ok(Completion::Activated { subscription })
    }

    /// Issues a fresh intent for a subscription awaiting payment, at the
    /// price captured when it started.
    pub async fn refresh_payment_intent(&self, subscription_id: &Uuid) -> BillingResult<PaymentIntent> {
        let subscription = self.get_subscription(subscription_id).await?;
        let purpose = match subscription.status {
            SubscriptionStatus::PendingPayment => IntentPurpose::Retry,
            SubscriptionStatus::PastDue => IntentPurpose::Renewal,
            SubscriptionStatus::Active | SubscriptionStatus::Canceled => {
                return Err(BillingError::Conflict(format!(
                    "subscription {} is {:?} and has no payment outstanding",
                    subscription_id, subscription.status
                )));
            }
        };

        let intent = self.gateway.open_intent(&intent_request(&subscription, purpose)).await?;

        let reference = intent.reference.clone();
        self.db
            .update_subscription(subscription_id, |s| {
                if !matches!(s.status, SubscriptionStatus::PendingPayment | SubscriptionStatus::PastDue) {
                    return Err(BillingError::Conflict(format!(
                        "subscription {} changed to {:?}",
                        s.id, s.status
                    )));
                }
                s.payment_intent_ref = Some(reference);
                s.updated_at = Utc::now();
                Ok(())
            })
            .await?;

        log::info!("Issued payment intent {} for subscription {}", intent.reference, subscription_id);
        Ok(intent)
    }

    /// Idempotent. Pending subscriptions are abandoned, active and past-due
    /// ones end immediately.
    pub async fn cancel_subscription(&self, subscription_id: &Uuid) -> BillingResult<Subscription> {
        let subscription = self
            .db
            .update_subscription(subscription_id, |s| {
                if s.status != SubscriptionStatus::Canceled {
                    s.cancel(Utc::now());
                }
                Ok(s.clone())
            })
            .await?;

        log::info!("Subscription {} canceled (tenant {})", subscription.id, subscription.tenant_id);
        Ok(subscription)
    }

    /// The tenant's current subscription: pending, active or past due.
    pub async fn get_active_subscription(&self, tenant_id: &Uuid) -> Option<Subscription> {
        self.db.get_open_subscription(tenant_id).await
    }

    pub async fn get_subscription(&self, subscription_id: &Uuid) -> BillingResult<Subscription> {
        self.db
            .get_subscription(subscription_id)
            .await
            .ok_or_else(|| BillingError::NotFound(format!("Subscription {}", subscription_id)))
    }

    pub async fn history(&self, tenant_id: &Uuid) -> Vec<Subscription> {
        self.db.get_subscriptions_by_tenant(tenant_id).await
    }

    /// Charges the next period with the stored payment method. A decline
    /// moves the subscription to past due; a gateway failure changes nothing.
    /// The renewal intent is recorded on the row before the card is charged,
    /// and a charge that can no longer be applied is refunded.
    pub async fn renew_subscription(&self, subscription_id: &Uuid, now: DateTime<Utc>) -> BillingResult<RenewalOutcome> {
        let subscription = self.get_subscription(subscription_id).await?;
        if !subscription.is_due(now) {
            return Ok(RenewalOutcome::Skipped);
        }

        let Some(payment_method) = subscription.payment_method.clone() else {
            let reason = "no saved payment method".to_string();
            self.mark_past_due(subscription_id, reason.clone(), now).await?;
            return Ok(RenewalOutcome::PastDue { reason });
        };

        let intent = self
            .gateway
            .open_intent(&intent_request(&subscription, IntentPurpose::Renewal))
            .await?;

        let reference = intent.reference.clone();
        let reserved = self
            .db
            .update_subscription(subscription_id, |s| {
                if !s.is_due(now) {
                    return Ok(false);
                }
                s.payment_intent_ref = Some(reference);
                Ok(true)
            })
            .await?;
        if !reserved {
            log::info!("Subscription {} changed before renewal; not charging", subscription_id);
            return Ok(RenewalOutcome::Skipped);
        }

        let confirmation = self
            .gateway
            .confirm_payment(&intent.reference, Some(&payment_method))
            .await?;

        if !confirmation.succeeded {
            let reason = confirmation
                .reason
                .unwrap_or_else(|| "renewal payment was declined".to_string());
            log::warn!("Renewal declined for subscription {}: {}", subscription_id, reason);
            self.mark_past_due(subscription_id, reason.clone(), now).await?;
            return Ok(RenewalOutcome::PastDue { reason });
        }

        match self
            .db
            .apply_payment(subscription_id, &intent.reference, |s| s.extend(now))
            .await
        {
            Ok((renewed, _)) => {
                log::info!("Subscription {} renewed until {:?}", subscription_id, renewed.end_date);
                Ok(RenewalOutcome::Renewed { end_date: renewed.end_date })
            }
            Err(e @ (BillingError::Conflict(_) | BillingError::NotFound(_))) => {
                log::warn!(
                    "Renewal charge {} for subscription {} cannot be applied ({}); refunding",
                    intent.reference, subscription_id, e
                );
                if let Err(refund) = self.gateway.refund_payment(&intent.reference).await {
                    log::error!(
                        "Refund of renewal charge {} for subscription {} failed: {}",
                        intent.reference, subscription_id, refund
                    );
                    return Err(refund.into());
                }
                Ok(RenewalOutcome::Refunded { reason: e.to_string() })
            }
            Err(e) => Err(e),
        }
    }

    async fn mark_past_due(&self, subscription_id: &Uuid, reason: String, now: DateTime<Utc>) -> BillingResult<()> {
        self.db
            .update_subscription(subscription_id, |s| {
                if s.status == SubscriptionStatus::Active {
                    s.mark_past_due(reason, now);
                }
                Ok(())
            })
            .await
    }

    /// Renews every active subscription whose period has ended.
    pub async fn renew_due(&self, now: DateTime<Utc>, report: &mut SweepReport) {
        for subscription in self.db.get_subscriptions_by_status(SubscriptionStatus::Active).await {
            if !subscription.is_due(now) {
                continue;
            }
            match self.renew_subscription(&subscription.id, now).await {
                Ok(RenewalOutcome::Renewed { .. }) => report.renewed += 1,
                Ok(RenewalOutcome::PastDue { .. }) => report.moved_past_due += 1,
                Ok(RenewalOutcome::Refunded { .. }) => report.refunded += 1,
                Ok(RenewalOutcome::Skipped) => {}
                Err(e) => {
                    log::error!("Renewal of subscription {} failed: {}", subscription.id, e);
                    report.errors += 1;
                }
            }
        }
    }

    /// Discards pending subscriptions whose payment was never completed
    /// within the TTL, freeing the tenant's slot. The outstanding intent is
    /// voided at the processor first; one that turns out to be paid
    /// activates the subscription instead.
    pub async fn reclaim_abandoned(&self, now: DateTime<Utc>, report: &mut SweepReport) {
        let ttl = Duration::minutes(i64::from(self.settings.pending_payment_ttl_minutes));
        for subscription in self.db.get_subscriptions_by_status(SubscriptionStatus::PendingPayment).await {
            if !subscription.is_abandoned(now, ttl) {
                continue;
            }

            let intent_ref = subscription.payment_intent_ref.as_deref();
            if let Some(reference) = intent_ref {
                match self.gateway.cancel_intent(reference).await {
                    Ok(CancelOutcome::Canceled) | Err(GatewayError::UnknownIntent(_)) => {}
                    Ok(CancelOutcome::AlreadySucceeded) => {
                        log::info!(
                            "Pending subscription {} was paid without confirming; completing it",
                            subscription.id
                        );
                        match self.complete_subscription(&subscription.id, reference, None).await {
                            Ok(completion) if completion.succeeded() => report.activated += 1,
                            Ok(_) => {}
                            Err(e) => {
                                log::error!("Completing paid subscription {} failed: {}", subscription.id, e);
                                report.errors += 1;
                            }
                        }
                        continue;
                    }
                    Err(e) => {
                        log::warn!(
                            "Could not void intent {} of subscription {}; keeping it: {}",
                            reference, subscription.id, e
                        );
                        report.errors += 1;
                        continue;
                    }
                }
            }

            if self.db.discard_abandoned(&subscription.id, intent_ref, now, ttl).await {
                log::info!("Reclaimed abandoned pending subscription {}", subscription.id);
                report.reclaimed += 1;
            }
        }
    }

    /// Cancels past-due subscriptions once the grace period has run out.
    pub async fn expire_delinquent(&self, now: DateTime<Utc>, report: &mut SweepReport) {
        let grace = Duration::days(i64::from(self.settings.grace_period_days));
        for subscription in self.db.get_subscriptions_by_status(SubscriptionStatus::PastDue).await {
            if !subscription.grace_expired(now, grace) {
                continue;
            }
            let expired = self
                .db
                .update_subscription(&subscription.id, |s| {
                    if s.grace_expired(now, grace) {
                        s.cancel(now);
                        return Ok(true);
                    }
                    Ok(false)
                })
                .await;
            match expired {
                Ok(true) => {
                    log::info!("Subscription {} canceled after grace period", subscription.id);
                    report.expired += 1;
                }
                Ok(false) => {}
                Err(e) => {
                    log::error!("Expiring subscription {} failed: {}", subscription.id, e);
                    report.errors += 1;
                }
            }
        }
    }

    /// One pass of the lifecycle sweep.
    pub async fn sweep(&self, now: DateTime<Utc>) -> SweepReport {
        let mut report = SweepReport::default();
        self.renew_due(now, &mut report).await;
        self.reclaim_abandoned(now, &mut report).await;
        self.expire_delinquent(now, &mut report).await;
        report
    }
}

fn intent_request(subscription: &Subscription, purpose: IntentPurpose) -> IntentRequest {
    IntentRequest {
        subscription_id: subscription.id,
        tenant_id: subscription.tenant_id,
        plan_id: subscription.plan_id,
        billing_cycle: subscription.billing_cycle,
        amount: subscription.amount,
        currency: subscription.currency.clone(),
        purpose,
        generation: subscription.generation(),
    }
}
