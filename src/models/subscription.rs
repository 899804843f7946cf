use serde::{Deserialize, Serialize};
use chrono::{DateTime, Duration, Months, Utc};
use uuid::Uuid;
use rust_decimal::Decimal;
use validator::Validate;

use crate::models::common::BillingCycle;
use crate::models::plan::SubscriptionPlan;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    PendingPayment,
    Active,
    PastDue,
    Canceled,
}

impl SubscriptionStatus {
    /// Statuses that occupy the tenant's single subscription slot.
    pub fn is_open(&self) -> bool {
        !matches!(self, SubscriptionStatus::Canceled)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub plan_id: Uuid,
    pub plan_name: String,
    pub billing_cycle: BillingCycle,
    pub status: SubscriptionStatus,
    /// Price captured at purchase; renewals charge this, never the live plan.
    pub amount: Decimal,
    pub currency: String,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub payment_intent_ref: Option<String>,
    /// Processor-side payment method reference. Never card data.
    pub payment_method: Option<String>,
    pub last_payment_error: Option<String>,
    pub canceled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct StartSubscriptionRequest {
    #[validate(length(min = 1, message = "plan_name is required"))]
    pub plan_name: String,
    pub billing_cycle: BillingCycle,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ConfirmSubscriptionRequest {
    #[validate(length(min = 1, message = "payment_intent_ref is required"))]
    pub payment_intent_ref: String,
    pub payment_method: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TenantQuery {
    pub tenant_id: Uuid,
}

impl Subscription {
    pub fn new(tenant_id: Uuid, plan: &SubscriptionPlan, billing_cycle: BillingCycle, currency: &str) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            tenant_id,
            plan_id: plan.id,
            plan_name: plan.name.clone(),
            billing_cycle,
            status: SubscriptionStatus::PendingPayment,
            amount: plan.price_for(billing_cycle),
            currency: currency.to_string(),
            start_date: None,
            end_date: None,
            payment_intent_ref: None,
            payment_method: None,
            last_payment_error: None,
            canceled_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Starts a fresh billing period at `now`.
    pub fn activate(&mut self, now: DateTime<Utc>, payment_method: Option<String>) {
        self.status = SubscriptionStatus::Active;
        self.start_date = Some(now);
        self.end_date = Some(period_end(now, self.billing_cycle));
        if payment_method.is_some() {
            self.payment_method = payment_method;
        }
        self.last_payment_error = None;
        self.updated_at = now;
    }

    /// Rolls the period forward from the previous end date.
    pub fn extend(&mut self, now: DateTime<Utc>) {
        let start = self.end_date.unwrap_or(now);
        self.status = SubscriptionStatus::Active;
        self.start_date = Some(start);
        self.end_date = Some(period_end(start, self.billing_cycle));
        self.last_payment_error = None;
        self.updated_at = now;
    }

    pub fn mark_past_due(&mut self, reason: String, now: DateTime<Utc>) {
        self.status = SubscriptionStatus::PastDue;
        self.last_payment_error = Some(reason);
        self.updated_at = now;
    }

    pub fn record_decline(&mut self, reason: String, now: DateTime<Utc>) {
        self.last_payment_error = Some(reason);
        self.updated_at = now;
    }

    pub fn cancel(&mut self, now: DateTime<Utc>) {
        self.status = SubscriptionStatus::Canceled;
        self.canceled_at = Some(now);
        self.updated_at = now;
    }

    /// Row version used to key processor calls; changes on every write.
    pub fn generation(&self) -> i64 {
        self.updated_at.timestamp_micros()
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == SubscriptionStatus::Active && self.end_date.map_or(false, |end| end <= now)
    }

    pub fn is_abandoned(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        self.status == SubscriptionStatus::PendingPayment && self.updated_at + ttl <= now
    }

    pub fn grace_expired(&self, now: DateTime<Utc>, grace: Duration) -> bool {
        self.status == SubscriptionStatus::PastDue
            && self.end_date.map_or(true, |end| end + grace <= now)
    }
}

/// End of a billing period starting at `start`. Calendar months, so a
/// period that starts on Jan 31 ends on the last day of February.
pub fn period_end(start: DateTime<Utc>, cycle: BillingCycle) -> DateTime<Utc> {
    start
        .checked_add_months(Months::new(cycle.months()))
        .unwrap_or_else(|| start + Duration::days(30 * i64::from(cycle.months())))
}
