use serde::{Deserialize, Serialize};
use uuid::Uuid;
use rust_decimal::Decimal;

use crate::models::common::BillingCycle;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IntentStatus {
    RequiresConfirmation,
    Succeeded,
    Failed,
    Canceled,
    Refunded,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IntentPurpose {
    Initial,
    Renewal,
    Retry,
}

/// One attempted charge at the processor. Lives only as long as the attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentIntent {
    pub reference: String,
    pub client_secret: String,
    pub plan_id: Uuid,
    pub billing_cycle: BillingCycle,
    pub amount: Decimal,
    pub currency: String,
    pub status: IntentStatus,
}

#[derive(Debug, Clone)]
pub struct IntentRequest {
    pub subscription_id: Uuid,
    pub tenant_id: Uuid,
    pub plan_id: Uuid,
    pub billing_cycle: BillingCycle,
    pub amount: Decimal,
    pub currency: String,
    pub purpose: IntentPurpose,
    /// Version of the subscription row the intent is opened for. Bumps on
    /// every write, so a fresh attempt gets a fresh key.
    pub generation: i64,
}

impl IntentRequest {
    /// Key the processor uses to collapse duplicate create calls. Identical
    /// for repeated calls against the same subscription state.
    pub fn idempotency_key(&self) -> String {
        format!("{}:{:?}:{}", self.subscription_id, self.purpose, self.generation).to_lowercase()
    }
}

/// What the processor did when asked to void an unpaid intent.
#[derive(Debug, Clone, PartialEq)]
pub enum CancelOutcome {
    Canceled,
    /// Paid before the cancel landed; the charge stands.
    AlreadySucceeded,
}

/// Result of asking the processor to confirm an intent. A decline is a
/// normal outcome carried in `reason`, not an error.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PaymentConfirmation {
    pub succeeded: bool,
    pub reason: Option<String>,
    pub payment_method: Option<String>,
}

impl PaymentConfirmation {
    pub fn succeeded(payment_method: Option<String>) -> Self {
        Self {
            succeeded: true,
            reason: None,
            payment_method,
        }
    }

    pub fn declined(reason: impl Into<String>) -> Self {
        Self {
            succeeded: false,
            reason: Some(reason.into()),
            payment_method: None,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PaymentIntentResponse {
    pub payment_intent_ref: String,
    pub payment_intent_client_secret: String,
    pub amount: Decimal,
    pub currency: String,
}

impl From<&PaymentIntent> for PaymentIntentResponse {
    fn from(intent: &PaymentIntent) -> Self {
        Self {
            payment_intent_ref: intent.reference.clone(),
            payment_intent_client_secret: intent.client_secret.clone(),
            amount: intent.amount,
            currency: intent.currency.clone(),
        }
    }
}
