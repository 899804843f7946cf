//! Boundary to the external card-payment processor.
//!
//! The core only ever talks to [`PaymentGateway`]; it never sees card data.
//! `StripeGateway` speaks to a live processor over HTTP, `SandboxGateway`
//! simulates one in-process for development and tests.

use async_trait::async_trait;

use crate::models::{
    common::BillingCycle,
    payment::{CancelOutcome, IntentPurpose, IntentRequest, PaymentConfirmation, PaymentIntent},
    plan::SubscriptionPlan,
};

pub mod sandbox;
pub mod stripe;
pub mod webhook;

pub use sandbox::SandboxGateway;
pub use stripe::StripeGateway;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("processor unreachable: {0}")]
    Unreachable(String),

    #[error("processor rejected the request ({status}): {message}")]
    Processor { status: u16, message: String },

    #[error("unexpected processor response: {0}")]
    InvalidResponse(String),

    #[error("unknown payment intent {0}")]
    UnknownIntent(String),
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            GatewayError::InvalidResponse(err.to_string())
        } else {
            GatewayError::Unreachable(err.to_string())
        }
    }
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Opens an intent for an explicit amount. Not retried on failure.
    async fn open_intent(&self, request: &IntentRequest) -> Result<PaymentIntent, GatewayError>;

    /// Confirms an intent. Declines come back as `succeeded == false`.
    async fn confirm_payment(
        &self,
        intent_ref: &str,
        payment_method: Option<&str>,
    ) -> Result<PaymentConfirmation, GatewayError>;

    /// Voids an intent nobody finished paying. An intent that was already
    /// paid is reported as such and left alone.
    async fn cancel_intent(&self, intent_ref: &str) -> Result<CancelOutcome, GatewayError>;

    /// Returns the full amount of a captured intent to the payer.
    async fn refund_payment(&self, intent_ref: &str) -> Result<(), GatewayError>;

    /// Opens an intent priced from the plan for the chosen cycle.
    async fn create_payment_intent(
        &self,
        plan: &SubscriptionPlan,
        billing_cycle: BillingCycle,
        context: IntentContext<'_>,
    ) -> Result<PaymentIntent, GatewayError> {
        let request = IntentRequest {
            subscription_id: context.subscription_id,
            tenant_id: context.tenant_id,
            plan_id: plan.id,
            billing_cycle,
            amount: plan.price_for(billing_cycle),
            currency: context.currency.to_string(),
            purpose: IntentPurpose::Initial,
            generation: context.generation,
        };
        self.open_intent(&request).await
    }

    fn name(&self) -> &'static str;
}

/// Who an intent is for; sent to the processor as metadata.
#[derive(Debug, Clone, Copy)]
pub struct IntentContext<'a> {
    pub subscription_id: uuid::Uuid,
    pub tenant_id: uuid::Uuid,
    pub currency: &'a str,
    pub generation: i64,
}
