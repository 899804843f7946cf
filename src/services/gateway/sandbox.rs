use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{GatewayError, PaymentGateway};
use crate::models::payment::{CancelOutcome, IntentRequest, IntentStatus, PaymentConfirmation, PaymentIntent};

pub const DEFAULT_PAYMENT_METHOD: &str = "pm_card_visa";
pub const DECLINED_PAYMENT_METHOD: &str = "pm_card_chargeDeclined";
pub const INSUFFICIENT_FUNDS_PAYMENT_METHOD: &str = "pm_card_chargeDeclinedInsufficientFunds";

#[derive(Debug, Clone)]
struct SandboxIntent {
    amount: Decimal,
    status: IntentStatus,
    payment_method: Option<String>,
}

/// In-process stand-in for the card processor. Payment methods named like
/// the processor's test cards decline; everything else succeeds.
#[derive(Clone, Default)]
pub struct SandboxGateway {
    intents: Arc<Mutex<HashMap<String, SandboxIntent>>>,
    charges: Arc<AtomicU64>,
    refunds: Arc<AtomicU64>,
    outages: Arc<AtomicU32>,
}

impl SandboxGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` calls fail as if the processor were down.
    pub fn fail_next(&self, count: u32) {
        self.outages.store(count, Ordering::SeqCst);
    }

    /// Number of successful charges taken so far.
    pub fn charges(&self) -> u64 {
        self.charges.load(Ordering::SeqCst)
    }

    pub fn refunds(&self) -> u64 {
        self.refunds.load(Ordering::SeqCst)
    }

    fn take_outage(&self) -> Result<(), GatewayError> {
        let took = self
            .outages
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if took {
            return Err(GatewayError::Unreachable("sandbox outage".to_string()));
        }
        Ok(())
    }
}

fn decline_reason(payment_method: &str) -> Option<&'static str> {
    match payment_method {
        DECLINED_PAYMENT_METHOD => Some("Your card was declined."),
        INSUFFICIENT_FUNDS_PAYMENT_METHOD => Some("Your card has insufficient funds."),
        _ => None,
    }
}

#[async_trait]
impl PaymentGateway for SandboxGateway {
    async fn open_intent(&self, request: &IntentRequest) -> Result<PaymentIntent, GatewayError> {
        self.take_outage()?;

        let reference = format!("pi_sandbox_{}", Uuid::new_v4().simple());
        let intent = PaymentIntent {
            client_secret: format!("{}_secret_{}", reference, Uuid::new_v4().simple()),
            reference: reference.clone(),
            plan_id: request.plan_id,
            billing_cycle: request.billing_cycle,
            amount: request.amount,
            currency: request.currency.clone(),
            status: IntentStatus::RequiresConfirmation,
        };

        self.intents.lock().await.insert(
            reference.clone(),
            SandboxIntent {
                amount: request.amount,
                status: IntentStatus::RequiresConfirmation,
                payment_method: None,
            },
        );
        log::debug!("Sandbox intent {} opened for {}", reference, request.amount);
        Ok(intent)
    }

    async fn confirm_payment(
        &self,
        intent_ref: &str,
        payment_method: Option<&str>,
    ) -> Result<PaymentConfirmation, GatewayError> {
        self.take_outage()?;

        let method = payment_method.unwrap_or(DEFAULT_PAYMENT_METHOD);
        let mut intents = self.intents.lock().await;
        let intent = intents
            .get_mut(intent_ref)
            .ok_or_else(|| GatewayError::UnknownIntent(intent_ref.to_string()))?;

        match intent.status {
            // Already captured; report it again without charging twice.
            IntentStatus::Succeeded => Ok(PaymentConfirmation::succeeded(
                intent.payment_method.clone().or_else(|| Some(method.to_string())),
            )),
            IntentStatus::Failed => Ok(PaymentConfirmation::declined(
                "payment intent already failed; request a new one",
            )),
            IntentStatus::Canceled => Ok(PaymentConfirmation::declined("payment intent was canceled")),
            IntentStatus::Refunded => Ok(PaymentConfirmation::declined("payment was refunded")),
            IntentStatus::RequiresConfirmation => match decline_reason(method) {
                Some(reason) => {
                    intent.status = IntentStatus::Failed;
                    Ok(PaymentConfirmation::declined(reason))
                }
                None => {
                    intent.status = IntentStatus::Succeeded;
                    intent.payment_method = Some(method.to_string());
                    self.charges.fetch_add(1, Ordering::SeqCst);
                    log::debug!("Sandbox charged {} on {}", intent.amount, intent_ref);
                    Ok(PaymentConfirmation::succeeded(Some(method.to_string())))
                }
            },
        }
    }

    async fn cancel_intent(&self, intent_ref: &str) -> Result<CancelOutcome, GatewayError> {
        self.take_outage()?;

        let mut intents = self.intents.lock().await;
        let intent = intents
            .get_mut(intent_ref)
            .ok_or_else(|| GatewayError::UnknownIntent(intent_ref.to_string()))?;

        match intent.status {
            IntentStatus::Succeeded => Ok(CancelOutcome::AlreadySucceeded),
            IntentStatus::Refunded => Err(GatewayError::Processor {
                status: 400,
                message: format!("payment intent {} was refunded", intent_ref),
            }),
            IntentStatus::RequiresConfirmation | IntentStatus::Failed | IntentStatus::Canceled => {
                intent.status = IntentStatus::Canceled;
                log::debug!("Sandbox intent {} canceled", intent_ref);
                Ok(CancelOutcome::Canceled)
            }
        }
    }

    async fn refund_payment(&self, intent_ref: &str) -> Result<(), GatewayError> {
        self.take_outage()?;

        let mut intents = self.intents.lock().await;
        let intent = intents
            .get_mut(intent_ref)
            .ok_or_else(|| GatewayError::UnknownIntent(intent_ref.to_string()))?;

        match intent.status {
            IntentStatus::Succeeded => {
                intent.status = IntentStatus::Refunded;
                self.refunds.fetch_add(1, Ordering::SeqCst);
                log::debug!("Sandbox refunded {} on {}", intent.amount, intent_ref);
                Ok(())
            }
            IntentStatus::Refunded => Ok(()),
            other => Err(GatewayError::Processor {
                status: 400,
                message: format!("payment intent {} is {:?} and has no charge to refund", intent_ref, other),
            }),
        }
    }

    fn name(&self) -> &'static str {
        "sandbox"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::common::BillingCycle;
    use crate::models::payment::IntentPurpose;

    fn request() -> IntentRequest {
        IntentRequest {
            subscription_id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            plan_id: Uuid::new_v4(),
            billing_cycle: BillingCycle::Monthly,
            amount: Decimal::new(99, 0),
            currency: "usd".to_string(),
            purpose: IntentPurpose::Initial,
            generation: 0,
        }
    }

    #[tokio::test]
    async fn test_confirm_is_charged_once() {
        let gateway = SandboxGateway::new();
        let intent = gateway.open_intent(&request()).await.unwrap();

        assert!(gateway.confirm_payment(&intent.reference, None).await.unwrap().succeeded);
        assert!(gateway.confirm_payment(&intent.reference, None).await.unwrap().succeeded);
        assert_eq!(gateway.charges(), 1);
    }

    #[tokio::test]
    async fn test_decline_is_a_value() {
        let gateway = SandboxGateway::new();
        let intent = gateway.open_intent(&request()).await.unwrap();

        let outcome = gateway
            .confirm_payment(&intent.reference, Some(DECLINED_PAYMENT_METHOD))
            .await
            .unwrap();
        assert!(!outcome.succeeded);
        assert_eq!(outcome.reason.as_deref(), Some("Your card was declined."));

        // A failed intent stays failed, even with a good card.
        let retry = gateway.confirm_payment(&intent.reference, None).await.unwrap();
        assert!(!retry.succeeded);
        assert_eq!(gateway.charges(), 0);
    }

    #[tokio::test]
    async fn test_cancel_leaves_paid_intents_alone() {
        let gateway = SandboxGateway::new();
        let unpaid = gateway.open_intent(&request()).await.unwrap();
        let paid = gateway.open_intent(&request()).await.unwrap();
        gateway.confirm_payment(&paid.reference, Some("pm_card_mastercard")).await.unwrap();

        assert_eq!(gateway.cancel_intent(&unpaid.reference).await.unwrap(), CancelOutcome::Canceled);
        assert!(!gateway.confirm_payment(&unpaid.reference, None).await.unwrap().succeeded);

        assert_eq!(
            gateway.cancel_intent(&paid.reference).await.unwrap(),
            CancelOutcome::AlreadySucceeded
        );
        let replay = gateway.confirm_payment(&paid.reference, None).await.unwrap();
        assert_eq!(replay.payment_method.as_deref(), Some("pm_card_mastercard"));
        assert_eq!(gateway.charges(), 1);
    }

    #[tokio::test]
    async fn test_refund_only_captured_intents() {
        let gateway = SandboxGateway::new();
        let intent = gateway.open_intent(&request()).await.unwrap();
        assert!(gateway.refund_payment(&intent.reference).await.is_err());

        gateway.confirm_payment(&intent.reference, None).await.unwrap();
        gateway.refund_payment(&intent.reference).await.unwrap();
        gateway.refund_payment(&intent.reference).await.unwrap();
        assert_eq!(gateway.refunds(), 1);
        assert!(!gateway.confirm_payment(&intent.reference, None).await.unwrap().succeeded);
    }

    #[tokio::test]
    async fn test_outage_and_unknown_intent() {
        let gateway = SandboxGateway::new();
        gateway.fail_next(1);
        assert!(matches!(
            gateway.open_intent(&request()).await,
            Err(GatewayError::Unreachable(_))
        ));
        assert!(gateway.open_intent(&request()).await.is_ok());
        assert!(matches!(
            gateway.confirm_payment("pi_missing", None).await,
            Err(GatewayError::UnknownIntent(_))
        ));
    }
}
