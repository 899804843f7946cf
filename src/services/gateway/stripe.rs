use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde_json::Value;

use super::{GatewayError, PaymentGateway};
use crate::config::GatewayConfig;
use crate::models::payment::{
    CancelOutcome, IntentRequest, IntentStatus, PaymentConfirmation, PaymentIntent,
};

/// Stripe-style payment intents API over form-encoded REST.
#[derive(Clone)]
pub struct StripeGateway {
    client: Client,
    api_base: String,
    secret_key: String,
}

impl StripeGateway {
    pub fn new(config: &GatewayConfig) -> Self {
        Self {
            client: Client::new(),
            api_base: config.api_base.trim_end_matches('/').to_string(),
            secret_key: config.secret_key.clone(),
        }
    }

    async fn fetch_intent(&self, intent_ref: &str) -> Result<Value, GatewayError> {
        let response = self.client
            .get(format!("{}/v1/payment_intents/{}", self.api_base, intent_ref))
            .bearer_auth(&self.secret_key)
            .send()
            .await?;

        let (status, body) = read_body(response).await;
        if status == StatusCode::NOT_FOUND {
            return Err(GatewayError::UnknownIntent(intent_ref.to_string()));
        }
        if !status.is_success() {
            return Err(processor_error(status, &body));
        }
        Ok(body)
    }

    async fn confirm_intent(&self, intent_ref: &str, payment_method: Option<&str>) -> Result<PaymentConfirmation, GatewayError> {
        let mut form: Vec<(&str, &str)> = Vec::new();
        if let Some(method) = payment_method {
            form.push(("payment_method", method));
        }

        let response = self.client
            .post(format!("{}/v1/payment_intents/{}/confirm", self.api_base, intent_ref))
            .bearer_auth(&self.secret_key)
            .form(&form)
            .send()
            .await?;

        let (status, body) = read_body(response).await;
        match status {
            s if s.is_success() => Ok(interpret_intent(&body)),
            // Card errors are ordinary declines.
            StatusCode::PAYMENT_REQUIRED => {
                let reason = body["error"]["message"]
                    .as_str()
                    .unwrap_or("card was declined")
                    .to_string();
                log::info!("Payment intent {} declined: {}", intent_ref, reason);
                Ok(PaymentConfirmation::declined(reason))
            }
            StatusCode::NOT_FOUND => Err(GatewayError::UnknownIntent(intent_ref.to_string())),
            s => Err(processor_error(s, &body)),
        }
    }
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    async fn open_intent(&self, request: &IntentRequest) -> Result<PaymentIntent, GatewayError> {
        let amount = to_minor_units(request.amount)?;
        let subscription_id = request.subscription_id.to_string();
        let tenant_id = request.tenant_id.to_string();
        let plan_id = request.plan_id.to_string();
        let billing_cycle = request.billing_cycle.to_string();
        let purpose = format!("{:?}", request.purpose).to_lowercase();
        let amount = amount.to_string();

        let form = [
            ("amount", amount.as_str()),
            ("currency", request.currency.as_str()),
            ("metadata[subscription_id]", subscription_id.as_str()),
            ("metadata[tenant_id]", tenant_id.as_str()),
            ("metadata[plan_id]", plan_id.as_str()),
            ("metadata[billing_cycle]", billing_cycle.as_str()),
            ("metadata[purpose]", purpose.as_str()),
        ];

        log::info!(
            "Creating payment intent for subscription {} ({} {})",
            request.subscription_id, request.amount, request.currency
        );

        let response = self.client
            .post(format!("{}/v1/payment_intents", self.api_base))
            .bearer_auth(&self.secret_key)
            .header("Idempotency-Key", request.idempotency_key())
            .form(&form)
            .send()
            .await?;

        let (status, body) = read_body(response).await;
        if !status.is_success() {
            return Err(processor_error(status, &body));
        }

        let reference = body["id"]
            .as_str()
            .ok_or_else(|| GatewayError::InvalidResponse("no id in payment intent".to_string()))?;
        let client_secret = body["client_secret"]
            .as_str()
            .ok_or_else(|| GatewayError::InvalidResponse("no client_secret in payment intent".to_string()))?;

        log::info!("Created payment intent: {}", reference);

        Ok(PaymentIntent {
            reference: reference.to_string(),
            client_secret: client_secret.to_string(),
            plan_id: request.plan_id,
            billing_cycle: request.billing_cycle,
            amount: request.amount,
            currency: request.currency.clone(),
            status: IntentStatus::RequiresConfirmation,
        })
    }

    async fn confirm_payment(
        &self,
        intent_ref: &str,
        payment_method: Option<&str>,
    ) -> Result<PaymentConfirmation, GatewayError> {
        if payment_method.is_some() {
            return self.confirm_intent(intent_ref, payment_method).await;
        }

        // The client may already have confirmed with the processor directly.
        let intent = self.fetch_intent(intent_ref).await?;
        if intent["status"].as_str() == Some("requires_confirmation") {
            return self.confirm_intent(intent_ref, None).await;
        }
        Ok(interpret_intent(&intent))
    }

    async fn cancel_intent(&self, intent_ref: &str) -> Result<CancelOutcome, GatewayError> {
        let intent = self.fetch_intent(intent_ref).await?;
        match intent["status"].as_str() {
            Some("succeeded") => return Ok(CancelOutcome::AlreadySucceeded),
            Some("canceled") => return Ok(CancelOutcome::Canceled),
            _ => {}
        }

        let response = self.client
            .post(format!("{}/v1/payment_intents/{}/cancel", self.api_base, intent_ref))
            .bearer_auth(&self.secret_key)
            .form(&[("cancellation_reason", "abandoned")])
            .send()
            .await?;

        let (status, body) = read_body(response).await;
        if !status.is_success() {
            return Err(processor_error(status, &body));
        }
        log::info!("Canceled payment intent {}", intent_ref);
        Ok(CancelOutcome::Canceled)
    }

    async fn refund_payment(&self, intent_ref: &str) -> Result<(), GatewayError> {
        let response = self.client
            .post(format!("{}/v1/refunds", self.api_base))
            .bearer_auth(&self.secret_key)
            .header("Idempotency-Key", format!("refund:{}", intent_ref))
            .form(&[("payment_intent", intent_ref)])
            .send()
            .await?;

        let (status, body) = read_body(response).await;
        if !status.is_success() {
            return Err(processor_error(status, &body));
        }
        log::info!("Refunded payment intent {}: {}", intent_ref, body["id"].as_str().unwrap_or("-"));
        Ok(())
    }

    fn name(&self) -> &'static str {
        "stripe"
    }
}

/// Maps a payment intent object onto a confirmation outcome.
pub fn interpret_intent(intent: &Value) -> PaymentConfirmation {
    let last_error = intent["last_payment_error"]["message"].as_str();
    match intent["status"].as_str() {
        Some("succeeded") => PaymentConfirmation::succeeded(
            intent["payment_method"].as_str().map(str::to_string),
        ),
        Some("requires_payment_method") => {
            PaymentConfirmation::declined(last_error.unwrap_or("a valid payment method is required"))
        }
        Some("requires_action") => PaymentConfirmation::declined("additional authentication is required"),
        Some("processing") => PaymentConfirmation::declined("payment is still processing"),
        Some("canceled") => PaymentConfirmation::declined("payment intent was canceled"),
        Some(other) => PaymentConfirmation::declined(format!("payment not completed (status {})", other)),
        None => PaymentConfirmation::declined("payment status unavailable"),
    }
}

pub fn to_minor_units(amount: Decimal) -> Result<i64, GatewayError> {
    (amount * Decimal::from(100))
        .round()
        .to_i64()
        .filter(|minor| *minor >= 0)
        .ok_or_else(|| GatewayError::InvalidResponse(format!("amount {} cannot be charged", amount)))
}

async fn read_body(response: reqwest::Response) -> (StatusCode, Value) {
    let status = response.status();
    // Error pages from proxies are not JSON; keep the status either way.
    let body = response.json::<Value>().await.unwrap_or(Value::Null);
    (status, body)
}

fn processor_error(status: StatusCode, body: &Value) -> GatewayError {
    GatewayError::Processor {
        status: status.as_u16(),
        message: body["error"]["message"]
            .as_str()
            .unwrap_or("no error message")
            .to_string(),
    }
}
