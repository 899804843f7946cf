use actix_web::web::{Bytes, Data};
use actix_web::{post, HttpRequest, HttpResponse};
use serde_json::json;

use crate::error::{BillingError, BillingResult};
use crate::services::gateway::webhook::{WebhookEvent, WebhookVerifier};
use crate::services::subscription::Completion;
use crate::services::SubscriptionManager;

pub const SIGNATURE_HEADER: &str = "Stripe-Signature";

/// Processor callback for intents confirmed outside our confirm endpoint.
/// Drives the same completion path, so a webhook and a client confirm for
/// one intent activate the subscription once.
#[post("/webhooks/payments")]
pub async fn payment_webhook(
    req: HttpRequest,
    body: Bytes,
    verifier: Data<WebhookVerifier>,
    manager: Data<SubscriptionManager>,
) -> BillingResult<HttpResponse> {
    let signature = req
        .headers()
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| BillingError::Unauthorized("missing webhook signature".to_string()))?;

    verifier.verify(&body, signature).map_err(|e| {
        log::warn!("Rejected payment webhook: {}", e);
        BillingError::Unauthorized(e.to_string())
    })?;

    let event: WebhookEvent = serde_json::from_slice(&body)
        .map_err(|e| BillingError::validation("body", format!("invalid webhook event: {}", e)))?;
    log::info!("Payment webhook {} ({})", event.id, event.event_type);

    match event.event_type.as_str() {
        "payment_intent.succeeded" | "payment_intent.payment_failed" => {}
        _ => return Ok(acknowledge(&event, "ignored")),
    }

    let intent = &event.data.object;
    let Some(subscription_id) = intent.metadata.subscription_id else {
        log::warn!("Webhook {} for intent {} carries no subscription id", event.id, intent.id);
        return Ok(acknowledge(&event, "ignored"));
    };

    match manager.complete_subscription(&subscription_id, &intent.id, None).await {
        Ok(Completion::Activated { .. }) => Ok(acknowledge(&event, "activated")),
        Ok(Completion::Declined { .. }) => Ok(acknowledge(&event, "declined")),
        Ok(Completion::AlreadyApplied { .. }) => Ok(acknowledge(&event, "ignored")),
        // Stale or superseded intents are acknowledged so the processor stops retrying.
        Err(e @ (BillingError::NotFound(_) | BillingError::Conflict(_) | BillingError::Validation { .. })) => {
            log::info!("Webhook {} for subscription {} not applied: {}", event.id, subscription_id, e);
            Ok(acknowledge(&event, "ignored"))
        }
        Err(e) => Err(e),
    }
}

fn acknowledge(event: &WebhookEvent, outcome: &str) -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "received": true,
        "event_id": event.id,
        "outcome": outcome,
    }))
}
