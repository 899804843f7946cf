use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

/// Verifies processor callbacks signed as `t=<unix>,v1=<hex hmac>` over
/// `"<t>.<raw body>"`.
#[derive(Clone)]
pub struct WebhookVerifier {
    secret: String,
    tolerance_secs: i64,
}

#[derive(Debug, PartialEq, thiserror::Error)]
pub enum WebhookError {
    #[error("webhook secret is not configured")]
    NotConfigured,
    #[error("malformed signature header")]
    MalformedHeader,
    #[error("signature timestamp outside tolerance")]
    Stale,
    #[error("signature mismatch")]
    Mismatch,
}

#[derive(Debug, Deserialize)]
pub struct WebhookEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: WebhookData,
}

#[derive(Debug, Deserialize)]
pub struct WebhookData {
    pub object: IntentObject,
}

#[derive(Debug, Deserialize)]
pub struct IntentObject {
    pub id: String,
    #[serde(default)]
    pub metadata: IntentMetadata,
}

#[derive(Debug, Default, Deserialize)]
pub struct IntentMetadata {
    pub subscription_id: Option<Uuid>,
}

impl WebhookVerifier {
    pub fn new(secret: impl Into<String>, tolerance_secs: i64) -> Self {
        Self {
            secret: secret.into(),
            tolerance_secs,
        }
    }

    pub fn verify(&self, payload: &[u8], header: &str) -> Result<(), WebhookError> {
        self.verify_at(payload, header, Utc::now().timestamp())
    }

    pub fn verify_at(&self, payload: &[u8], header: &str, now: i64) -> Result<(), WebhookError> {
        if self.secret.is_empty() {
            return Err(WebhookError::NotConfigured);
        }

        let mut timestamp = None;
        let mut signatures = Vec::new();
        for part in header.split(',') {
            match part.trim().split_once('=') {
                Some(("t", value)) => timestamp = value.parse::<i64>().ok(),
                Some(("v1", value)) => signatures.push(value),
                _ => {}
            }
        }

        let timestamp = timestamp.ok_or(WebhookError::MalformedHeader)?;
        if signatures.is_empty() {
            return Err(WebhookError::MalformedHeader);
        }
        if (now - timestamp).abs() > self.tolerance_secs {
            return Err(WebhookError::Stale);
        }

        for signature in signatures {
            let Ok(expected) = hex::decode(signature) else {
                continue;
            };
            let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
                .map_err(|_| WebhookError::NotConfigured)?;
            mac.update(timestamp.to_string().as_bytes());
            mac.update(b".");
            mac.update(payload);
            if mac.verify_slice(&expected).is_ok() {
                return Ok(());
            }
        }

        log::debug!("Webhook signature mismatch for timestamp {}", timestamp);
        Err(WebhookError::Mismatch)
    }

    /// Produces a header value the verifier accepts. Used by the sandbox
    /// tooling and tests to emit signed callbacks.
    pub fn sign(&self, payload: &[u8], timestamp: i64) -> String {
        let mut mac = match HmacSha256::new_from_slice(self.secret.as_bytes()) {
            Ok(mac) => mac,
            Err(_) => return String::new(),
        };
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload);
        format!("t={},v1={}", timestamp, hex::encode(mac.finalize().into_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_webhook_signature_validation() {
        let verifier = WebhookVerifier::new("whsec_test", 300);
        let payload = br#"{"id":"evt_1"}"#;
        let header = verifier.sign(payload, 1_700_000_000);

        assert_eq!(verifier.verify_at(payload, &header, 1_700_000_100), Ok(()));
        assert_eq!(
            verifier.verify_at(b"tampered", &header, 1_700_000_100),
            Err(WebhookError::Mismatch)
        );
        assert_eq!(
            verifier.verify_at(payload, &header, 1_700_001_000),
            Err(WebhookError::Stale)
        );
        assert_eq!(
            verifier.verify_at(payload, "v1=abcd", 1_700_000_000),
            Err(WebhookError::MalformedHeader)
        );
    }

    #[test]
    fn test_rotated_secret_signatures() {
        let old = WebhookVerifier::new("whsec_old", 300);
        let new = WebhookVerifier::new("whsec_new", 300);
        let payload = b"{}";
        let stale_sig = old.sign(payload, 10);
        let fresh_sig = new.sign(payload, 10);
        let fresh_v1 = fresh_sig.split(',').nth(1).unwrap();
        let header = format!("{},{}", stale_sig, fresh_v1);

        assert_eq!(new.verify_at(payload, &header, 10), Ok(()));
    }

    #[test]
    fn test_unconfigured_secret_rejects_everything() {
        let verifier = WebhookVerifier::new("", 300);
        assert_eq!(verifier.verify_at(b"{}", "t=1,v1=00", 1), Err(WebhookError::NotConfigured));
    }

    #[test]
    fn test_event_parsing() {
        let subscription_id = Uuid::new_v4();
        let body = serde_json::json!({
            "id": "evt_1",
            "type": "payment_intent.succeeded",
            "data": {"object": {
                "id": "pi_1",
                "payment_method": "pm_1",
                "metadata": {"subscription_id": subscription_id}
            }}
        });
        let event: WebhookEvent = serde_json::from_value(body).unwrap();
        assert_eq!(event.event_type, "payment_intent.succeeded");
        assert_eq!(event.data.object.metadata.subscription_id, Some(subscription_id));
    }
}
