use serde::{Deserialize, Serialize};
use std::env;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub bind_address: String,
    pub session_secret: String,
    pub gateway: GatewayConfig,
    pub billing: BillingSettings,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GatewayProvider {
    Sandbox,
    Stripe,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    pub provider: GatewayProvider,
    pub api_base: String,
    pub secret_key: String,
    pub webhook_secret: String,
    pub webhook_tolerance_secs: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillingSettings {
    pub currency: String,
    pub grace_period_days: u32,
    pub pending_payment_ttl_minutes: u32,
    pub sweep_interval_secs: u64,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let port = env::var("PORT").unwrap_or_else(|_| "8080".to_string());

        let provider = match env::var("PAYMENT_GATEWAY")
            .unwrap_or_else(|_| "sandbox".to_string())
            .to_lowercase()
            .as_str()
        {
            "sandbox" => GatewayProvider::Sandbox,
            "stripe" => GatewayProvider::Stripe,
            other => anyhow::bail!("Unsupported PAYMENT_GATEWAY: {}", other),
        };

        // A live processor must never run with placeholder credentials.
        let secret_key = match provider {
            GatewayProvider::Stripe => env::var("STRIPE_SECRET_KEY")
                .map_err(|_| anyhow::anyhow!("STRIPE_SECRET_KEY must be set when PAYMENT_GATEWAY=stripe"))?,
            GatewayProvider::Sandbox => env::var("STRIPE_SECRET_KEY").unwrap_or_default(),
        };

        Ok(Config {
            bind_address: format!("0.0.0.0:{}", port),
            session_secret: env::var("SESSION_SECRET")
                .map_err(|_| anyhow::anyhow!("SESSION_SECRET must be set"))?,
            gateway: GatewayConfig {
                provider,
                api_base: env::var("STRIPE_API_BASE")
                    .unwrap_or_else(|_| "https://api.stripe.com".to_string()),
                secret_key,
                webhook_secret: env::var("STRIPE_WEBHOOK_SECRET").unwrap_or_default(),
                webhook_tolerance_secs: parse_or("WEBHOOK_TOLERANCE_SECS", 300),
            },
            billing: BillingSettings {
                currency: env::var("BILLING_CURRENCY")
                    .unwrap_or_else(|_| "usd".to_string())
                    .to_lowercase(),
                grace_period_days: parse_or("GRACE_PERIOD_DAYS", 7),
                pending_payment_ttl_minutes: parse_or("PENDING_PAYMENT_TTL_MINUTES", 30),
                sweep_interval_secs: parse_or("SWEEP_INTERVAL_SECS", 60),
            },
        })
    }
}

fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(default)
}

impl Default for BillingSettings {
    fn default() -> Self {
        Self {
            currency: "usd".to_string(),
            grace_period_days: 7,
            pending_payment_ttl_minutes: 30,
            sweep_interval_secs: 60,
        }
    }
}
