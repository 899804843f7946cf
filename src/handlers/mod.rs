pub mod access;
pub mod extractors;
pub mod health;
pub mod plans;
pub mod subscriptions;
pub mod webhooks;

use std::sync::Arc;
use actix_web::web::{self, Data};

use crate::config::Config;
use crate::error::{BillingError, BillingResult};
use crate::services::{
    gateway::{webhook::WebhookVerifier, PaymentGateway},
    AccessGate, DatabaseService, PlanCatalog, SessionVerifier, SubscriptionManager,
};

/// Every service the HTTP layer hands to handlers through `web::Data`.
#[derive(Clone)]
pub struct AppState {
    pub db: DatabaseService,
    pub catalog: PlanCatalog,
    pub subscriptions: SubscriptionManager,
    pub access: AccessGate,
    pub sessions: SessionVerifier,
    pub webhooks: WebhookVerifier,
}

impl AppState {
    pub fn new(config: &Config, gateway: Arc<dyn PaymentGateway>) -> BillingResult<Self> {
        let db = DatabaseService::new();
        let catalog = PlanCatalog::new(db.clone());
        let subscriptions = SubscriptionManager::new(
            db.clone(),
            catalog.clone(),
            gateway,
            config.billing.clone(),
        );

        Ok(Self {
            access: AccessGate::new(db.clone()),
            sessions: SessionVerifier::new(config.session_secret.clone())?,
            webhooks: WebhookVerifier::new(
                config.gateway.webhook_secret.clone(),
                config.gateway.webhook_tolerance_secs,
            ),
            db,
            catalog,
            subscriptions,
        })
    }

    pub fn configure(&self, cfg: &mut web::ServiceConfig) {
        cfg.app_data(Data::new(self.db.clone()))
            .app_data(Data::new(self.catalog.clone()))
            .app_data(Data::new(self.subscriptions.clone()))
            .app_data(Data::new(self.access.clone()))
            .app_data(Data::new(self.sessions.clone()))
            .app_data(Data::new(self.webhooks.clone()))
            .app_data(web::JsonConfig::default().error_handler(|err, _| {
                BillingError::validation("body", err.to_string()).into()
            }))
            .app_data(web::QueryConfig::default().error_handler(|err, _| {
                BillingError::validation("query", err.to_string()).into()
            }))
            .app_data(web::PathConfig::default().error_handler(|err, _| {
                BillingError::validation("path", err.to_string()).into()
            }))
            .service(web::scope("/api/v1").configure(routes));
    }
}

pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/subscription-plans")
            .service(plans::list_plans)
            .service(plans::get_plan)
            .service(plans::create_plan)
            .service(plans::update_plan)
            .service(plans::delete_plan),
    )
    .service(
        web::scope("/subscriptions")
            .service(subscriptions::get_current_subscription)
            .service(subscriptions::get_subscription_history)
            .service(subscriptions::start_subscription)
            .service(subscriptions::confirm_subscription)
            .service(subscriptions::refresh_payment_intent)
            .service(subscriptions::cancel_subscription),
    )
    .service(access::get_access)
    .service(webhooks::payment_webhook)
    .service(health::health_check);
}
