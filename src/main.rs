mod config;
mod error;
mod handlers;
mod models;
mod services;
mod tasks;

use std::sync::Arc;
use std::time::Duration;

use actix_cors::Cors;
use actix_web::{middleware::Logger, App, HttpServer};
use dotenv::dotenv;

use config::{Config, GatewayProvider};
use handlers::AppState;
use services::gateway::{PaymentGateway, SandboxGateway, StripeGateway};

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    env_logger::init();

    let config = Config::from_env()?;

    let gateway: Arc<dyn PaymentGateway> = match config.gateway.provider {
        GatewayProvider::Stripe => Arc::new(StripeGateway::new(&config.gateway)),
        GatewayProvider::Sandbox => {
            log::warn!("Using the sandbox payment gateway; no real charges will be made");
            Arc::new(SandboxGateway::new())
        }
    };

    let state = AppState::new(&config, gateway)?;

    tasks::start_sweep_task(
        state.subscriptions.clone(),
        Duration::from_secs(config.billing.sweep_interval_secs.max(1)),
    );

    log::info!(
        "Starting school billing service on {} (gateway: {})",
        config.bind_address,
        state.subscriptions.gateway_name()
    );

    HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .wrap(cors())
            .configure(|cfg| state.configure(cfg))
    })
    .bind(&config.bind_address)?
    .run()
    .await?;

    Ok(())
}

/// Any origin may call the API. Requests authenticate with bearer tokens, so
/// credentialed cross-origin requests are not allowed.
fn cors() -> Cors {
    Cors::default()
        .allow_any_origin()
        .allow_any_method()
        .allow_any_header()
}
