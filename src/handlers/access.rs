use actix_web::web::Data;
use actix_web::{get, HttpResponse};

use crate::error::BillingResult;
use crate::models::{common::ApiResponse, session::Session};
use crate::services::AccessGate;

/// Reports whether the caller's school may use subscription-gated features.
#[get("/access")]
pub async fn get_access(gate: Data<AccessGate>, session: Session) -> BillingResult<HttpResponse> {
    let tenant_id = session.tenant()?;
    let status = gate.status(tenant_id).await;

    let message = if status.has_access {
        None
    } else {
        Some("An active subscription is required. Visit /billing to subscribe.".to_string())
    };
    let mut response = ApiResponse::success(status);
    response.message = message;
    Ok(HttpResponse::Ok().json(response))
}
