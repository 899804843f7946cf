use actix_web::web::Data;
use actix_web::{get, HttpResponse};
use serde_json::json;

use crate::services::{DatabaseService, SubscriptionManager};

#[get("/health")]
pub async fn health_check(db: Data<DatabaseService>, manager: Data<SubscriptionManager>) -> HttpResponse {
    let stats = db.get_statistics().await;
    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "service": "school-billing",
        "gateway": manager.gateway_name(),
        "timestamp": chrono::Utc::now(),
        "stats": stats,
    }))
}
