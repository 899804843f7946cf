use actix_web::web::{Data, Json, Path, Query};
use actix_web::{get, post, HttpResponse};
use serde::Serialize;
use uuid::Uuid;
use validator::Validate;

use crate::error::{BillingError, BillingResult};
use crate::models::{
    common::ApiResponse,
    payment::PaymentIntentResponse,
    session::Session,
    subscription::{ConfirmSubscriptionRequest, StartSubscriptionRequest, Subscription, TenantQuery},
};
use crate::services::subscription::Completion;
use crate::services::SubscriptionManager;

#[derive(Debug, Serialize)]
pub struct StartSubscriptionResponse {
    pub subscription: Subscription,
    pub payment_intent_ref: String,
    pub payment_intent_client_secret: String,
}

/// Loads a subscription and checks the caller administers its school.
async fn owned_subscription(
    manager: &SubscriptionManager,
    session: &Session,
    subscription_id: &Uuid,
) -> BillingResult<Subscription> {
    let subscription = manager.get_subscription(subscription_id).await?;
    session.require_billing_admin(subscription.tenant_id)?;
    Ok(subscription)
}

#[get("/current")]
pub async fn get_current_subscription(
    manager: Data<SubscriptionManager>,
    session: Session,
    query: Query<TenantQuery>,
) -> BillingResult<HttpResponse> {
    session.require_tenant_read(query.tenant_id)?;

    let subscription = manager
        .get_active_subscription(&query.tenant_id)
        .await
        .ok_or_else(|| BillingError::NotFound(format!("Subscription for tenant {}", query.tenant_id)))?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(subscription)))
}

#[get("/history")]
pub async fn get_subscription_history(
    manager: Data<SubscriptionManager>,
    session: Session,
    query: Query<TenantQuery>,
) -> BillingResult<HttpResponse> {
    session.require_tenant_read(query.tenant_id)?;

    let history = manager.history(&query.tenant_id).await;
    Ok(HttpResponse::Ok().json(ApiResponse::success(history)))
}

#[post("")]
pub async fn start_subscription(
    manager: Data<SubscriptionManager>,
    session: Session,
    payload: Json<StartSubscriptionRequest>,
) -> BillingResult<HttpResponse> {
    payload.validate()?;
    let tenant_id = session.tenant()?;
    session.require_billing_admin(tenant_id)?;

    let started = manager
        .start_subscription(tenant_id, &payload.plan_name, payload.billing_cycle)
        .await?;

    Ok(HttpResponse::Created().json(ApiResponse::success_with_message(
        StartSubscriptionResponse {
            payment_intent_ref: started.payment_intent.reference,
            payment_intent_client_secret: started.payment_intent.client_secret,
            subscription: started.subscription,
        },
        "Complete the card payment to activate the subscription".to_string(),
    )))
}

#[post("/{subscription_id}/confirm")]
pub async fn confirm_subscription(
    manager: Data<SubscriptionManager>,
    session: Session,
    path: Path<Uuid>,
    payload: Json<ConfirmSubscriptionRequest>,
) -> BillingResult<HttpResponse> {
    payload.validate()?;
    let subscription_id = path.into_inner();
    owned_subscription(&manager, &session, &subscription_id).await?;

    let completion = manager
        .complete_subscription(
            &subscription_id,
            &payload.payment_intent_ref,
            payload.payment_method.as_deref(),
        )
        .await?;

    let message = match &completion {
        Completion::Activated { .. } => "Subscription active".to_string(),
        Completion::Declined { reason, .. } => format!("Payment declined: {}", reason),
        Completion::AlreadyApplied { subscription } => {
            format!("Payment already applied; subscription is {:?}", subscription.status)
        }
    };
    log::info!("Confirmation of {}: {}", completion.subscription().id, message);
    Ok(HttpResponse::Ok().json(ApiResponse::success_with_message(completion, message)))
}

#[post("/{subscription_id}/payment-intent")]
pub async fn refresh_payment_intent(
    manager: Data<SubscriptionManager>,
    session: Session,
    path: Path<Uuid>,
) -> BillingResult<HttpResponse> {
    let subscription_id = path.into_inner();
    owned_subscription(&manager, &session, &subscription_id).await?;

    let intent = manager.refresh_payment_intent(&subscription_id).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(PaymentIntentResponse::from(&intent))))
}

#[post("/{subscription_id}/cancel")]
pub async fn cancel_subscription(
    manager: Data<SubscriptionManager>,
    session: Session,
    path: Path<Uuid>,
) -> BillingResult<HttpResponse> {
    let subscription_id = path.into_inner();
    owned_subscription(&manager, &session, &subscription_id).await?;

    let subscription = manager.cancel_subscription(&subscription_id).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success_with_message(
        subscription,
        "Subscription canceled".to_string(),
    )))
}

#[cfg(test)]
mod tests {
    use actix_web::http::{header, StatusCode};
    use actix_web::{test, App};
    use rust_decimal::Decimal;
    use serde_json::{json, Value};
    use uuid::Uuid;

    use crate::handlers::test_support::{bearer, state};
    use crate::handlers::AppState;
    use crate::models::common::Role;
    use crate::models::plan::{CreatePlanRequest, SeatLimit};
    use crate::services::gateway::sandbox::DECLINED_PAYMENT_METHOD;

    async fn seeded() -> (AppState, crate::services::gateway::SandboxGateway) {
        let (state, sandbox) = state();
        state
            .catalog
            .create_plan(CreatePlanRequest {
                name: "Standard".to_string(),
                monthly_price: Decimal::new(99, 0),
                yearly_price: Decimal::new(990, 0),
                max_teachers: SeatLimit::Limited(50),
                max_parents: SeatLimit::Unlimited,
                features: vec!["Announcements".to_string()],
                active: None,
            })
            .await
            .unwrap();
        (state, sandbox)
    }

    #[actix_web::test]
    async fn test_purchase_flow_over_http() {
        let (state, _) = seeded().await;
        let tenant = Uuid::new_v4();
        let admin = bearer(&state, Role::SchoolAdmin, Some(tenant));
        let teacher = bearer(&state, Role::Teacher, Some(tenant));
        let app = test::init_service(App::new().configure(|cfg| state.configure(cfg))).await;

        let req = test::TestRequest::post()
            .uri("/api/v1/subscriptions")
            .insert_header((header::AUTHORIZATION, admin.clone()))
            .set_json(json!({"plan_name": "standard", "billing_cycle": "yearly"}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["data"]["subscription"]["status"], "pending_payment");
        let subscription_id = body["data"]["subscription"]["id"].as_str().unwrap().to_string();
        let intent_ref = body["data"]["payment_intent_ref"].as_str().unwrap().to_string();
        assert!(body["data"]["payment_intent_client_secret"].as_str().unwrap().contains("_secret_"));

        // A second start while pending conflicts.
        let req = test::TestRequest::post()
            .uri("/api/v1/subscriptions")
            .insert_header((header::AUTHORIZATION, admin.clone()))
            .set_json(json!({"plan_name": "Standard", "billing_cycle": "monthly"}))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::CONFLICT);

        // Teachers cannot confirm billing.
        let req = test::TestRequest::post()
            .uri(&format!("/api/v1/subscriptions/{}/confirm", subscription_id))
            .insert_header((header::AUTHORIZATION, teacher.clone()))
            .set_json(json!({"payment_intent_ref": intent_ref}))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::FORBIDDEN);

        let req = test::TestRequest::post()
            .uri(&format!("/api/v1/subscriptions/{}/confirm", subscription_id))
            .insert_header((header::AUTHORIZATION, admin.clone()))
            .set_json(json!({"payment_intent_ref": intent_ref}))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["data"]["outcome"], "activated");
        assert_eq!(body["data"]["subscription"]["status"], "active");

        // Any member of the school can read the current subscription.
        let req = test::TestRequest::get()
            .uri(&format!("/api/v1/subscriptions/current?tenant_id={}", tenant))
            .insert_header((header::AUTHORIZATION, teacher))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["data"]["id"], subscription_id.as_str());

        let req = test::TestRequest::get()
            .uri("/api/v1/access")
            .insert_header((header::AUTHORIZATION, admin))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["data"]["has_access"], true);
    }

    #[actix_web::test]
    async fn test_decline_then_fresh_intent() {
        let (state, _) = seeded().await;
        let tenant = Uuid::new_v4();
        let admin = bearer(&state, Role::SchoolAdmin, Some(tenant));
        let app = test::init_service(App::new().configure(|cfg| state.configure(cfg))).await;

        let req = test::TestRequest::post()
            .uri("/api/v1/subscriptions")
            .insert_header((header::AUTHORIZATION, admin.clone()))
            .set_json(json!({"plan_name": "Standard", "billing_cycle": "monthly"}))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        let subscription_id = body["data"]["subscription"]["id"].as_str().unwrap().to_string();
        let intent_ref = body["data"]["payment_intent_ref"].as_str().unwrap().to_string();

        let req = test::TestRequest::post()
            .uri(&format!("/api/v1/subscriptions/{}/confirm", subscription_id))
            .insert_header((header::AUTHORIZATION, admin.clone()))
            .set_json(json!({"payment_intent_ref": intent_ref, "payment_method": DECLINED_PAYMENT_METHOD}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["data"]["outcome"], "declined");
        assert_eq!(body["data"]["subscription"]["status"], "pending_payment");

        let req = test::TestRequest::post()
            .uri(&format!("/api/v1/subscriptions/{}/payment-intent", subscription_id))
            .insert_header((header::AUTHORIZATION, admin.clone()))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        let fresh = body["data"]["payment_intent_ref"].as_str().unwrap().to_string();
        assert_ne!(fresh, intent_ref);

        let req = test::TestRequest::post()
            .uri(&format!("/api/v1/subscriptions/{}/confirm", subscription_id))
            .insert_header((header::AUTHORIZATION, admin.clone()))
            .set_json(json!({"payment_intent_ref": fresh}))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["data"]["subscription"]["status"], "active");

        let req = test::TestRequest::post()
            .uri(&format!("/api/v1/subscriptions/{}/cancel", subscription_id))
            .insert_header((header::AUTHORIZATION, admin.clone()))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["data"]["status"], "canceled");

        let req = test::TestRequest::get()
            .uri(&format!("/api/v1/subscriptions/history?tenant_id={}", tenant))
            .insert_header((header::AUTHORIZATION, admin))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["data"].as_array().unwrap().len(), 1);
    }

    #[actix_web::test]
    async fn test_start_errors_map_to_statuses() {
        let (state, sandbox) = seeded().await;
        let tenant = Uuid::new_v4();
        let admin = bearer(&state, Role::SchoolAdmin, Some(tenant));
        let app = test::init_service(App::new().configure(|cfg| state.configure(cfg))).await;

        let req = test::TestRequest::post()
            .uri("/api/v1/subscriptions")
            .insert_header((header::AUTHORIZATION, admin.clone()))
            .set_json(json!({"plan_name": "Platinum", "billing_cycle": "monthly"}))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);

        let req = test::TestRequest::post()
            .uri("/api/v1/subscriptions")
            .insert_header((header::AUTHORIZATION, admin.clone()))
            .set_json(json!({"plan_name": "Standard", "billing_cycle": "weekly"}))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);

        sandbox.fail_next(1);
        let req = test::TestRequest::post()
            .uri("/api/v1/subscriptions")
            .insert_header((header::AUTHORIZATION, admin.clone()))
            .set_json(json!({"plan_name": "Standard", "billing_cycle": "monthly"}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["code"], "GATEWAY_ERROR");

        // Nothing was left reserved.
        let req = test::TestRequest::get()
            .uri(&format!("/api/v1/subscriptions/current?tenant_id={}", tenant))
            .insert_header((header::AUTHORIZATION, admin))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);
    }

    #[actix_web::test]
    async fn test_other_school_cannot_read_or_cancel() {
        let (state, _) = seeded().await;
        let tenant = Uuid::new_v4();
        let admin = bearer(&state, Role::SchoolAdmin, Some(tenant));
        let outsider = bearer(&state, Role::SchoolAdmin, Some(Uuid::new_v4()));
        let app = test::init_service(App::new().configure(|cfg| state.configure(cfg))).await;

        let req = test::TestRequest::post()
            .uri("/api/v1/subscriptions")
            .insert_header((header::AUTHORIZATION, admin))
            .set_json(json!({"plan_name": "Standard", "billing_cycle": "monthly"}))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        let subscription_id = body["data"]["subscription"]["id"].as_str().unwrap().to_string();

        let req = test::TestRequest::get()
            .uri(&format!("/api/v1/subscriptions/current?tenant_id={}", tenant))
            .insert_header((header::AUTHORIZATION, outsider.clone()))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::FORBIDDEN);

        let req = test::TestRequest::post()
            .uri(&format!("/api/v1/subscriptions/{}/cancel", subscription_id))
            .insert_header((header::AUTHORIZATION, outsider))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::FORBIDDEN);
    }
}
