use std::future::{ready, Future, Ready};
use std::pin::Pin;

use actix_web::dev::Payload;
use actix_web::http::header;
use actix_web::web::Data;
use actix_web::{FromRequest, HttpRequest};

use crate::error::{BillingError, BillingResult};
use crate::models::session::Session;
use crate::services::{AccessGate, SessionVerifier};

fn resolve_session(req: &HttpRequest) -> BillingResult<Session> {
    let verifier = req
        .app_data::<Data<SessionVerifier>>()
        .ok_or_else(|| BillingError::Internal("session verifier not configured".to_string()))?;

    let value = req
        .headers()
        .get(header::AUTHORIZATION)
        .ok_or_else(|| BillingError::Unauthorized("missing bearer token".to_string()))?
        .to_str()
        .map_err(|_| BillingError::Unauthorized("malformed authorization header".to_string()))?;

    let token = value
        .strip_prefix("Bearer ")
        .ok_or_else(|| BillingError::Unauthorized("expected a bearer token".to_string()))?;

    verifier.verify(token)
}

impl FromRequest for Session {
    type Error = BillingError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        ready(resolve_session(req))
    }
}

/// Declared by tenant-scoped handlers that need a paid subscription. Fails
/// with 402 and a `Location: /billing` header when the tenant has none.
#[derive(Debug)]
pub struct BillingAccess(pub Session);

impl FromRequest for BillingAccess {
    type Error = BillingError;
    type Future = Pin<Box<dyn Future<Output = Result<Self, Self::Error>>>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        let session = resolve_session(req);
        let gate = req.app_data::<Data<AccessGate>>().cloned();

        Box::pin(async move {
            let session = session?;
            let gate = gate
                .ok_or_else(|| BillingError::Internal("access gate not configured".to_string()))?;
            gate.require_access(&session).await?;
            Ok(BillingAccess(session))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::http::StatusCode;
    use actix_web::{get, test, App, HttpResponse};
    use chrono::{Duration, Utc};
    use uuid::Uuid;
    use crate::models::common::Role;
    use crate::services::DatabaseService;

    #[get("/gradebook")]
    async fn gradebook(access: BillingAccess) -> HttpResponse {
        HttpResponse::Ok().body(access.0.user_id.to_string())
    }

    #[get("/whoami")]
    async fn whoami(session: Session) -> HttpResponse {
        HttpResponse::Ok().body(session.role.to_string())
    }

    #[actix_web::test]
    async fn test_session_extraction() {
        let verifier = SessionVerifier::new("secret").unwrap();
        let token = verifier
            .issue(&Session::new(Uuid::new_v4(), None, Role::Parent, Utc::now() + Duration::hours(1)))
            .unwrap();
        let app = test::init_service(
            App::new()
                .app_data(Data::new(verifier))
                .service(whoami),
        )
        .await;

        let req = test::TestRequest::get()
            .uri("/whoami")
            .insert_header((header::AUTHORIZATION, format!("Bearer {}", token)))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(&test::read_body(resp).await[..], b"parent");

        let req = test::TestRequest::get().uri("/whoami").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let req = test::TestRequest::get()
            .uri("/whoami")
            .insert_header((header::AUTHORIZATION, format!("Basic {}", token)))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[actix_web::test]
    async fn test_billing_access_redirects_unpaid_tenant() {
        let verifier = SessionVerifier::new("secret").unwrap();
        let token = verifier
            .issue(&Session::new(
                Uuid::new_v4(),
                Some(Uuid::new_v4()),
                Role::Teacher,
                Utc::now() + Duration::hours(1),
            ))
            .unwrap();
        let app = test::init_service(
            App::new()
                .app_data(Data::new(verifier))
                .app_data(Data::new(AccessGate::new(DatabaseService::new())))
                .service(gradebook),
        )
        .await;

        let req = test::TestRequest::get()
            .uri("/gradebook")
            .insert_header((header::AUTHORIZATION, format!("Bearer {}", token)))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::PAYMENT_REQUIRED);
        assert_eq!(resp.headers().get(header::LOCATION).unwrap(), "/billing");
    }
}
