//! Error taxonomy shared by the catalog, the subscription manager and the
//! HTTP edge.

use actix_web::http::{header, StatusCode};
use actix_web::{HttpResponse, ResponseError};
use uuid::Uuid;

use crate::models::common::ApiResponse;
use crate::services::gateway::GatewayError;

#[derive(Debug, thiserror::Error)]
pub enum BillingError {
    #[error("{field}: {message}")]
    Validation { field: String, message: String },

    #[error("{0} not found")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Plan '{0}' is no longer offered")]
    InactivePlan(String),

    #[error("Payment gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Tenant {0} has no active subscription")]
    SubscriptionRequired(Uuid),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type BillingResult<T> = Result<T, BillingError>;

impl BillingError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        BillingError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            BillingError::Validation { .. } => "VALIDATION_ERROR",
            BillingError::NotFound(_) => "NOT_FOUND",
            BillingError::Conflict(_) => "CONFLICT",
            BillingError::InactivePlan(_) => "INACTIVE_PLAN",
            BillingError::Gateway(_) => "GATEWAY_ERROR",
            BillingError::SubscriptionRequired(_) => "SUBSCRIPTION_REQUIRED",
            BillingError::Unauthorized(_) => "UNAUTHORIZED",
            BillingError::Forbidden(_) => "FORBIDDEN",
            BillingError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl From<validator::ValidationErrors> for BillingError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let mut fields: Vec<_> = errors.field_errors().into_iter().collect();
        fields.sort_by(|a, b| a.0.cmp(b.0));

        match fields.first() {
            Some((field, errs)) => {
                let message = errs
                    .iter()
                    .find_map(|e| e.message.as_ref().map(|m| m.to_string()))
                    .or_else(|| errs.first().map(|e| e.code.to_string()))
                    .unwrap_or_else(|| "invalid value".to_string());
                BillingError::validation(field.to_string(), message)
            }
            None => BillingError::validation("request", errors.to_string()),
        }
    }
}

impl ResponseError for BillingError {
    fn status_code(&self) -> StatusCode {
        match self {
            BillingError::Validation { .. } => StatusCode::BAD_REQUEST,
            BillingError::NotFound(_) => StatusCode::NOT_FOUND,
            BillingError::Conflict(_) => StatusCode::CONFLICT,
            BillingError::InactivePlan(_) => StatusCode::UNPROCESSABLE_ENTITY,
            BillingError::Gateway(_) => StatusCode::BAD_GATEWAY,
            BillingError::SubscriptionRequired(_) => StatusCode::PAYMENT_REQUIRED,
            BillingError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            BillingError::Forbidden(_) => StatusCode::FORBIDDEN,
            BillingError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        if matches!(self, BillingError::Internal(_) | BillingError::Gateway(_)) {
            log::error!("{}", self);
        }

        let details = match self {
            BillingError::Validation { field, .. } => Some(serde_json::json!({ "field": field })),
            BillingError::SubscriptionRequired(tenant_id) => Some(serde_json::json!({
                "tenant_id": tenant_id,
                "redirect": "/billing",
            })),
            _ => None,
        };

        let body = ApiResponse::<()>::failure(self.code(), self.to_string(), details);
        let mut response = HttpResponse::build(self.status_code());
        if let BillingError::SubscriptionRequired(_) = self {
            response.insert_header((header::LOCATION, "/billing"));
        }
        response.json(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use validator::Validate;

    #[derive(Validate)]
    struct Probe {
        #[validate(length(min = 1, message = "must not be empty"))]
        name: String,
    }

    #[test]
    fn test_validation_errors_keep_field_detail() {
        let err: BillingError = Probe { name: String::new() }.validate().unwrap_err().into();
        match err {
            BillingError::Validation { field, message } => {
                assert_eq!(field, "name");
                assert_eq!(message, "must not be empty");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(BillingError::Conflict("x".into()).status_code(), StatusCode::CONFLICT);
        assert_eq!(
            BillingError::InactivePlan("Basic".into()).status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );

        let response = BillingError::SubscriptionRequired(Uuid::new_v4()).error_response();
        assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
        assert_eq!(response.headers().get(header::LOCATION).unwrap(), "/billing");
    }
}
