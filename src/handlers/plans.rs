use actix_web::web::{Data, Json, Path, Query};
use actix_web::{delete, get, post, put, HttpResponse};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};
use crate::models::{
    common::ApiResponse,
    plan::{CreatePlanRequest, UpdatePlanRequest},
    session::Session,
};
use crate::services::PlanCatalog;

#[derive(Debug, Deserialize)]
pub struct PlanListQuery {
    #[serde(default)]
    pub include_inactive: bool,
}

/// Public catalog. Retired plans are listed for platform administrators only.
#[get("")]
pub async fn list_plans(
    catalog: Data<PlanCatalog>,
    query: Query<PlanListQuery>,
    session: Option<Session>,
) -> BillingResult<HttpResponse> {
    if query.include_inactive {
        session
            .ok_or_else(|| BillingError::Unauthorized("sign in to list retired plans".to_string()))?
            .require_platform_admin()?;
    }

    let plans = catalog.list_plans(query.include_inactive).await;
    Ok(HttpResponse::Ok().json(ApiResponse::success(plans)))
}

#[get("/{plan_id}")]
pub async fn get_plan(
    catalog: Data<PlanCatalog>,
    path: Path<Uuid>,
    session: Option<Session>,
) -> BillingResult<HttpResponse> {
    let plan_id = path.into_inner();
    let plan = catalog.get_plan(&plan_id).await?;

    let is_admin = session.map_or(false, |s| s.require_platform_admin().is_ok());
    if !plan.active && !is_admin {
        return Err(BillingError::NotFound(format!("Plan {}", plan_id)));
    }
    Ok(HttpResponse::Ok().json(ApiResponse::success(plan)))
}

#[post("")]
pub async fn create_plan(
    catalog: Data<PlanCatalog>,
    session: Session,
    payload: Json<CreatePlanRequest>,
) -> BillingResult<HttpResponse> {
    session.require_platform_admin()?;

    let plan = catalog.create_plan(payload.into_inner()).await?;
    let warnings = plan.pricing_warnings();
    let response = if warnings.is_empty() {
        ApiResponse::success(plan)
    } else {
        ApiResponse::success_with_message(plan, warnings.join("; "))
    };
    Ok(HttpResponse::Created().json(response))
}

#[put("/{plan_id}")]
pub async fn update_plan(
    catalog: Data<PlanCatalog>,
    session: Session,
    path: Path<Uuid>,
    payload: Json<UpdatePlanRequest>,
) -> BillingResult<HttpResponse> {
    session.require_platform_admin()?;

    let plan = catalog.update_plan(&path.into_inner(), payload.into_inner()).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(plan)))
}

#[delete("/{plan_id}")]
pub async fn delete_plan(
    catalog: Data<PlanCatalog>,
    session: Session,
    path: Path<Uuid>,
) -> BillingResult<HttpResponse> {
    session.require_platform_admin()?;

    let plan_id = path.into_inner();
    catalog.delete_plan(&plan_id).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success_with_message(
        plan_id,
        "Plan deleted".to_string(),
    )))
}
