use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;
use validator::Validate;

use crate::error::{BillingError, BillingResult};
use crate::models::plan::{CreatePlanRequest, SubscriptionPlan, UpdatePlanRequest};
use crate::services::database::DatabaseService;

/// Owns the purchasable plans. Reads go through an in-memory copy of the
/// plan list that every write invalidates.
#[derive(Clone)]
pub struct PlanCatalog {
    db: DatabaseService,
    cache: Arc<RwLock<Option<Vec<SubscriptionPlan>>>>,
}

impl PlanCatalog {
    pub fn new(db: DatabaseService) -> Self {
        Self {
            db,
            cache: Arc::new(RwLock::new(None)),
        }
    }

    pub async fn list_plans(&self, include_inactive: bool) -> Vec<SubscriptionPlan> {
        let plans = self.cached_plans().await;
        if include_inactive {
            plans
        } else {
            plans.into_iter().filter(|p| p.active).collect()
        }
    }

    pub async fn get_plan(&self, plan_id: &Uuid) -> BillingResult<SubscriptionPlan> {
        self.cached_plans()
            .await
            .into_iter()
            .find(|p| p.id == *plan_id)
            .ok_or_else(|| BillingError::NotFound(format!("Plan {}", plan_id)))
    }

    pub async fn find_by_name(&self, name: &str) -> BillingResult<SubscriptionPlan> {
        self.cached_plans()
            .await
            .into_iter()
            .find(|p| p.has_name(name))
            .ok_or_else(|| BillingError::NotFound(format!("Plan '{}'", name.trim())))
    }

    pub async fn create_plan(&self, request: CreatePlanRequest) -> BillingResult<SubscriptionPlan> {
        request.validate()?;

        let plan = SubscriptionPlan::new(request);
        for warning in plan.pricing_warnings() {
            log::warn!("Plan '{}': {}", plan.name, warning);
        }

        let created = self.db.insert_plan(plan).await;
        self.invalidate().await;
        created
    }

    pub async fn update_plan(&self, plan_id: &Uuid, request: UpdatePlanRequest) -> BillingResult<SubscriptionPlan> {
        request.validate()?;

        let updated = self.db.update_plan(plan_id, |plan| plan.apply(request)).await;
        self.invalidate().await;

        let updated = updated?;
        for warning in updated.pricing_warnings() {
            log::warn!("Plan '{}': {}", updated.name, warning);
        }
        if !updated.active {
            log::info!("Plan '{}' retired from the catalog", updated.name);
        }
        Ok(updated)
    }

    pub async fn delete_plan(&self, plan_id: &Uuid) -> BillingResult<()> {
        let deleted = self.db.delete_plan(plan_id).await;
        self.invalidate().await;
        deleted
    }

    async fn cached_plans(&self) -> Vec<SubscriptionPlan> {
        if let Some(plans) = self.cache.read().await.as_ref() {
            return plans.clone();
        }

        let mut cache = self.cache.write().await;
        let plans = self.db.list_plans().await;
        *cache = Some(plans.clone());
        plans
    }

    async fn invalidate(&self) {
        *self.cache.write().await = None;
    }
}
