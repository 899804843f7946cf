use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};
use uuid::Uuid;
use rust_decimal::Decimal;
use validator::{Validate, ValidationError};

use crate::models::common::BillingCycle;

/// Seat cap for teachers or parents. Serialized as a positive number or the
/// string `"unlimited"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawSeatLimit", into = "RawSeatLimit")]
pub enum SeatLimit {
    Limited(u32),
    Unlimited,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum RawSeatLimit {
    Count(u32),
    Word(String),
}

impl TryFrom<RawSeatLimit> for SeatLimit {
    type Error = String;

    fn try_from(raw: RawSeatLimit) -> Result<Self, Self::Error> {
        match raw {
            RawSeatLimit::Count(0) => Err("seat limit must be a positive integer".to_string()),
            RawSeatLimit::Count(n) => Ok(SeatLimit::Limited(n)),
            RawSeatLimit::Word(w) if w.eq_ignore_ascii_case("unlimited") => Ok(SeatLimit::Unlimited),
            RawSeatLimit::Word(w) => Err(format!("invalid seat limit '{}'", w)),
        }
    }
}

impl From<SeatLimit> for RawSeatLimit {
    fn from(limit: SeatLimit) -> Self {
        match limit {
            SeatLimit::Limited(n) => RawSeatLimit::Count(n),
            SeatLimit::Unlimited => RawSeatLimit::Word("unlimited".to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionPlan {
    pub id: Uuid,
    pub name: String,
    pub monthly_price: Decimal,
    pub yearly_price: Decimal,
    pub max_teachers: SeatLimit,
    pub max_parents: SeatLimit,
    pub features: Vec<String>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreatePlanRequest {
    #[validate(custom = "validate_name")]
    pub name: String,
    #[validate(custom = "validate_price")]
    pub monthly_price: Decimal,
    #[validate(custom = "validate_price")]
    pub yearly_price: Decimal,
    pub max_teachers: SeatLimit,
    pub max_parents: SeatLimit,
    #[validate(custom = "validate_features")]
    #[serde(default)]
    pub features: Vec<String>,
    pub active: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct UpdatePlanRequest {
    #[validate(custom = "validate_name")]
    pub name: Option<String>,
    #[validate(custom = "validate_price")]
    pub monthly_price: Option<Decimal>,
    #[validate(custom = "validate_price")]
    pub yearly_price: Option<Decimal>,
    pub max_teachers: Option<SeatLimit>,
    pub max_parents: Option<SeatLimit>,
    #[validate(custom = "validate_features")]
    pub features: Option<Vec<String>>,
    pub active: Option<bool>,
}

fn validate_name(name: &str) -> Result<(), ValidationError> {
    if name.trim().is_empty() {
        let mut err = ValidationError::new("empty");
        err.message = Some("plan name must not be empty".into());
        return Err(err);
    }
    Ok(())
}

fn validate_price(price: &Decimal) -> Result<(), ValidationError> {
    if *price < Decimal::ZERO {
        let mut err = ValidationError::new("negative");
        err.message = Some("price must not be negative".into());
        return Err(err);
    }
    Ok(())
}

fn validate_features(features: &Vec<String>) -> Result<(), ValidationError> {
    if features.iter().any(|f| f.trim().is_empty()) {
        let mut err = ValidationError::new("empty_feature");
        err.message = Some("feature descriptions must not be empty".into());
        return Err(err);
    }
    Ok(())
}

impl SubscriptionPlan {
    pub fn new(request: CreatePlanRequest) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: request.name.trim().to_string(),
            monthly_price: request.monthly_price,
            yearly_price: request.yearly_price,
            max_teachers: request.max_teachers,
            max_parents: request.max_parents,
            features: request.features.into_iter().map(|f| f.trim().to_string()).collect(),
            active: request.active.unwrap_or(true),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn apply(&mut self, update: UpdatePlanRequest) {
        if let Some(name) = update.name {
            self.name = name.trim().to_string();
        }
        if let Some(price) = update.monthly_price {
            self.monthly_price = price;
        }
        if let Some(price) = update.yearly_price {
            self.yearly_price = price;
        }
        if let Some(limit) = update.max_teachers {
            self.max_teachers = limit;
        }
        if let Some(limit) = update.max_parents {
            self.max_parents = limit;
        }
        if let Some(features) = update.features {
            self.features = features.into_iter().map(|f| f.trim().to_string()).collect();
        }
        if let Some(active) = update.active {
            self.active = active;
        }
        self.updated_at = Utc::now();
    }

    pub fn price_for(&self, cycle: BillingCycle) -> Decimal {
        match cycle {
            BillingCycle::Monthly => self.monthly_price,
            BillingCycle::Yearly => self.yearly_price,
        }
    }

    /// Yearly pricing is expected to be a discount over twelve monthly
    /// payments. Violations are reported, not rejected.
    pub fn pricing_warnings(&self) -> Vec<String> {
        let twelve_months = self.monthly_price * Decimal::from(12);
        if self.yearly_price > twelve_months {
            vec![format!(
                "yearly price {} exceeds 12 x monthly price ({})",
                self.yearly_price, twelve_months
            )]
        } else {
            Vec::new()
        }
    }

    pub fn has_name(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name.trim())
    }
}
