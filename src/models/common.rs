use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            error: None,
            code: None,
            details: None,
        }
    }

    pub fn success_with_message(data: T, message: String) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: Some(message),
            error: None,
            code: None,
            details: None,
        }
    }

    pub fn failure(code: &str, error: String, details: Option<serde_json::Value>) -> Self {
        Self {
            success: false,
            data: None,
            message: None,
            error: Some(error),
            code: Some(code.to_string()),
            details,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum BillingCycle {
    Monthly,
    Yearly,
}

impl BillingCycle {
    pub fn months(&self) -> u32 {
        match self {
            BillingCycle::Monthly => 1,
            BillingCycle::Yearly => 12,
        }
    }
}

impl fmt::Display for BillingCycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BillingCycle::Monthly => write!(f, "monthly"),
            BillingCycle::Yearly => write!(f, "yearly"),
        }
    }
}

impl FromStr for BillingCycle {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "monthly" => Ok(BillingCycle::Monthly),
            "yearly" | "annual" => Ok(BillingCycle::Yearly),
            other => Err(format!("unknown billing cycle '{}'", other)),
        }
    }
}

/// Who is calling. Closed set; every admin check matches on it exhaustively.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Parent,
    Teacher,
    SchoolAdmin,
    PlatformAdmin,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Parent => write!(f, "parent"),
            Role::Teacher => write!(f, "teacher"),
            Role::SchoolAdmin => write!(f, "school_admin"),
            Role::PlatformAdmin => write!(f, "platform_admin"),
        }
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "parent" => Ok(Role::Parent),
            "teacher" => Ok(Role::Teacher),
            "school_admin" => Ok(Role::SchoolAdmin),
            "platform_admin" => Ok(Role::PlatformAdmin),
            other => Err(format!("unknown role '{}'", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_billing_cycle_parsing() {
        assert_eq!("Monthly".parse::<BillingCycle>().unwrap(), BillingCycle::Monthly);
        assert_eq!("annual".parse::<BillingCycle>().unwrap(), BillingCycle::Yearly);
        assert!("weekly".parse::<BillingCycle>().is_err());
        assert_eq!(BillingCycle::Yearly.months(), 12);
    }

    #[test]
    fn test_role_round_trip_is_exact() {
        for role in [Role::Parent, Role::Teacher, Role::SchoolAdmin, Role::PlatformAdmin] {
            assert_eq!(role.to_string().parse::<Role>().unwrap(), role);
        }
        // Legacy mixed-case spellings are not accepted.
        assert!("School_Admin".parse::<Role>().is_err());
    }
}
