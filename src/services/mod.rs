pub mod access;
pub mod catalog;
pub mod database;
pub mod gateway;
pub mod session;
pub mod subscription;

pub use access::AccessGate;
pub use catalog::PlanCatalog;
pub use database::DatabaseService;
pub use session::SessionVerifier;
pub use subscription::SubscriptionManager;
