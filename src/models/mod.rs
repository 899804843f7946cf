pub mod common;
pub mod payment;
pub mod plan;
pub mod session;
pub mod subscription;
