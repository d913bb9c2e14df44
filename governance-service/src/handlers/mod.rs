pub mod audit;
pub mod auth;
pub mod change_requests;
pub mod metrics;
pub mod pending_approvals;
pub mod roles;
pub mod sessions;
pub mod users;
