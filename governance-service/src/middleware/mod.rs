pub mod auth;
pub mod metrics;

pub use auth::{auth_middleware, request_meta, AuthUser, ClientMeta};
pub use metrics::metrics_middleware;
