pub mod rate_limit;
pub mod tracing;

pub use rate_limit::{client_ip, create_ip_rate_limiter, ip_rate_limit_middleware, IpRateLimiter};
pub use tracing::{request_id_middleware, REQUEST_ID_HEADER};
