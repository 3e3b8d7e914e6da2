pub mod metrics;
pub mod rate_limit;
pub mod security_headers;
pub mod tracing;

pub use rate_limit::{
    IpRateLimit, IpRateLimiter, client_ip, create_ip_rate_limiter, ip_rate_limit_middleware,
    prune_ip_rate_limiter,
};
