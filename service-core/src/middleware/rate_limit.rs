use crate::error::AppError;
use axum::{
    extract::{ConnectInfo, Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use governor::{
    Quota, RateLimiter,
    clock::{Clock, DefaultClock},
    state::keyed::DashMapStateStore,
};
use std::{
    net::{IpAddr, SocketAddr},
    num::NonZeroU32,
    sync::Arc,
    time::Duration,
};

/// Rate limiter keyed by client IP address
pub type IpRateLimiter = Arc<RateLimiter<IpAddr, DashMapStateStore<IpAddr>, DefaultClock>>;

/// Create a keyed rate limiter (by IP) admitting `attempts` per `window_seconds`
pub fn create_ip_rate_limiter(attempts: u32, window_seconds: u64) -> IpRateLimiter {
    let attempts = attempts.max(1);
    let period = Duration::from_millis(((window_seconds * 1000) / attempts as u64).max(1));
    let burst = NonZeroU32::new(attempts).unwrap_or(NonZeroU32::MIN);
    let quota = Quota::with_period(period)
        .unwrap_or_else(|| Quota::per_second(burst))
        .allow_burst(burst);

    Arc::new(RateLimiter::dashmap(quota))
}

/// Per-IP limiter plus the proxy topology needed to find the client address.
#[derive(Clone)]
pub struct IpRateLimit {
    pub limiter: IpRateLimiter,
    pub trusted_proxy_hops: usize,
}

impl IpRateLimit {
    pub fn new(attempts: u32, window_seconds: u64, trusted_proxy_hops: usize) -> Self {
        Self {
            limiter: create_ip_rate_limiter(attempts, window_seconds),
            trusted_proxy_hops,
        }
    }
}

/// Drop limiter entries whose quota has fully replenished. Returns the number
/// of keys still tracked.
pub fn prune_ip_rate_limiter(limiter: &IpRateLimiter) -> usize {
    limiter.retain_recent();
    limiter.shrink_to_fit();
    limiter.len()
}

/// Resolve the client address behind `trusted_proxy_hops` reverse proxies.
///
/// The socket peer counts as the first trusted hop; each further hop trusts
/// one more `X-Forwarded-For` entry counted from the right. The client is the
/// entry just left of the trusted ones; anything further left is
/// client-supplied and ignored. With zero hops the header is ignored.
pub fn client_ip(
    headers: &HeaderMap,
    peer: Option<SocketAddr>,
    trusted_proxy_hops: usize,
) -> Option<IpAddr> {
    let peer_ip = peer.map(|addr| addr.ip());
    if trusted_proxy_hops == 0 {
        return peer_ip;
    }

    let forwarded: Vec<IpAddr> = headers
        .get_all("x-forwarded-for")
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|s| s.split(','))
        .filter_map(|s| s.trim().parse::<IpAddr>().ok())
        .collect();

    let skip = trusted_proxy_hops - 1;
    if forwarded.len() > skip {
        Some(forwarded[forwarded.len() - 1 - skip])
    } else {
        // Every hop is trusted; the furthest known address is the client.
        forwarded.first().copied().or(peer_ip)
    }
}

/// Middleware for IP-based rate limiting
pub async fn ip_rate_limit_middleware(
    State(rate_limit): State<IpRateLimit>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);

    match client_ip(request.headers(), peer, rate_limit.trusted_proxy_hops) {
        Some(ip) => match rate_limit.limiter.check_key(&ip) {
            Ok(_) => Ok(next.run(request).await),
            Err(negative) => {
                let wait_time = negative.wait_time_from(DefaultClock::default().now());
                tracing::warn!(client_ip = %ip, path = %request.uri().path(), "IP rate limit exceeded");
                Err(AppError::TooManyRequests(
                    "Too many requests from this IP. Please try again later.".to_string(),
                    Some(wait_time.as_secs().max(1)),
                ))
            }
        },
        None => {
            tracing::warn!("Could not determine IP for rate limiting");
            Ok(next.run(request).await)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        Router,
        body::Body,
        http::{HeaderValue, Request as HttpRequest, StatusCode},
        middleware::from_fn_with_state,
        routing::get,
    };
    use tower::util::ServiceExt;

    fn forwarded(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_str(value).unwrap());
        headers
    }

    fn peer() -> Option<SocketAddr> {
        Some(SocketAddr::from(([127, 0, 0, 1], 4000)))
    }

    fn request_from(forwarded_for: &str) -> HttpRequest<Body> {
        HttpRequest::builder()
            .uri("/")
            .header("x-forwarded-for", forwarded_for)
            .body(Body::empty())
            .unwrap()
    }

    #[test]
    fn without_trusted_proxies_the_header_is_ignored() {
        let headers = forwarded("203.0.113.7");
        assert_eq!(client_ip(&headers, peer(), 0), Some("127.0.0.1".parse().unwrap()));
        assert_eq!(client_ip(&headers, None, 0), None);
    }

    #[test]
    fn one_trusted_hop_uses_the_rightmost_entry() {
        let headers = forwarded("10.9.9.1, 203.0.113.7");
        assert_eq!(client_ip(&headers, peer(), 1), Some("203.0.113.7".parse().unwrap()));
    }

    #[test]
    fn two_trusted_hops_skip_the_inner_proxy_entry() {
        let headers = forwarded("10.9.9.1, 203.0.113.7, 10.0.0.2");
        assert_eq!(client_ip(&headers, peer(), 2), Some("203.0.113.7".parse().unwrap()));
    }

    #[test]
    fn short_chain_falls_back_to_the_furthest_address() {
        let headers = forwarded("203.0.113.7");
        assert_eq!(client_ip(&headers, peer(), 3), Some("203.0.113.7".parse().unwrap()));
        assert_eq!(
            client_ip(&HeaderMap::new(), peer(), 1),
            Some("127.0.0.1".parse().unwrap())
        );
    }

    #[test]
    fn rotating_the_leftmost_entry_does_not_change_the_client() {
        let seen: Vec<_> = (0..5)
            .map(|i| client_ip(&forwarded(&format!("10.9.9.{i}, 198.51.100.4")), peer(), 1))
            .collect();
        assert!(seen.iter().all(|ip| *ip == Some("198.51.100.4".parse().unwrap())));
    }

    #[tokio::test]
    async fn rejects_requests_over_the_limit() {
        let app = Router::new()
            .route("/", get(|| async { "ok" }))
            .layer(from_fn_with_state(IpRateLimit::new(2, 900, 1), ip_rate_limit_middleware));

        for i in 0..2 {
            let req = request_from(&format!("10.0.0.{i}, 198.51.100.1"));
            let res = app.clone().oneshot(req).await.unwrap();
            assert_eq!(res.status(), StatusCode::OK);
        }

        let res = app
            .clone()
            .oneshot(request_from("10.0.0.9, 198.51.100.1"))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(res.headers().contains_key("retry-after"));

        let res = app.oneshot(request_from("198.51.100.2")).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn prune_drops_replenished_addresses() {
        let limiter = create_ip_rate_limiter(1, 0);
        let ip: IpAddr = "198.51.100.1".parse().unwrap();
        assert!(limiter.check_key(&ip).is_ok());
        assert_eq!(limiter.len(), 1);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(prune_ip_rate_limiter(&limiter), 0);
    }

    #[test]
    fn prune_keeps_addresses_still_inside_their_window() {
        let limiter = create_ip_rate_limiter(1, 900);
        assert!(limiter.check_key(&"198.51.100.1".parse().unwrap()).is_ok());
        assert_eq!(prune_ip_rate_limiter(&limiter), 1);
    }
}
