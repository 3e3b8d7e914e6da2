use crate::config::{CorsConfig, PalmistryConfig, VisionBackend};
use crate::handlers;
use crate::services::providers::OpenAiConfig;
use crate::services::{ImagePreprocessor, MockVisionProvider, OpenAiVisionProvider, PromptSet, VisionProvider};
use axum::{
    extract::{DefaultBodyLimit, Request},
    http::{header, HeaderName, HeaderValue, Method},
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
    Router,
};
use service_core::error::AppError;
use service_core::middleware::{
    ip_rate_limit_middleware, metrics::metrics_middleware, prune_ip_rate_limiter, IpRateLimit,
    security_headers::security_headers_middleware,
    tracing::{http_request_span, request_id_middleware, REQUEST_ID_HEADER},
};
use service_core::quota::{InMemoryQuotaStore, QuotaStore};
use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::time::MissedTickBehavior;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;

/// Room for multipart boundaries and the `plan` field on top of the file.
const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

const LIMITER_CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Clone)]
pub struct AppState {
    pub config: PalmistryConfig,
    pub vision: Arc<dyn VisionProvider>,
    pub prompts: Arc<PromptSet>,
    pub preprocessor: ImagePreprocessor,
    pub free_quota: Arc<dyn QuotaStore>,
    pub ip_rate_limit: IpRateLimit,
}

pub struct Application {
    port: u16,
    server: Box<dyn std::future::Future<Output = std::io::Result<()>> + Send + Unpin>,
    state: AppState,
}

impl Application {
    pub async fn build(config: PalmistryConfig) -> Result<Self, AppError> {
        let vision = build_vision_provider(&config)?;
        Self::build_with_provider(config, vision).await
    }

    /// Build with an explicit vision provider instead of the configured one.
    pub async fn build_with_provider(
        config: PalmistryConfig,
        vision: Arc<dyn VisionProvider>,
    ) -> Result<Self, AppError> {
        let prompts = PromptSet::load(&config.paths.prompts_dir).await.map_err(|e| {
            tracing::error!("Failed to load prompt templates: {}", e);
            e
        })?;

        tokio::fs::create_dir_all(&config.upload.dir).await.map_err(|e| {
            tracing::error!(
                "Failed to create upload directory {}: {}",
                config.upload.dir.display(),
                e
            );
            AppError::from(e)
        })?;

        let state = AppState {
            preprocessor: ImagePreprocessor::new(
                config.upload.min_image_width,
                config.upload.jpeg_quality,
            ),
            free_quota: InMemoryQuotaStore::shared(
                config.limits.free_requests,
                Duration::from_secs(config.limits.free_window_seconds),
            ),
            ip_rate_limit: IpRateLimit::new(
                config.limits.global_requests,
                config.limits.global_window_seconds,
                config.limits.trusted_proxy_hops,
            ),
            prompts: Arc::new(prompts),
            vision,
            config: config.clone(),
        };

        spawn_limiter_cleanup(&state, LIMITER_CLEANUP_INTERVAL);
        let app = build_router(state.clone());

        let addr = config.common.socket_addr();
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!("Failed to bind TCP listener to {}: {}", addr, e);
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        tracing::info!(
            port,
            environment = ?config.environment,
            provider = ?config.vision.backend,
            model = %config.vision.model,
            "Listening on {}",
            port
        );

        let server = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal());

        Ok(Self {
            port,
            server: Box::new(server.into_future()),
            state,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        self.server.await
    }
}

pub fn build_vision_provider(config: &PalmistryConfig) -> Result<Arc<dyn VisionProvider>, AppError> {
    match config.vision.backend {
        VisionBackend::OpenAi => {
            let provider = OpenAiVisionProvider::new(OpenAiConfig {
                api_key: config.vision.api_key.clone(),
                api_base: config.vision.api_base.clone(),
                model: config.vision.model.clone(),
                max_tokens: config.vision.max_tokens,
                image_detail: config.vision.image_detail.clone(),
                timeout: Duration::from_secs(config.vision.timeout_seconds),
            })
            .map_err(|e| AppError::ConfigError(anyhow::anyhow!(e)))?;
            Ok(Arc::new(provider))
        }
        VisionBackend::Mock => {
            tracing::warn!("Using mock vision provider; readings are canned");
            Ok(Arc::new(MockVisionProvider::default()))
        }
    }
}

/// Routes and middleware stack of the service.
///
/// Health checks and metrics sit outside the per-IP limiter; the analysis endpoint
/// and static assets share it.
pub fn build_router(state: AppState) -> Router {
    let static_dir = &state.config.paths.static_dir;
    let spa = ServeDir::new(static_dir).fallback(ServeFile::new(static_dir.join("index.html")));

    let body_limit = state.config.upload.max_bytes + MULTIPART_OVERHEAD_BYTES;
    let cors = cors_layer(&state.config.cors);

    let public = Router::new()
        .route(
            "/analyze",
            post(handlers::analyze).layer(DefaultBodyLimit::max(body_limit)),
        )
        .fallback_service(spa)
        .layer(from_fn_with_state(
            state.ip_rate_limit.clone(),
            ip_rate_limit_middleware,
        ));

    let operational = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/metrics", get(handlers::metrics_endpoint));

    public
        .merge(operational)
        .with_state(state)
        .layer(from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http().make_span_with(|request: &Request| http_request_span(request)))
        .layer(from_fn(request_id_middleware))
        .layer(from_fn(security_headers_middleware))
        .layer(cors)
}

/// Periodically forget clients whose limits have fully replenished, so the
/// limiter maps stay bounded by recent traffic.
pub fn spawn_limiter_cleanup(state: &AppState, every: Duration) -> tokio::task::JoinHandle<()> {
    let free_quota = state.free_quota.clone();
    let ip_limiter = state.ip_rate_limit.limiter.clone();

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let free_keys = free_quota.prune();
            let ip_keys = prune_ip_rate_limiter(&ip_limiter);
            tracing::debug!(free_keys, ip_keys, "Pruned rate limiter state");
        }
    })
}

fn cors_layer(config: &CorsConfig) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE, HeaderName::from_static(REQUEST_ID_HEADER)])
        .expose_headers([HeaderName::from_static(REQUEST_ID_HEADER), header::RETRY_AFTER]);

    if config.allowed_origins.is_empty() {
        return layer.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = config
        .allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::error!(origin = %origin, error = %e, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    layer.allow_origin(AllowOrigin::list(origins))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, draining connections");
}
