use secrecy::Secret;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;

const DEFAULT_MAX_UPLOAD_BYTES: usize = 5 * 1024 * 1024;
const DEFAULT_MIN_IMAGE_WIDTH: u32 = 300;
const DEFAULT_JPEG_QUALITY: u8 = 92;

#[derive(Debug, Clone)]
pub struct PalmistryConfig {
    pub common: core_config::Config,
    pub environment: Environment,
    pub vision: VisionConfig,
    pub limits: RateLimitConfig,
    pub upload: UploadConfig,
    pub paths: PathsConfig,
    pub cors: CorsConfig,
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Dev,
    Prod,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisionBackend {
    OpenAi,
    Mock,
}

#[derive(Debug, Clone)]
pub struct VisionConfig {
    pub backend: VisionBackend,
    pub api_key: Secret<String>,
    /// Base URL of an OpenAI-compatible API, without the trailing `/chat/completions`.
    pub api_base: String,
    pub model: String,
    pub max_tokens: u32,
    /// `low`, `high` or `auto`
    pub image_detail: String,
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Free-tier analyses admitted per client IP within `free_window_seconds`.
    pub free_requests: u32,
    pub free_window_seconds: u64,
    /// Requests of any kind admitted per client IP within `global_window_seconds`.
    pub global_requests: u32,
    pub global_window_seconds: u64,
    /// Reverse proxies in front of the service. Zero means the socket peer is
    /// the client and `X-Forwarded-For` is ignored.
    pub trusted_proxy_hops: usize,
}

#[derive(Debug, Clone)]
pub struct UploadConfig {
    pub max_bytes: usize,
    pub dir: PathBuf,
    pub min_image_width: u32,
    pub jpeg_quality: u8,
}

#[derive(Debug, Clone)]
pub struct PathsConfig {
    pub prompts_dir: PathBuf,
    pub static_dir: PathBuf,
}

#[derive(Debug, Clone, Default)]
pub struct CorsConfig {
    /// Empty means any origin.
    pub allowed_origins: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ObservabilityConfig {
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
}

impl PalmistryConfig {
    pub fn load() -> Result<Self, AppError> {
        // Load common config (handles .env and APP__ prefix)
        let common_config = core_config::Config::load()?;

        let environment: Environment = get_env("ENVIRONMENT", Some("dev"))?.parse()?;
        let backend: VisionBackend = get_env("VISION_PROVIDER", Some("openai"))?.parse()?;

        if backend == VisionBackend::Mock && environment == Environment::Prod {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "VISION_PROVIDER=mock is not allowed in production"
            )));
        }

        let api_key = match backend {
            VisionBackend::OpenAi => get_env("OPENAI_API_KEY", None)?,
            VisionBackend::Mock => env::var("OPENAI_API_KEY").unwrap_or_default(),
        };

        let config = PalmistryConfig {
            common: common_config,
            environment,
            vision: VisionConfig {
                backend,
                api_key: Secret::new(api_key),
                api_base: get_env("OPENAI_API_BASE", Some("https://api.openai.com/v1"))?
                    .trim_end_matches('/')
                    .to_string(),
                model: get_env("MODEL_ID", Some("gpt-4o"))?,
                max_tokens: get_parsed("VISION_MAX_TOKENS", 2048)?,
                image_detail: get_env("VISION_IMAGE_DETAIL", Some("low"))?,
                timeout_seconds: get_parsed("VISION_TIMEOUT_SECONDS", 120)?,
            },
            limits: RateLimitConfig {
                free_requests: get_parsed("FREE_TIER_LIMIT", 3)?,
                free_window_seconds: get_parsed("FREE_TIER_WINDOW_SECONDS", 24 * 60 * 60)?,
                global_requests: get_parsed("GLOBAL_RATE_LIMIT", 30)?,
                global_window_seconds: get_parsed("GLOBAL_RATE_WINDOW_SECONDS", 15 * 60)?,
                trusted_proxy_hops: get_parsed("TRUSTED_PROXY_HOPS", 0)?,
            },
            upload: UploadConfig {
                max_bytes: get_parsed("MAX_UPLOAD_BYTES", DEFAULT_MAX_UPLOAD_BYTES)?,
                dir: env::var("UPLOAD_DIR")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| env::temp_dir().join("palmistry-uploads")),
                min_image_width: get_parsed("MIN_IMAGE_WIDTH", DEFAULT_MIN_IMAGE_WIDTH)?,
                jpeg_quality: get_parsed("JPEG_QUALITY", DEFAULT_JPEG_QUALITY)?,
            },
            paths: PathsConfig {
                prompts_dir: PathBuf::from(get_env("PROMPTS_DIR", Some("prompts"))?),
                static_dir: PathBuf::from(get_env("STATIC_DIR", Some("public"))?),
            },
            cors: CorsConfig {
                allowed_origins: parse_origins(&env::var("ALLOWED_ORIGINS").unwrap_or_default()),
            },
            observability: ObservabilityConfig {
                log_level: get_env("LOG_LEVEL", Some("info"))?,
                otlp_endpoint: env::var("OTLP_ENDPOINT").ok().filter(|s| !s.is_empty()),
            },
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), AppError> {
        if !(1..=100).contains(&self.upload.jpeg_quality) {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "JPEG_QUALITY must be between 1 and 100, got {}",
                self.upload.jpeg_quality
            )));
        }
        if self.limits.free_requests == 0 || self.limits.global_requests == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "rate limits must allow at least one request"
            )));
        }
        if self.upload.max_bytes == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "MAX_UPLOAD_BYTES must be greater than zero"
            )));
        }
        Ok(())
    }
}

impl FromStr for Environment {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "prod" | "production" => Ok(Environment::Prod),
            "dev" | "development" | "test" => Ok(Environment::Dev),
            _ => Err(AppError::ConfigError(anyhow::anyhow!(
                "Invalid ENVIRONMENT: {}",
                s
            ))),
        }
    }
}

impl FromStr for VisionBackend {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(VisionBackend::OpenAi),
            "mock" => Ok(VisionBackend::Mock),
            _ => Err(AppError::ConfigError(anyhow::anyhow!(
                "Invalid VISION_PROVIDER: {}",
                s
            ))),
        }
    }
}

/// Split a comma separated origin list, tolerating whitespace around commas.
pub fn parse_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn get_env(key: &str, default: Option<&str>) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => match default {
            Some(def) => Ok(def.to_string()),
            None => Err(AppError::ConfigError(anyhow::anyhow!(
                "{} is required but not set",
                key
            ))),
        },
    }
}

fn get_parsed<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(val) => val.trim().parse().map_err(|e: T::Err| {
            AppError::ConfigError(anyhow::anyhow!("{} has an invalid value {:?}: {}", key, val, e))
        }),
        Err(_) => Ok(default),
    }
}
