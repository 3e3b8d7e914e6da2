#![allow(dead_code)]

use image::{ImageFormat, Rgb, RgbImage};
use palmistry_service::config::{
    CorsConfig, Environment, ObservabilityConfig, PalmistryConfig, PathsConfig, RateLimitConfig,
    UploadConfig, VisionBackend, VisionConfig,
};
use palmistry_service::services::{MockVisionProvider, VisionProvider};
use palmistry_service::startup::Application;
use reqwest::multipart;
use secrecy::Secret;
use service_core::config::Config as CoreConfig;
use std::io::Cursor;
use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

pub const FREE_SYSTEM_PROMPT: &str = "FREE SYSTEM PROMPT";
pub const PAID_SYSTEM_PROMPT: &str = "PAID SYSTEM PROMPT";
pub const CLIENT_IP: &str = "203.0.113.10";

pub struct TestApp {
    pub address: String,
    pub port: u16,
    pub vision: Arc<MockVisionProvider>,
    pub config: PalmistryConfig,
    pub client: reqwest::Client,
    upload_dir: TempDir,
    _prompts_dir: TempDir,
    _static_dir: TempDir,
}

impl TestApp {
    pub async fn spawn(vision: MockVisionProvider) -> Self {
        Self::spawn_with(vision, |_| {}).await
    }

    /// Spawn on a random port with `vision` answering every analysis.
    pub async fn spawn_with(
        vision: MockVisionProvider,
        customize: impl FnOnce(&mut PalmistryConfig),
    ) -> Self {
        let upload_dir = tempfile::tempdir().expect("Failed to create upload dir");
        let prompts_dir = tempfile::tempdir().expect("Failed to create prompts dir");
        let static_dir = tempfile::tempdir().expect("Failed to create static dir");

        std::fs::write(prompts_dir.path().join("free.txt"), FREE_SYSTEM_PROMPT).unwrap();
        std::fs::write(prompts_dir.path().join("paid.txt"), PAID_SYSTEM_PROMPT).unwrap();
        std::fs::write(
            static_dir.path().join("index.html"),
            "<!doctype html><title>Palm reading</title>",
        )
        .unwrap();

        let mut config = test_config(upload_dir.path(), prompts_dir.path(), static_dir.path());
        customize(&mut config);

        let vision = Arc::new(vision);
        let provider: Arc<dyn VisionProvider> = vision.clone();
        let app = Application::build_with_provider(config.clone(), provider)
            .await
            .expect("Failed to build test application");

        let port = app.port();
        tokio::spawn(async move {
            app.run_until_stopped().await.ok();
        });

        TestApp {
            address: format!("http://127.0.0.1:{}", port),
            port,
            vision,
            config,
            client: reqwest::Client::new(),
            upload_dir,
            _prompts_dir: prompts_dir,
            _static_dir: static_dir,
        }
    }

    pub async fn analyze(&self, form: multipart::Form) -> reqwest::Response {
        self.analyze_forwarded_for(form, CLIENT_IP).await
    }

    /// Post a form as if a proxy forwarded it with the given header value.
    pub async fn analyze_forwarded_for(
        &self,
        form: multipart::Form,
        forwarded_for: &str,
    ) -> reqwest::Response {
        self.client
            .post(format!("{}/analyze", self.address))
            .header("x-forwarded-for", forwarded_for)
            .multipart(form)
            .send()
            .await
            .expect("Failed to execute request")
    }

    /// Files currently left in the upload directory.
    pub fn uploads_on_disk(&self) -> usize {
        std::fs::read_dir(self.upload_dir.path())
            .map(|entries| entries.count())
            .unwrap_or(0)
    }
}

pub fn test_config(upload_dir: &Path, prompts_dir: &Path, static_dir: &Path) -> PalmistryConfig {
    PalmistryConfig {
        common: CoreConfig {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 0,
        },
        environment: Environment::Dev,
        vision: VisionConfig {
            backend: VisionBackend::Mock,
            api_key: Secret::new(String::new()),
            api_base: "http://127.0.0.1:9".to_string(),
            model: "gpt-4o".to_string(),
            max_tokens: 2048,
            image_detail: "low".to_string(),
            timeout_seconds: 5,
        },
        limits: RateLimitConfig {
            free_requests: 3,
            free_window_seconds: 24 * 60 * 60,
            global_requests: 1000,
            global_window_seconds: 15 * 60,
            trusted_proxy_hops: 1,
        },
        upload: UploadConfig {
            max_bytes: 5 * 1024 * 1024,
            dir: upload_dir.to_path_buf(),
            min_image_width: 300,
            jpeg_quality: 92,
        },
        paths: PathsConfig {
            prompts_dir: prompts_dir.to_path_buf(),
            static_dir: static_dir.to_path_buf(),
        },
        cors: CorsConfig::default(),
        observability: ObservabilityConfig {
            log_level: "info".to_string(),
            otlp_endpoint: None,
        },
    }
}

/// PNG of a uniform skin-toned square.
pub fn png(width: u32, height: u32) -> Vec<u8> {
    let img = RgbImage::from_pixel(width, height, Rgb([214, 168, 140]));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageFormat::Png)
        .expect("Failed to encode test PNG");
    out.into_inner()
}

/// Baseline JPEG of a uniform skin-toned square.
pub fn jpeg(width: u32, height: u32) -> Vec<u8> {
    let img = RgbImage::from_pixel(width, height, Rgb([214, 168, 140]));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageFormat::Jpeg)
        .expect("Failed to encode test JPEG");
    out.into_inner()
}

pub fn image_part(bytes: Vec<u8>, mime: &str) -> multipart::Part {
    multipart::Part::bytes(bytes)
        .file_name("hand.png")
        .mime_str(mime)
        .unwrap()
}

/// Form with a valid 640x480 photo and the given plan.
pub fn palm_form(plan: Option<&str>) -> multipart::Form {
    let form = multipart::Form::new().part("handImage", image_part(png(640, 480), "image/png"));
    match plan {
        Some(plan) => form.text("plan", plan.to_string()),
        None => form,
    }
}
