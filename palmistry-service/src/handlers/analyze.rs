use crate::error::AnalysisError;
use crate::models::{AnalysisResponse, Plan};
use crate::services::{build_teaser, TempUpload, UploadedImage};
use crate::startup::AppState;
use axum::{
    extract::{multipart::Field, ConnectInfo, Multipart, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use service_core::middleware::client_ip;
use std::net::SocketAddr;
use std::time::Instant;

pub const IMAGE_FIELD: &str = "handImage";
pub const PLAN_FIELD: &str = "plan";

/// Parsed multipart form of an analysis request.
struct AnalysisForm {
    image: UploadedImage,
    plan: Plan,
}

/// `POST /analyze`
pub async fn analyze(
    State(state): State<AppState>,
    headers: HeaderMap,
    peer: Option<ConnectInfo<SocketAddr>>,
    multipart: Multipart,
) -> Response {
    let started = Instant::now();
    let peer = peer.map(|ConnectInfo(addr)| addr);

    let result = run_analysis(&state, &headers, peer, multipart).await;

    let (status, outcome) = match &result {
        Ok(_) => (StatusCode::OK, "success"),
        Err(e) => (e.status(), e.outcome()),
    };
    metrics::counter!("palm_analyses_total", "outcome" => outcome).increment(1);

    match result {
        Ok(body) => {
            tracing::info!(
                outcome,
                elapsed_ms = started.elapsed().as_millis() as u64,
                full_len = body.full.len(),
                "Palm analysis completed"
            );
            (status, Json(body)).into_response()
        }
        Err(e) => {
            if status.is_server_error() {
                tracing::error!(outcome, status = status.as_u16(), error = %e, "Palm analysis failed");
            } else {
                tracing::warn!(outcome, status = status.as_u16(), error = %e, "Palm analysis rejected");
            }
            e.into_response()
        }
    }
}

/// Intake, quota, preprocessing, vision call and teaser, in that order.
///
/// The temp upload lives until this function returns, so it is removed on
/// every path past intake.
async fn run_analysis(
    state: &AppState,
    headers: &HeaderMap,
    peer: Option<SocketAddr>,
    mut multipart: Multipart,
) -> Result<AnalysisResponse, AnalysisError> {
    let form = read_form(&mut multipart, state.config.upload.max_bytes).await?;
    let plan = form.plan;

    tracing::info!(
        %plan,
        size = form.image.size(),
        content_type = %form.image.content_type,
        "Received palm image"
    );

    let upload = TempUpload::persist(&state.config.upload.dir, form.image)
        .await
        .map_err(|e| AnalysisError::Internal(format!("Failed to store upload: {}", e)))?;

    if plan == Plan::Free {
        check_free_quota(state, headers, peer).await?;
    }

    let jpeg = state
        .preprocessor
        .prepare(upload.path(), upload.content_type())
        .await?;

    let prompt = state.prompts.select(plan).combined();
    let result = state.vision.classify_and_describe(&jpeg, &prompt).await?;

    if !result.is_subject_present {
        return Err(AnalysisError::SubjectAbsent);
    }
    if result.text.trim().is_empty() {
        return Err(AnalysisError::UpstreamEmpty);
    }

    if let Some(usage) = &result.usage {
        tracing::info!(
            %plan,
            prompt_tokens = usage.prompt_tokens,
            completion_tokens = usage.completion_tokens,
            total_tokens = usage.total_tokens,
            "Vision token usage"
        );
    }

    Ok(AnalysisResponse {
        teaser: build_teaser(&result.text),
        full: result.text,
        usage: result.usage,
    })
}

async fn check_free_quota(
    state: &AppState,
    headers: &HeaderMap,
    peer: Option<SocketAddr>,
) -> Result<(), AnalysisError> {
    let Some(ip) = client_ip(headers, peer, state.config.limits.trusted_proxy_hops) else {
        tracing::warn!("Could not determine client IP for free tier quota");
        return Ok(());
    };

    state
        .free_quota
        .check_and_increment(&ip.to_string())
        .await
        .map_err(|exceeded| AnalysisError::QuotaExceeded {
            message: format!(
                "Free limit of {} analyses reached. Choose the full analysis or try again later.",
                state.config.limits.free_requests
            ),
            retry_after_secs: exceeded.retry_after_secs,
        })
}

/// Read the `handImage` file and `plan` text fields, in any order.
///
/// The file is checked for an image MIME type before its bytes are read and
/// for size while they stream in, so nothing is written to disk for a
/// rejected upload.
async fn read_form(multipart: &mut Multipart, max_bytes: usize) -> Result<AnalysisForm, AnalysisError> {
    let mut image = None;
    let mut plan = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AnalysisError::InputRejected(format!("Malformed upload: {}", e)))?
    {
        match field.name() {
            Some(IMAGE_FIELD) => {
                if image.is_some() {
                    return Err(AnalysisError::InputRejected(
                        "Only one file may be uploaded".to_string(),
                    ));
                }
                image = Some(read_image(field, max_bytes).await?);
            }
            Some(PLAN_FIELD) => {
                let value = field.text().await.map_err(|e| {
                    AnalysisError::InputRejected(format!("Malformed upload: {}", e))
                })?;
                plan = Some(value);
            }
            _ => {}
        }
    }

    let image = image.ok_or_else(|| AnalysisError::InputRejected("No file received".to_string()))?;

    Ok(AnalysisForm {
        image,
        plan: Plan::from_field(plan.as_deref()),
    })
}

async fn read_image(mut field: Field<'_>, max_bytes: usize) -> Result<UploadedImage, AnalysisError> {
    let content_type = field.content_type().unwrap_or_default().to_ascii_lowercase();
    if !content_type.starts_with("image/") {
        return Err(AnalysisError::InputRejected(
            "Only image uploads are accepted".to_string(),
        ));
    }
    let file_name = field.file_name().unwrap_or("upload").to_string();

    let mut bytes = Vec::new();
    while let Some(chunk) = field
        .chunk()
        .await
        .map_err(|e| AnalysisError::InputRejected(format!("Malformed upload: {}", e)))?
    {
        if bytes.len() + chunk.len() > max_bytes {
            return Err(AnalysisError::InputRejected(format!(
                "File too large (max {})",
                human_size(max_bytes)
            )));
        }
        bytes.extend_from_slice(&chunk);
    }

    Ok(UploadedImage {
        bytes,
        content_type,
        file_name,
    })
}

fn human_size(bytes: usize) -> String {
    const MB: usize = 1024 * 1024;
    const KB: usize = 1024;
    if bytes % MB == 0 {
        format!("{} MB", bytes / MB)
    } else if bytes % KB == 0 {
        format!("{} KB", bytes / KB)
    } else {
        format!("{} bytes", bytes)
    }
}
