//! Terminal outcomes of `POST /analyze` other than success.

use crate::services::{PreprocessError, ProviderError};
use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

pub const SUBJECT_ABSENT_MESSAGE: &str = "Unfortunately, I can't see a palm in this image. \
Please upload a clear photo of the inner side of your hand.";

pub const EMPTY_REPLY_MESSAGE: &str = "The vision model returned an empty response";

#[derive(Debug, Error)]
pub enum AnalysisError {
    /// Missing, malformed, oversized or non-image upload.
    #[error("{0}")]
    InputRejected(String),

    #[error("{message}")]
    QuotaExceeded {
        message: String,
        retry_after_secs: u64,
    },

    /// The photo could not be used; reported as a server error.
    #[error(transparent)]
    QualityRejected(#[from] PreprocessError),

    #[error("{}", SUBJECT_ABSENT_MESSAGE)]
    SubjectAbsent,

    #[error("{}", EMPTY_REPLY_MESSAGE)]
    UpstreamEmpty,

    #[error(transparent)]
    ExternalService(#[from] ProviderError),

    #[error("{0}")]
    Internal(String),
}

impl AnalysisError {
    pub fn status(&self) -> StatusCode {
        match self {
            AnalysisError::InputRejected(_) => StatusCode::BAD_REQUEST,
            AnalysisError::QuotaExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            AnalysisError::SubjectAbsent => StatusCode::UNPROCESSABLE_ENTITY,
            AnalysisError::QualityRejected(_)
            | AnalysisError::UpstreamEmpty
            | AnalysisError::ExternalService(_)
            | AnalysisError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Label for the outcome counter and logs.
    pub fn outcome(&self) -> &'static str {
        match self {
            AnalysisError::InputRejected(_) => "input_rejected",
            AnalysisError::QuotaExceeded { .. } => "quota_exceeded",
            AnalysisError::QualityRejected(_) => "quality_rejected",
            AnalysisError::SubjectAbsent => "subject_absent",
            AnalysisError::UpstreamEmpty => "upstream_empty",
            AnalysisError::ExternalService(_) => "external_service_failure",
            AnalysisError::Internal(_) => "internal_error",
        }
    }
}

impl IntoResponse for AnalysisError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct ErrorResponse {
            error: String,
        }

        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct RejectionResponse {
            error: &'static str,
            palm: bool,
            subject_present: bool,
        }

        let status = self.status();
        match self {
            AnalysisError::SubjectAbsent => (
                status,
                Json(RejectionResponse {
                    error: SUBJECT_ABSENT_MESSAGE,
                    palm: false,
                    subject_present: false,
                }),
            )
                .into_response(),
            AnalysisError::QuotaExceeded {
                message,
                retry_after_secs,
            } => (
                status,
                [(header::RETRY_AFTER, retry_after_secs.to_string())],
                Json(ErrorResponse { error: message }),
            )
                .into_response(),
            other => (
                status,
                Json(ErrorResponse {
                    error: other.to_string(),
                }),
            )
                .into_response(),
        }
    }
}
