//! Vision model providers.
//!
//! Every provider answers the palm question and the reading in one call: the
//! model is told to put a bare "yes" or "no" on its first line, and
//! [`parse_sentinel`] splits that verdict from the text that follows.

pub mod mock;
pub mod openai;

use crate::models::{TokenUsage, VisionResult};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

pub use mock::MockVisionProvider;
pub use openai::{OpenAiConfig, OpenAiVisionProvider};

/// Instruction sent ahead of the caller's prompt so the verdict always lands
/// on the first line of the reply.
pub const SUBJECT_CHECK_INSTRUCTION: &str = "You are a master palm reader. \
First answer with a single word, \"yes\" or \"no\", to the question: \
is a human palm visible in the image? \
Then, starting on a new line, give your answer to the user.";

/// Error type for provider operations.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Vision API rejected the credentials: {0}")]
    Unauthorized(String),

    #[error("Vision API rate limit or quota exceeded: {0}")]
    RateLimited(String),

    #[error("Vision API error: {0}")]
    ApiError(String),

    #[error("Network error: {0}")]
    NetworkError(String),
}

#[async_trait]
pub trait VisionProvider: Send + Sync {
    /// Sends one request carrying the JPEG and `prompt`, and splits the reply
    /// into the subject verdict and the descriptive text.
    async fn classify_and_describe(
        &self,
        image_jpeg: &[u8],
        prompt: &str,
    ) -> Result<VisionResult, ProviderError>;

    /// Reports whether the provider is able to serve requests.
    async fn health_check(&self) -> Result<(), ProviderError>;
}

/// Split a raw model reply into `(is_subject_present, text)`.
///
/// The first line must start with "yes" (any case, as a whole word) for the
/// subject to count as present. The text is everything after the first line
/// break, trimmed; a reply without a line break has no text.
pub fn parse_sentinel(raw: &str) -> (bool, String) {
    let raw = raw.trim();
    let (first, rest) = match raw.split_once('\n') {
        Some((first, rest)) => (first, rest),
        None => (raw, ""),
    };

    (YES_SENTINEL.is_match(first.trim()), rest.trim().to_string())
}

/// "Yes," and "yes." count, "yesterday" does not. The boundary is ASCII-only,
/// so a letter such as "é" right after the word does not extend it.
static YES_SENTINEL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?i-u:yes\b)").expect("sentinel pattern is valid"));

/// Build a [`VisionResult`] from a raw reply and optional usage.
pub(crate) fn into_vision_result(raw: &str, usage: Option<TokenUsage>) -> VisionResult {
    let (is_subject_present, text) = parse_sentinel(raw);
    VisionResult {
        is_subject_present,
        text,
        usage,
    }
}
