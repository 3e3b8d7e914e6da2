//! Mock provider for tests and offline development.

use super::{into_vision_result, ProviderError, VisionProvider};
use crate::models::{TokenUsage, VisionResult};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Canned reply used when the service runs with `VISION_PROVIDER=mock`.
pub const DEMO_REPLY: &str = "yes\n\
The Steady Wanderer. Your life line sweeps wide around the thumb, a sign of stamina. \
The head line runs long and straight, so you think before you leap. \
The heart line curves up toward the index finger and promises warmth in your closest ties.";

/// Vision provider returning a fixed raw reply, parsed exactly like a real one.
pub struct MockVisionProvider {
    reply: Result<String, String>,
    calls: AtomicUsize,
    last_prompt: Mutex<Option<String>>,
}

impl MockVisionProvider {
    /// Provider whose model "says" `raw` on every call.
    pub fn replying(raw: impl Into<String>) -> Self {
        Self {
            reply: Ok(raw.into()),
            calls: AtomicUsize::new(0),
            last_prompt: Mutex::new(None),
        }
    }

    /// Provider whose every call fails like an upstream API error.
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            reply: Err(message.into()),
            calls: AtomicUsize::new(0),
            last_prompt: Mutex::new(None),
        }
    }

    /// Number of `classify_and_describe` calls so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Prompt passed to the most recent call.
    pub fn last_prompt(&self) -> Option<String> {
        self.last_prompt.lock().ok().and_then(|p| p.clone())
    }
}

impl Default for MockVisionProvider {
    fn default() -> Self {
        Self::replying(DEMO_REPLY)
    }
}

#[async_trait]
impl VisionProvider for MockVisionProvider {
    async fn classify_and_describe(
        &self,
        image_jpeg: &[u8],
        prompt: &str,
    ) -> Result<VisionResult, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut last) = self.last_prompt.lock() {
            *last = Some(prompt.to_string());
        }

        match &self.reply {
            Ok(raw) => {
                let prompt_tokens = (prompt.len() / 4 + image_jpeg.len().min(1) * 85) as u32;
                let completion_tokens = (raw.len() / 4) as u32;
                Ok(into_vision_result(
                    raw,
                    Some(TokenUsage {
                        prompt_tokens,
                        completion_tokens,
                        total_tokens: prompt_tokens + completion_tokens,
                    }),
                ))
            }
            Err(message) => Err(ProviderError::ApiError(message.clone())),
        }
    }

    async fn health_check(&self) -> Result<(), ProviderError> {
        Ok(())
    }
}
