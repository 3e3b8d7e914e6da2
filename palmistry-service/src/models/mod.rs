//! Request-scoped domain types for palm analysis.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Service tier requested by the client.
///
/// Only `"paid"` selects the paid tier; anything else, including a missing
/// field, is treated as free.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Plan {
    #[default]
    Free,
    Paid,
}

impl Plan {
    pub fn from_field(value: Option<&str>) -> Self {
        match value {
            Some("paid") => Plan::Paid,
            _ => Plan::Free,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Plan::Free => "free",
            Plan::Paid => "paid",
        }
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Token accounting reported by the vision model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Outcome of a single vision call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisionResult {
    /// The model answered "yes" on its first line.
    pub is_subject_present: bool,
    /// Everything after the first line, trimmed. May be empty.
    pub text: String,
    pub usage: Option<TokenUsage>,
}

/// 200 body of `POST /analyze`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResponse {
    pub teaser: String,
    pub full: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_exact_paid_selects_paid_tier() {
        assert_eq!(Plan::from_field(Some("paid")), Plan::Paid);
        assert_eq!(Plan::from_field(Some("free")), Plan::Free);
        assert_eq!(Plan::from_field(Some("PAID")), Plan::Free);
        assert_eq!(Plan::from_field(Some("premium")), Plan::Free);
        assert_eq!(Plan::from_field(None), Plan::Free);
    }

    #[test]
    fn usage_is_omitted_when_absent() {
        let body = serde_json::to_value(AnalysisResponse {
            teaser: "t …".to_string(),
            full: "t".to_string(),
            usage: None,
        })
        .unwrap();

        assert!(body.get("usage").is_none());
    }
}
