//! Prompt templates per plan tier.
//!
//! System prompts live in `free.txt` and `paid.txt` under the prompts
//! directory and are read once at startup. The user prompts are fixed.

use crate::models::Plan;
use service_core::error::AppError;
use std::path::Path;

pub const FREE_USER_PROMPT: &str = "Give a short (no more than 350 characters) personal comment:\n\
• an epithet\n\
• life line\n\
• head line\n\
• heart line";

pub const PAID_USER_PROMPT: &str =
    "Analyse the palm in as much detail as possible (at least 2500 characters).";

/// System and user prompt sent together to the vision model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PromptPair<'a> {
    pub system: &'a str,
    pub user: &'a str,
}

impl PromptPair<'_> {
    pub fn combined(&self) -> String {
        format!("{}\n\n{}", self.system, self.user)
    }
}

/// The two tier templates, loaded once.
#[derive(Debug, Clone)]
pub struct PromptSet {
    free_system: String,
    paid_system: String,
}

impl PromptSet {
    pub fn new(free_system: impl Into<String>, paid_system: impl Into<String>) -> Self {
        Self {
            free_system: free_system.into(),
            paid_system: paid_system.into(),
        }
    }

    /// Read `free.txt` and `paid.txt` from `dir`.
    pub async fn load(dir: &Path) -> Result<Self, AppError> {
        let read = |name: &'static str| {
            let path = dir.join(name);
            async move {
                tokio::fs::read_to_string(&path).await.map_err(|e| {
                    AppError::ConfigError(anyhow::anyhow!(
                        "Failed to read prompt template {}: {}",
                        path.display(),
                        e
                    ))
                })
            }
        };

        let free_system = read("free.txt").await?;
        let paid_system = read("paid.txt").await?;

        tracing::info!(
            dir = %dir.display(),
            free_len = free_system.len(),
            paid_len = paid_system.len(),
            "Loaded prompt templates"
        );

        Ok(Self::new(free_system, paid_system))
    }

    pub fn select(&self, plan: Plan) -> PromptPair<'_> {
        match plan {
            Plan::Free => PromptPair {
                system: &self.free_system,
                user: FREE_USER_PROMPT,
            },
            Plan::Paid => PromptPair {
                system: &self.paid_system,
                user: PAID_USER_PROMPT,
            },
        }
    }
}
