use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderResult;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

#[derive(Debug, Clone)]
pub struct Completion {
    pub text: String,
    pub usage: TokenUsage,
}

/// `(system_prompt, user_prompt, context) -> (text, usage, error)` (§1, §9).
/// Every role task (Perceiver, Planner, Executor, validators, GGS) talks to
/// the model only through this trait, so swapping the underlying engine is
/// a local change that never touches message types.
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn complete(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        context: &[String],
    ) -> ProviderResult<Completion>;
}
