//! Model-client contract (§1, §9): `(system_prompt, user_prompt, context) ->
//! (text, usage, error)`. The pipeline depends only on `ModelClient`; the
//! natural-language model itself is an external collaborator.

pub mod client;
pub mod error;
pub mod http_client;

pub use client::{Completion, ModelClient, TokenUsage};
pub use error::{ProviderError, ProviderResult};
pub use http_client::HttpModelClient;
