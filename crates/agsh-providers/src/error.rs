use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("provider returned no completion content: {0}")]
    EmptyCompletion(String),

    #[error("provider request failed with status {status}: {detail}")]
    Rejected { status: u16, detail: String },

    #[error("request timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl From<String> for ProviderError {
    fn from(err: String) -> Self {
        ProviderError::InvalidConfig(err)
    }
}

impl serde::Serialize for ProviderError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

pub type ProviderResult<T> = Result<T, ProviderError>;
