use thiserror::Error;

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("types error: {0}")]
    Types(#[from] agsh_types::TypesError),

    #[error("memory error: {0}")]
    Memory(#[from] agsh_memory::MemoryError),

    #[error("provider error: {0}")]
    Provider(#[from] agsh_providers::ProviderError),

    #[error("model output did not match the expected contract: {0}")]
    ContractViolation(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl From<String> for OrchestratorError {
    fn from(err: String) -> Self {
        OrchestratorError::InvalidConfig(err)
    }
}

impl serde::Serialize for OrchestratorError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

pub type OrchestratorResult<T> = Result<T, OrchestratorError>;
