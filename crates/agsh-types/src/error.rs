use thiserror::Error;

#[derive(Error, Debug)]
pub enum TypesError {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("payload did not remarshal into the expected shape: {0}")]
    Remarshal(String),

    #[error("unknown message type: {0}")]
    UnknownMessageType(String),
}

impl From<String> for TypesError {
    fn from(err: String) -> Self {
        TypesError::Remarshal(err)
    }
}

impl serde::Serialize for TypesError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

pub type TypesResult<T> = Result<T, TypesError>;
