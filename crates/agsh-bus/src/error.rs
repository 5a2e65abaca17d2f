use thiserror::Error;

#[derive(Error, Debug)]
pub enum BusError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl From<String> for BusError {
    fn from(err: String) -> Self {
        BusError::InvalidConfig(err)
    }
}

impl serde::Serialize for BusError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

pub type BusResult<T> = Result<T, BusError>;
