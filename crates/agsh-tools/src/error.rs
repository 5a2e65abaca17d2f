use thiserror::Error;

#[derive(Error, Debug)]
pub enum ToolError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("tool call timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("invalid arguments: {0}")]
    InvalidArgs(String),

    #[error("platform does not support this tool: {0}")]
    UnsupportedPlatform(String),
}

impl From<String> for ToolError {
    fn from(err: String) -> Self {
        ToolError::InvalidArgs(err)
    }
}

impl serde::Serialize for ToolError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

pub type ToolResult<T> = Result<T, ToolError>;
