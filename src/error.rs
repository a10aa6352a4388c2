use thiserror::Error;

/// Central error type for the audio-studio-ai crate.
#[derive(Debug, Error)]
pub enum ServiceError {
    // Generic fallback (wraps anyhow)
    #[error("{0}")]
    Anyhow(#[from] anyhow::Error),

    #[error("Registry error: {0}")]
    Registry(String),

    #[error("Manifest error: {0}")]
    Manifest(String),

    #[error("Checksum mismatch for {path}")]
    Checksum { path: String },

    #[error("Cache dir not available")]
    CacheDirUnavailable,

    #[error("Model is still loading, please wait.")]
    ModelLoading,

    #[error("Model failed to load: {0}")]
    ModelUnavailable(String),

    #[error("Inference error: {0}")]
    Inference(String),

    #[error("Unsupported language `{0}`")]
    UnsupportedLanguage(String),

    #[error("{0}")]
    InvalidInput(String),
}

impl From<std::io::Error> for ServiceError {
    fn from(e: std::io::Error) -> Self {
        ServiceError::Anyhow(e.into())
    }
}

impl From<serde_json::Error> for ServiceError {
    fn from(e: serde_json::Error) -> Self {
        ServiceError::Anyhow(e.into())
    }
}

impl From<reqwest::Error> for ServiceError {
    fn from(e: reqwest::Error) -> Self {
        ServiceError::Anyhow(e.into())
    }
}

impl From<hex::FromHexError> for ServiceError {
    fn from(e: hex::FromHexError) -> Self {
        ServiceError::Anyhow(e.into())
    }
}

impl From<ort::Error> for ServiceError {
    fn from(e: ort::Error) -> Self {
        ServiceError::Inference(e.to_string())
    }
}

impl From<ndarray::ShapeError> for ServiceError {
    fn from(e: ndarray::ShapeError) -> Self {
        ServiceError::Inference(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ServiceError>;
