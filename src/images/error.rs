use thiserror::Error;

#[derive(Debug, Error)]
pub enum ImageError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Image error: {0}")]
    ImageError(#[from] image::ImageError),

    #[error("Serialization error: {0}")]
    SerdeError(#[from] serde_json::Error),

    /// Rejected upload. The message is shown to the uploader as-is.
    #[error("{0}")]
    Upload(String),

    #[error("Invalid path")]
    InvalidPath,

    #[error("Not found")]
    NotFound,
}
