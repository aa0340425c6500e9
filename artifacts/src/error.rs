use thiserror::Error;

#[derive(Error, Debug)]
pub enum ArtifactError {
    #[error("http request failed: {0}")]
    Transport(String),

    #[error("request timed out")]
    Timeout,

    #[error("remote did not report Content-Length")]
    MissingContentLength,

    #[error("declared size {declared} exceeds cap {cap}")]
    DeclaredSizeTooLarge { declared: u64, cap: u64 },

    #[error("downloaded/zipped size {actual} exceeds cap {cap}")]
    ActualSizeTooLarge { actual: u64, cap: u64 },

    #[error("attempted to zip {count} files, over the cap of {cap}")]
    TooManyFiles { count: usize, cap: usize },

    #[error("file not found: {0}")]
    FileNotFound(String),

    #[error("unsupported volume variant: {0}")]
    UnsupportedVolume(String),

    #[error("unsupported output upload variant: {0}")]
    UnsupportedUpload(String),

    #[error("io error: {0}")]
    Io(String),

    #[error("zip error: {0}")]
    Zip(String),

    #[error("upload failed after retries: {0}")]
    UploadFailed(String),
}

impl From<std::io::Error> for ArtifactError {
    fn from(err: std::io::Error) -> Self {
        ArtifactError::Io(err.to_string())
    }
}

impl From<zip::result::ZipError> for ArtifactError {
    fn from(err: zip::result::ZipError) -> Self {
        ArtifactError::Zip(err.to_string())
    }
}

pub type ArtifactResult<T> = Result<T, ArtifactError>;
