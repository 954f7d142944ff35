use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Engine error: {0}")]
    Engine(String),

    #[error("Download error: {0}")]
    Download(String),

    #[error("Job not found: {0}")]
    NotFound(String),

    #[error("Job not finished: {0}")]
    NotFinished(String),

    #[error("File not found: {0}")]
    FileMissing(String),

    #[error("Job already exists: {0}")]
    DuplicateJob(String),
}

impl AppError {
    /// Conditions the caller caused, as opposed to internal faults.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            AppError::Validation(_)
                | AppError::NotFound(_)
                | AppError::NotFinished(_)
        )
    }

    /// The bare message, without the variant's prefix. Errors wrapped from
    /// other libraries keep their full display text.
    pub fn message(&self) -> String {
        match self {
            AppError::Validation(message)
            | AppError::Engine(message)
            | AppError::Download(message)
            | AppError::NotFound(message)
            | AppError::NotFinished(message)
            | AppError::FileMissing(message)
            | AppError::DuplicateJob(message) => message.clone(),
            AppError::Config(_) | AppError::Io(_) | AppError::Json(_) => self.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
