use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Pattern error: {0}")]
    Pattern(#[from] regex::Error),

    /// Bad request shape or parameters, rejected before a job exists.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The page could not be turned into a usable track list.
    #[error("Detection error: {0}")]
    Detection(String),

    /// A single track could not be fetched. Never fatal for a job on its own.
    #[error("Fetch error: {0}")]
    Fetch(String),

    #[error("Assembly error: {0}")]
    Assembly(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),
}

pub type Result<T> = std::result::Result<T, AppError>;
