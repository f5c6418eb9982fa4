use thiserror::Error;

#[derive(Error, Debug)]
pub enum CovlayError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Invalid message: {0}")]
    Message(String),

    #[error("Coverage service returned an error for {0}")]
    Service(String),

    #[error("Unexpected response shape: {0}")]
    Decode(String),

    #[error("Invalid selector: {0}")]
    Selector(String),

    #[error("Page not recognized: {0}")]
    Detection(String),

    #[error("{0}")]
    Other(String),
}

impl From<ureq::Error> for CovlayError {
    fn from(err: ureq::Error) -> Self {
        CovlayError::Http(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CovlayError>;
