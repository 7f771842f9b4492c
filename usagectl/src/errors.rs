use thiserror::Error as ThisError;

/// Result type for store and job operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(ThisError, Debug)]
pub enum Error {
    /// Configuration is missing or inconsistent
    #[error("Invalid configuration: {message}")]
    Config { message: String },

    /// The store rejected the credentials (HTTP 401/403)
    #[error("Invalid credentials: {message}")]
    Unauthorized { message: String },

    /// Database, container or document does not exist
    #[error("{resource} not found: {message}")]
    NotFound { resource: String, message: String },

    /// Write collided with an existing resource
    #[error("Conflict: {message}")]
    Conflict { message: String },

    /// Conditional write failed
    #[error("Precondition failed: {message}")]
    PreconditionFailed { message: String },

    /// Any other non-success status from the store
    #[error("Store returned HTTP {status}: {message}")]
    Status { status: u16, message: String },

    /// Document is missing attributes the job needs (id, partition key)
    #[error("Malformed document: {message}")]
    MalformedDocument { message: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Unexpected error with full context chain
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Map a non-success store response onto an error variant.
    pub fn from_status(status: u16, resource: &str, message: String) -> Self {
        match status {
            401 | 403 => Error::Unauthorized { message },
            404 => Error::NotFound {
                resource: resource.to_string(),
                message,
            },
            409 => Error::Conflict { message },
            412 => Error::PreconditionFailed { message },
            _ => Error::Status { status, message },
        }
    }
}
