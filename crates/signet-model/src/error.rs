use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Bookmark URL must not be empty")]
    EmptyUrl,

    #[error("Duplicate bookmark id in collection: {0}")]
    DuplicateId(String),
}

/// Errors from the external per-browser collaborators.
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Bookmark storage not found for {0}")]
    NotFound(String),

    #[error("Failed to parse bookmark storage: {0}")]
    Parse(String),

    #[error("Failed to write merged collection back: {0}")]
    WriteBack(String),
}
