pub mod fs;
pub mod path;

pub use fs::VaultFs;
pub use path::sanitize_file_stem;

/// All errors that can occur in vault operations.
#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    #[error("Path traversal attempt: {0}")]
    PathTraversal(String),

    #[error("Path not found: {0}")]
    NotFound(String),

    #[error("Not a file: {0}")]
    NotAFile(String),

    #[error("Not a directory: {0}")]
    NotADirectory(String),

    #[error("File too large: {size} bytes (max: {max} bytes)")]
    FileTooLarge { size: usize, max: usize },

    #[error("File is not valid UTF-8: {0}")]
    NotUtf8(String),

    #[error("Note '{path}' already belongs to concept {existing}")]
    NoteConflict { path: String, existing: uuid::Uuid },

    #[error("Note '{0}' was not written by the mirror")]
    UnmanagedNote(String),

    #[error("IO error on '{path}': {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
}

impl VaultError {
    /// Create an IO error with a path context.
    pub(crate) fn io(path: impl std::fmt::Display, source: std::io::Error) -> Self {
        VaultError::Io {
            path: path.to_string(),
            source,
        }
    }
}
