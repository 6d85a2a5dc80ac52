//! Generator-side errors.

/// Result type for specification loading, normalization and emission.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while turning a specification into code.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid file format '.{0}' (expected .yaml, .yml or .json)")]
    InvalidFileFormat(String),

    #[error("invalid specification: {0}")]
    InvalidSpecification(String),

    #[error("schema conflict on '{name}': cannot merge type '{left}' with '{right}'")]
    SchemaConflict {
        name: String,
        left: String,
        right: String,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parsing failed: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),
}
