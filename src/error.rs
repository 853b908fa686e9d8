use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Unsupported attribute: {0}")]
    UnsupportedAttribute(String),

    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("Unsupported type: {0}")]
    UnsupportedType(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid operator: {0}")]
    InvalidOperator(String),

    #[error("Invalid graph structure: {0}")]
    InvalidGraph(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Failed to lower layer '{layer}' ({op_type}): {source}")]
    Lowering {
        layer: String,
        op_type: String,
        #[source]
        source: Box<Error>,
    },

    #[error("Array shape error: {0}")]
    Array(#[from] ndarray::ShapeError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
