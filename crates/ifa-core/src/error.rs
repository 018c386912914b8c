use thiserror::Error;

/// Errors raised while building targets, scoring rotations or fitting models.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FaError {
    #[error("shape mismatch in {context}: expected {expected}, got {actual}")]
    ShapeMismatch {
        context: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("variable id {index} is outside 1..={n_variables}")]
    InvalidGroupIndex { index: usize, n_variables: usize },
    #[error("a prior needs either variable groups or texts")]
    MissingPriorSource,
    #[error("{0} requires an embedder but none was supplied")]
    MissingEmbedder(&'static str),
    #[error("embedding text {index} failed: {message}")]
    Embedding { index: usize, message: String },
    #[error("target matrix is not symmetric at ({row}, {col})")]
    NotSymmetric { row: usize, col: usize },
    #[error("unsupported rotation method '{0}'")]
    UnsupportedRotationMethod(String),
    #[error("restart {restart} failed: {reason}")]
    RestartFailure { restart: usize, reason: String },
    #[error("all {restarts} restarts failed (last error: {last})")]
    OptimizationFailure { restarts: usize, last: String },
    #[error("model '{0}' has not been fitted")]
    UnknownModelName(String),
    #[error("matrix is not orthogonal: |R^T R - I| = {error:.3e} exceeds {tolerance:.1e}")]
    NotOrthogonal { error: f64, tolerance: f64 },
    #[error("non-finite value in {context} at ({row}, {col})")]
    NonFinite {
        context: &'static str,
        row: usize,
        col: usize,
    },
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("numerical failure: {0}")]
    Numerical(String),
    #[error("serialization failed: {0}")]
    Serialization(String),
}

pub type FaResult<T> = Result<T, FaError>;
