//! Engine errors

use qbtc_domain::DomainError;

/// Errors from engine computations (not risk rejections)
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Domain validation failed
    #[error("domain error: {0}")]
    Domain(#[from] DomainError),

    /// Sizing produced no tradable quantity
    #[error("sizing error: {0}")]
    Sizing(String),

    /// Invalid configuration value
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;
