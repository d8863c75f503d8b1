//! Daemon error types.

use qbtc_domain::{DomainError, PositionId};
use qbtc_engine::{EngineError, RiskRejection};
use qbtc_exec::ExecError;
use qbtc_store::StoreError;
use rust_decimal::Decimal;
use thiserror::Error;

/// Daemon-level errors.
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Domain error
    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),

    /// Engine error
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    /// Execution error
    #[error("Execution error: {0}")]
    Exec(#[from] ExecError),

    /// Store error
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// New exposure refused by the risk checks
    #[error("{0}")]
    Risk(#[from] RiskRejection),

    /// Position is not open (never existed or already closed)
    #[error("Position not found: {0}")]
    PositionNotFound(PositionId),

    /// Exit order filled less than the position; the remainder stays open
    #[error("Exit incomplete for position {position_id}: {filled} filled, {remaining} still open")]
    ExitIncomplete {
        /// Position being closed
        position_id: PositionId,
        /// Quantity the exit order filled
        filled: Decimal,
        /// Quantity still open
        remaining: Decimal,
    },

    /// Malformed request
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Metrics registry error
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl DaemonError {
    /// Whether the error means "nothing to act on" rather than a failure
    pub fn is_not_found(&self) -> bool {
        match self {
            DaemonError::PositionNotFound(_) => true,
            DaemonError::Store(e) => e.is_not_found(),
            DaemonError::Exec(ExecError::NotFound(_)) => true,
            _ => false,
        }
    }
}

/// Result type for daemon operations.
pub type DaemonResult<T> = Result<T, DaemonError>;

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_risk_rejection_displays_reason() {
        let err: DaemonError = RiskRejection::MaxPositionsReached { open: 10, max: 10 }.into();
        assert_eq!(err.to_string(), "max positions reached");
    }

    #[test]
    fn test_not_found_classification() {
        assert!(DaemonError::PositionNotFound(Uuid::now_v7()).is_not_found());
        assert!(DaemonError::Store(StoreError::not_found("Position", "x")).is_not_found());
        assert!(!DaemonError::Config("bad".into()).is_not_found());
    }
}
