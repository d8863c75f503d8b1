//! QBTC Engine Layer
//!
//! Pure decision logic, deterministic, no I/O.
//! Takes input → Returns actions to execute.

#![warn(clippy::all)]

pub mod error;
pub mod health;
pub mod rebalance;
pub mod risk;
pub mod sizing;
pub mod tick;

pub use error::{EngineError, EngineResult};
pub use health::{
    assess_account, AccountAction, AccountAssessment, AccountRiskLimits, AlertLevel, HealthGrade,
    RiskAlert,
};
pub use rebalance::{
    normalize_weights, plan_rebalance, RebalanceDirection, RebalancePlan, RebalanceState,
    RebalanceTrade, RebalancerConfig, TargetWeight,
};
pub use risk::{validate_increase, validate_open, RiskLimits, RiskRejection};
pub use sizing::{SizedPosition, SizingPolicy};
pub use tick::{Engine, EngineAction, TickDecision};
