//! Account health assessment
//!
//! Turns a portfolio snapshot and the equity peak into alerts, a 0-100 health
//! score and, for hard breaches, an account-level action.

use std::fmt;

use qbtc_domain::PortfolioState;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Margin ratio above which an informational alert is raised
const ELEVATED_MARGIN_RATIO: Decimal = dec!(0.5);

/// Margin ratio above which the health score is penalized
const HIGH_MARGIN_RATIO: Decimal = dec!(0.7);

/// Account-level limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountRiskLimits {
    /// Drawdown from peak equity (percent) that forces a full close
    pub max_drawdown_pct: Decimal,
    /// Free margin below this raises a warning
    pub min_available_balance: Decimal,
    /// Portfolio margin ratio for the caution alert
    pub margin_call_threshold: Decimal,
    /// Portfolio margin ratio that enters emergency mode
    pub emergency_threshold: Decimal,
}

impl Default for AccountRiskLimits {
    fn default() -> Self {
        Self {
            max_drawdown_pct: dec!(15),
            min_available_balance: dec!(1000),
            margin_call_threshold: dec!(0.8),
            emergency_threshold: dec!(0.9),
        }
    }
}

/// Alert severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AlertLevel {
    /// Informational
    Info,
    /// Needs attention
    Warning,
    /// Close to a hard limit
    Caution,
    /// Hard limit crossed
    Emergency,
}

impl fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            AlertLevel::Info => "INFO",
            AlertLevel::Warning => "WARNING",
            AlertLevel::Caution => "CAUTION",
            AlertLevel::Emergency => "EMERGENCY",
        };
        f.write_str(label)
    }
}

/// One triggered alert
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAlert {
    /// Severity
    pub level: AlertLevel,
    /// Stable message, used for deduplication
    pub message: String,
    /// Observed value
    pub value: Decimal,
    /// Limit it was compared with
    pub threshold: Decimal,
}

/// Coarse health classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthGrade {
    /// score >= 80
    Excellent,
    /// score >= 60
    Good,
    /// score >= 40
    Fair,
    /// score >= 20
    Poor,
    /// below 20
    Critical,
}

impl HealthGrade {
    /// Grade for a score
    pub fn from_score(score: u8) -> Self {
        match score {
            80.. => HealthGrade::Excellent,
            60..=79 => HealthGrade::Good,
            40..=59 => HealthGrade::Fair,
            20..=39 => HealthGrade::Poor,
            _ => HealthGrade::Critical,
        }
    }
}

/// What the daemon must do about the account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountAction {
    /// Nothing
    None,
    /// Disable new exposure; exits stay allowed
    EnterEmergency,
    /// Close every open position
    ForceCloseAll,
}

/// Result of `assess_account`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountAssessment {
    /// Triggered alerts, most severe first
    pub alerts: Vec<RiskAlert>,
    /// 0..=100
    pub health_score: u8,
    /// Grade of `health_score`
    pub grade: HealthGrade,
    /// Drawdown from peak equity in percent
    pub drawdown_pct: Decimal,
    /// Required action
    pub action: AccountAction,
}

/// Assess account health.
pub fn assess_account(
    portfolio: &PortfolioState,
    peak_equity: Decimal,
    limits: &AccountRiskLimits,
) -> AccountAssessment {
    let mut alerts = Vec::new();

    let low_balance = portfolio.free_margin < limits.min_available_balance;
    if low_balance {
        alerts.push(RiskAlert {
            level: AlertLevel::Warning,
            message: "Low Available Balance".to_string(),
            value: portfolio.free_margin,
            threshold: limits.min_available_balance,
        });
    }

    let ratio = portfolio.margin_ratio;
    if ratio >= limits.emergency_threshold {
        alerts.push(RiskAlert {
            level: AlertLevel::Emergency,
            message: "Critical Margin Level".to_string(),
            value: ratio,
            threshold: limits.emergency_threshold,
        });
    } else if ratio >= limits.margin_call_threshold {
        alerts.push(RiskAlert {
            level: AlertLevel::Caution,
            message: "Margin Call Warning".to_string(),
            value: ratio,
            threshold: limits.margin_call_threshold,
        });
    } else if ratio > ELEVATED_MARGIN_RATIO {
        alerts.push(RiskAlert {
            level: AlertLevel::Info,
            message: "Elevated Margin Usage".to_string(),
            value: ratio,
            threshold: ELEVATED_MARGIN_RATIO,
        });
    }

    let drawdown_pct = if peak_equity > Decimal::ZERO {
        ((peak_equity - portfolio.total_equity) / peak_equity * dec!(100)).max(Decimal::ZERO)
    } else {
        Decimal::ZERO
    };
    let drawdown_breach = drawdown_pct >= limits.max_drawdown_pct;
    if drawdown_breach {
        alerts.push(RiskAlert {
            level: AlertLevel::Warning,
            message: "High Drawdown Detected".to_string(),
            value: drawdown_pct,
            threshold: limits.max_drawdown_pct,
        });
    }

    let mut score: i32 = 100;
    for alert in &alerts {
        match alert.level {
            AlertLevel::Emergency => score -= 30,
            AlertLevel::Warning => score -= 10,
            _ => {},
        }
    }
    if low_balance {
        score -= 20;
    }
    if ratio > HIGH_MARGIN_RATIO {
        score -= 25;
    }
    let health_score = score.clamp(0, 100) as u8;

    let action = if drawdown_breach {
        AccountAction::ForceCloseAll
    } else if ratio >= limits.emergency_threshold {
        AccountAction::EnterEmergency
    } else {
        AccountAction::None
    };

    alerts.sort_by(|a, b| b.level.cmp(&a.level));

    AccountAssessment {
        alerts,
        health_score,
        grade: HealthGrade::from_score(health_score),
        drawdown_pct,
        action,
    }
}
