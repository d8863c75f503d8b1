//! Daemon configuration.
//!
//! Loads configuration from environment variables (after `.env`) with
//! defaults suitable for a development run against the stub exchange.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use qbtc_domain::{Leverage, Symbol};
use qbtc_engine::{AccountRiskLimits, RebalancerConfig, RiskLimits};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::error::{DaemonError, DaemonResult};

// =============================================================================
// Configuration
// =============================================================================

/// Daemon configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// API server configuration
    pub api: ApiConfig,
    /// Exchange credentials and network
    pub exchange: ExchangeConfig,
    /// Account and position risk settings
    pub risk: RiskConfig,
    /// Rebalancer settings
    pub rebalancer: RebalancerConfig,
    /// Job intervals
    pub schedule: ScheduleConfig,
    /// Symbols streamed from the exchange
    pub symbols: Vec<Symbol>,
    /// Environment (test, development, production)
    pub environment: Environment,
    /// Log output format
    pub log_format: LogFormat,
}

/// API server configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Host to bind to
    pub host: String,
    /// Port to bind to
    pub port: u16,
}

/// Exchange configuration.
#[derive(Clone)]
pub struct ExchangeConfig {
    /// API key (None selects the stub exchange)
    pub api_key: Option<String>,
    /// API secret
    pub api_secret: Option<String>,
    /// Use the futures testnet
    pub testnet: bool,
}

impl std::fmt::Debug for ExchangeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExchangeConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .field("api_secret", &self.api_secret.as_ref().map(|_| "***"))
            .field("testnet", &self.testnet)
            .finish()
    }
}

impl ExchangeConfig {
    /// Key and secret, when both are set
    pub fn credentials(&self) -> Option<(String, String)> {
        match (&self.api_key, &self.api_secret) {
            (Some(key), Some(secret)) => Some((key.clone(), secret.clone())),
            _ => None,
        }
    }
}

/// Risk configuration.
#[derive(Debug, Clone)]
pub struct RiskConfig {
    /// Starting balance of the ledger (quote currency)
    pub initial_equity: Decimal,
    /// Limits checked on every open
    pub limits: RiskLimits,
    /// Account-level health limits
    pub account: AccountRiskLimits,
    /// Trailing distance as a fraction of entry when a request sets none (0 disables)
    pub default_trailing_pct: Decimal,
}

/// Periodic job intervals.
#[derive(Debug, Clone)]
pub struct ScheduleConfig {
    /// Position monitor tick
    pub monitor_interval: Duration,
    /// Account risk check
    pub risk_interval: Duration,
    /// Rebalance check
    pub rebalance_interval: Duration,
    /// Status poll of resting orders
    pub order_monitor_interval: Duration,
    /// Exchange account sync (live only)
    pub account_sync_interval: Duration,
    /// Listen key keepalive (live only)
    pub listen_key_interval: Duration,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            monitor_interval: Duration::from_secs(5),
            risk_interval: Duration::from_secs(10),
            rebalance_interval: Duration::from_secs(300),
            order_monitor_interval: Duration::from_secs(10),
            account_sync_interval: Duration::from_secs(60),
            listen_key_interval: Duration::from_secs(30 * 60),
        }
    }
}

/// Environment type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    /// Test environment (uses stubs)
    Test,
    /// Development environment
    Development,
    /// Production environment
    Production,
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable
    Text,
    /// One JSON object per line
    Json,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> DaemonResult<Self> {
        // Load .env file if present (ignore errors)
        let _ = dotenvy::dotenv();

        let environment = Self::load_environment()?;
        let api = Self::load_api_config()?;
        let exchange = Self::load_exchange_config()?;
        let risk = Self::load_risk_config()?;
        let rebalancer = Self::load_rebalancer_config()?;
        let schedule = Self::load_schedule_config()?;
        let symbols = match env::var("QBTC_SYMBOLS") {
            Ok(list) => parse_symbols(&list)?,
            Err(_) => default_symbols(),
        };
        let log_format = match env::var("QBTC_LOG_FORMAT").as_deref() {
            Ok("json") => LogFormat::Json,
            _ => LogFormat::Text,
        };

        Ok(Self { api, exchange, risk, rebalancer, schedule, symbols, environment, log_format })
    }

    /// Create test configuration.
    pub fn test() -> Self {
        Self {
            api: ApiConfig {
                host: "127.0.0.1".to_string(),
                port: 0, // Let OS assign port
            },
            environment: Environment::Test,
            ..Self::default()
        }
    }

    /// Whether real exchange credentials are configured
    pub fn is_live(&self) -> bool {
        self.environment != Environment::Test && self.exchange.credentials().is_some()
    }

    fn load_environment() -> DaemonResult<Environment> {
        let env_str = env::var("QBTC_ENV").unwrap_or_else(|_| "development".to_string());

        match env_str.to_lowercase().as_str() {
            "test" => Ok(Environment::Test),
            "development" | "dev" => Ok(Environment::Development),
            "production" | "prod" => Ok(Environment::Production),
            other => Err(DaemonError::Config(format!(
                "Invalid QBTC_ENV: {}. Expected: test, development, production",
                other
            ))),
        }
    }

    fn load_api_config() -> DaemonResult<ApiConfig> {
        let host = env::var("QBTC_API_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port_str = env::var("PORT")
            .or_else(|_| env::var("QBTC_API_PORT"))
            .unwrap_or_else(|_| "8080".to_string());

        let port = port_str
            .parse::<u16>()
            .map_err(|_| DaemonError::Config(format!("Invalid PORT: {}", port_str)))?;

        Ok(ApiConfig { host, port })
    }

    fn load_exchange_config() -> DaemonResult<ExchangeConfig> {
        let non_empty = |key: &str| env::var(key).ok().filter(|v| !v.trim().is_empty());
        let testnet = match env::var("BINANCE_TESTNET") {
            Ok(val) => parse_bool(&val)
                .ok_or_else(|| DaemonError::Config(format!("Invalid BINANCE_TESTNET: {}", val)))?,
            Err(_) => true,
        };

        Ok(ExchangeConfig {
            api_key: non_empty("BINANCE_API_KEY"),
            api_secret: non_empty("BINANCE_API_SECRET"),
            testnet,
        })
    }

    fn load_risk_config() -> DaemonResult<RiskConfig> {
        let defaults = RiskConfig::default();
        let max_leverage =
            Self::load_env("QBTC_MAX_LEVERAGE", defaults.limits.max_leverage.value())?;

        Ok(RiskConfig {
            initial_equity: Self::load_env("QBTC_INITIAL_EQUITY", defaults.initial_equity)?,
            limits: RiskLimits {
                max_positions: Self::load_env("QBTC_MAX_POSITIONS", defaults.limits.max_positions)?,
                max_leverage: Leverage::new(max_leverage)?,
                liquidation_threshold: Self::load_env(
                    "QBTC_LIQUIDATION_THRESHOLD",
                    defaults.limits.liquidation_threshold,
                )?,
            },
            account: defaults.account,
            default_trailing_pct: Self::load_env(
                "QBTC_DEFAULT_TRAILING_PCT",
                defaults.default_trailing_pct,
            )?,
        })
    }

    fn load_rebalancer_config() -> DaemonResult<RebalancerConfig> {
        let mut config = RebalancerConfig::default();
        config.deviation_threshold =
            Self::load_env("QBTC_REBALANCE_THRESHOLD", config.deviation_threshold)?;
        let cooldown_secs: i64 =
            Self::load_env("QBTC_REBALANCE_COOLDOWN_SECS", config.cooldown.num_seconds())?;
        config.cooldown = chrono::Duration::seconds(cooldown_secs);
        config.max_daily_rebalances =
            Self::load_env("QBTC_MAX_DAILY_REBALANCES", config.max_daily_rebalances)?;
        config.validate()?;
        Ok(config)
    }

    fn load_schedule_config() -> DaemonResult<ScheduleConfig> {
        let defaults = ScheduleConfig::default();
        let secs = |key: &str, default: Duration| -> DaemonResult<Duration> {
            let value: u64 = Self::load_env(key, default.as_secs())?;
            if value == 0 {
                return Err(DaemonError::Config(format!("{} must be positive", key)));
            }
            Ok(Duration::from_secs(value))
        };

        Ok(ScheduleConfig {
            monitor_interval: secs("QBTC_MONITOR_INTERVAL_SECS", defaults.monitor_interval)?,
            risk_interval: secs("QBTC_RISK_INTERVAL_SECS", defaults.risk_interval)?,
            rebalance_interval: secs("QBTC_REBALANCE_INTERVAL_SECS", defaults.rebalance_interval)?,
            order_monitor_interval: secs(
                "QBTC_ORDER_MONITOR_INTERVAL_SECS",
                defaults.order_monitor_interval,
            )?,
            ..defaults
        })
    }

    fn load_env<T: FromStr>(key: &str, default: T) -> DaemonResult<T> {
        match env::var(key) {
            Ok(val) => val
                .trim()
                .parse()
                .map_err(|_| DaemonError::Config(format!("Invalid {} value: {}", key, val))),
            Err(_) => Ok(default),
        }
    }
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            initial_equity: dec!(100000),
            limits: RiskLimits::default(),
            account: AccountRiskLimits::default(),
            default_trailing_pct: dec!(0.02),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api: ApiConfig { host: "0.0.0.0".to_string(), port: 8080 },
            exchange: ExchangeConfig { api_key: None, api_secret: None, testnet: true },
            risk: RiskConfig::default(),
            rebalancer: RebalancerConfig::default(),
            schedule: ScheduleConfig::default(),
            symbols: default_symbols(),
            environment: Environment::Development,
            log_format: LogFormat::Text,
        }
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Environment::Test => write!(f, "test"),
            Environment::Development => write!(f, "development"),
            Environment::Production => write!(f, "production"),
        }
    }
}

/// Parse a comma-separated symbol list (`BTCUSDT,ethusdt`).
pub fn parse_symbols(list: &str) -> DaemonResult<Vec<Symbol>> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| Symbol::from_pair(&s.to_uppercase()).map_err(DaemonError::from))
        .collect()
}

fn default_symbols() -> Vec<Symbol> {
    ["BTCUSDT", "ETHUSDT"].iter().filter_map(|s| Symbol::from_pair(s).ok()).collect()
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" => Some(true),
        "0" | "false" | "no" => Some(false),
        _ => None,
    }
}

// =============================================================================
// Tests
// =============================================================================
