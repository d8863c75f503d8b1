//! Prometheus metrics served at `GET /metrics`.

use prometheus::{
    Encoder, Gauge, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder,
};
use rust_decimal::prelude::ToPrimitive;

use qbtc_domain::{CloseReason, PortfolioState};
use qbtc_exec::ExecutionMetrics;

use crate::error::DaemonResult;

/// Daemon metrics on a private registry.
pub struct DaemonMetrics {
    registry: Registry,
    orders: IntGaugeVec,
    positions_opened: IntCounter,
    positions_closed: IntCounterVec,
    job_failures: IntCounterVec,
    equity: Gauge,
    used_margin: Gauge,
    open_positions: IntGauge,
}

impl DaemonMetrics {
    /// Create and register all collectors.
    pub fn new() -> DaemonResult<Self> {
        let registry = Registry::new_custom(Some("qbtc".to_string()), None)?;

        let orders = IntGaugeVec::new(
            Opts::new("orders", "Orders seen by the executor, by outcome"),
            &["status"],
        )?;
        let positions_opened =
            IntCounter::new("positions_opened_total", "Positions opened")?;
        let positions_closed = IntCounterVec::new(
            Opts::new("positions_closed_total", "Positions closed, by reason"),
            &["reason"],
        )?;
        let job_failures = IntCounterVec::new(
            Opts::new("job_failures_total", "Scheduled job failures and panics"),
            &["job"],
        )?;
        let equity = Gauge::new("equity", "Total equity (quote currency)")?;
        let used_margin = Gauge::new("used_margin", "Margin locked by open positions")?;
        let open_positions = IntGauge::new("open_positions", "Open positions")?;

        registry.register(Box::new(orders.clone()))?;
        registry.register(Box::new(positions_opened.clone()))?;
        registry.register(Box::new(positions_closed.clone()))?;
        registry.register(Box::new(job_failures.clone()))?;
        registry.register(Box::new(equity.clone()))?;
        registry.register(Box::new(used_margin.clone()))?;
        registry.register(Box::new(open_positions.clone()))?;

        Ok(Self {
            registry,
            orders,
            positions_opened,
            positions_closed,
            job_failures,
            equity,
            used_margin,
            open_positions,
        })
    }

    /// Count an opened position
    pub fn position_opened(&self) {
        self.positions_opened.inc();
    }

    /// Count a closed position
    pub fn position_closed(&self, reason: CloseReason) {
        self.positions_closed.with_label_values(&[reason.as_str()]).inc();
    }

    /// Count a failed or panicked job run
    pub fn job_failed(&self, job: &str) {
        self.job_failures.with_label_values(&[job]).inc();
    }

    /// Refresh the portfolio gauges
    pub fn set_portfolio(&self, portfolio: &PortfolioState) {
        self.equity.set(portfolio.total_equity.to_f64().unwrap_or(0.0));
        self.used_margin.set(portfolio.used_margin.to_f64().unwrap_or(0.0));
        self.open_positions.set(portfolio.open_positions as i64);
    }

    /// Mirror the executor counters
    pub fn observe_execution(&self, execution: &ExecutionMetrics) {
        let set = |status: &str, value: u64| {
            self.orders.with_label_values(&[status]).set(value as i64);
        };
        set("successful", execution.successful_orders);
        set("failed", execution.failed_orders);
        set("cancelled", execution.cancelled_orders);
    }

    /// Prometheus text exposition
    pub fn render(&self) -> DaemonResult<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_contains_counters() {
        let metrics = DaemonMetrics::new().unwrap();
        metrics.position_opened();
        metrics.position_closed(CloseReason::StopLoss);
        metrics.job_failed("risk_monitor");
        metrics.observe_execution(&ExecutionMetrics {
            successful_orders: 3,
            failed_orders: 1,
            ..Default::default()
        });

        let text = metrics.render().unwrap();
        assert!(text.contains("qbtc_positions_opened_total 1"));
        assert!(text.contains("qbtc_positions_closed_total{reason=\"STOP_LOSS\"} 1"));
        assert!(text.contains("qbtc_job_failures_total{job=\"risk_monitor\"} 1"));
        assert!(text.contains("qbtc_orders{status=\"successful\"} 3"));
    }
}
