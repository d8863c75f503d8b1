//! Request-weight and order-count limiting for the Binance REST API
//!
//! Binance accounts requests in two fixed windows: a weight budget that resets
//! every minute and an order counter that resets every ten seconds. A request
//! that does not fit waits until the window that blocks it resets. Waiters are
//! served in arrival order.

use std::sync::Mutex;
use std::time::Duration;

use thiserror::Error;
use tokio::time::{sleep, Instant};
use tracing::debug;

/// Errors from the rate limiter
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RateLimitError {
    /// A single request can never fit in the window
    #[error("request weight {weight} exceeds window budget {limit}")]
    WeightExceedsBudget {
        /// Requested weight
        weight: u32,
        /// Window budget
        limit: u32,
    },
}

/// Window sizes and budgets
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Request weight allowed per weight window
    pub weight_limit: u32,
    /// Weight window length
    pub weight_window: Duration,
    /// Orders allowed per order window
    pub order_limit: u32,
    /// Order window length
    pub order_window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            weight_limit: 1200,
            weight_window: Duration::from_secs(60),
            order_limit: 50,
            order_window: Duration::from_secs(10),
        }
    }
}

/// Outcome of a non-blocking acquire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Budget consumed, send now
    Admitted,
    /// Nothing consumed, retry after this long
    Wait(Duration),
}

#[derive(Debug)]
struct Window {
    limit: u32,
    length: Duration,
    used: u32,
    resets_at: Instant,
}

impl Window {
    fn new(limit: u32, length: Duration, now: Instant) -> Self {
        Self { limit, length, used: 0, resets_at: now + length }
    }

    /// Start a fresh window once the reset instant is reached
    fn roll(&mut self, now: Instant) {
        if now >= self.resets_at {
            self.used = 0;
            self.resets_at = now + self.length;
        }
    }

    fn fits(&self, amount: u32) -> bool {
        self.used + amount <= self.limit
    }

    fn wait(&self, now: Instant) -> Duration {
        self.resets_at.saturating_duration_since(now)
    }
}

#[derive(Debug)]
struct Windows {
    weight: Window,
    orders: Window,
}

/// Fixed-window limiter shared by every request of one client
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    windows: Mutex<Windows>,
    /// Serializes waiters so they are admitted in arrival order
    queue: tokio::sync::Mutex<()>,
}

impl RateLimiter {
    /// Create a limiter whose windows start now
    pub fn new(config: RateLimitConfig) -> Self {
        let now = Instant::now();
        let windows = Windows {
            weight: Window::new(config.weight_limit, config.weight_window, now),
            orders: Window::new(config.order_limit, config.order_window, now),
        };
        Self { config, windows: Mutex::new(windows), queue: tokio::sync::Mutex::new(()) }
    }

    /// Limits in effect
    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    fn windows(&self) -> std::sync::MutexGuard<'_, Windows> {
        self.windows.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Consume budget if it fits, otherwise report how long to wait.
    ///
    /// Nothing is consumed when the answer is `Wait`.
    pub fn try_acquire(&self, weight: u32, is_order: bool) -> Result<Admission, RateLimitError> {
        if weight > self.config.weight_limit {
            return Err(RateLimitError::WeightExceedsBudget {
                weight,
                limit: self.config.weight_limit,
            });
        }

        let now = Instant::now();
        let mut windows = self.windows();
        windows.weight.roll(now);
        windows.orders.roll(now);

        let mut wait = Duration::ZERO;
        if !windows.weight.fits(weight) {
            wait = wait.max(windows.weight.wait(now));
        }
        if is_order && !windows.orders.fits(1) {
            wait = wait.max(windows.orders.wait(now));
        }
        if wait > Duration::ZERO {
            return Ok(Admission::Wait(wait));
        }

        windows.weight.used += weight;
        if is_order {
            windows.orders.used += 1;
        }
        Ok(Admission::Admitted)
    }

    /// Wait until the request fits, then consume its budget.
    pub async fn acquire(&self, weight: u32, is_order: bool) -> Result<(), RateLimitError> {
        let _turn = self.queue.lock().await;
        loop {
            match self.try_acquire(weight, is_order)? {
                Admission::Admitted => return Ok(()),
                Admission::Wait(delay) => {
                    debug!(
                        weight,
                        is_order,
                        delay_ms = delay.as_millis() as u64,
                        "Rate limit reached, queueing request"
                    );
                    sleep(delay).await;
                },
            }
        }
    }

    /// Raise the local weight counter to what the server reports
    pub fn sync_used_weight(&self, server_used: u32) {
        let now = Instant::now();
        let mut windows = self.windows();
        windows.weight.roll(now);
        if server_used > windows.weight.used {
            windows.weight.used = server_used.min(windows.weight.limit);
        }
    }

    /// Weight consumed in the current window
    pub fn used_weight(&self) -> u32 {
        let now = Instant::now();
        let mut windows = self.windows();
        windows.weight.roll(now);
        windows.weight.used
    }

    /// Orders sent in the current window
    pub fn used_orders(&self) -> u32 {
        let now = Instant::now();
        let mut windows = self.windows();
        windows.orders.roll(now);
        windows.orders.used
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}

// =============================================================================
// Endpoint weights
// =============================================================================

/// Weight of `GET /fapi/v1/depth` for a given limit
pub fn depth_weight(limit: u32) -> u32 {
    match limit {
        0..=50 => 2,
        51..=100 => 5,
        101..=500 => 10,
        _ => 20,
    }
}

/// Weight of `GET /fapi/v1/klines` for a given limit
pub fn klines_weight(limit: u32) -> u32 {
    match limit {
        0..=99 => 1,
        100..=499 => 2,
        500..=1000 => 5,
        _ => 10,
    }
}

/// Weight of a ticker price request
pub const PRICE_WEIGHT: u32 = 1;
/// Weight of an order placement, cancel or query
pub const ORDER_WEIGHT: u32 = 1;
/// Weight of the account endpoint
pub const ACCOUNT_WEIGHT: u32 = 5;
/// Weight of the position risk endpoint
pub const POSITION_RISK_WEIGHT: u32 = 5;

#[cfg(test)]
mod tests {
    use super::*;

    fn small() -> RateLimiter {
        RateLimiter::new(RateLimitConfig {
            weight_limit: 10,
            weight_window: Duration::from_secs(60),
            order_limit: 2,
            order_window: Duration::from_secs(10),
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_exceeds_weight_in_window() {
        let limiter = small();
        for _ in 0..5 {
            assert_eq!(limiter.try_acquire(2, false).unwrap(), Admission::Admitted);
        }
        assert_eq!(limiter.used_weight(), 10);

        match limiter.try_acquire(1, false).unwrap() {
            Admission::Wait(d) => assert_eq!(d, Duration::from_secs(60)),
            Admission::Admitted => panic!("budget exceeded"),
        }
        // Refused requests consume nothing
        assert_eq!(limiter.used_weight(), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_admitted_exactly_at_reset() {
        let limiter = small();
        assert_eq!(limiter.try_acquire(10, false).unwrap(), Admission::Admitted);

        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(matches!(limiter.try_acquire(1, false).unwrap(), Admission::Wait(_)));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(limiter.try_acquire(10, false).unwrap(), Admission::Admitted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_order_window_is_separate() {
        let limiter = small();
        assert_eq!(limiter.try_acquire(1, true).unwrap(), Admission::Admitted);
        assert_eq!(limiter.try_acquire(1, true).unwrap(), Admission::Admitted);

        match limiter.try_acquire(1, true).unwrap() {
            Admission::Wait(d) => assert_eq!(d, Duration::from_secs(10)),
            Admission::Admitted => panic!("order budget exceeded"),
        }
        // Non-order requests still pass
        assert_eq!(limiter.try_acquire(1, false).unwrap(), Admission::Admitted);
        assert_eq!(limiter.used_orders(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_queues_until_reset() {
        let limiter = small();
        limiter.acquire(10, false).await.unwrap();

        let started = Instant::now();
        limiter.acquire(4, false).await.unwrap();
        assert_eq!(started.elapsed(), Duration::from_secs(60));
        assert_eq!(limiter.used_weight(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_oversized_request_is_an_error() {
        let limiter = small();
        let err = limiter.acquire(11, false).await.unwrap_err();
        assert_eq!(err, RateLimitError::WeightExceedsBudget { weight: 11, limit: 10 });
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_weight_only_raises_counter() {
        let limiter = small();
        limiter.try_acquire(3, false).unwrap();
        limiter.sync_used_weight(1);
        assert_eq!(limiter.used_weight(), 3);
        limiter.sync_used_weight(9);
        assert_eq!(limiter.used_weight(), 9);
        assert!(matches!(limiter.try_acquire(2, false).unwrap(), Admission::Wait(_)));
    }

    #[test]
    fn test_endpoint_weights() {
        assert_eq!(depth_weight(5), 2);
        assert_eq!(depth_weight(100), 5);
        assert_eq!(depth_weight(500), 10);
        assert_eq!(depth_weight(1000), 20);
        assert_eq!(klines_weight(99), 1);
        assert_eq!(klines_weight(100), 2);
        assert_eq!(klines_weight(1000), 5);
        assert_eq!(klines_weight(1500), 10);
    }
}
