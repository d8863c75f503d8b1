//! Market data: price cache and stream bridge.
//!
//! The stream clients publish `StreamEvent`s on a broadcast channel. The
//! bridge task turns them into cache updates and daemon events; the position
//! manager reads prices through the cache (a `MarketDataPort`).

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use qbtc_connectors::StreamEvent;
use qbtc_domain::{MarketDataEvent, Price, Symbol};
use qbtc_exec::{ExecError, ExchangePort, MarketDataPort, PriceUpdate};

use crate::event_bus::{DaemonEvent, EventBus};

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}

// =============================================================================
// Price cache
// =============================================================================

/// Last streamed price per symbol, with the exchange as fallback.
pub struct PriceCache<E: ExchangePort + ?Sized> {
    exchange: Arc<E>,
    prices: RwLock<HashMap<String, PriceUpdate>>,
    subscriptions: RwLock<HashMap<String, Vec<mpsc::Sender<PriceUpdate>>>>,
}

impl<E: ExchangePort + ?Sized> PriceCache<E> {
    /// Empty cache backed by `exchange`.
    pub fn new(exchange: Arc<E>) -> Self {
        Self {
            exchange,
            prices: RwLock::new(HashMap::new()),
            subscriptions: RwLock::new(HashMap::new()),
        }
    }

    /// Store a price and notify subscribers.
    ///
    /// Full or closed subscriber channels are skipped; closed ones are dropped.
    pub fn update(&self, update: PriceUpdate) {
        let key = update.symbol.as_pair();
        {
            let mut subscriptions = write(&self.subscriptions);
            if let Some(senders) = subscriptions.get_mut(&key) {
                senders.retain(|tx| match tx.try_send(update.clone()) {
                    Ok(()) | Err(mpsc::error::TrySendError::Full(_)) => true,
                    Err(mpsc::error::TrySendError::Closed(_)) => false,
                });
            }
        }
        write(&self.prices).insert(key, update);
    }

    /// Cached price, if any
    pub fn cached(&self, symbol: &Symbol) -> Option<Price> {
        read(&self.prices).get(&symbol.as_pair()).map(|u| u.price)
    }

    /// Number of symbols with a cached price
    pub fn len(&self) -> usize {
        read(&self.prices).len()
    }

    /// Whether nothing has been cached yet
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl<E: ExchangePort + ?Sized> MarketDataPort for PriceCache<E> {
    async fn subscribe(&self, symbol: &Symbol) -> Result<mpsc::Receiver<PriceUpdate>, ExecError> {
        let (tx, rx) = mpsc::channel(100);
        write(&self.subscriptions).entry(symbol.as_pair()).or_default().push(tx);
        Ok(rx)
    }

    async fn unsubscribe(&self, symbol: &Symbol) -> Result<(), ExecError> {
        write(&self.subscriptions).remove(&symbol.as_pair());
        Ok(())
    }

    async fn get_price(&self, symbol: &Symbol) -> Result<Price, ExecError> {
        if let Some(price) = self.cached(symbol) {
            return Ok(price);
        }
        // No tick yet (stream down or symbol not streamed)
        let price = self.exchange.get_price(symbol).await?;
        debug!(%symbol, %price, "Price fetched from exchange");
        Ok(price)
    }
}

// =============================================================================
// Stream bridge
// =============================================================================

/// Routes stream events into the price cache and the event bus.
pub struct MarketDataBridge<E: ExchangePort + ?Sized> {
    cache: Arc<PriceCache<E>>,
    event_bus: Arc<EventBus>,
    listen_key_expired: Arc<Notify>,
}

impl<E: ExchangePort + ?Sized + 'static> MarketDataBridge<E> {
    /// Create a bridge.
    pub fn new(cache: Arc<PriceCache<E>>, event_bus: Arc<EventBus>) -> Self {
        Self { cache, event_bus, listen_key_expired: Arc::new(Notify::new()) }
    }

    /// Notified when the user-data stream reports an expired listen key
    pub fn listen_key_expired(&self) -> Arc<Notify> {
        self.listen_key_expired.clone()
    }

    /// Handle one stream event.
    pub fn handle(&self, event: StreamEvent) {
        match event {
            StreamEvent::Market(MarketDataEvent::Price(tick)) => {
                let Ok(price) = Price::new(tick.price) else {
                    warn!(symbol = %tick.symbol, price = %tick.price, "Ignoring non-positive tick");
                    return;
                };
                let update = PriceUpdate { symbol: tick.symbol, price, timestamp: tick.timestamp };
                self.cache.update(update.clone());
                self.event_bus.send(DaemonEvent::PriceUpdate(update));
            },
            StreamEvent::Market(MarketDataEvent::BookTicker(book)) => {
                self.event_bus.send(DaemonEvent::BookTicker(book));
            },
            StreamEvent::Market(MarketDataEvent::MarkPrice(mark)) => {
                self.event_bus.send(DaemonEvent::MarkPrice(mark));
            },
            StreamEvent::Market(MarketDataEvent::Kline(_)) => {},
            StreamEvent::Account(update) => {
                info!(reason = %update.reason, balances = update.balances.len(), "Account update");
                self.event_bus.send(DaemonEvent::AccountUpdate(update));
            },
            StreamEvent::Order(update) => {
                info!(
                    symbol = %update.symbol,
                    order_id = update.order_id,
                    status = %update.status,
                    "Order update from exchange"
                );
            },
            StreamEvent::ListenKeyExpired => {
                warn!("Listen key expired");
                self.listen_key_expired.notify_one();
                self.event_bus
                    .send(DaemonEvent::gateway_error("user_stream", "listen key expired"));
            },
            StreamEvent::Disconnected(reason) => {
                self.event_bus.send(DaemonEvent::gateway_error("stream", reason));
            },
        }
    }

    /// Spawn the bridge loop.
    pub fn spawn(
        self,
        mut receiver: broadcast::Receiver<StreamEvent>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut first_tick_logged = false;
            loop {
                let event = tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = receiver.recv() => event,
                };
                match event {
                    Ok(event) => {
                        if !first_tick_logged {
                            if let StreamEvent::Market(MarketDataEvent::Price(tick)) = &event {
                                info!(
                                    symbol = %tick.symbol,
                                    price = %tick.price,
                                    "First tick received"
                                );
                                first_tick_logged = true;
                            }
                        }
                        self.handle(event);
                    },
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "Market data bridge lagged");
                    },
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            info!("Market data bridge task ended");
        })
    }
}
