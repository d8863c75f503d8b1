//! QBTC Storage Layer
//!
//! Provides persistence for positions, execution records, and events.
//!
//! # Architecture
//!
//! - **Repository traits**: Define the storage interface (ports)
//! - **In-memory store**: Process-local implementation used by the daemon and tests
//!
//! Positions live in two places: the open set (mutable, keyed by id) and the
//! history log (append-only). `archive` moves a closed position from one to the
//! other in a single step.
//!
//! # Usage
//!
//! ```rust
//! use qbtc_store::{MemoryStore, PositionRepository};
//! use qbtc_domain::{Leverage, Position, Price, Quantity, Side, Symbol, Tier};
//! use rust_decimal::Decimal;
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = MemoryStore::new();
//!
//!     let position = Position::open(
//!         Symbol::from_pair("BTCUSDT").unwrap(),
//!         Side::Long,
//!         Tier::Tier1,
//!         Quantity::new(Decimal::ONE).unwrap(),
//!         Leverage::new(10).unwrap(),
//!         Price::new(Decimal::from(50_000)).unwrap(),
//!         Decimal::ZERO,
//!         chrono::Utc::now(),
//!     );
//!     store.insert_open(&position).await.unwrap();
//!
//!     let open = store.find_open().await.unwrap();
//!     println!("Open positions: {}", open.len());
//! }
//! ```

#![warn(clippy::all)]

// Modules
mod error;
mod memory;
mod repository;

// Re-exports
pub use error::{StoreError, StoreResult};
pub use memory::MemoryStore;
pub use repository::{EventRepository, OrderRepository, PositionRepository, Store};
