//! Repository trait definitions (Ports)
//!
//! These traits define the storage interface for the domain.

use crate::error::StoreError;
use async_trait::async_trait;
use qbtc_domain::{Event, ExecutionRecord, Position, PositionId};

/// Repository for positions: open set plus history log
#[async_trait]
pub trait PositionRepository: Send + Sync {
    /// Insert a newly opened position (duplicate id is an error)
    async fn insert_open(&self, position: &Position) -> Result<(), StoreError>;

    /// Replace an open position (must already be open)
    async fn update_open(&self, position: &Position) -> Result<(), StoreError>;

    /// Find an open position by ID
    async fn find_open_by_id(&self, id: PositionId) -> Result<Option<Position>, StoreError>;

    /// All open positions, oldest first
    async fn find_open(&self) -> Result<Vec<Position>, StoreError>;

    /// Remove a closed position from the open set and append it to history.
    ///
    /// Fails with `NotFound` if the id is not open, so a position is archived
    /// at most once.
    async fn archive(&self, position: &Position) -> Result<(), StoreError>;

    /// Closed positions, most recent first
    async fn find_history(&self, limit: usize) -> Result<Vec<Position>, StoreError>;

    /// Find a closed position by ID
    async fn find_in_history(&self, id: PositionId) -> Result<Option<Position>, StoreError>;
}

/// Repository for execution records
#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// Save an execution record (insert or replace by id)
    async fn save(&self, record: &ExecutionRecord) -> Result<(), StoreError>;

    /// Find a record by exchange order ID
    async fn find_by_exchange_id(
        &self,
        exchange_id: &str,
    ) -> Result<Option<ExecutionRecord>, StoreError>;

    /// Most recent records first
    async fn find_recent(&self, limit: usize) -> Result<Vec<ExecutionRecord>, StoreError>;

    /// Records whose order can still fill, oldest first
    async fn find_active(&self) -> Result<Vec<ExecutionRecord>, StoreError>;
}

/// Repository for Event entities (append-only)
#[async_trait]
pub trait EventRepository: Send + Sync {
    /// Append an event to the log, returning its sequence number
    async fn append(&self, event: &Event) -> Result<i64, StoreError>;

    /// Load all events for a position (in order)
    async fn find_by_position(&self, position_id: PositionId) -> Result<Vec<Event>, StoreError>;

    /// Number of events in the log
    async fn count(&self) -> Result<usize, StoreError>;
}

/// Combined store interface
pub trait Store: Send + Sync {
    /// Get position repository
    fn positions(&self) -> &dyn PositionRepository;

    /// Get order repository
    fn orders(&self) -> &dyn OrderRepository;

    /// Get event repository
    fn events(&self) -> &dyn EventRepository;
}
