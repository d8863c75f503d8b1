//! In-memory store implementation
//!
//! Used by the daemon (no database) and by tests.
//! Thread-safe using RwLock for concurrent access.

use crate::error::StoreError;
use crate::repository::{EventRepository, OrderRepository, PositionRepository, Store};
use async_trait::async_trait;
use qbtc_domain::{Event, ExecutionRecord, OrderId, Position, PositionId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// In-memory store
#[derive(Default)]
pub struct MemoryStore {
    positions: RwLock<PositionTables>,
    orders: RwLock<OrderTable>,
    events: RwLock<Vec<StoredEvent>>,
    event_seq: AtomicI64,
}

/// Open set and history share a lock so `archive` is a single step
#[derive(Default)]
struct PositionTables {
    open: HashMap<PositionId, Position>,
    history: Vec<Position>,
}

#[derive(Default)]
struct OrderTable {
    by_id: HashMap<OrderId, ExecutionRecord>,
    /// Insertion order for `find_recent`
    sequence: Vec<OrderId>,
}

/// Event with sequence number
struct StoredEvent {
    seq: i64,
    event: Event,
}

fn read<'a, T>(lock: &'a RwLock<T>, what: &str) -> Result<RwLockReadGuard<'a, T>, StoreError> {
    lock.read().map_err(|_| StoreError::Poisoned(what.to_string()))
}

fn write<'a, T>(lock: &'a RwLock<T>, what: &str) -> Result<RwLockWriteGuard<'a, T>, StoreError> {
    lock.write().map_err(|_| StoreError::Poisoned(what.to_string()))
}

impl MemoryStore {
    /// Create a new empty in-memory store
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the number of open positions
    pub fn open_count(&self) -> usize {
        self.positions.read().map(|t| t.open.len()).unwrap_or(0)
    }

    /// Get the number of archived positions
    pub fn history_count(&self) -> usize {
        self.positions.read().map(|t| t.history.len()).unwrap_or(0)
    }

    /// Get the number of execution records
    pub fn order_count(&self) -> usize {
        self.orders.read().map(|t| t.by_id.len()).unwrap_or(0)
    }
}

// =============================================================================
// PositionRepository
// =============================================================================

#[async_trait]
impl PositionRepository for MemoryStore {
    async fn insert_open(&self, position: &Position) -> Result<(), StoreError> {
        let mut tables = write(&self.positions, "positions")?;
        if tables.open.contains_key(&position.id)
            || tables.history.iter().any(|p| p.id == position.id)
        {
            return Err(StoreError::duplicate("position", position.id.to_string()));
        }
        if !position.is_open() {
            return Err(StoreError::InvalidState {
                message: format!("position {} is not open", position.id),
            });
        }
        tables.open.insert(position.id, position.clone());
        Ok(())
    }

    async fn update_open(&self, position: &Position) -> Result<(), StoreError> {
        let mut tables = write(&self.positions, "positions")?;
        match tables.open.get_mut(&position.id) {
            Some(slot) => {
                *slot = position.clone();
                Ok(())
            },
            None => Err(StoreError::not_found("position", position.id.to_string())),
        }
    }

    async fn find_open_by_id(&self, id: PositionId) -> Result<Option<Position>, StoreError> {
        let tables = read(&self.positions, "positions")?;
        Ok(tables.open.get(&id).cloned())
    }

    async fn find_open(&self) -> Result<Vec<Position>, StoreError> {
        let tables = read(&self.positions, "positions")?;
        let mut open: Vec<Position> = tables.open.values().cloned().collect();
        open.sort_by(|a, b| a.open_time.cmp(&b.open_time).then(a.id.cmp(&b.id)));
        Ok(open)
    }

    async fn archive(&self, position: &Position) -> Result<(), StoreError> {
        if position.is_open() {
            return Err(StoreError::InvalidState {
                message: format!("cannot archive open position {}", position.id),
            });
        }
        let mut tables = write(&self.positions, "positions")?;
        if tables.open.remove(&position.id).is_none() {
            return Err(StoreError::not_found("position", position.id.to_string()));
        }
        tables.history.push(position.clone());
        Ok(())
    }

    async fn find_history(&self, limit: usize) -> Result<Vec<Position>, StoreError> {
        let tables = read(&self.positions, "positions")?;
        Ok(tables.history.iter().rev().take(limit).cloned().collect())
    }

    async fn find_in_history(&self, id: PositionId) -> Result<Option<Position>, StoreError> {
        let tables = read(&self.positions, "positions")?;
        Ok(tables.history.iter().find(|p| p.id == id).cloned())
    }
}

// =============================================================================
// OrderRepository
// =============================================================================

#[async_trait]
impl OrderRepository for MemoryStore {
    async fn save(&self, record: &ExecutionRecord) -> Result<(), StoreError> {
        let mut table = write(&self.orders, "orders")?;
        if table.by_id.insert(record.id, record.clone()).is_none() {
            table.sequence.push(record.id);
        }
        Ok(())
    }

    async fn find_by_exchange_id(
        &self,
        exchange_id: &str,
    ) -> Result<Option<ExecutionRecord>, StoreError> {
        let table = read(&self.orders, "orders")?;
        Ok(table.by_id.values().find(|r| r.exchange_order_id == exchange_id).cloned())
    }

    async fn find_recent(&self, limit: usize) -> Result<Vec<ExecutionRecord>, StoreError> {
        let table = read(&self.orders, "orders")?;
        Ok(table
            .sequence
            .iter()
            .rev()
            .filter_map(|id| table.by_id.get(id))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn find_active(&self) -> Result<Vec<ExecutionRecord>, StoreError> {
        let table = read(&self.orders, "orders")?;
        Ok(table
            .sequence
            .iter()
            .filter_map(|id| table.by_id.get(id))
            .filter(|r| !r.status.is_final())
            .cloned()
            .collect())
    }
}

// =============================================================================
// EventRepository
// =============================================================================

#[async_trait]
impl EventRepository for MemoryStore {
    async fn append(&self, event: &Event) -> Result<i64, StoreError> {
        let mut events = write(&self.events, "events")?;
        let seq = self.event_seq.fetch_add(1, Ordering::SeqCst) + 1;
        events.push(StoredEvent { seq, event: event.clone() });
        Ok(seq)
    }

    async fn find_by_position(&self, position_id: PositionId) -> Result<Vec<Event>, StoreError> {
        let events = read(&self.events, "events")?;
        let mut matching: Vec<&StoredEvent> =
            events.iter().filter(|e| e.event.position_id() == Some(position_id)).collect();
        matching.sort_by_key(|e| e.seq);
        Ok(matching.into_iter().map(|e| e.event.clone()).collect())
    }

    async fn count(&self) -> Result<usize, StoreError> {
        Ok(read(&self.events, "events")?.len())
    }
}

impl Store for MemoryStore {
    fn positions(&self) -> &dyn PositionRepository {
        self
    }

    fn orders(&self) -> &dyn OrderRepository {
        self
    }

    fn events(&self) -> &dyn EventRepository {
        self
    }
}

// =============================================================================
// Tests
// =============================================================================
