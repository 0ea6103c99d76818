//! redb-based order store
//!
//! # Tables
//!
//! | Table | Key | Value | Purpose |
//! |-------|-----|-------|---------|
//! | `orders` | `order_id` | `Order` | Current order record |
//! | `listings` | `listing_id` | `Listing` | Listing mirror (status owned here) |
//! | `open_orders` | `order_id` | `()` | Non-terminal order index (sweep scan) |
//! | `seller_orders` | `(seller_id, order_id)` | `()` | Reliability scan |
//! | `listing_orders` | `(listing_id, order_id)` | `()` | One-open-order-per-listing check |
//! | `events` | `(order_id, sequence)` | `OrderEvent` | Transition audit log |
//! | `sequence_counter` | `"seq"` | `u64` | Global event sequence |
//! | `reconciliation` | `incident_id` | `PendingReconciliation` | Ledger/store divergence queue |
//! | `dead_letter` | `incident_id` | `DeadLetterIncident` | Incidents needing manual recovery |
//!
//! # Conditional writes
//!
//! Every mutation runs in one write transaction that first re-reads the
//! order `version` and the listing `status` and aborts with a conflict if
//! either moved since the caller read them. redb serializes write
//! transactions, so check and write are atomic.

use redb::{
    Database, ReadableDatabase, ReadableTable, ReadableTableMetadata, TableDefinition,
    WriteTransaction,
};
use shared::order::{Listing, ListingStatus, Order, OrderEvent, OrderStatus};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

/// Table for orders: key = order_id, value = JSON-serialized Order
const ORDERS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("orders");

/// Table for listings: key = listing_id, value = JSON-serialized Listing
const LISTINGS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("listings");

/// Table for tracking open orders: key = order_id, value = empty (existence check)
const OPEN_ORDERS_TABLE: TableDefinition<&str, ()> = TableDefinition::new("open_orders");

/// Index: key = (seller_id, order_id)
const SELLER_ORDERS_TABLE: TableDefinition<(&str, &str), ()> =
    TableDefinition::new("seller_orders");

/// Index: key = (listing_id, order_id)
const LISTING_ORDERS_TABLE: TableDefinition<(&str, &str), ()> =
    TableDefinition::new("listing_orders");

/// Table for events: key = (order_id, sequence), value = JSON-serialized OrderEvent
const EVENTS_TABLE: TableDefinition<(&str, u64), &[u8]> = TableDefinition::new("events");

/// Table for sequence counter
const SEQUENCE_TABLE: TableDefinition<&str, u64> = TableDefinition::new("sequence_counter");

/// Table for reconciliation queue: key = incident_id, value = JSON-serialized PendingReconciliation
const RECONCILIATION_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("reconciliation");

/// Table for dead letter queue: key = incident_id, value = JSON-serialized DeadLetterIncident
const DEAD_LETTER_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("dead_letter");

const SEQUENCE_KEY: &str = "seq";

/// Divergence between ledger and store awaiting repair
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IncidentKind {
    /// Escrow initialized but the order record was never written
    MissingOrder {
        order: Box<Order>,
        event: Box<OrderEvent>,
    },
    /// Escrow settled but the order record still shows the prior state
    Settlement {
        order_id: String,
        target: OrderStatus,
        /// Timestamp of the command whose store write was lost
        at: i64,
    },
    /// Escrow initialized for a buyer who lost the race for the listing
    OrphanedEscrow {
        order_id: String,
        listing_id: String,
        buyer_id: String,
        escrow_address: String,
    },
}

impl IncidentKind {
    pub fn order_id(&self) -> &str {
        match self {
            IncidentKind::MissingOrder { order, .. } => &order.order_id,
            IncidentKind::Settlement { order_id, .. }
            | IncidentKind::OrphanedEscrow { order_id, .. } => order_id,
        }
    }
}

/// Reconciliation queue entry
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PendingReconciliation {
    pub incident_id: String,
    pub kind: IncidentKind,
    pub created_at: i64,
    pub retry_count: u32,
    /// When the last attempt ran (backoff anchor)
    pub last_attempt_at: Option<i64>,
    pub last_error: Option<String>,
}

/// Dead letter queue entry (needs manual recovery)
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct DeadLetterIncident {
    pub incident: PendingReconciliation,
    pub failed_at: i64,
    pub reason: String,
}

/// Listing status change applied together with an order write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingUpdate {
    pub listing_id: String,
    /// Status the listing must still have
    pub expected: ListingStatus,
    pub next: ListingStatus,
}

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] redb::DatabaseError),

    #[error("Transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),

    #[error("Table error: {0}")]
    Table(#[from] redb::TableError),

    #[error("Storage error: {0}")]
    Storage(#[from] redb::StorageError),

    #[error("Commit error: {0}")]
    Commit(#[from] redb::CommitError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Order not found: {0}")]
    OrderNotFound(String),

    #[error("Order already exists: {0}")]
    OrderExists(String),

    #[error("Listing not found: {0}")]
    ListingNotFound(String),

    #[error("Order {order_id} changed concurrently (expected version {expected}, found {found})")]
    VersionConflict {
        order_id: String,
        expected: u64,
        found: u64,
    },

    #[error("Listing {listing_id} changed concurrently (expected {expected:?}, found {found:?})")]
    ListingConflict {
        listing_id: String,
        expected: ListingStatus,
        found: ListingStatus,
    },

    #[error("Listing {listing_id} already has open order {order_id}")]
    ListingReserved { listing_id: String, order_id: String },
}

impl StorageError {
    /// Lost a conditional write; re-read and retry
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            StorageError::VersionConflict { .. }
                | StorageError::ListingConflict { .. }
                | StorageError::ListingReserved { .. }
                | StorageError::OrderExists(_)
        )
    }
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Order storage backed by redb
#[derive(Clone)]
pub struct OrderStorage {
    db: Arc<Database>,
    #[cfg(test)]
    fail_writes: Arc<std::sync::atomic::AtomicUsize>,
}

impl std::fmt::Debug for OrderStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderStorage").finish_non_exhaustive()
    }
}

impl OrderStorage {
    /// Open or create the database at the given path
    ///
    /// redb commits are durable once `commit()` returns (copy-on-write with
    /// atomic pointer swap), so an acknowledged transition survives a crash.
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let db = Database::create(path)?;
        Self::init(db)
    }

    /// Open an in-memory database (for testing)
    #[cfg(test)]
    pub fn open_in_memory() -> StorageResult<Self> {
        let db = Database::builder().create_with_backend(redb::backends::InMemoryBackend::new())?;
        Self::init(db)
    }

    fn init(db: Database) -> StorageResult<Self> {
        let write_txn = db.begin_write()?;
        {
            // Create all tables if they don't exist
            let _ = write_txn.open_table(ORDERS_TABLE)?;
            let _ = write_txn.open_table(LISTINGS_TABLE)?;
            let _ = write_txn.open_table(OPEN_ORDERS_TABLE)?;
            let _ = write_txn.open_table(SELLER_ORDERS_TABLE)?;
            let _ = write_txn.open_table(LISTING_ORDERS_TABLE)?;
            let _ = write_txn.open_table(EVENTS_TABLE)?;
            let _ = write_txn.open_table(RECONCILIATION_TABLE)?;
            let _ = write_txn.open_table(DEAD_LETTER_TABLE)?;

            let mut seq_table = write_txn.open_table(SEQUENCE_TABLE)?;
            if seq_table.get(SEQUENCE_KEY)?.is_none() {
                seq_table.insert(SEQUENCE_KEY, 0u64)?;
            }
        }
        write_txn.commit()?;

        Ok(Self {
            db: Arc::new(db),
            #[cfg(test)]
            fail_writes: Arc::new(std::sync::atomic::AtomicUsize::new(0)),
        })
    }

    /// Make the next `n` mutating calls fail as if the disk were unavailable
    #[cfg(test)]
    pub fn fail_next_writes(&self, n: usize) {
        self.fail_writes
            .store(n, std::sync::atomic::Ordering::SeqCst);
    }

    fn check_writable(&self) -> StorageResult<()> {
        #[cfg(test)]
        {
            use std::sync::atomic::Ordering;
            let remaining = self.fail_writes.load(Ordering::SeqCst);
            if remaining > 0 {
                self.fail_writes.store(remaining - 1, Ordering::SeqCst);
                return Err(StorageError::Storage(redb::StorageError::Io(
                    std::io::Error::other("injected write failure"),
                )));
            }
        }
        Ok(())
    }

    // ========== Listings ==========

    /// Insert or refresh a listing from the catalog
    ///
    /// Descriptive fields come from the catalog; an existing status is kept
    /// because the coordinator owns it.
    pub fn upsert_listing(&self, listing: &Listing) -> StorageResult<Listing> {
        self.check_writable()?;
        let txn = self.db.begin_write()?;
        let stored = {
            let mut table = txn.open_table(LISTINGS_TABLE)?;
            let existing: Option<Listing> = match table.get(listing.listing_id.as_str())? {
                Some(value) => Some(serde_json::from_slice(value.value())?),
                None => None,
            };
            let mut stored = listing.clone();
            if let Some(existing) = existing {
                stored.status = existing.status;
            }
            let value = serde_json::to_vec(&stored)?;
            table.insert(stored.listing_id.as_str(), value.as_slice())?;
            stored
        };
        txn.commit()?;
        Ok(stored)
    }

    /// Get a listing by ID
    pub fn get_listing(&self, listing_id: &str) -> StorageResult<Option<Listing>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(LISTINGS_TABLE)?;
        match table.get(listing_id)? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    /// Conditionally set a listing's status (catalog `SetListingStatus`)
    pub fn set_listing_status(&self, update: &ListingUpdate) -> StorageResult<Listing> {
        self.check_writable()?;
        let txn = self.db.begin_write()?;
        let listing = self.apply_listing_update(&txn, update)?;
        txn.commit()?;
        Ok(listing)
    }

    fn apply_listing_update(
        &self,
        txn: &WriteTransaction,
        update: &ListingUpdate,
    ) -> StorageResult<Listing> {
        let mut table = txn.open_table(LISTINGS_TABLE)?;
        let mut listing: Listing = match table.get(update.listing_id.as_str())? {
            Some(value) => serde_json::from_slice(value.value())?,
            None => return Err(StorageError::ListingNotFound(update.listing_id.clone())),
        };
        if listing.status != update.expected {
            return Err(StorageError::ListingConflict {
                listing_id: update.listing_id.clone(),
                expected: update.expected,
                found: listing.status,
            });
        }
        listing.status = update.next;
        let value = serde_json::to_vec(&listing)?;
        table.insert(listing.listing_id.as_str(), value.as_slice())?;
        Ok(listing)
    }

    // ========== Orders ==========

    /// Get an order by ID
    pub fn get_order(&self, order_id: &str) -> StorageResult<Option<Order>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(ORDERS_TABLE)?;
        match table.get(order_id)? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    fn get_order_txn(&self, txn: &WriteTransaction, order_id: &str) -> StorageResult<Option<Order>> {
        let table = txn.open_table(ORDERS_TABLE)?;
        match table.get(order_id)? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    fn put_order(&self, txn: &WriteTransaction, order: &Order) -> StorageResult<()> {
        let mut table = txn.open_table(ORDERS_TABLE)?;
        let value = serde_json::to_vec(order)?;
        table.insert(order.order_id.as_str(), value.as_slice())?;

        let mut open = txn.open_table(OPEN_ORDERS_TABLE)?;
        if order.is_open() {
            open.insert(order.order_id.as_str(), ())?;
        } else {
            open.remove(order.order_id.as_str())?;
        }
        Ok(())
    }

    /// Open order currently referencing the listing, if any
    fn open_order_for_listing_txn(
        &self,
        txn: &WriteTransaction,
        listing_id: &str,
    ) -> StorageResult<Option<String>> {
        let index = txn.open_table(LISTING_ORDERS_TABLE)?;
        let open = txn.open_table(OPEN_ORDERS_TABLE)?;
        for result in index.range((listing_id, "")..)? {
            let (key, _) = result?;
            let (lid, oid) = key.value();
            if lid != listing_id {
                break;
            }
            if open.get(oid)?.is_some() {
                return Ok(Some(oid.to_string()));
            }
        }
        Ok(None)
    }

    /// Create a new order and reserve its listing in one transaction
    ///
    /// Fails with a conflict if the listing is no longer in `listing.expected`
    /// or another open order already references it.
    pub fn insert_order(
        &self,
        order: &Order,
        listing: &ListingUpdate,
        event: OrderEvent,
    ) -> StorageResult<OrderEvent> {
        self.check_writable()?;
        let txn = self.db.begin_write()?;

        // 1. Order must not exist yet
        if self.get_order_txn(&txn, &order.order_id)?.is_some() {
            return Err(StorageError::OrderExists(order.order_id.clone()));
        }

        // 2. At most one open order per listing
        if let Some(existing) = self.open_order_for_listing_txn(&txn, &listing.listing_id)? {
            return Err(StorageError::ListingReserved {
                listing_id: listing.listing_id.clone(),
                order_id: existing,
            });
        }

        // 3. Listing status check + update
        self.apply_listing_update(&txn, listing)?;

        // 4. Order + indices
        self.put_order(&txn, order)?;
        {
            let mut by_seller = txn.open_table(SELLER_ORDERS_TABLE)?;
            by_seller.insert((order.seller_id.as_str(), order.order_id.as_str()), ())?;
            let mut by_listing = txn.open_table(LISTING_ORDERS_TABLE)?;
            by_listing.insert((order.listing_id.as_str(), order.order_id.as_str()), ())?;
        }

        // 5. Event
        let event = self.append_event(&txn, event)?;

        txn.commit()?;
        tracing::debug!(order_id = %order.order_id, sequence = event.sequence, "Order inserted");
        Ok(event)
    }

    /// Replace an order iff its stored version still equals `expected_version`
    ///
    /// The optional listing update is applied in the same transaction and is
    /// itself conditional on the listing's current status.
    pub fn commit_transition(
        &self,
        expected_version: u64,
        order: &Order,
        listing: Option<&ListingUpdate>,
        event: OrderEvent,
    ) -> StorageResult<OrderEvent> {
        self.check_writable()?;
        let txn = self.db.begin_write()?;

        // 1. Version check
        let current = self
            .get_order_txn(&txn, &order.order_id)?
            .ok_or_else(|| StorageError::OrderNotFound(order.order_id.clone()))?;
        if current.version != expected_version {
            return Err(StorageError::VersionConflict {
                order_id: order.order_id.clone(),
                expected: expected_version,
                found: current.version,
            });
        }

        // 2. Listing (conditional)
        if let Some(update) = listing {
            self.apply_listing_update(&txn, update)?;
        }

        // 3. Order + event
        self.put_order(&txn, order)?;
        let event = self.append_event(&txn, event)?;

        txn.commit()?;
        Ok(event)
    }

    /// All non-terminal orders
    pub fn get_open_orders(&self) -> StorageResult<Vec<Order>> {
        let read_txn = self.db.begin_read()?;
        let open = read_txn.open_table(OPEN_ORDERS_TABLE)?;
        let orders = read_txn.open_table(ORDERS_TABLE)?;

        let mut result = Vec::new();
        for entry in open.iter()? {
            let (key, _) = entry?;
            if let Some(value) = orders.get(key.value())? {
                result.push(serde_json::from_slice(value.value())?);
            }
        }
        Ok(result)
    }

    /// Full scan for orders in any of `statuses`
    pub fn orders_in_status(&self, statuses: &[OrderStatus]) -> StorageResult<Vec<Order>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(ORDERS_TABLE)?;

        let mut result = Vec::new();
        for entry in table.iter()? {
            let (_key, value) = entry?;
            let order: Order = serde_json::from_slice(value.value())?;
            if statuses.contains(&order.status) {
                result.push(order);
            }
        }
        Ok(result)
    }

    /// All orders placed against listings of `seller_id`
    pub fn orders_for_seller(&self, seller_id: &str) -> StorageResult<Vec<Order>> {
        self.orders_by_index(SELLER_ORDERS_TABLE, seller_id)
    }

    /// All orders ever placed against `listing_id`
    pub fn orders_for_listing(&self, listing_id: &str) -> StorageResult<Vec<Order>> {
        self.orders_by_index(LISTING_ORDERS_TABLE, listing_id)
    }

    fn orders_by_index(
        &self,
        index: TableDefinition<(&str, &str), ()>,
        prefix: &str,
    ) -> StorageResult<Vec<Order>> {
        let read_txn = self.db.begin_read()?;
        let index = read_txn.open_table(index)?;
        let orders = read_txn.open_table(ORDERS_TABLE)?;

        let mut result: Vec<Order> = Vec::new();
        for entry in index.range((prefix, "")..)? {
            let (key, _) = entry?;
            let (p, order_id) = key.value();
            if p != prefix {
                break;
            }
            if let Some(value) = orders.get(order_id)? {
                result.push(serde_json::from_slice(value.value())?);
            }
        }
        result.sort_by_key(|o| o.created_at);
        Ok(result)
    }

    // ========== Events ==========

    fn append_event(&self, txn: &WriteTransaction, mut event: OrderEvent) -> StorageResult<OrderEvent> {
        let sequence = {
            let mut table = txn.open_table(SEQUENCE_TABLE)?;
            let current = table
                .get(SEQUENCE_KEY)?
                .map(|guard| guard.value())
                .unwrap_or(0);
            let next = current + 1;
            table.insert(SEQUENCE_KEY, next)?;
            next
        };
        event.sequence = sequence;

        let mut table = txn.open_table(EVENTS_TABLE)?;
        let value = serde_json::to_vec(&event)?;
        table.insert((event.order_id.as_str(), event.sequence), value.as_slice())?;
        Ok(event)
    }

    /// Get all events for an order, oldest first
    pub fn events_for_order(&self, order_id: &str) -> StorageResult<Vec<OrderEvent>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(EVENTS_TABLE)?;

        let mut events = Vec::new();
        for result in table.range((order_id, 0u64)..=(order_id, u64::MAX))? {
            let (_key, value) = result?;
            let event: OrderEvent = serde_json::from_slice(value.value())?;
            events.push(event);
        }
        events.sort_by_key(|e| e.sequence);
        Ok(events)
    }

    /// Get current sequence (read-only)
    pub fn current_sequence(&self) -> StorageResult<u64> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(SEQUENCE_TABLE)?;
        Ok(table
            .get(SEQUENCE_KEY)?
            .map(|guard| guard.value())
            .unwrap_or(0))
    }

    // ========== Reconciliation Queue ==========

    /// Persist (insert or update) a reconciliation incident
    pub fn save_incident(&self, incident: &PendingReconciliation) -> StorageResult<()> {
        self.check_writable()?;
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(RECONCILIATION_TABLE)?;
            let value = serde_json::to_vec(incident)?;
            table.insert(incident.incident_id.as_str(), value.as_slice())?;
        }
        txn.commit()?;
        Ok(())
    }

    /// Remove a resolved incident
    pub fn remove_incident(&self, incident_id: &str) -> StorageResult<()> {
        self.check_writable()?;
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(RECONCILIATION_TABLE)?;
            table.remove(incident_id)?;
        }
        txn.commit()?;
        Ok(())
    }

    /// Get all pending incidents
    pub fn get_incidents(&self) -> StorageResult<Vec<PendingReconciliation>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(RECONCILIATION_TABLE)?;

        let mut entries = Vec::new();
        for result in table.iter()? {
            let (_key, value) = result?;
            entries.push(serde_json::from_slice(value.value())?);
        }
        Ok(entries)
    }

    /// Move an incident to the dead letter queue
    pub fn move_to_dead_letter(
        &self,
        incident: &PendingReconciliation,
        reason: &str,
    ) -> StorageResult<()> {
        self.check_writable()?;
        let txn = self.db.begin_write()?;
        {
            let mut pending = txn.open_table(RECONCILIATION_TABLE)?;
            pending.remove(incident.incident_id.as_str())?;

            let mut dead = txn.open_table(DEAD_LETTER_TABLE)?;
            let entry = DeadLetterIncident {
                incident: incident.clone(),
                failed_at: shared::util::now_millis(),
                reason: reason.to_string(),
            };
            let value = serde_json::to_vec(&entry)?;
            dead.insert(incident.incident_id.as_str(), value.as_slice())?;
        }
        txn.commit()?;
        Ok(())
    }

    /// Get all dead letter entries
    pub fn get_dead_letters(&self) -> StorageResult<Vec<DeadLetterIncident>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(DEAD_LETTER_TABLE)?;

        let mut entries = Vec::new();
        for result in table.iter()? {
            let (_key, value) = result?;
            entries.push(serde_json::from_slice(value.value())?);
        }
        Ok(entries)
    }

    // ========== Statistics ==========

    /// Get storage statistics
    pub fn get_stats(&self) -> StorageResult<StorageStats> {
        let read_txn = self.db.begin_read()?;

        Ok(StorageStats {
            order_count: read_txn.open_table(ORDERS_TABLE)?.len()?,
            open_order_count: read_txn.open_table(OPEN_ORDERS_TABLE)?.len()?,
            listing_count: read_txn.open_table(LISTINGS_TABLE)?.len()?,
            event_count: read_txn.open_table(EVENTS_TABLE)?.len()?,
            incident_count: read_txn.open_table(RECONCILIATION_TABLE)?.len()?,
            dead_letter_count: read_txn.open_table(DEAD_LETTER_TABLE)?.len()?,
        })
    }
}

/// Storage statistics
#[derive(Debug, Clone)]
pub struct StorageStats {
    pub order_count: u64,
    pub open_order_count: u64,
    pub listing_count: u64,
    pub event_count: u64,
    pub incident_count: u64,
    pub dead_letter_count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use shared::order::{
        DeliveryMethod, EventPayload, OrderEventType, ShippingInfo,
    };

    fn create_test_listing(listing_id: &str) -> Listing {
        Listing {
            listing_id: listing_id.to_string(),
            seller_id: "seller-1".to_string(),
            title: "Road Bike".to_string(),
            price: Decimal::ONE,
            delivery_method: DeliveryMethod::HomeDelivery,
            guarantee_hours: Some(24.0),
            status: ListingStatus::Active,
        }
    }

    fn create_test_order(order_id: &str, listing_id: &str) -> Order {
        Order {
            order_id: order_id.to_string(),
            listing_id: listing_id.to_string(),
            seller_id: "seller-1".to_string(),
            buyer_id: "buyer-1".to_string(),
            shipping: ShippingInfo::default(),
            amount: 1_000_000_000,
            fee: 10_000_000,
            escrow_address: "addr".to_string(),
            escrow_order_key: listing_id.to_string(),
            guarantee_hours: 24.0,
            status: OrderStatus::AwaitingAcceptance,
            accepted_by_seller: false,
            accepted_at: None,
            delivery_started: false,
            is_late_delivery: false,
            cancellation_reason: None,
            created_at: 1_000,
            updated_at: 1_000,
            version: 1,
        }
    }

    fn create_test_event(order: &Order, payload: EventPayload) -> OrderEvent {
        OrderEvent {
            event_id: uuid::Uuid::new_v4().to_string(),
            sequence: 0,
            order_id: order.order_id.clone(),
            timestamp: order.updated_at,
            client_timestamp: None,
            actor_id: "test".to_string(),
            command_id: uuid::Uuid::new_v4().to_string(),
            from_status: None,
            to_status: order.status,
            event_type: payload.event_type(),
            payload,
        }
    }

    fn placed_payload(order: &Order) -> EventPayload {
        EventPayload::OrderPlaced {
            listing_id: order.listing_id.clone(),
            amount: order.amount,
            fee: order.fee,
            escrow_address: order.escrow_address.clone(),
        }
    }

    fn reserve(listing_id: &str) -> ListingUpdate {
        ListingUpdate {
            listing_id: listing_id.to_string(),
            expected: ListingStatus::Active,
            next: ListingStatus::Pending,
        }
    }

    fn insert(storage: &OrderStorage, order: &Order) -> StorageResult<OrderEvent> {
        storage.insert_order(
            order,
            &reserve(&order.listing_id),
            create_test_event(order, placed_payload(order)),
        )
    }

    #[test]
    fn test_insert_order_reserves_listing() {
        let storage = OrderStorage::open_in_memory().unwrap();
        storage.upsert_listing(&create_test_listing("l-1")).unwrap();
        let order = create_test_order("o-1", "l-1");

        let event = insert(&storage, &order).unwrap();
        assert_eq!(event.sequence, 1);
        assert_eq!(event.event_type, OrderEventType::OrderPlaced);

        let listing = storage.get_listing("l-1").unwrap().unwrap();
        assert_eq!(listing.status, ListingStatus::Pending);
        assert_eq!(storage.get_order("o-1").unwrap(), Some(order));
        assert_eq!(storage.get_open_orders().unwrap().len(), 1);
        assert_eq!(storage.current_sequence().unwrap(), 1);
    }

    #[test]
    fn test_set_listing_status_is_conditional() {
        let storage = OrderStorage::open_in_memory().unwrap();
        storage.upsert_listing(&create_test_listing("l-1")).unwrap();

        let withdraw = ListingUpdate {
            listing_id: "l-1".to_string(),
            expected: ListingStatus::Active,
            next: ListingStatus::Deleted,
        };
        let listing = storage.set_listing_status(&withdraw).unwrap();
        assert_eq!(listing.status, ListingStatus::Deleted);

        // 期望状态已过期
        let err = storage.set_listing_status(&withdraw).unwrap_err();
        assert!(err.is_conflict());

        let missing = ListingUpdate {
            listing_id: "l-404".to_string(),
            ..withdraw
        };
        assert!(matches!(
            storage.set_listing_status(&missing),
            Err(StorageError::ListingNotFound(_))
        ));
    }

    #[test]
    fn test_second_order_on_reserved_listing_conflicts() {
        let storage = OrderStorage::open_in_memory().unwrap();
        storage.upsert_listing(&create_test_listing("l-1")).unwrap();
        insert(&storage, &create_test_order("o-1", "l-1")).unwrap();

        let err = insert(&storage, &create_test_order("o-2", "l-1")).unwrap_err();
        assert!(err.is_conflict(), "unexpected error: {err}");
        assert!(storage.get_order("o-2").unwrap().is_none());
    }

    #[test]
    fn test_commit_transition_version_check() {
        let storage = OrderStorage::open_in_memory().unwrap();
        storage.upsert_listing(&create_test_listing("l-1")).unwrap();
        let order = create_test_order("o-1", "l-1");
        insert(&storage, &order).unwrap();

        let mut accepted = order.clone();
        accepted.status = OrderStatus::Accepted;
        accepted.accepted_by_seller = true;
        accepted.accepted_at = Some(2_000);
        accepted.version = 2;
        let payload = EventPayload::OrderAccepted {
            accepted_at: 2_000,
            deadline: 2_000 + 86_400_000,
        };
        let event = create_test_event(&accepted, payload.clone());
        storage.commit_transition(1, &accepted, None, event).unwrap();

        // Stale writer still believes version 1
        let mut stale = order.clone();
        stale.status = OrderStatus::CancelledBySeller;
        stale.version = 2;
        let err = storage
            .commit_transition(1, &stale, None, create_test_event(&stale, payload))
            .unwrap_err();
        assert!(matches!(
            err,
            StorageError::VersionConflict { expected: 1, found: 2, .. }
        ));
        assert_eq!(
            storage.get_order("o-1").unwrap().unwrap().status,
            OrderStatus::Accepted
        );
    }

    #[test]
    fn test_terminal_transition_leaves_open_index_and_frees_listing() {
        let storage = OrderStorage::open_in_memory().unwrap();
        storage.upsert_listing(&create_test_listing("l-1")).unwrap();
        let order = create_test_order("o-1", "l-1");
        insert(&storage, &order).unwrap();

        let mut denied = order.clone();
        denied.status = OrderStatus::CancelledBySeller;
        denied.version = 2;
        let release = ListingUpdate {
            listing_id: "l-1".to_string(),
            expected: ListingStatus::Pending,
            next: ListingStatus::Active,
        };
        let payload = EventPayload::OrderDenied {
            reason: shared::order::CancellationReason::new("Out of stock", "Sold elsewhere"),
        };
        storage
            .commit_transition(1, &denied, Some(&release), create_test_event(&denied, payload))
            .unwrap();

        assert!(storage.get_open_orders().unwrap().is_empty());
        assert_eq!(
            storage.get_listing("l-1").unwrap().unwrap().status,
            ListingStatus::Active
        );
        // Listing can be reserved again by a new order
        insert(&storage, &create_test_order("o-2", "l-1")).unwrap();
        assert_eq!(storage.orders_for_listing("l-1").unwrap().len(), 2);
    }

    #[test]
    fn test_listing_conflict_rolls_back_order_write() {
        let storage = OrderStorage::open_in_memory().unwrap();
        storage.upsert_listing(&create_test_listing("l-1")).unwrap();
        let order = create_test_order("o-1", "l-1");
        insert(&storage, &order).unwrap();

        let mut completed = order.clone();
        completed.status = OrderStatus::Completed;
        completed.version = 2;
        // Wrong expectation: listing is Pending, not Active
        let bad = ListingUpdate {
            listing_id: "l-1".to_string(),
            expected: ListingStatus::Active,
            next: ListingStatus::Sold,
        };
        let payload = EventPayload::OrderCompleted {
            is_late_delivery: false,
        };
        let err = storage
            .commit_transition(1, &completed, Some(&bad), create_test_event(&completed, payload))
            .unwrap_err();
        assert!(matches!(err, StorageError::ListingConflict { .. }));
        assert_eq!(storage.get_order("o-1").unwrap().unwrap().version, 1);
        assert_eq!(storage.events_for_order("o-1").unwrap().len(), 1);
    }

    #[test]
    fn test_upsert_listing_keeps_status() {
        let storage = OrderStorage::open_in_memory().unwrap();
        storage.upsert_listing(&create_test_listing("l-1")).unwrap();
        insert(&storage, &create_test_order("o-1", "l-1")).unwrap();

        let mut refreshed = create_test_listing("l-1");
        refreshed.title = "Road Bike (size M)".to_string();
        let stored = storage.upsert_listing(&refreshed).unwrap();
        assert_eq!(stored.status, ListingStatus::Pending);
        assert_eq!(stored.title, "Road Bike (size M)");
    }

    #[test]
    fn test_orders_for_seller_prefix_scan() {
        let storage = OrderStorage::open_in_memory().unwrap();
        storage.upsert_listing(&create_test_listing("l-1")).unwrap();
        let mut other = create_test_listing("l-2");
        other.seller_id = "seller-10".to_string();
        storage.upsert_listing(&other).unwrap();

        insert(&storage, &create_test_order("o-1", "l-1")).unwrap();
        let mut o2 = create_test_order("o-2", "l-2");
        o2.seller_id = "seller-10".to_string();
        insert(&storage, &o2).unwrap();

        let orders = storage.orders_for_seller("seller-1").unwrap();
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].order_id, "o-1");
    }

    #[test]
    fn test_injected_failure_leaves_no_trace() {
        let storage = OrderStorage::open_in_memory().unwrap();
        storage.upsert_listing(&create_test_listing("l-1")).unwrap();
        storage.fail_next_writes(1);

        let err = insert(&storage, &create_test_order("o-1", "l-1")).unwrap_err();
        assert!(matches!(err, StorageError::Storage(_)));
        assert!(!err.is_conflict());
        assert!(storage.get_order("o-1").unwrap().is_none());

        // Next write goes through
        insert(&storage, &create_test_order("o-1", "l-1")).unwrap();
    }

    #[test]
    fn test_reconciliation_queue_and_dead_letter() {
        let storage = OrderStorage::open_in_memory().unwrap();
        let incident = PendingReconciliation {
            incident_id: "inc-1".to_string(),
            kind: IncidentKind::Settlement {
                order_id: "o-1".to_string(),
                target: OrderStatus::Completed,
                at: 1_000,
            },
            created_at: 1_000,
            retry_count: 0,
            last_attempt_at: None,
            last_error: None,
        };
        storage.save_incident(&incident).unwrap();
        assert_eq!(storage.get_incidents().unwrap(), vec![incident.clone()]);

        storage.move_to_dead_letter(&incident, "listing re-sold").unwrap();
        assert!(storage.get_incidents().unwrap().is_empty());
        let dead = storage.get_dead_letters().unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].reason, "listing re-sold");

        let stats = storage.get_stats().unwrap();
        assert_eq!(stats.incident_count, 0);
        assert_eq!(stats.dead_letter_count, 1);
    }
}
