//! In-memory store for tests and local development.
//!
//! A single async mutex serializes transactions, which trivially gives
//! snapshot isolation: a [`StoreTx`] stages its writes on a copy of the
//! state and publishes the copy on commit. Optimistic single-statement
//! operations take the same lock for their one statement. The unique
//! indices (`idempotency_key`, `qr_code`) behave exactly like their SQL
//! counterparts, including the error they raise.

use super::{Store, StoreError, StoreResult, StoreTx, UniqueIndex};
use crate::types::{
    Event, EventId, Money, Order, OrderId, Organizer, OrganizerId, RefundOutboxEntry, Ticket,
    TicketId, TicketStatus, TierId, Transaction, TransactionId, TransactionStatus, UserId,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Clone, Default)]
struct MemState {
    transactions: HashMap<TransactionId, Transaction>,
    idempotency_index: HashMap<String, TransactionId>,
    reference_index: HashMap<String, TransactionId>,
    orders: HashMap<OrderId, Order>,
    events: HashMap<EventId, Event>,
    organizers: HashMap<OrganizerId, Organizer>,
    tickets: HashMap<TicketId, Ticket>,
    qr_index: HashMap<String, TicketId>,
    refund_outbox: Vec<RefundOutboxEntry>,
}

/// In-memory [`Store`] implementation.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<MemState>>,
}

impl InMemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Arc-wrapped instance for sharing.
    #[must_use]
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

struct MemTx {
    guard: OwnedMutexGuard<MemState>,
    staged: MemState,
}

#[async_trait]
impl StoreTx for MemTx {
    async fn find_transaction_by_idempotency_key(
        &mut self,
        key: &str,
    ) -> StoreResult<Option<Transaction>> {
        Ok(self
            .staged
            .idempotency_index
            .get(key)
            .and_then(|id| self.staged.transactions.get(id))
            .cloned())
    }

    async fn transaction_for_update(
        &mut self,
        id: TransactionId,
    ) -> StoreResult<Option<Transaction>> {
        Ok(self.staged.transactions.get(&id).cloned())
    }

    async fn insert_transaction(&mut self, transaction: &Transaction) -> StoreResult<()> {
        if self
            .staged
            .idempotency_index
            .contains_key(&transaction.idempotency_key)
        {
            return Err(StoreError::UniqueViolation(UniqueIndex::IdempotencyKey));
        }
        self.staged
            .idempotency_index
            .insert(transaction.idempotency_key.clone(), transaction.id);
        self.staged
            .reference_index
            .insert(transaction.gateway.reference.clone(), transaction.id);
        self.staged
            .transactions
            .insert(transaction.id, transaction.clone());
        Ok(())
    }

    async fn update_transaction(&mut self, transaction: &Transaction) -> StoreResult<()> {
        if !self.staged.transactions.contains_key(&transaction.id) {
            return Err(StoreError::Backend(format!(
                "update of unknown transaction {}",
                transaction.id
            )));
        }
        // Retries mint fresh references; keep every reference resolvable.
        self.staged
            .reference_index
            .insert(transaction.gateway.reference.clone(), transaction.id);
        self.staged
            .transactions
            .insert(transaction.id, transaction.clone());
        Ok(())
    }

    async fn order_for_update(&mut self, id: OrderId) -> StoreResult<Option<Order>> {
        Ok(self.staged.orders.get(&id).cloned())
    }

    async fn insert_order(&mut self, order: &Order) -> StoreResult<()> {
        self.staged.orders.insert(order.id, order.clone());
        Ok(())
    }

    async fn update_order(&mut self, order: &Order) -> StoreResult<()> {
        if !self.staged.orders.contains_key(&order.id) {
            return Err(StoreError::Backend(format!(
                "update of unknown order {}",
                order.id
            )));
        }
        self.staged.orders.insert(order.id, order.clone());
        Ok(())
    }

    async fn event(&mut self, id: EventId) -> StoreResult<Option<Event>> {
        Ok(self.staged.events.get(&id).cloned())
    }

    async fn event_for_update(&mut self, id: EventId) -> StoreResult<Option<Event>> {
        Ok(self.staged.events.get(&id).cloned())
    }

    async fn apply_tier_sale(
        &mut self,
        event_id: EventId,
        tier_id: TierId,
        expected_sold_count: u32,
        quantity: u32,
        revenue: Money,
    ) -> StoreResult<bool> {
        let Some(event) = self.staged.events.get_mut(&event_id) else {
            return Ok(false);
        };
        let Some(tier) = event.tier_mut(tier_id) else {
            return Ok(false);
        };
        if tier.sold_count != expected_sold_count {
            return Ok(false);
        }
        tier.sold_count += quantity;
        event.total_tickets_sold += quantity;
        event.total_revenue = event
            .total_revenue
            .checked_add(revenue)
            .ok_or_else(|| StoreError::Backend("revenue overflow".to_string()))?;
        Ok(true)
    }

    async fn insert_ticket(&mut self, ticket: &Ticket) -> StoreResult<()> {
        if self.staged.qr_index.contains_key(&ticket.qr_code) {
            return Err(StoreError::UniqueViolation(UniqueIndex::QrCode));
        }
        self.staged
            .qr_index
            .insert(ticket.qr_code.clone(), ticket.id);
        self.staged.tickets.insert(ticket.id, ticket.clone());
        Ok(())
    }

    async fn tickets_for_order(&mut self, order_id: OrderId) -> StoreResult<Vec<Ticket>> {
        let mut tickets: Vec<Ticket> = self
            .staged
            .tickets
            .values()
            .filter(|t| t.order_id == order_id)
            .cloned()
            .collect();
        tickets.sort_by_key(|t| t.created_at);
        Ok(tickets)
    }

    async fn count_user_tier_tickets(
        &mut self,
        event_id: EventId,
        tier_id: TierId,
        user_id: UserId,
    ) -> StoreResult<u32> {
        let count = self
            .staged
            .tickets
            .values()
            .filter(|t| {
                t.event_id == event_id
                    && t.tier_id == tier_id
                    && t.user_id == user_id
                    && t.status != TicketStatus::Cancelled
            })
            .count();
        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }

    async fn cancel_order_tickets(&mut self, order_id: OrderId) -> StoreResult<u32> {
        let mut flipped = 0;
        for ticket in self.staged.tickets.values_mut() {
            if ticket.order_id == order_id && ticket.status != TicketStatus::Cancelled {
                ticket.status = TicketStatus::Cancelled;
                flipped += 1;
            }
        }
        Ok(flipped)
    }

    async fn organizer(&mut self, id: OrganizerId) -> StoreResult<Option<Organizer>> {
        Ok(self.staged.organizers.get(&id).cloned())
    }

    async fn append_refund_outbox(&mut self, entry: &RefundOutboxEntry) -> StoreResult<()> {
        self.staged.refund_outbox.push(entry.clone());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let mut guard = self.guard;
        *guard = self.staged;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        Ok(())
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn begin(&self) -> StoreResult<Box<dyn StoreTx>> {
        let guard = Arc::clone(&self.state).lock_owned().await;
        let staged = guard.clone();
        Ok(Box::new(MemTx { guard, staged }))
    }

    async fn transaction(&self, id: TransactionId) -> StoreResult<Option<Transaction>> {
        Ok(self.state.lock().await.transactions.get(&id).cloned())
    }

    async fn transaction_by_reference(
        &self,
        reference: &str,
    ) -> StoreResult<Option<Transaction>> {
        let state = self.state.lock().await;
        Ok(state
            .reference_index
            .get(reference)
            .and_then(|id| state.transactions.get(id))
            .cloned())
    }

    async fn transactions_for_user(
        &self,
        user_id: UserId,
        limit: u32,
    ) -> StoreResult<Vec<Transaction>> {
        let state = self.state.lock().await;
        let mut transactions: Vec<Transaction> = state
            .transactions
            .values()
            .filter(|t| t.user_id == user_id)
            .cloned()
            .collect();
        transactions.sort_by(|a, b| b.initiated_at.cmp(&a.initiated_at));
        transactions.truncate(limit as usize);
        Ok(transactions)
    }

    async fn order(&self, id: OrderId) -> StoreResult<Option<Order>> {
        Ok(self.state.lock().await.orders.get(&id).cloned())
    }

    async fn event(&self, id: EventId) -> StoreResult<Option<Event>> {
        Ok(self.state.lock().await.events.get(&id).cloned())
    }

    async fn ticket_by_qr(&self, qr_code: &str) -> StoreResult<Option<Ticket>> {
        let state = self.state.lock().await;
        Ok(state
            .qr_index
            .get(qr_code)
            .and_then(|id| state.tickets.get(id))
            .cloned())
    }

    async fn tickets_for_order(&self, order_id: OrderId) -> StoreResult<Vec<Ticket>> {
        let state = self.state.lock().await;
        let mut tickets: Vec<Ticket> = state
            .tickets
            .values()
            .filter(|t| t.order_id == order_id)
            .cloned()
            .collect();
        tickets.sort_by_key(|t| t.created_at);
        Ok(tickets)
    }

    async fn validator_assignments(&self, user_id: UserId) -> StoreResult<Vec<EventId>> {
        let state = self.state.lock().await;
        Ok(state
            .events
            .values()
            .filter(|e| e.validators.contains(&user_id))
            .map(|e| e.id)
            .collect())
    }

    async fn refund_outbox(&self) -> StoreResult<Vec<RefundOutboxEntry>> {
        Ok(self.state.lock().await.refund_outbox.clone())
    }

    async fn checkin_ticket(
        &self,
        id: TicketId,
        at: DateTime<Utc>,
        by: UserId,
    ) -> StoreResult<bool> {
        let mut state = self.state.lock().await;
        let Some(ticket) = state.tickets.get_mut(&id) else {
            return Ok(false);
        };
        if ticket.status != TicketStatus::Valid {
            return Ok(false);
        }
        ticket.status = TicketStatus::Used;
        ticket.checked_in_at = Some(at);
        ticket.checked_in_by = Some(by);
        Ok(true)
    }

    async fn due_retries(
        &self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> StoreResult<Vec<TransactionId>> {
        let state = self.state.lock().await;
        let mut due: Vec<(DateTime<Utc>, TransactionId)> = state
            .transactions
            .values()
            .filter(|t| {
                t.status == TransactionStatus::Failed
                    && t.retry_count < t.max_retries
                    && t.next_retry_at.is_some_and(|at| at <= now)
            })
            .map(|t| (t.next_retry_at.unwrap_or(now), t.id))
            .collect();
        due.sort_by_key(|(at, _)| *at);
        Ok(due
            .into_iter()
            .take(limit as usize)
            .map(|(_, id)| id)
            .collect())
    }

    async fn put_event(&self, event: &Event) -> StoreResult<()> {
        self.state
            .lock()
            .await
            .events
            .insert(event.id, event.clone());
        Ok(())
    }

    async fn put_organizer(&self, organizer: &Organizer) -> StoreResult<()> {
        self.state
            .lock()
            .await
            .organizers
            .insert(organizer.id, organizer.clone());
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::{GatewayDetails, TransactionMetadata};

    fn sample_transaction(key: &str, reference: &str) -> Transaction {
        Transaction {
            id: TransactionId::new(),
            idempotency_key: key.to_string(),
            status: TransactionStatus::Initiated,
            user_id: UserId::new(),
            order_id: OrderId::new(),
            event_id: EventId::new(),
            amount: Money::from_minor(5_000),
            currency: "NGN".to_string(),
            gateway: GatewayDetails {
                provider: "paystack".to_string(),
                reference: reference.to_string(),
                ..GatewayDetails::default()
            },
            splits: None,
            retry_count: 0,
            max_retries: 3,
            last_retry_at: None,
            next_retry_at: None,
            failure: None,
            refunds: Vec::new(),
            total_refunded: Money::ZERO,
            initiated_at: Utc::now(),
            processing_at: None,
            completed_at: None,
            failed_at: None,
            metadata: TransactionMetadata::default(),
        }
    }

    #[tokio::test]
    async fn duplicate_idempotency_key_is_a_unique_violation() {
        let store = InMemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        tx.insert_transaction(&sample_transaction("k1", "r1"))
            .await
            .unwrap();
        let err = tx
            .insert_transaction(&sample_transaction("k1", "r2"))
            .await
            .unwrap_err();
        assert!(err.is_unique_violation(UniqueIndex::IdempotencyKey));
    }

    #[tokio::test]
    async fn rollback_discards_staged_writes() {
        let store = InMemoryStore::new();
        let txn = sample_transaction("k1", "r1");
        let mut tx = store.begin().await.unwrap();
        tx.insert_transaction(&txn).await.unwrap();
        tx.rollback().await.unwrap();
        assert!(store.transaction(txn.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn commit_publishes_and_indexes_by_reference() {
        let store = InMemoryStore::new();
        let txn = sample_transaction("k1", "r1");
        let mut tx = store.begin().await.unwrap();
        tx.insert_transaction(&txn).await.unwrap();
        tx.commit().await.unwrap();
        let found = store.transaction_by_reference("r1").await.unwrap().unwrap();
        assert_eq!(found.id, txn.id);
    }

    #[tokio::test]
    async fn checkin_cas_flips_exactly_once() {
        let store = InMemoryStore::new();
        let ticket = Ticket {
            id: TicketId::new(),
            order_id: OrderId::new(),
            event_id: EventId::new(),
            user_id: UserId::new(),
            tier_id: TierId::new(),
            tier_name: "GA".to_string(),
            price: Money::from_minor(5_000),
            qr_code: "token".to_string(),
            status: TicketStatus::Valid,
            checked_in_at: None,
            checked_in_by: None,
            created_at: Utc::now(),
        };
        let mut tx = store.begin().await.unwrap();
        tx.insert_ticket(&ticket).await.unwrap();
        tx.commit().await.unwrap();

        let scanner = UserId::new();
        assert!(store
            .checkin_ticket(ticket.id, Utc::now(), scanner)
            .await
            .unwrap());
        assert!(!store
            .checkin_ticket(ticket.id, Utc::now(), scanner)
            .await
            .unwrap());
    }
}
