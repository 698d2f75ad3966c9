//! PostgreSQL store implementation.
//!
//! Multi-row mutations run inside a `sqlx` transaction; rows about to be
//! mutated are read with `SELECT ... FOR UPDATE`. Tier inventory updates
//! carry a compare-and-set on `sold_count` in the UPDATE itself, and ticket
//! check-in is a single optimistic UPDATE keyed on `status = 'valid'`.
//! Unique-index violations are surfaced as typed [`StoreError`] values so
//! the engine can recover (idempotent initiate, token re-sign).

use super::{Store, StoreError, StoreResult, StoreTx, UniqueIndex};
use crate::types::{
    Event, EventId, EventStatus, Failure, GatewayDetails, Money, Order, OrderId, Organizer,
    OrganizerId, PaymentStatus, Refund, RefundOutboxEntry, Splits, Ticket, TicketId,
    TicketStatus, TicketTier, TierId, Transaction, TransactionId, TransactionMetadata,
    TransactionStatus, UserId,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgRow};
use sqlx::types::Json;
use sqlx::Row;
use uuid::Uuid;

/// PostgreSQL [`Store`] implementation.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Wrap an existing connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run database migrations.
    ///
    /// # Errors
    ///
    /// Returns an error when a migration fails to apply.
    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(format!("migration failed: {e}")))
    }
}

struct PgTx {
    tx: sqlx::Transaction<'static, sqlx::Postgres>,
}

// ── error & numeric helpers ─────────────────────────────────────────

fn backend(err: sqlx::Error) -> StoreError {
    StoreError::Backend(err.to_string())
}

fn unique_or_backend(err: sqlx::Error, index: UniqueIndex) -> StoreError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.is_unique_violation() {
            return StoreError::UniqueViolation(index);
        }
    }
    backend(err)
}

fn money_to_db(amount: Money) -> StoreResult<i64> {
    i64::try_from(amount.minor())
        .map_err(|_| StoreError::Backend(format!("amount {amount} exceeds storage range")))
}

fn money_from_db(value: i64) -> StoreResult<Money> {
    u64::try_from(value)
        .map(Money::from_minor)
        .map_err(|_| StoreError::Backend(format!("negative stored amount {value}")))
}

fn count_to_db(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

fn count_from_db(value: i32) -> StoreResult<u32> {
    u32::try_from(value)
        .map_err(|_| StoreError::Backend(format!("negative stored count {value}")))
}

// ── row mapping ─────────────────────────────────────────────────────

const TRANSACTION_COLUMNS: &str = "id, idempotency_key, status, user_id, order_id, event_id, \
     amount, currency, gateway, splits, retry_count, max_retries, last_retry_at, \
     next_retry_at, failure, refunds, total_refunded, initiated_at, processing_at, \
     completed_at, failed_at, metadata";

fn row_to_transaction(row: &PgRow) -> StoreResult<Transaction> {
    let status_raw: String = row.try_get("status").map_err(backend)?;
    let status = TransactionStatus::parse(&status_raw)
        .ok_or_else(|| StoreError::Backend(format!("unknown transaction status {status_raw}")))?;
    let gateway: Json<GatewayDetails> = row.try_get("gateway").map_err(backend)?;
    let splits: Option<Json<Splits>> = row.try_get("splits").map_err(backend)?;
    let failure: Option<Json<Failure>> = row.try_get("failure").map_err(backend)?;
    let refunds: Json<Vec<Refund>> = row.try_get("refunds").map_err(backend)?;
    let metadata: Json<TransactionMetadata> = row.try_get("metadata").map_err(backend)?;
    Ok(Transaction {
        id: TransactionId::from_uuid(row.try_get("id").map_err(backend)?),
        idempotency_key: row.try_get("idempotency_key").map_err(backend)?,
        status,
        user_id: UserId::from_uuid(row.try_get("user_id").map_err(backend)?),
        order_id: OrderId::from_uuid(row.try_get("order_id").map_err(backend)?),
        event_id: EventId::from_uuid(row.try_get("event_id").map_err(backend)?),
        amount: money_from_db(row.try_get("amount").map_err(backend)?)?,
        currency: row.try_get("currency").map_err(backend)?,
        gateway: gateway.0,
        splits: splits.map(|s| s.0),
        retry_count: count_from_db(row.try_get("retry_count").map_err(backend)?)?,
        max_retries: count_from_db(row.try_get("max_retries").map_err(backend)?)?,
        last_retry_at: row.try_get("last_retry_at").map_err(backend)?,
        next_retry_at: row.try_get("next_retry_at").map_err(backend)?,
        failure: failure.map(|f| f.0),
        refunds: refunds.0,
        total_refunded: money_from_db(row.try_get("total_refunded").map_err(backend)?)?,
        initiated_at: row.try_get("initiated_at").map_err(backend)?,
        processing_at: row.try_get("processing_at").map_err(backend)?,
        completed_at: row.try_get("completed_at").map_err(backend)?,
        failed_at: row.try_get("failed_at").map_err(backend)?,
        metadata: metadata.0,
    })
}

const ORDER_COLUMNS: &str = "id, user_id, event_id, tier_id, tier_name, quantity, unit_price, \
     total_amount, payment_status, tickets, splits, gateway_reference, created_at, updated_at";

fn row_to_order(row: &PgRow) -> StoreResult<Order> {
    let status_raw: String = row.try_get("payment_status").map_err(backend)?;
    let payment_status = PaymentStatus::parse(&status_raw)
        .ok_or_else(|| StoreError::Backend(format!("unknown payment status {status_raw}")))?;
    let tickets: Vec<Uuid> = row.try_get("tickets").map_err(backend)?;
    let splits: Option<Json<Splits>> = row.try_get("splits").map_err(backend)?;
    Ok(Order {
        id: OrderId::from_uuid(row.try_get("id").map_err(backend)?),
        user_id: UserId::from_uuid(row.try_get("user_id").map_err(backend)?),
        event_id: EventId::from_uuid(row.try_get("event_id").map_err(backend)?),
        tier_id: TierId::from_uuid(row.try_get("tier_id").map_err(backend)?),
        tier_name: row.try_get("tier_name").map_err(backend)?,
        quantity: count_from_db(row.try_get("quantity").map_err(backend)?)?,
        unit_price: money_from_db(row.try_get("unit_price").map_err(backend)?)?,
        total_amount: money_from_db(row.try_get("total_amount").map_err(backend)?)?,
        payment_status,
        tickets: tickets.into_iter().map(TicketId::from_uuid).collect(),
        splits: splits.map(|s| s.0),
        gateway_reference: row.try_get("gateway_reference").map_err(backend)?,
        created_at: row.try_get("created_at").map_err(backend)?,
        updated_at: row.try_get("updated_at").map_err(backend)?,
    })
}

const TICKET_COLUMNS: &str = "id, order_id, event_id, user_id, tier_id, tier_name, price, \
     qr_code, status, checked_in_at, checked_in_by, created_at";

fn row_to_ticket(row: &PgRow) -> StoreResult<Ticket> {
    let status_raw: String = row.try_get("status").map_err(backend)?;
    let status = TicketStatus::parse(&status_raw)
        .ok_or_else(|| StoreError::Backend(format!("unknown ticket status {status_raw}")))?;
    let checked_in_by: Option<Uuid> = row.try_get("checked_in_by").map_err(backend)?;
    Ok(Ticket {
        id: TicketId::from_uuid(row.try_get("id").map_err(backend)?),
        order_id: OrderId::from_uuid(row.try_get("order_id").map_err(backend)?),
        event_id: EventId::from_uuid(row.try_get("event_id").map_err(backend)?),
        user_id: UserId::from_uuid(row.try_get("user_id").map_err(backend)?),
        tier_id: TierId::from_uuid(row.try_get("tier_id").map_err(backend)?),
        tier_name: row.try_get("tier_name").map_err(backend)?,
        price: money_from_db(row.try_get("price").map_err(backend)?)?,
        qr_code: row.try_get("qr_code").map_err(backend)?,
        status,
        checked_in_at: row.try_get("checked_in_at").map_err(backend)?,
        checked_in_by: checked_in_by.map(UserId::from_uuid),
        created_at: row.try_get("created_at").map_err(backend)?,
    })
}

fn row_to_tier(row: &PgRow) -> StoreResult<TicketTier> {
    Ok(TicketTier {
        id: TierId::from_uuid(row.try_get("tier_id").map_err(backend)?),
        name: row.try_get("name").map_err(backend)?,
        price: money_from_db(row.try_get("price").map_err(backend)?)?,
        quantity: count_from_db(row.try_get("quantity").map_err(backend)?)?,
        sold_count: count_from_db(row.try_get("sold_count").map_err(backend)?)?,
        max_per_user: count_from_db(row.try_get("max_per_user").map_err(backend)?)?,
        sale_start: row.try_get("sale_start").map_err(backend)?,
        sale_end: row.try_get("sale_end").map_err(backend)?,
    })
}

fn row_to_event(row: &PgRow, tiers: Vec<TicketTier>) -> StoreResult<Event> {
    let status_raw: String = row.try_get("status").map_err(backend)?;
    let status = EventStatus::parse(&status_raw)
        .ok_or_else(|| StoreError::Backend(format!("unknown event status {status_raw}")))?;
    let validators: Vec<Uuid> = row.try_get("validators").map_err(backend)?;
    Ok(Event {
        id: EventId::from_uuid(row.try_get("id").map_err(backend)?),
        organizer_id: OrganizerId::from_uuid(row.try_get("organizer_id").map_err(backend)?),
        status,
        event_date: row.try_get("event_date").map_err(backend)?,
        tiers,
        total_tickets_sold: count_from_db(row.try_get("total_tickets_sold").map_err(backend)?)?,
        total_revenue: money_from_db(row.try_get("total_revenue").map_err(backend)?)?,
        validators: validators.into_iter().map(UserId::from_uuid).collect(),
        deleted_at: row.try_get("deleted_at").map_err(backend)?,
    })
}

// ── StoreTx ─────────────────────────────────────────────────────────

#[async_trait]
impl StoreTx for PgTx {
    async fn find_transaction_by_idempotency_key(
        &mut self,
        key: &str,
    ) -> StoreResult<Option<Transaction>> {
        let sql =
            format!("SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE idempotency_key = $1");
        let row = sqlx::query(&sql)
            .bind(key)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(backend)?;
        row.as_ref().map(row_to_transaction).transpose()
    }

    async fn transaction_for_update(
        &mut self,
        id: TransactionId,
    ) -> StoreResult<Option<Transaction>> {
        let sql =
            format!("SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE id = $1 FOR UPDATE");
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(backend)?;
        row.as_ref().map(row_to_transaction).transpose()
    }

    async fn insert_transaction(&mut self, transaction: &Transaction) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO transactions \
                 (id, idempotency_key, status, user_id, order_id, event_id, amount, currency, \
                  gateway, splits, retry_count, max_retries, last_retry_at, next_retry_at, \
                  failure, refunds, total_refunded, initiated_at, processing_at, completed_at, \
                  failed_at, metadata) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, \
                     $17, $18, $19, $20, $21, $22)",
        )
        .bind(transaction.id.as_uuid())
        .bind(&transaction.idempotency_key)
        .bind(transaction.status.as_str())
        .bind(transaction.user_id.as_uuid())
        .bind(transaction.order_id.as_uuid())
        .bind(transaction.event_id.as_uuid())
        .bind(money_to_db(transaction.amount)?)
        .bind(&transaction.currency)
        .bind(Json(&transaction.gateway))
        .bind(transaction.splits.as_ref().map(Json))
        .bind(count_to_db(transaction.retry_count))
        .bind(count_to_db(transaction.max_retries))
        .bind(transaction.last_retry_at)
        .bind(transaction.next_retry_at)
        .bind(transaction.failure.as_ref().map(Json))
        .bind(Json(&transaction.refunds))
        .bind(money_to_db(transaction.total_refunded)?)
        .bind(transaction.initiated_at)
        .bind(transaction.processing_at)
        .bind(transaction.completed_at)
        .bind(transaction.failed_at)
        .bind(Json(&transaction.metadata))
        .execute(&mut *self.tx)
        .await
        .map(|_| ())
        .map_err(|e| unique_or_backend(e, UniqueIndex::IdempotencyKey))
    }

    async fn update_transaction(&mut self, transaction: &Transaction) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE transactions SET \
                 status = $2, gateway = $3, splits = $4, retry_count = $5, max_retries = $6, \
                 last_retry_at = $7, next_retry_at = $8, failure = $9, refunds = $10, \
                 total_refunded = $11, processing_at = $12, completed_at = $13, failed_at = $14 \
             WHERE id = $1",
        )
        .bind(transaction.id.as_uuid())
        .bind(transaction.status.as_str())
        .bind(Json(&transaction.gateway))
        .bind(transaction.splits.as_ref().map(Json))
        .bind(count_to_db(transaction.retry_count))
        .bind(count_to_db(transaction.max_retries))
        .bind(transaction.last_retry_at)
        .bind(transaction.next_retry_at)
        .bind(transaction.failure.as_ref().map(Json))
        .bind(Json(&transaction.refunds))
        .bind(money_to_db(transaction.total_refunded)?)
        .bind(transaction.processing_at)
        .bind(transaction.completed_at)
        .bind(transaction.failed_at)
        .execute(&mut *self.tx)
        .await
        .map_err(backend)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::Backend(format!(
                "update of unknown transaction {}",
                transaction.id
            )));
        }
        Ok(())
    }

    async fn order_for_update(&mut self, id: OrderId) -> StoreResult<Option<Order>> {
        let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1 FOR UPDATE");
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(backend)?;
        row.as_ref().map(row_to_order).transpose()
    }

    async fn insert_order(&mut self, order: &Order) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO orders \
                 (id, user_id, event_id, tier_id, tier_name, quantity, unit_price, \
                  total_amount, payment_status, tickets, splits, gateway_reference, \
                  created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)",
        )
        .bind(order.id.as_uuid())
        .bind(order.user_id.as_uuid())
        .bind(order.event_id.as_uuid())
        .bind(order.tier_id.as_uuid())
        .bind(&order.tier_name)
        .bind(count_to_db(order.quantity))
        .bind(money_to_db(order.unit_price)?)
        .bind(money_to_db(order.total_amount)?)
        .bind(order.payment_status.as_str())
        .bind(
            order
                .tickets
                .iter()
                .map(|t| *t.as_uuid())
                .collect::<Vec<Uuid>>(),
        )
        .bind(order.splits.as_ref().map(Json))
        .bind(&order.gateway_reference)
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&mut *self.tx)
        .await
        .map(|_| ())
        .map_err(backend)
    }

    async fn update_order(&mut self, order: &Order) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE orders SET \
                 payment_status = $2, tickets = $3, splits = $4, gateway_reference = $5, \
                 updated_at = $6 \
             WHERE id = $1",
        )
        .bind(order.id.as_uuid())
        .bind(order.payment_status.as_str())
        .bind(
            order
                .tickets
                .iter()
                .map(|t| *t.as_uuid())
                .collect::<Vec<Uuid>>(),
        )
        .bind(order.splits.as_ref().map(Json))
        .bind(&order.gateway_reference)
        .bind(order.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(backend)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::Backend(format!(
                "update of unknown order {}",
                order.id
            )));
        }
        Ok(())
    }

    async fn event(&mut self, id: EventId) -> StoreResult<Option<Event>> {
        let row = sqlx::query(
            "SELECT id, organizer_id, status, event_date, total_tickets_sold, total_revenue, \
                    validators, deleted_at \
             FROM events WHERE id = $1",
        )
        .bind(id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(backend)?;
        let Some(event_row) = row else {
            return Ok(None);
        };
        let tier_rows = sqlx::query(
            "SELECT tier_id, name, price, quantity, sold_count, max_per_user, sale_start, \
                    sale_end \
             FROM ticket_tiers WHERE event_id = $1 ORDER BY position",
        )
        .bind(id.as_uuid())
        .fetch_all(&mut *self.tx)
        .await
        .map_err(backend)?;
        let tiers = tier_rows
            .iter()
            .map(row_to_tier)
            .collect::<StoreResult<Vec<_>>>()?;
        row_to_event(&event_row, tiers).map(Some)
    }

    async fn event_for_update(&mut self, id: EventId) -> StoreResult<Option<Event>> {
        let row = sqlx::query(
            "SELECT id, organizer_id, status, event_date, total_tickets_sold, total_revenue, \
                    validators, deleted_at \
             FROM events WHERE id = $1 FOR UPDATE",
        )
        .bind(id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(backend)?;
        let Some(event_row) = row else {
            return Ok(None);
        };
        let tier_rows = sqlx::query(
            "SELECT tier_id, name, price, quantity, sold_count, max_per_user, sale_start, \
                    sale_end \
             FROM ticket_tiers WHERE event_id = $1 ORDER BY position",
        )
        .bind(id.as_uuid())
        .fetch_all(&mut *self.tx)
        .await
        .map_err(backend)?;
        let tiers = tier_rows
            .iter()
            .map(row_to_tier)
            .collect::<StoreResult<Vec<_>>>()?;
        row_to_event(&event_row, tiers).map(Some)
    }

    async fn apply_tier_sale(
        &mut self,
        event_id: EventId,
        tier_id: TierId,
        expected_sold_count: u32,
        quantity: u32,
        revenue: Money,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE ticket_tiers SET sold_count = sold_count + $1 \
             WHERE event_id = $2 AND tier_id = $3 AND sold_count = $4",
        )
        .bind(count_to_db(quantity))
        .bind(event_id.as_uuid())
        .bind(tier_id.as_uuid())
        .bind(count_to_db(expected_sold_count))
        .execute(&mut *self.tx)
        .await
        .map_err(backend)?;
        if result.rows_affected() == 0 {
            return Ok(false);
        }
        sqlx::query(
            "UPDATE events SET total_tickets_sold = total_tickets_sold + $1, \
                               total_revenue = total_revenue + $2 \
             WHERE id = $3",
        )
        .bind(count_to_db(quantity))
        .bind(money_to_db(revenue)?)
        .bind(event_id.as_uuid())
        .execute(&mut *self.tx)
        .await
        .map_err(backend)?;
        Ok(true)
    }

    async fn insert_ticket(&mut self, ticket: &Ticket) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO tickets \
                 (id, order_id, event_id, user_id, tier_id, tier_name, price, qr_code, \
                  status, checked_in_at, checked_in_by, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
        )
        .bind(ticket.id.as_uuid())
        .bind(ticket.order_id.as_uuid())
        .bind(ticket.event_id.as_uuid())
        .bind(ticket.user_id.as_uuid())
        .bind(ticket.tier_id.as_uuid())
        .bind(&ticket.tier_name)
        .bind(money_to_db(ticket.price)?)
        .bind(&ticket.qr_code)
        .bind(ticket.status.as_str())
        .bind(ticket.checked_in_at)
        .bind(ticket.checked_in_by.map(|u| *u.as_uuid()))
        .bind(ticket.created_at)
        .execute(&mut *self.tx)
        .await
        .map(|_| ())
        .map_err(|e| unique_or_backend(e, UniqueIndex::QrCode))
    }

    async fn tickets_for_order(&mut self, order_id: OrderId) -> StoreResult<Vec<Ticket>> {
        let sql = format!(
            "SELECT {TICKET_COLUMNS} FROM tickets WHERE order_id = $1 ORDER BY created_at"
        );
        let rows = sqlx::query(&sql)
            .bind(order_id.as_uuid())
            .fetch_all(&mut *self.tx)
            .await
            .map_err(backend)?;
        rows.iter().map(row_to_ticket).collect()
    }

    async fn count_user_tier_tickets(
        &mut self,
        event_id: EventId,
        tier_id: TierId,
        user_id: UserId,
    ) -> StoreResult<u32> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM tickets \
             WHERE event_id = $1 AND tier_id = $2 AND user_id = $3 AND status <> 'cancelled'",
        )
        .bind(event_id.as_uuid())
        .bind(tier_id.as_uuid())
        .bind(user_id.as_uuid())
        .fetch_one(&mut *self.tx)
        .await
        .map_err(backend)?;
        let n: i64 = row.try_get("n").map_err(backend)?;
        Ok(u32::try_from(n).unwrap_or(u32::MAX))
    }

    async fn cancel_order_tickets(&mut self, order_id: OrderId) -> StoreResult<u32> {
        let result = sqlx::query(
            "UPDATE tickets SET status = 'cancelled' \
             WHERE order_id = $1 AND status <> 'cancelled'",
        )
        .bind(order_id.as_uuid())
        .execute(&mut *self.tx)
        .await
        .map_err(backend)?;
        Ok(u32::try_from(result.rows_affected()).unwrap_or(u32::MAX))
    }

    async fn organizer(&mut self, id: OrganizerId) -> StoreResult<Option<Organizer>> {
        let row = sqlx::query(
            "SELECT id, subaccount_code, platform_fee_percent FROM organizers WHERE id = $1",
        )
        .bind(id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(backend)?;
        row.map(|row| {
            Ok(Organizer {
                id: OrganizerId::from_uuid(row.try_get("id").map_err(backend)?),
                subaccount_code: row.try_get("subaccount_code").map_err(backend)?,
                platform_fee_percent: count_from_db(
                    row.try_get("platform_fee_percent").map_err(backend)?,
                )?,
            })
        })
        .transpose()
    }

    async fn append_refund_outbox(&mut self, entry: &RefundOutboxEntry) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO refund_outbox (transaction_id, amount, reason, created_at) \
             VALUES ($1, $2, $3, $4)",
        )
        .bind(entry.transaction_id.as_uuid())
        .bind(money_to_db(entry.amount)?)
        .bind(&entry.reason)
        .bind(entry.created_at)
        .execute(&mut *self.tx)
        .await
        .map(|_| ())
        .map_err(backend)
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        self.tx.commit().await.map_err(backend)
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        self.tx.rollback().await.map_err(backend)
    }
}

// ── Store ───────────────────────────────────────────────────────────

#[async_trait]
impl Store for PgStore {
    async fn begin(&self) -> StoreResult<Box<dyn StoreTx>> {
        let tx = self.pool.begin().await.map_err(backend)?;
        Ok(Box::new(PgTx { tx }))
    }

    async fn transaction(&self, id: TransactionId) -> StoreResult<Option<Transaction>> {
        let sql = format!("SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        row.as_ref().map(row_to_transaction).transpose()
    }

    async fn transaction_by_reference(
        &self,
        reference: &str,
    ) -> StoreResult<Option<Transaction>> {
        let sql = format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions \
             WHERE gateway ->> 'reference' = $1 \
             ORDER BY initiated_at DESC LIMIT 1"
        );
        let row = sqlx::query(&sql)
            .bind(reference)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        row.as_ref().map(row_to_transaction).transpose()
    }

    async fn transactions_for_user(
        &self,
        user_id: UserId,
        limit: u32,
    ) -> StoreResult<Vec<Transaction>> {
        let sql = format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions \
             WHERE user_id = $1 ORDER BY initiated_at DESC LIMIT $2"
        );
        let rows = sqlx::query(&sql)
            .bind(user_id.as_uuid())
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;
        rows.iter().map(row_to_transaction).collect()
    }

    async fn order(&self, id: OrderId) -> StoreResult<Option<Order>> {
        let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        row.as_ref().map(row_to_order).transpose()
    }

    async fn event(&self, id: EventId) -> StoreResult<Option<Event>> {
        let row = sqlx::query(
            "SELECT id, organizer_id, status, event_date, total_tickets_sold, total_revenue, \
                    validators, deleted_at \
             FROM events WHERE id = $1",
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;
        let Some(event_row) = row else {
            return Ok(None);
        };
        let tier_rows = sqlx::query(
            "SELECT tier_id, name, price, quantity, sold_count, max_per_user, sale_start, \
                    sale_end \
             FROM ticket_tiers WHERE event_id = $1 ORDER BY position",
        )
        .bind(id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        let tiers = tier_rows
            .iter()
            .map(row_to_tier)
            .collect::<StoreResult<Vec<_>>>()?;
        row_to_event(&event_row, tiers).map(Some)
    }

    async fn ticket_by_qr(&self, qr_code: &str) -> StoreResult<Option<Ticket>> {
        let sql = format!("SELECT {TICKET_COLUMNS} FROM tickets WHERE qr_code = $1");
        let row = sqlx::query(&sql)
            .bind(qr_code)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        row.as_ref().map(row_to_ticket).transpose()
    }

    async fn tickets_for_order(&self, order_id: OrderId) -> StoreResult<Vec<Ticket>> {
        let sql = format!(
            "SELECT {TICKET_COLUMNS} FROM tickets WHERE order_id = $1 ORDER BY created_at"
        );
        let rows = sqlx::query(&sql)
            .bind(order_id.as_uuid())
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;
        rows.iter().map(row_to_ticket).collect()
    }

    async fn validator_assignments(&self, user_id: UserId) -> StoreResult<Vec<EventId>> {
        let rows = sqlx::query("SELECT id FROM events WHERE $1 = ANY(validators)")
            .bind(user_id.as_uuid())
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;
        rows.iter()
            .map(|row| {
                row.try_get("id")
                    .map(EventId::from_uuid)
                    .map_err(backend)
            })
            .collect()
    }

    async fn refund_outbox(&self) -> StoreResult<Vec<RefundOutboxEntry>> {
        let rows = sqlx::query(
            "SELECT transaction_id, amount, reason, created_at FROM refund_outbox ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        rows.iter()
            .map(|row| {
                Ok(RefundOutboxEntry {
                    transaction_id: TransactionId::from_uuid(
                        row.try_get("transaction_id").map_err(backend)?,
                    ),
                    amount: money_from_db(row.try_get("amount").map_err(backend)?)?,
                    reason: row.try_get("reason").map_err(backend)?,
                    created_at: row.try_get("created_at").map_err(backend)?,
                })
            })
            .collect()
    }

    async fn checkin_ticket(
        &self,
        id: TicketId,
        at: DateTime<Utc>,
        by: UserId,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE tickets SET status = 'used', checked_in_at = $2, checked_in_by = $3 \
             WHERE id = $1 AND status = 'valid'",
        )
        .bind(id.as_uuid())
        .bind(at)
        .bind(by.as_uuid())
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(result.rows_affected() == 1)
    }

    async fn due_retries(
        &self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> StoreResult<Vec<TransactionId>> {
        let rows = sqlx::query(
            "SELECT id FROM transactions \
             WHERE status = 'failed' AND next_retry_at <= $1 AND retry_count < max_retries \
             ORDER BY next_retry_at ASC LIMIT $2",
        )
        .bind(now)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        rows.iter()
            .map(|row| {
                row.try_get("id")
                    .map(TransactionId::from_uuid)
                    .map_err(backend)
            })
            .collect()
    }

    async fn put_event(&self, event: &Event) -> StoreResult<()> {
        let mut tx = self.pool.begin().await.map_err(backend)?;
        sqlx::query(
            "INSERT INTO events \
                 (id, organizer_id, status, event_date, total_tickets_sold, total_revenue, \
                  validators, deleted_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             ON CONFLICT (id) DO UPDATE SET \
                 status = EXCLUDED.status, event_date = EXCLUDED.event_date, \
                 total_tickets_sold = EXCLUDED.total_tickets_sold, \
                 total_revenue = EXCLUDED.total_revenue, validators = EXCLUDED.validators, \
                 deleted_at = EXCLUDED.deleted_at",
        )
        .bind(event.id.as_uuid())
        .bind(event.organizer_id.as_uuid())
        .bind(event.status.as_str())
        .bind(event.event_date)
        .bind(count_to_db(event.total_tickets_sold))
        .bind(money_to_db(event.total_revenue)?)
        .bind(
            event
                .validators
                .iter()
                .map(|v| *v.as_uuid())
                .collect::<Vec<Uuid>>(),
        )
        .bind(event.deleted_at)
        .execute(&mut *tx)
        .await
        .map_err(backend)?;
        for (position, tier) in event.tiers.iter().enumerate() {
            sqlx::query(
                "INSERT INTO ticket_tiers \
                     (event_id, tier_id, name, price, quantity, sold_count, max_per_user, \
                      sale_start, sale_end, position) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
                 ON CONFLICT (event_id, tier_id) DO UPDATE SET \
                     name = EXCLUDED.name, price = EXCLUDED.price, \
                     quantity = EXCLUDED.quantity, sold_count = EXCLUDED.sold_count, \
                     max_per_user = EXCLUDED.max_per_user, sale_start = EXCLUDED.sale_start, \
                     sale_end = EXCLUDED.sale_end, position = EXCLUDED.position",
            )
            .bind(event.id.as_uuid())
            .bind(tier.id.as_uuid())
            .bind(&tier.name)
            .bind(money_to_db(tier.price)?)
            .bind(count_to_db(tier.quantity))
            .bind(count_to_db(tier.sold_count))
            .bind(count_to_db(tier.max_per_user))
            .bind(tier.sale_start)
            .bind(tier.sale_end)
            .bind(count_to_db(u32::try_from(position).unwrap_or(u32::MAX)))
            .execute(&mut *tx)
            .await
            .map_err(backend)?;
        }
        tx.commit().await.map_err(backend)
    }

    async fn put_organizer(&self, organizer: &Organizer) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO organizers (id, subaccount_code, platform_fee_percent) \
             VALUES ($1, $2, $3) \
             ON CONFLICT (id) DO UPDATE SET \
                 subaccount_code = EXCLUDED.subaccount_code, \
                 platform_fee_percent = EXCLUDED.platform_fee_percent",
        )
        .bind(organizer.id.as_uuid())
        .bind(&organizer.subaccount_code)
        .bind(count_to_db(organizer.platform_fee_percent))
        .execute(&self.pool)
        .await
        .map(|_| ())
        .map_err(backend)
    }
}
