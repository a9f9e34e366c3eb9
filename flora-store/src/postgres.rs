use std::time::Duration;

use async_trait::async_trait;
use flora_booking::{
    Admission, Booking, BookingRepository, BookingStatus, SeatAvailability, Session,
    SessionRepository,
};
use flora_catalog::{
    ConditionalUpdate, LineDelete, LineDemand, LineWrite, Shortfall, StockCommit, StockLine,
    StockPatch, StockRepository,
};
use flora_core::{Page, PageRequest, StoreError};
use flora_order::{Order, OrderLine, OrderRepository, OrderStatus, Totals};
use flora_payment::{Payment, PaymentRepository, PaymentStatus, ReconciliationIssue};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use uuid::Uuid;

/// Postgres-backed store. Conditional mutations are expressed as single
/// guarded statements (`UPDATE ... WHERE qty >= $n RETURNING`) or short
/// row-locked transactions, so the precondition is evaluated by the engine
/// in the same step as the write.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(url: &str) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(3))
            .connect(url)
            .await?;

        Ok(Self { pool })
    }

    pub fn with_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        tracing::info!("Running database migrations...");
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        tracing::info!("Migrations completed successfully.");
        Ok(())
    }
}

fn db_err(e: sqlx::Error) -> StoreError {
    StoreError::Unavailable(e.to_string())
}

fn corrupt(what: &str) -> StoreError {
    StoreError::Corrupt(what.to_string())
}

const STOCK_COLUMNS: &str = "id, product_id, variant_code, qty, reorder_level, updated_at";

fn stock_from_row(row: &sqlx::postgres::PgRow) -> Result<StockLine, StoreError> {
    Ok(StockLine {
        id: row.try_get("id").map_err(db_err)?,
        product_id: row.try_get("product_id").map_err(db_err)?,
        variant_code: row.try_get("variant_code").map_err(db_err)?,
        qty: row.try_get("qty").map_err(db_err)?,
        reorder_level: row.try_get("reorder_level").map_err(db_err)?,
        updated_at: row.try_get("updated_at").map_err(db_err)?,
    })
}

const SESSION_COLUMNS: &str =
    "id, title, capacity_max, seat_price, currency, starts_at, created_at";

fn session_from_row(row: &sqlx::postgres::PgRow) -> Result<Session, StoreError> {
    Ok(Session {
        id: row.try_get("id").map_err(db_err)?,
        title: row.try_get("title").map_err(db_err)?,
        capacity_max: row.try_get("capacity_max").map_err(db_err)?,
        seat_price: row.try_get("seat_price").map_err(db_err)?,
        currency: row.try_get("currency").map_err(db_err)?,
        starts_at: row.try_get("starts_at").map_err(db_err)?,
        created_at: row.try_get("created_at").map_err(db_err)?,
    })
}

const BOOKING_COLUMNS: &str =
    "id, user_id, session_id, qty, status, total_amount, currency, notes, created_at, updated_at";

fn booking_from_row(row: &sqlx::postgres::PgRow) -> Result<Booking, StoreError> {
    let status: String = row.try_get("status").map_err(db_err)?;
    Ok(Booking {
        id: row.try_get("id").map_err(db_err)?,
        user_id: row.try_get("user_id").map_err(db_err)?,
        session_id: row.try_get("session_id").map_err(db_err)?,
        qty: row.try_get("qty").map_err(db_err)?,
        status: BookingStatus::parse(&status).ok_or_else(|| corrupt("booking status"))?,
        total_amount: row.try_get("total_amount").map_err(db_err)?,
        currency: row.try_get("currency").map_err(db_err)?,
        notes: row.try_get("notes").map_err(db_err)?,
        created_at: row.try_get("created_at").map_err(db_err)?,
        updated_at: row.try_get("updated_at").map_err(db_err)?,
    })
}

const ORDER_COLUMNS: &str = "id, user_id, status, currency, subtotal, tax, total, shipping, \
     shipping_address, billing_address, delivery_requested_at, card_message, created_at, updated_at";

fn order_from_row(row: &sqlx::postgres::PgRow, lines: Vec<OrderLine>) -> Result<Order, StoreError> {
    let status: String = row.try_get("status").map_err(db_err)?;
    let shipping_address: Option<serde_json::Value> =
        row.try_get("shipping_address").map_err(db_err)?;
    let billing_address: Option<serde_json::Value> =
        row.try_get("billing_address").map_err(db_err)?;

    Ok(Order {
        id: row.try_get("id").map_err(db_err)?,
        user_id: row.try_get("user_id").map_err(db_err)?,
        status: OrderStatus::parse(&status).ok_or_else(|| corrupt("order status"))?,
        currency: row.try_get("currency").map_err(db_err)?,
        totals: Totals {
            subtotal: row.try_get("subtotal").map_err(db_err)?,
            tax: row.try_get("tax").map_err(db_err)?,
            total: row.try_get("total").map_err(db_err)?,
            shipping: row.try_get("shipping").map_err(db_err)?,
        },
        lines,
        shipping_address: shipping_address
            .map(serde_json::from_value)
            .transpose()
            .map_err(|_| corrupt("shipping address snapshot"))?,
        billing_address: billing_address
            .map(serde_json::from_value)
            .transpose()
            .map_err(|_| corrupt("billing address snapshot"))?,
        delivery_requested_at: row.try_get("delivery_requested_at").map_err(db_err)?,
        card_message: row.try_get("card_message").map_err(db_err)?,
        created_at: row.try_get("created_at").map_err(db_err)?,
        updated_at: row.try_get("updated_at").map_err(db_err)?,
    })
}

fn order_line_from_row(row: &sqlx::postgres::PgRow) -> Result<OrderLine, StoreError> {
    Ok(OrderLine {
        product_id: row.try_get("product_id").map_err(db_err)?,
        variant_code: row.try_get("variant_code").map_err(db_err)?,
        name: row.try_get("name").map_err(db_err)?,
        qty: row.try_get("qty").map_err(db_err)?,
        unit_price: row.try_get("unit_price").map_err(db_err)?,
        discount: row.try_get("discount").map_err(db_err)?,
    })
}

const PAYMENT_COLUMNS: &str =
    "id, order_id, provider, status, amount, currency, tx_ref, created_at, updated_at";

fn payment_from_row(row: &sqlx::postgres::PgRow) -> Result<Payment, StoreError> {
    let status: String = row.try_get("status").map_err(db_err)?;
    Ok(Payment {
        id: row.try_get("id").map_err(db_err)?,
        order_id: row.try_get("order_id").map_err(db_err)?,
        provider: row.try_get("provider").map_err(db_err)?,
        status: PaymentStatus::parse(&status).ok_or_else(|| corrupt("payment status"))?,
        amount: row.try_get("amount").map_err(db_err)?,
        currency: row.try_get("currency").map_err(db_err)?,
        tx_ref: row.try_get("tx_ref").map_err(db_err)?,
        created_at: row.try_get("created_at").map_err(db_err)?,
        updated_at: row.try_get("updated_at").map_err(db_err)?,
    })
}

fn issue_from_row(row: &sqlx::postgres::PgRow) -> Result<ReconciliationIssue, StoreError> {
    Ok(ReconciliationIssue {
        id: row.try_get("id").map_err(db_err)?,
        payment_id: row.try_get("payment_id").map_err(db_err)?,
        order_id: row.try_get("order_id").map_err(db_err)?,
        detail: row.try_get("detail").map_err(db_err)?,
        resolved: row.try_get("resolved").map_err(db_err)?,
        created_at: row.try_get("created_at").map_err(db_err)?,
    })
}

#[async_trait]
impl StockRepository for PgStore {
    async fn insert_line(&self, line: StockLine) -> Result<LineWrite, StoreError> {
        let query = format!(
            "INSERT INTO stock_lines (id, product_id, variant_code, qty, reorder_level, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             ON CONFLICT (product_id, variant_code) DO NOTHING \
             RETURNING {STOCK_COLUMNS}"
        );
        let row = sqlx::query(&query)
            .bind(line.id)
            .bind(line.product_id)
            .bind(&line.variant_code)
            .bind(line.qty)
            .bind(line.reorder_level)
            .bind(line.updated_at)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

        match row {
            Some(row) => Ok(LineWrite::Written(stock_from_row(&row)?)),
            None => Ok(LineWrite::Duplicate),
        }
    }

    async fn update_line(&self, line_id: Uuid, patch: StockPatch) -> Result<LineWrite, StoreError> {
        let query = format!(
            "UPDATE stock_lines \
             SET variant_code = COALESCE($2, variant_code), \
                 reorder_level = COALESCE($3, reorder_level), \
                 updated_at = NOW() \
             WHERE id = $1 AND NOT EXISTS ( \
                 SELECT 1 FROM stock_lines other \
                 WHERE other.product_id = stock_lines.product_id \
                   AND other.variant_code = $2 AND other.id <> $1 \
             ) \
             RETURNING {STOCK_COLUMNS}"
        );
        let row = sqlx::query(&query)
            .bind(line_id)
            .bind(patch.variant_code.as_deref())
            .bind(patch.reorder_level)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

        if let Some(row) = row {
            return Ok(LineWrite::Written(stock_from_row(&row)?));
        }

        let exists: Option<i32> = sqlx::query_scalar("SELECT 1 FROM stock_lines WHERE id = $1")
            .bind(line_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(if exists.is_some() {
            LineWrite::Duplicate
        } else {
            LineWrite::NotFound
        })
    }

    async fn delete_line(&self, line_id: Uuid) -> Result<LineDelete, StoreError> {
        let result = sqlx::query(
            "DELETE FROM stock_lines \
             WHERE id = $1 AND NOT EXISTS ( \
                 SELECT 1 FROM order_lines ol \
                 JOIN orders o ON o.id = ol.order_id \
                 WHERE o.status NOT IN ('delivered', 'cancelled') \
                   AND ol.product_id = stock_lines.product_id \
                   AND COALESCE(NULLIF(TRIM(ol.variant_code), ''), 'BASE') = stock_lines.variant_code \
             )",
        )
        .bind(line_id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if result.rows_affected() > 0 {
            return Ok(LineDelete::Deleted);
        }

        let exists: Option<i32> = sqlx::query_scalar("SELECT 1 FROM stock_lines WHERE id = $1")
            .bind(line_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(if exists.is_some() {
            LineDelete::InUse
        } else {
            LineDelete::NotFound
        })
    }

    async fn get_line(&self, line_id: Uuid) -> Result<Option<StockLine>, StoreError> {
        let query = format!("SELECT {STOCK_COLUMNS} FROM stock_lines WHERE id = $1");
        let row = sqlx::query(&query)
            .bind(line_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(stock_from_row).transpose()
    }

    async fn lines_for_product(&self, product_id: Uuid) -> Result<Vec<StockLine>, StoreError> {
        let query = format!(
            "SELECT {STOCK_COLUMNS} FROM stock_lines WHERE product_id = $1 ORDER BY variant_code"
        );
        let rows = sqlx::query(&query)
            .bind(product_id)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.iter().map(stock_from_row).collect()
    }

    async fn decrement(
        &self,
        product_id: Uuid,
        variant_code: &str,
        qty: i32,
    ) -> Result<ConditionalUpdate, StoreError> {
        let query = format!(
            "UPDATE stock_lines SET qty = qty - $3, updated_at = NOW() \
             WHERE product_id = $1 AND variant_code = $2 AND qty >= $3 \
             RETURNING {STOCK_COLUMNS}"
        );
        let row = sqlx::query(&query)
            .bind(product_id)
            .bind(variant_code)
            .bind(qty)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

        if let Some(row) = row {
            return Ok(ConditionalUpdate::Updated(stock_from_row(&row)?));
        }

        let available: Option<i32> = sqlx::query_scalar(
            "SELECT qty FROM stock_lines WHERE product_id = $1 AND variant_code = $2",
        )
        .bind(product_id)
        .bind(variant_code)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(match available {
            Some(available) => ConditionalUpdate::Insufficient { available },
            None => ConditionalUpdate::NotFound,
        })
    }

    async fn adjust(
        &self,
        line_id: Uuid,
        delta: i32,
        forbid_negative: bool,
    ) -> Result<ConditionalUpdate, StoreError> {
        // Only a negative delta is guarded; receiving stock always lands.
        let query = format!(
            "UPDATE stock_lines SET qty = qty + $2, updated_at = NOW() \
             WHERE id = $1 AND NOT ($3 AND $2 < 0 AND qty < -$2) \
             RETURNING {STOCK_COLUMNS}"
        );
        let row = sqlx::query(&query)
            .bind(line_id)
            .bind(delta)
            .bind(forbid_negative)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

        if let Some(row) = row {
            return Ok(ConditionalUpdate::Updated(stock_from_row(&row)?));
        }

        let available: Option<i32> = sqlx::query_scalar("SELECT qty FROM stock_lines WHERE id = $1")
            .bind(line_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

        Ok(match available {
            Some(available) => ConditionalUpdate::Insufficient { available },
            None => ConditionalUpdate::NotFound,
        })
    }

    async fn decrement_all(&self, demands: &[LineDemand]) -> Result<StockCommit, StoreError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let mut failed: Vec<&LineDemand> = Vec::new();
        for demand in demands {
            let result = sqlx::query(
                "UPDATE stock_lines SET qty = qty - $3, updated_at = NOW() \
                 WHERE product_id = $1 AND variant_code = $2 AND qty >= $3",
            )
            .bind(demand.product_id)
            .bind(&demand.variant_code)
            .bind(demand.qty)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

            if result.rows_affected() == 0 {
                failed.push(demand);
            }
        }

        if failed.is_empty() {
            tx.commit().await.map_err(db_err)?;
            return Ok(StockCommit::Committed);
        }

        tx.rollback().await.map_err(db_err)?;

        let mut shortfalls = Vec::with_capacity(failed.len());
        for demand in failed {
            let available: Option<i32> = sqlx::query_scalar(
                "SELECT qty FROM stock_lines WHERE product_id = $1 AND variant_code = $2",
            )
            .bind(demand.product_id)
            .bind(&demand.variant_code)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

            shortfalls.push(Shortfall {
                product_id: demand.product_id,
                variant_code: demand.variant_code.clone(),
                requested: demand.qty,
                available: available.unwrap_or(0),
            });
        }
        Ok(StockCommit::Short(shortfalls))
    }
}

#[async_trait]
impl SessionRepository for PgStore {
    async fn insert_session(&self, session: Session) -> Result<Session, StoreError> {
        sqlx::query(
            "INSERT INTO sessions (id, title, capacity_max, seat_price, currency, starts_at, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(session.id)
        .bind(&session.title)
        .bind(session.capacity_max)
        .bind(session.seat_price)
        .bind(&session.currency)
        .bind(session.starts_at)
        .bind(session.created_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(session)
    }

    async fn set_capacity(
        &self,
        session_id: Uuid,
        capacity_max: i32,
    ) -> Result<Option<Session>, StoreError> {
        let query = format!(
            "UPDATE sessions SET capacity_max = $2 WHERE id = $1 RETURNING {SESSION_COLUMNS}"
        );
        let row = sqlx::query(&query)
            .bind(session_id)
            .bind(capacity_max)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(session_from_row).transpose()
    }

    async fn get_session(&self, session_id: Uuid) -> Result<Option<Session>, StoreError> {
        let query = format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = $1");
        let row = sqlx::query(&query)
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(session_from_row).transpose()
    }

    async fn list_sessions(&self, page: PageRequest) -> Result<Page<Session>, StoreError> {
        let page = page.clamped();
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sessions")
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;

        let query = format!(
            "SELECT {SESSION_COLUMNS} FROM sessions ORDER BY starts_at, id LIMIT $1 OFFSET $2"
        );
        let rows = sqlx::query(&query)
            .bind(page.limit as i64)
            .bind(page.offset() as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;

        let sessions: Result<Vec<Session>, StoreError> =
            rows.iter().map(session_from_row).collect();
        Ok(Page::new(sessions?, page, total as u64))
    }
}

#[async_trait]
impl BookingRepository for PgStore {
    async fn admit(&self, booking: Booking) -> Result<Admission, StoreError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        // Row-lock the session so concurrent admissions for it serialize.
        let capacity: Option<i32> =
            sqlx::query_scalar("SELECT capacity_max FROM sessions WHERE id = $1 FOR UPDATE")
                .bind(booking.session_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(db_err)?;

        let Some(capacity_max) = capacity else {
            return Ok(Admission::SessionNotFound);
        };

        let taken: i64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(qty), 0) FROM bookings \
             WHERE session_id = $1 AND status IN ('pending', 'confirmed')",
        )
        .bind(booking.session_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_err)?;

        let remaining = capacity_max - taken as i32;
        if remaining < booking.qty {
            return Ok(Admission::InsufficientSeats { remaining });
        }

        sqlx::query(
            "INSERT INTO bookings (id, user_id, session_id, qty, status, total_amount, currency, notes, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(booking.id)
        .bind(booking.user_id)
        .bind(booking.session_id)
        .bind(booking.qty)
        .bind(booking.status.as_str())
        .bind(booking.total_amount)
        .bind(&booking.currency)
        .bind(&booking.notes)
        .bind(booking.created_at)
        .bind(booking.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;
        Ok(Admission::Created(booking))
    }

    async fn seats_taken(
        &self,
        session_id: Uuid,
    ) -> Result<Option<SeatAvailability>, StoreError> {
        let capacity: Option<i32> =
            sqlx::query_scalar("SELECT capacity_max FROM sessions WHERE id = $1")
                .bind(session_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(db_err)?;

        let Some(capacity_max) = capacity else {
            return Ok(None);
        };

        let taken: i64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(qty), 0) FROM bookings \
             WHERE session_id = $1 AND status IN ('pending', 'confirmed')",
        )
        .bind(session_id)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;

        let taken = taken as i32;
        Ok(Some(SeatAvailability {
            session_id,
            capacity_max,
            taken,
            remaining: (capacity_max - taken).max(0),
        }))
    }

    async fn get_booking(&self, booking_id: Uuid) -> Result<Option<Booking>, StoreError> {
        let query = format!("SELECT {BOOKING_COLUMNS} FROM bookings WHERE id = $1");
        let row = sqlx::query(&query)
            .bind(booking_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(booking_from_row).transpose()
    }

    async fn bookings_for_user(
        &self,
        user_id: Uuid,
        page: PageRequest,
    ) -> Result<Page<Booking>, StoreError> {
        let page = page.clamped();
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM bookings WHERE user_id = $1")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;

        let query = format!(
            "SELECT {BOOKING_COLUMNS} FROM bookings WHERE user_id = $1 \
             ORDER BY created_at DESC, id LIMIT $2 OFFSET $3"
        );
        let rows = sqlx::query(&query)
            .bind(user_id)
            .bind(page.limit as i64)
            .bind(page.offset() as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;

        let bookings: Result<Vec<Booking>, StoreError> =
            rows.iter().map(booking_from_row).collect();
        Ok(Page::new(bookings?, page, total as u64))
    }

    async fn list_bookings(
        &self,
        status: Option<BookingStatus>,
        page: PageRequest,
    ) -> Result<Page<Booking>, StoreError> {
        let page = page.clamped();
        let status = status.map(|s| s.as_str());

        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM bookings WHERE ($1::text IS NULL OR status = $1)",
        )
        .bind(status)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;

        let query = format!(
            "SELECT {BOOKING_COLUMNS} FROM bookings WHERE ($1::text IS NULL OR status = $1) \
             ORDER BY created_at DESC, id LIMIT $2 OFFSET $3"
        );
        let rows = sqlx::query(&query)
            .bind(status)
            .bind(page.limit as i64)
            .bind(page.offset() as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;

        let bookings: Result<Vec<Booking>, StoreError> =
            rows.iter().map(booking_from_row).collect();
        Ok(Page::new(bookings?, page, total as u64))
    }

    async fn bookings_for_session(&self, session_id: Uuid) -> Result<Vec<Booking>, StoreError> {
        let query = format!(
            "SELECT {BOOKING_COLUMNS} FROM bookings WHERE session_id = $1 ORDER BY created_at, id"
        );
        let rows = sqlx::query(&query)
            .bind(session_id)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.iter().map(booking_from_row).collect()
    }

    async fn set_status(
        &self,
        booking_id: Uuid,
        status: BookingStatus,
    ) -> Result<Option<Booking>, StoreError> {
        let query = format!(
            "UPDATE bookings SET status = $2, updated_at = NOW() WHERE id = $1 \
             RETURNING {BOOKING_COLUMNS}"
        );
        let row = sqlx::query(&query)
            .bind(booking_id)
            .bind(status.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(booking_from_row).transpose()
    }
}

impl PgStore {
    async fn lines_for_order(&self, order_id: Uuid) -> Result<Vec<OrderLine>, StoreError> {
        let rows = sqlx::query(
            "SELECT product_id, variant_code, name, qty, unit_price, discount \
             FROM order_lines WHERE order_id = $1 ORDER BY position",
        )
        .bind(order_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.iter().map(order_line_from_row).collect()
    }

    async fn hydrate_orders(
        &self,
        rows: Vec<sqlx::postgres::PgRow>,
    ) -> Result<Vec<Order>, StoreError> {
        let mut orders = Vec::with_capacity(rows.len());
        for row in &rows {
            let id: Uuid = row.try_get("id").map_err(db_err)?;
            let lines = self.lines_for_order(id).await?;
            orders.push(order_from_row(row, lines)?);
        }
        Ok(orders)
    }
}

#[async_trait]
impl OrderRepository for PgStore {
    async fn insert_order(&self, order: Order) -> Result<Order, StoreError> {
        let shipping_address = order
            .shipping_address
            .as_ref()
            .map(serde_json::to_value)
            .transpose()
            .map_err(|_| corrupt("shipping address snapshot"))?;
        let billing_address = order
            .billing_address
            .as_ref()
            .map(serde_json::to_value)
            .transpose()
            .map_err(|_| corrupt("billing address snapshot"))?;

        let mut tx = self.pool.begin().await.map_err(db_err)?;

        sqlx::query(
            "INSERT INTO orders (id, user_id, status, currency, subtotal, tax, total, shipping, \
             shipping_address, billing_address, delivery_requested_at, card_message, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)",
        )
        .bind(order.id)
        .bind(order.user_id)
        .bind(order.status.as_str())
        .bind(&order.currency)
        .bind(order.totals.subtotal)
        .bind(order.totals.tax)
        .bind(order.totals.total)
        .bind(order.totals.shipping)
        .bind(shipping_address)
        .bind(billing_address)
        .bind(order.delivery_requested_at)
        .bind(&order.card_message)
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        for (position, line) in order.lines.iter().enumerate() {
            sqlx::query(
                "INSERT INTO order_lines (id, order_id, position, product_id, variant_code, name, qty, unit_price, discount) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
            )
            .bind(Uuid::new_v4())
            .bind(order.id)
            .bind(position as i32)
            .bind(line.product_id)
            .bind(line.variant_code.as_deref())
            .bind(&line.name)
            .bind(line.qty)
            .bind(line.unit_price)
            .bind(line.discount)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        }

        tx.commit().await.map_err(db_err)?;
        Ok(order)
    }

    async fn get_order(&self, order_id: Uuid) -> Result<Option<Order>, StoreError> {
        let query = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1");
        let row = sqlx::query(&query)
            .bind(order_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

        match row {
            Some(row) => {
                let lines = self.lines_for_order(order_id).await?;
                Ok(Some(order_from_row(&row, lines)?))
            }
            None => Ok(None),
        }
    }

    async fn orders_for_user(
        &self,
        user_id: Uuid,
        page: PageRequest,
    ) -> Result<Page<Order>, StoreError> {
        let page = page.clamped();
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM orders WHERE user_id = $1")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;

        let query = format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE user_id = $1 \
             ORDER BY created_at DESC, id LIMIT $2 OFFSET $3"
        );
        let rows = sqlx::query(&query)
            .bind(user_id)
            .bind(page.limit as i64)
            .bind(page.offset() as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;

        Ok(Page::new(self.hydrate_orders(rows).await?, page, total as u64))
    }

    async fn list_orders(
        &self,
        status: Option<OrderStatus>,
        user_id: Option<Uuid>,
        page: PageRequest,
    ) -> Result<Page<Order>, StoreError> {
        let page = page.clamped();
        let status = status.map(|s| s.as_str());

        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM orders \
             WHERE ($1::text IS NULL OR status = $1) AND ($2::uuid IS NULL OR user_id = $2)",
        )
        .bind(status)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;

        let query = format!(
            "SELECT {ORDER_COLUMNS} FROM orders \
             WHERE ($1::text IS NULL OR status = $1) AND ($2::uuid IS NULL OR user_id = $2) \
             ORDER BY created_at DESC, id LIMIT $3 OFFSET $4"
        );
        let rows = sqlx::query(&query)
            .bind(status)
            .bind(user_id)
            .bind(page.limit as i64)
            .bind(page.offset() as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;

        Ok(Page::new(self.hydrate_orders(rows).await?, page, total as u64))
    }

    async fn set_status(
        &self,
        order_id: Uuid,
        status: OrderStatus,
    ) -> Result<Option<Order>, StoreError> {
        let query = format!(
            "UPDATE orders SET status = $2, updated_at = NOW() WHERE id = $1 \
             RETURNING {ORDER_COLUMNS}"
        );
        let row = sqlx::query(&query)
            .bind(order_id)
            .bind(status.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

        match row {
            Some(row) => {
                let lines = self.lines_for_order(order_id).await?;
                Ok(Some(order_from_row(&row, lines)?))
            }
            None => Ok(None),
        }
    }
}

#[async_trait]
impl PaymentRepository for PgStore {
    async fn upsert_pending(&self, payment: Payment) -> Result<Payment, StoreError> {
        let query = format!(
            "INSERT INTO payments (id, order_id, provider, status, amount, currency, tx_ref, created_at, updated_at) \
             VALUES ($1, $2, $3, 'pending', $4, $5, $6, $7, $8) \
             ON CONFLICT (provider, tx_ref) DO NOTHING \
             RETURNING {PAYMENT_COLUMNS}"
        );
        let row = sqlx::query(&query)
            .bind(payment.id)
            .bind(payment.order_id)
            .bind(&payment.provider)
            .bind(payment.amount)
            .bind(&payment.currency)
            .bind(payment.tx_ref.as_deref())
            .bind(payment.created_at)
            .bind(payment.updated_at)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

        if let Some(row) = row {
            return payment_from_row(&row);
        }

        // Already initiated for this reference; hand back the stored row.
        let tx_ref = payment.tx_ref.as_deref().unwrap_or_default();
        self.find_by_tx_ref(&payment.provider, tx_ref)
            .await?
            .ok_or_else(|| corrupt("payment row vanished between upsert and read"))
    }

    async fn find_by_tx_ref(
        &self,
        provider: &str,
        tx_ref: &str,
    ) -> Result<Option<Payment>, StoreError> {
        let query =
            format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE provider = $1 AND tx_ref = $2");
        let row = sqlx::query(&query)
            .bind(provider)
            .bind(tx_ref)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(payment_from_row).transpose()
    }

    async fn claim_success(
        &self,
        provider: &str,
        tx_ref: &str,
        template: Payment,
    ) -> Result<(Payment, bool), StoreError> {
        // The guarded upsert returns a row only for the call that actually
        // moved the payment to succeeded; replays fall through to the read.
        let query = format!(
            "INSERT INTO payments (id, order_id, provider, status, amount, currency, tx_ref, created_at, updated_at) \
             VALUES ($1, $2, $3, 'succeeded', $4, $5, $6, $7, $8) \
             ON CONFLICT (provider, tx_ref) DO UPDATE \
             SET status = 'succeeded', updated_at = NOW() \
             WHERE payments.status <> 'succeeded' \
             RETURNING {PAYMENT_COLUMNS}"
        );
        let row = sqlx::query(&query)
            .bind(template.id)
            .bind(template.order_id)
            .bind(provider)
            .bind(template.amount)
            .bind(&template.currency)
            .bind(tx_ref)
            .bind(template.created_at)
            .bind(template.updated_at)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

        if let Some(row) = row {
            return Ok((payment_from_row(&row)?, true));
        }

        let existing = self
            .find_by_tx_ref(provider, tx_ref)
            .await?
            .ok_or_else(|| corrupt("payment row vanished between claim and read"))?;
        Ok((existing, false))
    }

    async fn mark_failed(
        &self,
        provider: &str,
        tx_ref: &str,
        template: Payment,
    ) -> Result<Payment, StoreError> {
        let query = format!(
            "INSERT INTO payments (id, order_id, provider, status, amount, currency, tx_ref, created_at, updated_at) \
             VALUES ($1, $2, $3, 'failed', $4, $5, $6, $7, $8) \
             ON CONFLICT (provider, tx_ref) DO UPDATE \
             SET status = 'failed', updated_at = NOW() \
             WHERE payments.status <> 'succeeded' \
             RETURNING {PAYMENT_COLUMNS}"
        );
        let row = sqlx::query(&query)
            .bind(template.id)
            .bind(template.order_id)
            .bind(provider)
            .bind(template.amount)
            .bind(&template.currency)
            .bind(tx_ref)
            .bind(template.created_at)
            .bind(template.updated_at)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

        if let Some(row) = row {
            return payment_from_row(&row);
        }

        self.find_by_tx_ref(provider, tx_ref)
            .await?
            .ok_or_else(|| corrupt("payment row vanished between write and read"))
    }

    async fn payments_for_order(&self, order_id: Uuid) -> Result<Vec<Payment>, StoreError> {
        let query = format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE order_id = $1 \
             ORDER BY created_at DESC, id"
        );
        let rows = sqlx::query(&query)
            .bind(order_id)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.iter().map(payment_from_row).collect()
    }

    async fn record_issue(&self, issue: ReconciliationIssue) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO reconciliation_issues (id, payment_id, order_id, detail, resolved, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(issue.id)
        .bind(issue.payment_id)
        .bind(issue.order_id)
        .bind(&issue.detail)
        .bind(issue.resolved)
        .bind(issue.created_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn open_issues(&self) -> Result<Vec<ReconciliationIssue>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, payment_id, order_id, detail, resolved, created_at \
             FROM reconciliation_issues WHERE NOT resolved ORDER BY created_at, id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.iter().map(issue_from_row).collect()
    }

    async fn resolve_issue(
        &self,
        issue_id: Uuid,
    ) -> Result<Option<ReconciliationIssue>, StoreError> {
        let row = sqlx::query(
            "UPDATE reconciliation_issues SET resolved = TRUE WHERE id = $1 \
             RETURNING id, payment_id, order_id, detail, resolved, created_at",
        )
        .bind(issue_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        row.as_ref().map(issue_from_row).transpose()
    }
}
