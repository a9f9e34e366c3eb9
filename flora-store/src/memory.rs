use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use flora_booking::{
    Admission, Booking, BookingRepository, BookingStatus, SeatAvailability, Session,
    SessionRepository,
};
use flora_catalog::{
    CatalogItem, CatalogProvider, ConditionalUpdate, LineDelete, LineDemand, LineWrite, Shortfall,
    StockCommit, StockLine, StockPatch, StockRepository,
};
use flora_core::address::{AddressProvider, AddressSnapshot};
use flora_core::{Page, PageRequest, StoreError};
use flora_order::{Order, OrderRepository, OrderStatus};
use flora_payment::{Payment, PaymentRepository, PaymentStatus, ReconciliationIssue};
use uuid::Uuid;

/// Single-process backing store. One mutex guards all collections, so every
/// conditional write - stock decrements, the per-session aggregate-and-insert,
/// the payment success claim - is a single critical section with no
/// read-then-write gap. Also stands in for the catalog and address
/// collaborators in tests and demos.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    stock: HashMap<Uuid, StockLine>,
    sessions: HashMap<Uuid, Session>,
    bookings: HashMap<Uuid, Booking>,
    orders: HashMap<Uuid, Order>,
    payments: HashMap<Uuid, Payment>,
    issues: HashMap<Uuid, ReconciliationIssue>,
    items: HashMap<Uuid, CatalogItem>,
    addresses: HashMap<(Uuid, Uuid), AddressSnapshot>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().expect("store lock poisoned")
    }

    /// Seed a catalog item, as the catalog collaborator would expose it.
    pub fn put_item(&self, item: CatalogItem) {
        self.lock().items.insert(item.id, item);
    }

    /// Seed an owned address, as the address collaborator would expose it.
    pub fn put_address(&self, user_id: Uuid, address_id: Uuid, snapshot: AddressSnapshot) {
        self.lock().addresses.insert((user_id, address_id), snapshot);
    }
}

fn paginate<T>(mut items: Vec<T>, page: PageRequest) -> Page<T> {
    let total = items.len() as u64;
    let page = page.clamped();
    let start = page.offset().min(items.len());
    let end = (start + page.limit as usize).min(items.len());
    let window: Vec<T> = items.drain(start..end).collect();
    Page::new(window, page, total)
}

impl Inner {
    fn find_stock(&self, product_id: Uuid, variant_code: &str) -> Option<Uuid> {
        self.stock
            .values()
            .find(|line| line.product_id == product_id && line.variant_code == variant_code)
            .map(|line| line.id)
    }

    fn seats_taken(&self, session_id: Uuid) -> i32 {
        self.bookings
            .values()
            .filter(|b| b.session_id == session_id && b.status.holds_seats())
            .map(|b| b.qty)
            .sum()
    }

    fn find_payment(&self, provider: &str, tx_ref: &str) -> Option<Uuid> {
        self.payments
            .values()
            .find(|p| p.provider == provider && p.tx_ref.as_deref() == Some(tx_ref))
            .map(|p| p.id)
    }
}

#[async_trait]
impl StockRepository for MemoryStore {
    async fn insert_line(&self, line: StockLine) -> Result<LineWrite, StoreError> {
        let mut inner = self.lock();
        if inner.find_stock(line.product_id, &line.variant_code).is_some() {
            return Ok(LineWrite::Duplicate);
        }
        inner.stock.insert(line.id, line.clone());
        Ok(LineWrite::Written(line))
    }

    async fn update_line(&self, line_id: Uuid, patch: StockPatch) -> Result<LineWrite, StoreError> {
        let mut inner = self.lock();
        let Some(current) = inner.stock.get(&line_id).cloned() else {
            return Ok(LineWrite::NotFound);
        };

        if let Some(code) = &patch.variant_code {
            let clash = inner
                .find_stock(current.product_id, code)
                .is_some_and(|id| id != line_id);
            if clash {
                return Ok(LineWrite::Duplicate);
            }
        }

        let line = inner.stock.get_mut(&line_id).expect("checked above");
        if let Some(code) = patch.variant_code {
            line.variant_code = code;
        }
        if let Some(level) = patch.reorder_level {
            line.reorder_level = level;
        }
        line.updated_at = Utc::now();
        Ok(LineWrite::Written(line.clone()))
    }

    async fn delete_line(&self, line_id: Uuid) -> Result<LineDelete, StoreError> {
        let mut inner = self.lock();
        let Some(line) = inner.stock.get(&line_id).cloned() else {
            return Ok(LineDelete::NotFound);
        };

        let referenced = inner.orders.values().any(|order| {
            !matches!(order.status, OrderStatus::Delivered | OrderStatus::Cancelled)
                && order.lines.iter().any(|ol| {
                    ol.product_id == line.product_id
                        && flora_catalog::stock::variant_or_base(ol.variant_code.as_deref())
                            == line.variant_code
                })
        });
        if referenced {
            return Ok(LineDelete::InUse);
        }

        inner.stock.remove(&line_id);
        Ok(LineDelete::Deleted)
    }

    async fn get_line(&self, line_id: Uuid) -> Result<Option<StockLine>, StoreError> {
        Ok(self.lock().stock.get(&line_id).cloned())
    }

    async fn lines_for_product(&self, product_id: Uuid) -> Result<Vec<StockLine>, StoreError> {
        let mut lines: Vec<StockLine> = self
            .lock()
            .stock
            .values()
            .filter(|line| line.product_id == product_id)
            .cloned()
            .collect();
        lines.sort_by(|a, b| a.variant_code.cmp(&b.variant_code));
        Ok(lines)
    }

    async fn decrement(
        &self,
        product_id: Uuid,
        variant_code: &str,
        qty: i32,
    ) -> Result<ConditionalUpdate, StoreError> {
        let mut inner = self.lock();
        let Some(id) = inner.find_stock(product_id, variant_code) else {
            return Ok(ConditionalUpdate::NotFound);
        };
        let line = inner.stock.get_mut(&id).expect("found above");
        if line.qty < qty {
            return Ok(ConditionalUpdate::Insufficient {
                available: line.qty,
            });
        }
        line.qty -= qty;
        line.updated_at = Utc::now();
        Ok(ConditionalUpdate::Updated(line.clone()))
    }

    async fn adjust(
        &self,
        line_id: Uuid,
        delta: i32,
        forbid_negative: bool,
    ) -> Result<ConditionalUpdate, StoreError> {
        let mut inner = self.lock();
        let Some(line) = inner.stock.get_mut(&line_id) else {
            return Ok(ConditionalUpdate::NotFound);
        };
        if forbid_negative && delta < 0 && line.qty < -delta {
            return Ok(ConditionalUpdate::Insufficient {
                available: line.qty,
            });
        }
        line.qty += delta;
        line.updated_at = Utc::now();
        Ok(ConditionalUpdate::Updated(line.clone()))
    }

    async fn decrement_all(&self, demands: &[LineDemand]) -> Result<StockCommit, StoreError> {
        let mut inner = self.lock();

        let mut shortfalls = Vec::new();
        for demand in demands {
            let available = inner
                .find_stock(demand.product_id, &demand.variant_code)
                .and_then(|id| inner.stock.get(&id))
                .map(|line| line.qty)
                .unwrap_or(0);
            if available < demand.qty {
                shortfalls.push(Shortfall {
                    product_id: demand.product_id,
                    variant_code: demand.variant_code.clone(),
                    requested: demand.qty,
                    available,
                });
            }
        }
        if !shortfalls.is_empty() {
            return Ok(StockCommit::Short(shortfalls));
        }

        let now = Utc::now();
        for demand in demands {
            let id = inner
                .find_stock(demand.product_id, &demand.variant_code)
                .expect("checked above");
            let line = inner.stock.get_mut(&id).expect("checked above");
            line.qty -= demand.qty;
            line.updated_at = now;
        }
        Ok(StockCommit::Committed)
    }
}

#[async_trait]
impl SessionRepository for MemoryStore {
    async fn insert_session(&self, session: Session) -> Result<Session, StoreError> {
        self.lock().sessions.insert(session.id, session.clone());
        Ok(session)
    }

    async fn set_capacity(
        &self,
        session_id: Uuid,
        capacity_max: i32,
    ) -> Result<Option<Session>, StoreError> {
        let mut inner = self.lock();
        Ok(inner.sessions.get_mut(&session_id).map(|session| {
            session.capacity_max = capacity_max;
            session.clone()
        }))
    }

    async fn get_session(&self, session_id: Uuid) -> Result<Option<Session>, StoreError> {
        Ok(self.lock().sessions.get(&session_id).cloned())
    }

    async fn list_sessions(&self, page: PageRequest) -> Result<Page<Session>, StoreError> {
        let mut sessions: Vec<Session> = self.lock().sessions.values().cloned().collect();
        sessions.sort_by(|a, b| a.starts_at.cmp(&b.starts_at).then(a.id.cmp(&b.id)));
        Ok(paginate(sessions, page))
    }
}

#[async_trait]
impl BookingRepository for MemoryStore {
    async fn admit(&self, booking: Booking) -> Result<Admission, StoreError> {
        let mut inner = self.lock();

        let Some(session) = inner.sessions.get(&booking.session_id) else {
            return Ok(Admission::SessionNotFound);
        };
        let capacity_max = session.capacity_max;

        let taken = inner.seats_taken(booking.session_id);
        let remaining = capacity_max - taken;
        if remaining < booking.qty {
            return Ok(Admission::InsufficientSeats { remaining });
        }

        inner.bookings.insert(booking.id, booking.clone());
        Ok(Admission::Created(booking))
    }

    async fn seats_taken(
        &self,
        session_id: Uuid,
    ) -> Result<Option<SeatAvailability>, StoreError> {
        let inner = self.lock();
        let Some(session) = inner.sessions.get(&session_id) else {
            return Ok(None);
        };
        let taken = inner.seats_taken(session_id);
        Ok(Some(SeatAvailability {
            session_id,
            capacity_max: session.capacity_max,
            taken,
            remaining: (session.capacity_max - taken).max(0),
        }))
    }

    async fn get_booking(&self, booking_id: Uuid) -> Result<Option<Booking>, StoreError> {
        Ok(self.lock().bookings.get(&booking_id).cloned())
    }

    async fn bookings_for_user(
        &self,
        user_id: Uuid,
        page: PageRequest,
    ) -> Result<Page<Booking>, StoreError> {
        let mut bookings: Vec<Booking> = self
            .lock()
            .bookings
            .values()
            .filter(|b| b.user_id == user_id)
            .cloned()
            .collect();
        bookings.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        Ok(paginate(bookings, page))
    }

    async fn list_bookings(
        &self,
        status: Option<BookingStatus>,
        page: PageRequest,
    ) -> Result<Page<Booking>, StoreError> {
        let mut bookings: Vec<Booking> = self
            .lock()
            .bookings
            .values()
            .filter(|b| status.map_or(true, |s| b.status == s))
            .cloned()
            .collect();
        bookings.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        Ok(paginate(bookings, page))
    }

    async fn bookings_for_session(&self, session_id: Uuid) -> Result<Vec<Booking>, StoreError> {
        let mut bookings: Vec<Booking> = self
            .lock()
            .bookings
            .values()
            .filter(|b| b.session_id == session_id)
            .cloned()
            .collect();
        bookings.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(bookings)
    }

    async fn set_status(
        &self,
        booking_id: Uuid,
        status: BookingStatus,
    ) -> Result<Option<Booking>, StoreError> {
        let mut inner = self.lock();
        Ok(inner.bookings.get_mut(&booking_id).map(|booking| {
            booking.status = status;
            booking.updated_at = Utc::now();
            booking.clone()
        }))
    }
}

#[async_trait]
impl OrderRepository for MemoryStore {
    async fn insert_order(&self, order: Order) -> Result<Order, StoreError> {
        self.lock().orders.insert(order.id, order.clone());
        Ok(order)
    }

    async fn get_order(&self, order_id: Uuid) -> Result<Option<Order>, StoreError> {
        Ok(self.lock().orders.get(&order_id).cloned())
    }

    async fn orders_for_user(
        &self,
        user_id: Uuid,
        page: PageRequest,
    ) -> Result<Page<Order>, StoreError> {
        let mut orders: Vec<Order> = self
            .lock()
            .orders
            .values()
            .filter(|o| o.user_id == user_id)
            .cloned()
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        Ok(paginate(orders, page))
    }

    async fn list_orders(
        &self,
        status: Option<OrderStatus>,
        user_id: Option<Uuid>,
        page: PageRequest,
    ) -> Result<Page<Order>, StoreError> {
        let mut orders: Vec<Order> = self
            .lock()
            .orders
            .values()
            .filter(|o| status.map_or(true, |s| o.status == s))
            .filter(|o| user_id.map_or(true, |u| o.user_id == u))
            .cloned()
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        Ok(paginate(orders, page))
    }

    async fn set_status(
        &self,
        order_id: Uuid,
        status: OrderStatus,
    ) -> Result<Option<Order>, StoreError> {
        let mut inner = self.lock();
        Ok(inner.orders.get_mut(&order_id).map(|order| {
            order.status = status;
            order.updated_at = Utc::now();
            order.clone()
        }))
    }
}

#[async_trait]
impl PaymentRepository for MemoryStore {
    async fn upsert_pending(&self, payment: Payment) -> Result<Payment, StoreError> {
        let mut inner = self.lock();
        if let Some(tx_ref) = payment.tx_ref.as_deref() {
            if let Some(id) = inner.find_payment(&payment.provider, tx_ref) {
                return Ok(inner.payments[&id].clone());
            }
        }
        inner.payments.insert(payment.id, payment.clone());
        Ok(payment)
    }

    async fn find_by_tx_ref(
        &self,
        provider: &str,
        tx_ref: &str,
    ) -> Result<Option<Payment>, StoreError> {
        let inner = self.lock();
        Ok(inner
            .find_payment(provider, tx_ref)
            .map(|id| inner.payments[&id].clone()))
    }

    async fn claim_success(
        &self,
        provider: &str,
        tx_ref: &str,
        mut template: Payment,
    ) -> Result<(Payment, bool), StoreError> {
        let mut inner = self.lock();
        if let Some(id) = inner.find_payment(provider, tx_ref) {
            let payment = inner.payments.get_mut(&id).expect("found above");
            if payment.status == PaymentStatus::Succeeded {
                return Ok((payment.clone(), false));
            }
            payment.status = PaymentStatus::Succeeded;
            payment.updated_at = Utc::now();
            return Ok((payment.clone(), true));
        }

        template.status = PaymentStatus::Succeeded;
        inner.payments.insert(template.id, template.clone());
        Ok((template, true))
    }

    async fn mark_failed(
        &self,
        provider: &str,
        tx_ref: &str,
        mut template: Payment,
    ) -> Result<Payment, StoreError> {
        let mut inner = self.lock();
        if let Some(id) = inner.find_payment(provider, tx_ref) {
            let payment = inner.payments.get_mut(&id).expect("found above");
            if payment.status != PaymentStatus::Succeeded {
                payment.status = PaymentStatus::Failed;
                payment.updated_at = Utc::now();
            }
            return Ok(payment.clone());
        }

        template.status = PaymentStatus::Failed;
        inner.payments.insert(template.id, template.clone());
        Ok(template)
    }

    async fn payments_for_order(&self, order_id: Uuid) -> Result<Vec<Payment>, StoreError> {
        let mut payments: Vec<Payment> = self
            .lock()
            .payments
            .values()
            .filter(|p| p.order_id == Some(order_id))
            .cloned()
            .collect();
        payments.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        Ok(payments)
    }

    async fn record_issue(&self, issue: ReconciliationIssue) -> Result<(), StoreError> {
        self.lock().issues.insert(issue.id, issue);
        Ok(())
    }

    async fn open_issues(&self) -> Result<Vec<ReconciliationIssue>, StoreError> {
        let mut issues: Vec<ReconciliationIssue> = self
            .lock()
            .issues
            .values()
            .filter(|issue| !issue.resolved)
            .cloned()
            .collect();
        issues.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(issues)
    }

    async fn resolve_issue(
        &self,
        issue_id: Uuid,
    ) -> Result<Option<ReconciliationIssue>, StoreError> {
        let mut inner = self.lock();
        Ok(inner.issues.get_mut(&issue_id).map(|issue| {
            issue.resolved = true;
            issue.clone()
        }))
    }
}

#[async_trait]
impl CatalogProvider for MemoryStore {
    async fn get_item(&self, product_id: Uuid) -> Result<Option<CatalogItem>, StoreError> {
        Ok(self.lock().items.get(&product_id).cloned())
    }
}

#[async_trait]
impl AddressProvider for MemoryStore {
    async fn get_owned_address(
        &self,
        user_id: Uuid,
        address_id: Uuid,
    ) -> Result<Option<AddressSnapshot>, StoreError> {
        Ok(self.lock().addresses.get(&(user_id, address_id)).cloned())
    }
}
