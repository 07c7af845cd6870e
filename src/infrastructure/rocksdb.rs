use crate::domain::order::{Order, OrderId, PaymentStatus, order_number_rank};
use crate::domain::ports::{OrderStore, StateChange};
use crate::error::{PaymentError, Result};
use async_trait::async_trait;
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, DB, Direction, IteratorMode, Options, WriteBatch};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;

/// Column Family for order records, keyed by big-endian order id.
pub const CF_ORDERS: &str = "orders";
/// Column Family mapping merchant trade numbers to order ids.
pub const CF_TRADE_NUMBERS: &str = "trade_numbers";
/// Column Family mapping order numbers to order ids.
pub const CF_ORDER_NUMBERS: &str = "order_numbers";

/// A persistent order store using RocksDB.
///
/// Orders are stored as JSON in one column family, with two secondary
/// indexes kept in their own families. Every write goes through a single
/// `WriteBatch`, so an order and its index entries never diverge.
///
/// This struct is thread-safe (`Clone` shares the underlying `Arc<DB>`).
#[derive(Clone)]
pub struct RocksDBStore {
    db: Arc<DB>,
    next_id: Arc<AtomicU64>,
    /// Serializes read-check-write sequences (insert, compare-and-set commit).
    write_lock: Arc<Mutex<()>>,
}

impl RocksDBStore {
    /// Opens or creates a RocksDB instance at the specified path.
    ///
    /// Ensures that the required column families exist and resumes id
    /// allocation after the highest stored order id.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let descriptors = [CF_ORDERS, CF_TRADE_NUMBERS, CF_ORDER_NUMBERS]
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect::<Vec<_>>();

        let db = DB::open_cf_descriptors(&opts, path, descriptors)?;

        let store = Self {
            db: Arc::new(db),
            next_id: Arc::new(AtomicU64::new(0)),
            write_lock: Arc::new(Mutex::new(())),
        };
        let highest = store.highest_order_id()?;
        store.next_id.store(highest, Ordering::SeqCst);
        Ok(store)
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| PaymentError::internal(format!("{name} column family not found")))
    }

    fn highest_order_id(&self) -> Result<u64> {
        let cf = self.cf(CF_ORDERS)?;
        match self.db.iterator_cf(cf, IteratorMode::End).next() {
            Some(item) => {
                let (key, _) = item?;
                decode_id(&key).map(|id| id.0)
            }
            None => Ok(0),
        }
    }

    fn read_order(&self, id: OrderId) -> Result<Option<Order>> {
        let cf = self.cf(CF_ORDERS)?;
        match self.db.get_pinned_cf(cf, id.0.to_be_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn lookup(&self, cf_name: &str, key: &str) -> Result<Option<OrderId>> {
        let cf = self.cf(cf_name)?;
        self.db
            .get_pinned_cf(cf, key.as_bytes())?
            .map(|bytes| decode_id(&bytes))
            .transpose()
    }

    fn put_order(&self, batch: &mut WriteBatch, order: &Order, previous: Option<&Order>) -> Result<()> {
        let key = order.id.0.to_be_bytes();
        batch.put_cf(self.cf(CF_ORDERS)?, key, serde_json::to_vec(order)?);

        let trade_numbers = self.cf(CF_TRADE_NUMBERS)?;
        let old_trade_no = previous.and_then(|p| p.transaction_id.as_deref());
        let new_trade_no = order.transaction_id.as_deref();
        if old_trade_no != new_trade_no {
            if let Some(old) = old_trade_no {
                batch.delete_cf(trade_numbers, old.as_bytes());
            }
            if let Some(new) = new_trade_no.filter(|t| !t.is_empty()) {
                batch.put_cf(trade_numbers, new.as_bytes(), key);
            }
        }

        if previous.is_none() {
            batch.put_cf(self.cf(CF_ORDER_NUMBERS)?, order.order_number.as_bytes(), key);
        }
        Ok(())
    }
}

fn decode_id(bytes: &[u8]) -> Result<OrderId> {
    let raw: [u8; 8] = bytes
        .try_into()
        .map_err(|_| PaymentError::internal(format!("malformed order key ({} bytes)", bytes.len())))?;
    Ok(OrderId(u64::from_be_bytes(raw)))
}

#[async_trait]
impl OrderStore for RocksDBStore {
    async fn allocate_id(&self) -> Result<OrderId> {
        Ok(OrderId(self.next_id.fetch_add(1, Ordering::SeqCst) + 1))
    }

    async fn insert(&self, order: Order) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        if self.read_order(order.id)?.is_some() {
            return Err(PaymentError::Conflict(format!("order {} already exists", order.id)));
        }
        if self.lookup(CF_ORDER_NUMBERS, &order.order_number)?.is_some() {
            return Err(PaymentError::Conflict(format!(
                "order number {} already exists",
                order.order_number
            )));
        }

        let mut batch = WriteBatch::default();
        self.put_order(&mut batch, &order, None)?;
        self.db.write(batch)?;
        self.next_id.fetch_max(order.id.0, Ordering::SeqCst);
        Ok(())
    }

    async fn get(&self, id: OrderId) -> Result<Option<Order>> {
        self.read_order(id)
    }

    async fn find_by_transaction_id(&self, transaction_id: &str) -> Result<Option<Order>> {
        match self.lookup(CF_TRADE_NUMBERS, transaction_id)? {
            Some(id) => self.read_order(id),
            None => Ok(None),
        }
    }

    async fn order_number_exists(&self, order_number: &str) -> Result<bool> {
        Ok(self.lookup(CF_ORDER_NUMBERS, order_number)?.is_some())
    }

    async fn last_order_number(&self, prefix: &str) -> Result<Option<String>> {
        let cf = self.cf(CF_ORDER_NUMBERS)?;
        let mut last: Option<String> = None;
        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(prefix.as_bytes(), Direction::Forward));
        for item in iter {
            let (key, _) = item?;
            if !key.starts_with(prefix.as_bytes()) {
                break;
            }
            let number = String::from_utf8_lossy(&key).into_owned();
            if last
                .as_deref()
                .is_none_or(|l| order_number_rank(&number) > order_number_rank(l))
            {
                last = Some(number);
            }
        }
        Ok(last)
    }

    async fn pending_oldest_first(&self, limit: usize) -> Result<Vec<Order>> {
        let cf = self.cf(CF_ORDERS)?;
        let mut pending = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_key, value) = item?;
            let order: Order = serde_json::from_slice(&value)?;
            if order.payment_status() == PaymentStatus::Pending {
                pending.push(order);
            }
        }
        pending.sort_by_key(|o| (o.created_at, o.id));
        pending.truncate(limit);
        Ok(pending)
    }

    async fn commit(&self, changes: Vec<StateChange>) -> Result<Vec<OrderId>> {
        let _guard = self.write_lock.lock().await;
        let mut batch = WriteBatch::default();
        let mut written = Vec::with_capacity(changes.len());
        for change in changes {
            let Some(current) = self.read_order(change.order.id)? else {
                continue;
            };
            if current.state != change.expected {
                continue;
            }
            self.put_order(&mut batch, &change.order, Some(&current))?;
            written.push(change.order.id);
        }
        if !written.is_empty() {
            self.db.write(batch)?;
        }
        Ok(written)
    }
}
