//! Service layer API for procurement workflow operations
//!
//! [`ProcurementService`] hosts the three ledgers: material requests
//! ([`requests`](self::requests)), allocations ([`allocations`](self::allocations)) and
//! grouped-order consolidation ([`consolidation`](self::consolidation)).
//!
//! Every mutating operation follows the same shape: work out which suppliers and requests
//! it touches, lock them, load the records into a unit of work, mutate, commit one batch,
//! release the locks and finally publish the collected events.
use crate::catalog::CatalogReference;
use crate::config::{ConsolidationConfig, ProcurementConfig};
use crate::error::{ProcurementError, Result};
use crate::locks::{LockKey, LockTable};
use crate::notify::{self, LoggingNotifier, NotificationGateway};
use crate::request::MaterialRequestItem;
use crate::store::Store;
use crate::supplier_order::{SupplierOrderBook, SupplierOrderSubsystem};
use crate::unit_of_work::UnitOfWork;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

pub mod allocations;
pub mod consolidation;
pub mod requests;

pub struct ProcurementService {
    store: Store,
    catalog: Arc<dyn CatalogReference>,
    notifier: Arc<dyn NotificationGateway>,
    supplier_orders: Arc<dyn SupplierOrderSubsystem>,
    config: ConsolidationConfig,
    locks: LockTable,
}

impl ProcurementService {
    /// Service over an open sled database, logging notifications and storing supplier
    /// orders in the same database.
    pub fn new(instance: Arc<sled::Db>, catalog: Arc<dyn CatalogReference>) -> Result<Self> {
        let supplier_orders = SupplierOrderBook::open(&instance)?;

        Ok(Self {
            store: Store::new(instance),
            catalog,
            notifier: Arc::new(LoggingNotifier),
            supplier_orders: Arc::new(supplier_orders),
            config: ConsolidationConfig::default(),
            locks: LockTable::new(),
        })
    }

    /// Opens the database named by the configuration.
    pub fn open(config: &ProcurementConfig, catalog: Arc<dyn CatalogReference>) -> Result<Self> {
        let db = sled::Config::new()
            .path(&config.storage.path)
            .temporary(config.storage.temporary)
            .open()?;

        Ok(Self::new(Arc::new(db), catalog)?.with_config(config.consolidation.clone()))
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn NotificationGateway>) -> Self {
        self.notifier = notifier;
        self
    }
    pub fn with_supplier_orders(mut self, supplier_orders: Arc<dyn SupplierOrderSubsystem>) -> Self {
        self.supplier_orders = supplier_orders;
        self
    }
    pub fn with_config(mut self, config: ConsolidationConfig) -> Self {
        self.config = config;
        self
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Runs `op` while holding the locks named by `keys`.
    ///
    /// The key set is derived again once the locks are held; if it grew in the meantime the
    /// locks are released and the acquisition starts over.
    fn locked<T>(
        &self,
        keys: impl Fn() -> Result<BTreeSet<LockKey>>,
        op: impl FnOnce(&mut UnitOfWork<'_>) -> Result<T>,
    ) -> Result<T> {
        let guard = loop {
            let wanted = keys()?;
            let guard = self.locks.acquire(wanted);
            if guard.covers(&keys()?) {
                break guard;
            }
            debug!("lock set changed while waiting, retrying");
        };

        let mut uow = UnitOfWork::new(&self.store);
        let value = op(&mut uow)?;
        let events = uow.commit()?;
        drop(guard);

        notify::dispatch(self.notifier.as_ref(), events);
        Ok(value)
    }

    /// Supplier for an item: the manual override first, then the catalog.
    fn resolve_supplier(&self, request_id: &str, item: &MaterialRequestItem) -> Result<String> {
        if let Some(supplier_id) = &item.supplier_override {
            return Ok(supplier_id.clone());
        }
        match item.catalog_item_id() {
            Some(catalog_item_id) => self.catalog.resolve_supplier(catalog_item_id),
            None => Err(ProcurementError::SupplierUnresolved {
                request_id: request_id.to_string(),
                item_id: item.id.clone(),
            }),
        }
    }

    fn allocation_keys(&self, allocation_id: &str) -> Result<BTreeSet<LockKey>> {
        let allocation = self
            .store
            .allocation(allocation_id)?
            .ok_or_else(|| ProcurementError::not_found("allocation", allocation_id))?;

        Ok(BTreeSet::from([
            LockKey::Supplier(allocation.supplier_id),
            LockKey::Request(allocation.request_id),
        ]))
    }

    /// The order's supplier, plus every request with an allocation on it when
    /// `with_requests` is set.
    fn order_keys(&self, order_id: &str, with_requests: bool) -> Result<BTreeSet<LockKey>> {
        let order = self
            .store
            .grouped_order(order_id)?
            .ok_or_else(|| ProcurementError::not_found("grouped order", order_id))?;

        let mut keys = BTreeSet::from([LockKey::Supplier(order.supplier_id)]);
        if with_requests {
            for allocation_id in &order.allocation_ids {
                if let Some(allocation) = self.store.allocation(allocation_id)? {
                    keys.insert(LockKey::Request(allocation.request_id));
                }
            }
        }
        Ok(keys)
    }
}
