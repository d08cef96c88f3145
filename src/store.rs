//! sled persistence for requests, allocations and grouped orders
//!
//! All records live in the default tree under a type prefix and are CBOR encoded.
//! Supplier ids are written length-prefixed (`<len>:<id>`) inside keys, so an id that
//! contains `/` can never be read as the prefix of another supplier's keys.
//! A [`Changeset`] is applied as a single sled batch, so a reader sees either all of an
//! operation's writes or none of them.
use crate::allocation::OrderAllocation;
use crate::error::{ProcurementError, Result};
use crate::grouped_order::GroupedOrder;
use crate::request::MaterialRequest;
use sled::Batch;
use std::path::Path;
use std::sync::Arc;

const REQUEST_PREFIX: &str = "request/";
const ALLOCATION_PREFIX: &str = "allocation/";
const GROUPED_ORDER_PREFIX: &str = "grouped_order/";
const SUPPLIER_INDEX_PREFIX: &str = "supplier_index/";
const OPEN_ORDER_PREFIX: &str = "open_order/";

pub(crate) fn request_key(id: &str) -> String {
    format!("{}{}", REQUEST_PREFIX, id)
}
pub(crate) fn allocation_key(id: &str) -> String {
    format!("{}{}", ALLOCATION_PREFIX, id)
}
pub(crate) fn grouped_order_key(id: &str) -> String {
    format!("{}{}", GROUPED_ORDER_PREFIX, id)
}
fn supplier_segment(supplier_id: &str) -> String {
    format!("{}:{}", supplier_id.len(), supplier_id)
}
fn supplier_index_prefix(supplier_id: &str) -> String {
    format!("{}{}/", SUPPLIER_INDEX_PREFIX, supplier_segment(supplier_id))
}
pub(crate) fn supplier_index_key(supplier_id: &str, order_id: &str) -> String {
    format!("{}{}", supplier_index_prefix(supplier_id), order_id)
}
/// Points at the supplier's one open grouped order, absent when there is none.
pub(crate) fn open_order_key(supplier_id: &str) -> String {
    format!("{}{}", OPEN_ORDER_PREFIX, supplier_segment(supplier_id))
}

fn encode<T: minicbor::Encode<()>>(value: &T) -> Result<Vec<u8>> {
    minicbor::to_vec(value).map_err(|err| ProcurementError::Encode(err.to_string()))
}

#[derive(Clone)]
pub struct Store {
    instance: Arc<sled::Db>,
}

impl Store {
    pub fn new(instance: Arc<sled::Db>) -> Self {
        Self { instance }
    }
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(Arc::new(sled::open(path)?)))
    }
    /// Database removed when the last handle drops.
    pub fn temporary() -> Result<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self::new(Arc::new(db)))
    }
    pub fn db(&self) -> &Arc<sled::Db> {
        &self.instance
    }

    fn get<T>(&self, key: &str) -> Result<Option<T>>
    where
        T: for<'b> minicbor::Decode<'b, ()>,
    {
        match self.instance.get(key.as_bytes())? {
            Some(bytes) => Ok(Some(minicbor::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn scan<T>(&self, prefix: &str) -> Result<Vec<T>>
    where
        T: for<'b> minicbor::Decode<'b, ()>,
    {
        self.instance
            .scan_prefix(prefix.as_bytes())
            .map(|entry| {
                let (_, bytes) = entry?;
                Ok(minicbor::decode(&bytes)?)
            })
            .collect()
    }

    pub fn request(&self, id: &str) -> Result<Option<MaterialRequest>> {
        self.get(&request_key(id))
    }
    pub fn allocation(&self, id: &str) -> Result<Option<OrderAllocation>> {
        self.get(&allocation_key(id))
    }
    pub fn grouped_order(&self, id: &str) -> Result<Option<GroupedOrder>> {
        self.get(&grouped_order_key(id))
    }

    pub fn requests(&self) -> Result<Vec<MaterialRequest>> {
        self.scan(REQUEST_PREFIX)
    }
    pub fn grouped_orders(&self) -> Result<Vec<GroupedOrder>> {
        self.scan(GROUPED_ORDER_PREFIX)
    }
    pub fn grouped_order_ids_for_supplier(&self, supplier_id: &str) -> Result<Vec<String>> {
        let prefix = supplier_index_prefix(supplier_id);
        self.instance
            .scan_prefix(prefix.as_bytes())
            .map(|entry| {
                let (key, _) = entry?;
                let key = String::from_utf8_lossy(&key);
                Ok(key[prefix.len()..].to_string())
            })
            .collect()
    }

    /// Id of the supplier's open grouped order, as last committed.
    pub fn open_order_id(&self, supplier_id: &str) -> Result<Option<String>> {
        match self.instance.get(open_order_key(supplier_id).as_bytes())? {
            Some(bytes) => Ok(Some(String::from_utf8_lossy(&bytes).into_owned())),
            None => Ok(None),
        }
    }

    pub(crate) fn apply(&self, changes: Changeset) -> Result<()> {
        self.instance.apply_batch(changes.batch)?;
        Ok(())
    }
}

/// Pending writes for one operation.
#[derive(Default)]
pub(crate) struct Changeset {
    batch: Batch,
    writes: usize,
}

impl Changeset {
    pub(crate) fn put<T: minicbor::Encode<()>>(&mut self, key: &str, value: &T) -> Result<()> {
        self.batch.insert(key.as_bytes(), encode(value)?);
        self.writes += 1;
        Ok(())
    }
    pub(crate) fn put_raw(&mut self, key: &str, value: &str) {
        self.batch.insert(key.as_bytes(), value.as_bytes());
        self.writes += 1;
    }
    pub(crate) fn put_marker(&mut self, key: &str) {
        self.batch.insert(key.as_bytes(), Vec::<u8>::new());
        self.writes += 1;
    }
    pub(crate) fn remove(&mut self, key: &str) {
        self.batch.remove(key.as_bytes());
        self.writes += 1;
    }
    pub(crate) fn len(&self) -> usize {
        self.writes
    }
}
