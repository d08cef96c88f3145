//! Records touched by one service operation
//!
//! Records are loaded on first access, mutated in memory, checked against the shared
//! invariants and written back as one batch. Events raised along the way are returned by
//! [`UnitOfWork::commit`] so the caller can publish them once the writes are durable.
use crate::allocation::OrderAllocation;
use crate::error::{ProcurementError, Result};
use crate::grouped_order::GroupedOrder;
use crate::invariants;
use crate::notify::Event;
use crate::request::MaterialRequest;
use crate::store::{
    Changeset, Store, allocation_key, grouped_order_key, open_order_key, request_key,
    supplier_index_key,
};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum Record {
    Request(String),
    Allocation(String),
    Order(String),
}

pub(crate) struct UnitOfWork<'s> {
    store: &'s Store,
    requests: BTreeMap<String, MaterialRequest>,
    allocations: BTreeMap<String, OrderAllocation>,
    orders: BTreeMap<String, GroupedOrder>,
    dirty: BTreeSet<Record>,
    removed_allocations: BTreeSet<String>,
    new_orders: BTreeSet<String>,
    events: Vec<Event>,
}

impl<'s> UnitOfWork<'s> {
    pub(crate) fn new(store: &'s Store) -> Self {
        Self {
            store,
            requests: BTreeMap::new(),
            allocations: BTreeMap::new(),
            orders: BTreeMap::new(),
            dirty: BTreeSet::new(),
            removed_allocations: BTreeSet::new(),
            new_orders: BTreeSet::new(),
            events: Vec::new(),
        }
    }

    pub(crate) fn request(&mut self, id: &str) -> Result<&MaterialRequest> {
        if !self.requests.contains_key(id) {
            let request = self
                .store
                .request(id)?
                .ok_or_else(|| ProcurementError::not_found("material request", id))?;
            self.requests.insert(id.to_string(), request);
        }
        self.requests
            .get(id)
            .ok_or_else(|| ProcurementError::not_found("material request", id))
    }
    pub(crate) fn request_mut(&mut self, id: &str) -> Result<&mut MaterialRequest> {
        self.request(id)?;
        self.dirty.insert(Record::Request(id.to_string()));
        self.requests
            .get_mut(id)
            .ok_or_else(|| ProcurementError::not_found("material request", id))
    }
    pub(crate) fn insert_request(&mut self, request: MaterialRequest) {
        self.dirty.insert(Record::Request(request.id.clone()));
        self.requests.insert(request.id.clone(), request);
    }

    pub(crate) fn allocation(&mut self, id: &str) -> Result<&OrderAllocation> {
        if self.removed_allocations.contains(id) {
            return Err(ProcurementError::not_found("allocation", id));
        }
        if !self.allocations.contains_key(id) {
            let allocation = self
                .store
                .allocation(id)?
                .ok_or_else(|| ProcurementError::not_found("allocation", id))?;
            self.allocations.insert(id.to_string(), allocation);
        }
        self.allocations
            .get(id)
            .ok_or_else(|| ProcurementError::not_found("allocation", id))
    }
    pub(crate) fn allocation_mut(&mut self, id: &str) -> Result<&mut OrderAllocation> {
        self.allocation(id)?;
        self.dirty.insert(Record::Allocation(id.to_string()));
        self.allocations
            .get_mut(id)
            .ok_or_else(|| ProcurementError::not_found("allocation", id))
    }
    pub(crate) fn insert_allocation(&mut self, allocation: OrderAllocation) {
        self.dirty.insert(Record::Allocation(allocation.id.clone()));
        self.allocations.insert(allocation.id.clone(), allocation);
    }
    pub(crate) fn remove_allocation(&mut self, id: &str) -> Result<OrderAllocation> {
        self.allocation(id)?;
        self.dirty.remove(&Record::Allocation(id.to_string()));
        self.removed_allocations.insert(id.to_string());
        self.allocations
            .remove(id)
            .ok_or_else(|| ProcurementError::not_found("allocation", id))
    }

    pub(crate) fn order(&mut self, id: &str) -> Result<&GroupedOrder> {
        if !self.orders.contains_key(id) {
            let order = self
                .store
                .grouped_order(id)?
                .ok_or_else(|| ProcurementError::not_found("grouped order", id))?;
            self.orders.insert(id.to_string(), order);
        }
        self.orders
            .get(id)
            .ok_or_else(|| ProcurementError::not_found("grouped order", id))
    }
    pub(crate) fn order_mut(&mut self, id: &str) -> Result<&mut GroupedOrder> {
        self.order(id)?;
        self.dirty.insert(Record::Order(id.to_string()));
        self.orders
            .get_mut(id)
            .ok_or_else(|| ProcurementError::not_found("grouped order", id))
    }
    pub(crate) fn insert_order(&mut self, order: GroupedOrder) {
        self.dirty.insert(Record::Order(order.id.clone()));
        self.new_orders.insert(order.id.clone());
        self.orders.insert(order.id.clone(), order);
    }

    /// The supplier's open order: one created in this unit of work, else the stored pointer
    /// as long as the order it names is still open here.
    pub(crate) fn open_order_for_supplier(&mut self, supplier_id: &str) -> Result<Option<String>> {
        let created = self
            .new_orders
            .iter()
            .filter_map(|id| self.orders.get(id))
            .find(|order| order.supplier_id == supplier_id && order.status.is_open())
            .map(|order| order.id.clone());
        if created.is_some() {
            return Ok(created);
        }

        let Some(id) = self.store.open_order_id(supplier_id)? else {
            return Ok(None);
        };
        let open = self.order(&id)?.status.is_open();
        Ok(open.then_some(id))
    }

    /// Allocations listed on an order, skipping any removed in this unit of work.
    pub(crate) fn order_allocations(&mut self, order_id: &str) -> Result<Vec<OrderAllocation>> {
        let ids = self.order(order_id)?.allocation_ids.clone();
        self.load_allocations(ids)
    }

    fn load_allocations(&mut self, ids: Vec<String>) -> Result<Vec<OrderAllocation>> {
        let mut allocations = Vec::with_capacity(ids.len());
        for id in ids {
            if self.removed_allocations.contains(&id) {
                continue;
            }
            allocations.push(self.allocation(&id)?.clone());
        }
        Ok(allocations)
    }

    fn item_allocations(&mut self, request_id: &str) -> Result<Vec<OrderAllocation>> {
        let ids: Vec<String> = self
            .request(request_id)?
            .items
            .iter()
            .flat_map(|item| item.allocation_ids.iter().cloned())
            .collect();
        self.load_allocations(ids)
    }

    pub(crate) fn emit(&mut self, event: Event) {
        self.events.push(event);
    }

    fn check_invariants(&mut self) -> Result<()> {
        let mut orders_to_check = BTreeSet::new();
        let dirty: Vec<Record> = self.dirty.iter().cloned().collect();

        for record in &dirty {
            match record {
                Record::Request(id) => {
                    let allocations = self.item_allocations(id)?;
                    let request = self.request(id)?;
                    invariants::check_request(request)?;
                    for item in &request.items {
                        invariants::check_item_allocations(item, &allocations)?;
                    }
                }
                Record::Allocation(id) => {
                    let allocation = self.allocation(id)?;
                    invariants::check_allocation(allocation)?;
                    if let Some(order_id) = &allocation.grouped_order_id {
                        orders_to_check.insert(order_id.clone());
                    }
                }
                Record::Order(id) => {
                    orders_to_check.insert(id.clone());
                }
            }
        }
        for order_id in &orders_to_check {
            let allocations = self.order_allocations(order_id)?;
            invariants::check_order_amount(self.order(order_id)?, &allocations)?;
        }
        Ok(())
    }

    /// Open-order pointer updates: set for every touched open order, cleared when the
    /// order a pointer names has left the open states.
    fn open_order_pointers(&self) -> Result<BTreeMap<String, Option<String>>> {
        let mut pointers = BTreeMap::new();
        for record in &self.dirty {
            let Record::Order(id) = record else { continue };
            let Some(order) = self.orders.get(id) else { continue };
            if order.status.is_open() {
                pointers.insert(order.supplier_id.clone(), Some(id.clone()));
            } else if self.store.open_order_id(&order.supplier_id)?.as_deref() == Some(id.as_str()) {
                pointers.entry(order.supplier_id.clone()).or_insert(None);
            }
        }
        Ok(pointers)
    }

    /// Checks invariants, writes every touched record in one batch and hands back the events.
    pub(crate) fn commit(mut self) -> Result<Vec<Event>> {
        self.check_invariants()?;

        let mut changes = Changeset::default();
        for record in &self.dirty {
            match record {
                Record::Request(id) => {
                    if let Some(request) = self.requests.get(id) {
                        changes.put(&request_key(id), request)?;
                    }
                }
                Record::Allocation(id) => {
                    if let Some(allocation) = self.allocations.get(id) {
                        changes.put(&allocation_key(id), allocation)?;
                    }
                }
                Record::Order(id) => {
                    if let Some(order) = self.orders.get(id) {
                        changes.put(&grouped_order_key(id), order)?;
                    }
                }
            }
        }
        for id in &self.new_orders {
            if let Some(order) = self.orders.get(id) {
                changes.put_marker(&supplier_index_key(&order.supplier_id, id));
            }
        }
        for (supplier_id, pointer) in self.open_order_pointers()? {
            match pointer {
                Some(order_id) => changes.put_raw(&open_order_key(&supplier_id), &order_id),
                None => changes.remove(&open_order_key(&supplier_id)),
            }
        }
        for id in &self.removed_allocations {
            changes.remove(&allocation_key(id));
        }

        debug!(writes = changes.len(), events = self.events.len(), "committing unit of work");
        if changes.len() > 0 {
            self.store.apply(changes)?;
        }
        Ok(self.events)
    }
}
