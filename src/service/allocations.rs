//! Allocation ledger: the only place that moves `quantity_allocated` on request items
use super::ProcurementService;
use crate::allocation::{AllocationStatus, OrderAllocation};
use crate::error::{ProcurementError, Result};
use crate::grouped_order::GroupedOrderStatus;
use crate::locks::LockKey;
use crate::notify::Event;
use crate::request::RequestStatus;
use crate::types::TimeStamp;
use crate::unit_of_work::UnitOfWork;
use crate::utils::{ALLOCATION_HRP, new_uuid_to_bech32};
use std::collections::BTreeSet;
use tracing::{info, instrument};

impl ProcurementService {
    /// Allocate `quantity` pending units of an item to its supplier's open grouped order.
    #[instrument(skip(self))]
    pub fn allocate(&self, request_id: &str, item_id: &str, quantity: u32) -> Result<OrderAllocation> {
        let supplier_of_item = || -> Result<String> {
            let request = self
                .store
                .request(request_id)?
                .ok_or_else(|| ProcurementError::not_found("material request", request_id))?;
            self.resolve_supplier(request_id, request.item(item_id)?)
        };

        self.locked(
            || {
                Ok(BTreeSet::from([
                    LockKey::Request(request_id.to_string()),
                    LockKey::Supplier(supplier_of_item()?),
                ]))
            },
            |uow| {
                let supplier_id = supplier_of_item()?;
                self.allocate_in(uow, request_id, item_id, &supplier_id, quantity)
            },
        )
    }

    /// Change the quantity of an allocation on a still-modifiable grouped order.
    #[instrument(skip(self))]
    pub fn update_allocation_quantity(
        &self,
        allocation_id: &str,
        new_quantity: u32,
    ) -> Result<OrderAllocation> {
        self.locked(
            || self.allocation_keys(allocation_id),
            |uow| {
                let allocation = uow.allocation(allocation_id)?.clone();
                let order_id = self.modifiable_order_of(uow, &allocation)?;
                if !allocation.is_active() {
                    return Err(ProcurementError::invalid_state(format!(
                        "allocation `{}` is cancelled",
                        allocation_id
                    )));
                }

                let old_quantity = allocation.allocated_quantity;
                let item = uow
                    .request_mut(&allocation.request_id)?
                    .item_mut(&allocation.item_id)?;
                if new_quantity > old_quantity {
                    item.reserve(new_quantity - old_quantity)?;
                } else if new_quantity < old_quantity {
                    item.release(old_quantity - new_quantity)?;
                }
                uow.allocation_mut(allocation_id)?.resize(new_quantity)?;
                info!(allocation = %allocation_id, from = old_quantity, to = new_quantity, "allocation resized");

                self.recalculate_in(uow, &order_id)?;
                self.check_threshold_in(uow, &order_id)?;
                Ok(uow.allocation(allocation_id)?.clone())
            },
        )
    }

    /// Take an allocation off its grouped order and give the quantity back to the item.
    #[instrument(skip(self))]
    pub fn remove_allocation(&self, allocation_id: &str) -> Result<OrderAllocation> {
        self.locked(
            || self.allocation_keys(allocation_id),
            |uow| {
                let allocation = uow.allocation(allocation_id)?.clone();
                let order_id = self.modifiable_order_of(uow, &allocation)?;

                let item = uow
                    .request_mut(&allocation.request_id)?
                    .item_mut(&allocation.item_id)?;
                item.release(allocation.allocated_quantity)?;
                item.allocation_ids.retain(|id| id != allocation_id);

                uow.order_mut(&order_id)?.detach(allocation_id);
                let mut removed = uow.remove_allocation(allocation_id)?;
                removed.grouped_order_id = None;
                info!(allocation = %allocation_id, order = %order_id, quantity = removed.allocated_quantity, "allocation removed");

                self.recalculate_in(uow, &order_id)?;
                Ok(removed)
            },
        )
    }

    /// Register received goods against an allocation that is part of a supplier order.
    #[instrument(skip(self, note))]
    pub fn record_delivery(
        &self,
        allocation_id: &str,
        quantity: u32,
        note: Option<&str>,
    ) -> Result<OrderAllocation> {
        self.locked(
            || self.allocation_keys(allocation_id),
            |uow| {
                let allocation = uow.allocation_mut(allocation_id)?;
                if allocation.supplier_order.is_none() {
                    return Err(ProcurementError::invalid_state(format!(
                        "allocation `{}` is not part of a supplier order yet",
                        allocation_id
                    )));
                }
                allocation.record_delivery(quantity, note)?;
                let snapshot = allocation.clone();

                uow.request_mut(&snapshot.request_id)?
                    .item_mut(&snapshot.item_id)?
                    .record_delivered(quantity)?;
                info!(allocation = %allocation_id, quantity, status = ?snapshot.status, "delivery recorded");
                uow.emit(Event::DeliveryReceived(snapshot.clone()));

                if let Some(order_id) = &snapshot.grouped_order_id {
                    self.settle_order_in(uow, order_id)?;
                }
                Ok(snapshot)
            },
        )
    }

    /// Cancel an allocation. The item keeps its allocated quantity; see
    /// [`cancel_order`](Self::cancel_order) for the path that releases it.
    #[instrument(skip(self))]
    pub fn cancel_allocation(&self, allocation_id: &str, reason: &str) -> Result<OrderAllocation> {
        self.locked(
            || self.allocation_keys(allocation_id),
            |uow| {
                let allocation = uow.allocation_mut(allocation_id)?;
                allocation.cancel(reason)?;
                let snapshot = allocation.clone();
                info!(allocation = %allocation_id, reason = %reason, "allocation cancelled");

                if let Some(order_id) = &snapshot.grouped_order_id {
                    self.recalculate_in(uow, order_id)?;
                    self.settle_order_in(uow, order_id)?;
                }
                Ok(snapshot)
            },
        )
    }

    /// Supplier acknowledged the line.
    #[instrument(skip(self))]
    pub fn confirm_allocation(&self, allocation_id: &str) -> Result<OrderAllocation> {
        self.locked(
            || self.allocation_keys(allocation_id),
            |uow| {
                let allocation = uow.allocation_mut(allocation_id)?;
                allocation.transition(AllocationStatus::Confirmed)?;
                Ok(allocation.clone())
            },
        )
    }

    /// Supplier signalled a delay.
    #[instrument(skip(self))]
    pub fn mark_back_ordered(&self, allocation_id: &str, note: &str) -> Result<OrderAllocation> {
        self.locked(
            || self.allocation_keys(allocation_id),
            |uow| {
                let allocation = uow.allocation_mut(allocation_id)?;
                allocation.transition(AllocationStatus::BackOrdered)?;
                allocation.notes.push(format!("back-ordered: {}", note));
                info!(allocation = %allocation_id, "allocation back-ordered");
                Ok(allocation.clone())
            },
        )
    }

    pub fn get_allocation(&self, allocation_id: &str) -> Result<OrderAllocation> {
        self.store
            .allocation(allocation_id)?
            .ok_or_else(|| ProcurementError::not_found("allocation", allocation_id))
    }

    pub fn allocations_for_order(&self, order_id: &str) -> Result<Vec<OrderAllocation>> {
        let order = self.get_order(order_id)?;
        self.collect_allocations(&order.allocation_ids)
    }

    pub fn allocations_for_item(&self, request_id: &str, item_id: &str) -> Result<Vec<OrderAllocation>> {
        let request = self.get_request(request_id)?;
        self.collect_allocations(&request.item(item_id)?.allocation_ids)
    }

    fn collect_allocations(&self, ids: &[String]) -> Result<Vec<OrderAllocation>> {
        let mut allocations = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(allocation) = self.store.allocation(id)? {
                allocations.push(allocation);
            }
        }
        Ok(allocations)
    }

    pub(crate) fn allocate_in(
        &self,
        uow: &mut UnitOfWork<'_>,
        request_id: &str,
        item_id: &str,
        supplier_id: &str,
        quantity: u32,
    ) -> Result<OrderAllocation> {
        let request = uow.request(request_id)?;
        if !matches!(
            request.status,
            RequestStatus::Approved | RequestStatus::Integrated
        ) {
            return Err(ProcurementError::invalid_state(format!(
                "request `{}` is {:?}; only approved requests are allocated",
                request_id, request.status
            )));
        }
        let item = request.item(item_id)?.clone();
        if quantity == 0 || quantity > item.quantity_pending() {
            return Err(ProcurementError::validation(format!(
                "cannot allocate {} units of item `{}`: {} pending",
                quantity,
                item_id,
                item.quantity_pending()
            )));
        }

        let supplier = self.catalog.supplier(supplier_id)?;
        if supplier.currency != item.currency {
            return Err(ProcurementError::validation(format!(
                "item `{}` is priced in {} but supplier `{}` orders in {}",
                item_id, item.currency, supplier_id, supplier.currency
            )));
        }
        let order_id = self.open_order_in(uow, &supplier)?;

        let allocation = OrderAllocation {
            id: new_uuid_to_bech32(ALLOCATION_HRP)?,
            request_id: request_id.to_string(),
            item_id: item_id.to_string(),
            supplier_id: supplier_id.to_string(),
            grouped_order_id: Some(order_id.clone()),
            supplier_order: None,
            allocated_quantity: quantity,
            delivered_quantity: 0,
            estimated_price: item.unit_price,
            currency: item.currency,
            status: AllocationStatus::Allocated,
            notes: Vec::new(),
            created_at: TimeStamp::new(),
            delivered_at: None,
            cancelled_at: None,
        };

        let item = uow.request_mut(request_id)?.item_mut(item_id)?;
        item.reserve(quantity)?;
        item.allocation_ids.push(allocation.id.clone());
        uow.order_mut(&order_id)?.attach(&allocation.id);
        uow.insert_allocation(allocation.clone());
        info!(
            allocation = %allocation.id,
            order = %order_id,
            item = %item_id,
            quantity,
            price = %allocation.estimated_price,
            "allocation created"
        );

        self.recalculate_in(uow, &order_id)?;
        self.check_threshold_in(uow, &order_id)?;
        Ok(allocation)
    }

    /// Grouped order an allocation sits on, provided that order still accepts changes.
    fn modifiable_order_of(
        &self,
        uow: &mut UnitOfWork<'_>,
        allocation: &OrderAllocation,
    ) -> Result<String> {
        let order_id = allocation.grouped_order_id.clone().ok_or_else(|| {
            ProcurementError::invalid_state(format!(
                "allocation `{}` is not staged on a grouped order",
                allocation.id
            ))
        })?;
        uow.order(&order_id)?.ensure_modifiable()?;
        Ok(order_id)
    }

    /// An ordered grouped order whose active allocations are all delivered is fulfilled.
    pub(crate) fn settle_order_in(&self, uow: &mut UnitOfWork<'_>, order_id: &str) -> Result<()> {
        if uow.order(order_id)?.status != GroupedOrderStatus::Ordered {
            return Ok(());
        }
        let allocations = uow.order_allocations(order_id)?;
        let mut active = allocations.iter().filter(|a| a.is_active()).peekable();
        if active.peek().is_none() || !active.all(|a| a.status == AllocationStatus::Delivered) {
            return Ok(());
        }

        let order = uow.order_mut(order_id)?;
        order.transition(GroupedOrderStatus::Delivered)?;
        order.delivered_at = Some(TimeStamp::new());
        info!(order = %order_id, "grouped order fully delivered");
        Ok(())
    }
}
