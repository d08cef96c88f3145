//! Quantity and amount invariants checked before any record is written
use crate::allocation::OrderAllocation;
use crate::error::{ProcurementError, Result};
use crate::grouped_order::{GroupedOrder, total_amount};
use crate::request::{MaterialRequest, MaterialRequestItem, RequestStatus};

/// `0 <= delivered <= allocated <= requested`
pub fn check_item(item: &MaterialRequestItem) -> Result<()> {
    if item.requested_quantity == 0 {
        return Err(ProcurementError::validation(format!(
            "item `{}` requests nothing",
            item.id
        )));
    }
    if item.quantity_allocated > item.requested_quantity {
        return Err(ProcurementError::validation(format!(
            "item `{}` has {} allocated for {} requested",
            item.id, item.quantity_allocated, item.requested_quantity
        )));
    }
    if item.quantity_delivered > item.quantity_allocated {
        return Err(ProcurementError::validation(format!(
            "item `{}` has {} delivered for {} allocated",
            item.id, item.quantity_delivered, item.quantity_allocated
        )));
    }
    Ok(())
}

pub fn check_request(request: &MaterialRequest) -> Result<()> {
    if request.status != RequestStatus::Draft && request.items.is_empty() {
        return Err(ProcurementError::validation(format!(
            "request `{}` left draft without items",
            request.id
        )));
    }
    request.items.iter().try_for_each(check_item)
}

pub fn check_allocation(allocation: &OrderAllocation) -> Result<()> {
    if allocation.allocated_quantity == 0 {
        return Err(ProcurementError::validation(format!(
            "allocation `{}` has no quantity",
            allocation.id
        )));
    }
    if allocation.delivered_quantity > allocation.allocated_quantity {
        return Err(ProcurementError::validation(format!(
            "allocation `{}` has {} delivered for {} allocated",
            allocation.id, allocation.delivered_quantity, allocation.allocated_quantity
        )));
    }
    Ok(())
}

/// The stored amount must match a fresh recomputation over the order's allocations.
pub fn check_order_amount<'a, I>(order: &GroupedOrder, allocations: I) -> Result<()>
where
    I: IntoIterator<Item = &'a OrderAllocation>,
{
    let expected = total_amount(
        allocations
            .into_iter()
            .filter(|allocation| order.allocation_ids.contains(&allocation.id)),
    )?;
    if expected != order.current_amount {
        return Err(ProcurementError::validation(format!(
            "grouped order `{}` records {} but its allocations sum to {}",
            order.id, order.current_amount, expected
        )));
    }
    Ok(())
}

/// Active allocations of one item never hold more than the item has allocated.
pub fn check_item_allocations<'a, I>(item: &MaterialRequestItem, allocations: I) -> Result<()>
where
    I: IntoIterator<Item = &'a OrderAllocation>,
{
    let committed: u64 = allocations
        .into_iter()
        .filter(|allocation| allocation.item_id == item.id && allocation.is_active())
        .map(|allocation| u64::from(allocation.allocated_quantity))
        .sum();
    if committed > u64::from(item.quantity_allocated) {
        return Err(ProcurementError::validation(format!(
            "item `{}` has {} units in active allocations but only {} allocated",
            item.id, committed, item.quantity_allocated
        )));
    }
    Ok(())
}
