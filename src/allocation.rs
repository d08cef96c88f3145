//! Allocations link a request item's committed quantity to a grouped order
use crate::error::{ProcurementError, Result};
use crate::types::{Currency, Money, TimeStamp};

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, Eq, Ord, PartialEq, PartialOrd, Hash)]
pub enum AllocationStatus {
    #[n(0)]
    Allocated,
    #[n(1)]
    Confirmed,
    #[n(2)]
    PartiallyDelivered,
    #[n(3)]
    Delivered,
    #[n(4)]
    Cancelled,
    #[n(5)]
    BackOrdered,
}

impl AllocationStatus {
    pub fn can_transition_to(self, next: AllocationStatus) -> bool {
        use AllocationStatus::*;

        if self.is_terminal() {
            return false;
        }
        match (self, next) {
            (_, Cancelled) => true,
            (Allocated, Confirmed) | (BackOrdered, Confirmed) => true,
            (Allocated | Confirmed, BackOrdered) => true,
            (Allocated | Confirmed | BackOrdered | PartiallyDelivered, PartiallyDelivered) => true,
            (Allocated | Confirmed | BackOrdered | PartiallyDelivered, Delivered) => true,
            _ => false,
        }
    }
    pub fn is_terminal(self) -> bool {
        matches!(self, AllocationStatus::Delivered | AllocationStatus::Cancelled)
    }
}

/// Position of an allocation inside a binding supplier order.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Eq, PartialEq)]
pub struct SupplierOrderLink {
    #[n(0)]
    pub supplier_order_id: String,
    #[n(1)]
    pub order_item_id: String,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Eq, PartialEq)]
pub struct OrderAllocation {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub request_id: String,
    #[n(2)]
    pub item_id: String,
    #[n(3)]
    pub supplier_id: String,
    /// Grouped order the allocation was staged on. Unlike a plain hand-off, it is not
    /// cleared when the order is converted: after ORDERED it sits next to `supplier_order`
    /// so deliveries can still roll up to the grouped order. Only removal before
    /// validation drops it, together with the allocation record.
    #[n(4)]
    pub grouped_order_id: Option<String>,
    #[n(5)]
    pub supplier_order: Option<SupplierOrderLink>,
    #[n(6)]
    pub allocated_quantity: u32,
    #[n(7)]
    pub delivered_quantity: u32,
    #[n(8)]
    pub estimated_price: Money, // frozen at creation
    #[n(9)]
    pub currency: Currency,
    #[n(10)]
    pub status: AllocationStatus,
    #[n(11)]
    pub notes: Vec<String>,
    #[n(12)]
    pub created_at: TimeStamp,
    #[n(13)]
    pub delivered_at: Option<TimeStamp>,
    #[n(14)]
    pub cancelled_at: Option<TimeStamp>,
}

impl OrderAllocation {
    pub fn is_active(&self) -> bool {
        self.status != AllocationStatus::Cancelled
    }
    pub fn line_amount(&self) -> Option<Money> {
        self.estimated_price.checked_mul(self.allocated_quantity)
    }
    pub fn remaining_quantity(&self) -> u32 {
        self.allocated_quantity
            .saturating_sub(self.delivered_quantity)
    }

    pub(crate) fn transition(&mut self, next: AllocationStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(ProcurementError::invalid_state(format!(
                "allocation `{}` cannot move from {:?} to {:?}",
                self.id, self.status, next
            )));
        }
        self.status = next;
        Ok(())
    }

    pub(crate) fn resize(&mut self, new_quantity: u32) -> Result<()> {
        if new_quantity == 0 {
            return Err(ProcurementError::validation(
                "allocation quantity must be at least 1, remove the allocation instead",
            ));
        }
        if new_quantity < self.delivered_quantity {
            return Err(ProcurementError::validation(format!(
                "allocation `{}` already has {} delivered",
                self.id, self.delivered_quantity
            )));
        }
        if !self.is_active() {
            return Err(ProcurementError::invalid_state(format!(
                "allocation `{}` is cancelled",
                self.id
            )));
        }
        self.allocated_quantity = new_quantity;
        Ok(())
    }

    /// Adds `quantity` to the delivered count and moves to PARTIALLY_DELIVERED or DELIVERED.
    pub(crate) fn record_delivery(&mut self, quantity: u32, note: Option<&str>) -> Result<()> {
        if quantity == 0 {
            return Err(ProcurementError::validation(
                "delivered quantity must be at least 1",
            ));
        }
        if quantity > self.remaining_quantity() {
            return Err(ProcurementError::validation(format!(
                "allocation `{}` expects {} more units, got {}",
                self.id,
                self.remaining_quantity(),
                quantity
            )));
        }
        let delivered = self.delivered_quantity + quantity;
        let next = if delivered == self.allocated_quantity {
            AllocationStatus::Delivered
        } else {
            AllocationStatus::PartiallyDelivered
        };
        self.transition(next)?;
        self.delivered_quantity = delivered;
        if next == AllocationStatus::Delivered {
            self.delivered_at = Some(TimeStamp::new());
        }
        if let Some(note) = note {
            self.notes.push(note.to_string());
        }
        Ok(())
    }

    pub(crate) fn cancel(&mut self, reason: &str) -> Result<()> {
        self.transition(AllocationStatus::Cancelled)?;
        self.cancelled_at = Some(TimeStamp::new());
        self.notes.push(format!("cancelled: {}", reason));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn allocation(quantity: u32) -> OrderAllocation {
        OrderAllocation {
            id: "alloc_test".into(),
            request_id: "req_test".into(),
            item_id: "item_test".into(),
            supplier_id: "sup_a".into(),
            grouped_order_id: Some("grp_test".into()),
            supplier_order: None,
            allocated_quantity: quantity,
            delivered_quantity: 0,
            estimated_price: Money::from_major(50),
            currency: Currency::EUR,
            status: AllocationStatus::Allocated,
            notes: vec![],
            created_at: TimeStamp::new(),
            delivered_at: None,
            cancelled_at: None,
        }
    }

    #[test]
    fn delivery_progresses_to_delivered() {
        let mut alloc = allocation(5);

        alloc.record_delivery(2, None).unwrap();
        assert_eq!(alloc.status, AllocationStatus::PartiallyDelivered);
        assert!(alloc.delivered_at.is_none());

        alloc.record_delivery(3, Some("second pallet")).unwrap();
        assert_eq!(alloc.status, AllocationStatus::Delivered);
        assert!(alloc.delivered_at.is_some());
        assert!(alloc.record_delivery(1, None).is_err());
    }

    #[test]
    fn over_delivery_is_rejected() {
        let mut alloc = allocation(2);
        assert!(matches!(
            alloc.record_delivery(3, None),
            Err(ProcurementError::Validation(_))
        ));
        assert_eq!(alloc.delivered_quantity, 0);
    }

    #[test]
    fn back_order_only_before_delivery() {
        assert!(AllocationStatus::Allocated.can_transition_to(AllocationStatus::BackOrdered));
        assert!(AllocationStatus::Confirmed.can_transition_to(AllocationStatus::BackOrdered));
        assert!(!AllocationStatus::PartiallyDelivered.can_transition_to(AllocationStatus::BackOrdered));
        assert!(!AllocationStatus::Cancelled.can_transition_to(AllocationStatus::Allocated));
    }
}
