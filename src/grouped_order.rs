//! Per-supplier staging orders that accumulate allocations until they become binding
use crate::allocation::OrderAllocation;
use crate::error::{ProcurementError, Result};
use crate::types::{Currency, Money, TimeStamp};
use crate::utils::{GROUPED_ORDER_HRP, new_uuid_to_bech32};

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, Eq, Ord, PartialEq, PartialOrd, Hash)]
pub enum GroupedOrderStatus {
    #[n(0)]
    Open,
    #[n(1)]
    ThresholdReached,
    #[n(2)]
    Validated,
    #[n(3)]
    Ordered,
    #[n(4)]
    Delivered,
    #[n(5)]
    Cancelled,
}

impl GroupedOrderStatus {
    pub fn can_transition_to(self, next: GroupedOrderStatus) -> bool {
        use GroupedOrderStatus::*;

        matches!(
            (self, next),
            (Open, ThresholdReached)
                | (Open | ThresholdReached, Validated)
                | (Validated, Ordered)
                | (Ordered, Delivered)
                | (Open | ThresholdReached | Validated, Cancelled)
        )
    }
    /// OPEN and THRESHOLD_REACHED orders still accept allocations.
    pub fn is_open(self) -> bool {
        matches!(
            self,
            GroupedOrderStatus::Open | GroupedOrderStatus::ThresholdReached
        )
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Eq, PartialEq)]
pub struct GroupedOrder {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub supplier_id: String,
    #[n(2)]
    pub currency: Currency,
    #[n(3)]
    pub status: GroupedOrderStatus,
    // derived from the allocations, see `recalculate_amount`
    #[n(4)]
    pub current_amount: Money,
    #[n(5)]
    pub threshold_alert_sent: bool,
    #[n(6)]
    pub auto_validate_on_threshold: bool,
    #[n(7)]
    pub validated_by: Option<String>,
    #[n(8)]
    pub validated_at: Option<TimeStamp>,
    #[n(9)]
    pub supplier_order_id: Option<String>,
    #[n(10)]
    pub allocation_ids: Vec<String>,
    #[n(11)]
    pub notes: Vec<String>,
    #[n(12)]
    pub created_at: TimeStamp,
    #[n(13)]
    pub ordered_at: Option<TimeStamp>,
    #[n(14)]
    pub cancelled_at: Option<TimeStamp>,
    #[n(15)]
    pub delivered_at: Option<TimeStamp>,
}

/// How far an order is from its supplier's free-shipping threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThresholdProgress {
    pub current_amount: Money,
    pub threshold: Option<Money>,
    pub remaining: Money,
    pub reached: bool,
}

/// Sum of `estimated_price * allocated_quantity` over the active allocations.
pub fn total_amount<'a, I>(allocations: I) -> Result<Money>
where
    I: IntoIterator<Item = &'a OrderAllocation>,
{
    allocations
        .into_iter()
        .filter(|allocation| allocation.is_active())
        .try_fold(Money::ZERO, |acc, allocation| {
            allocation
                .line_amount()
                .and_then(|line| acc.checked_add(line))
        })
        .ok_or_else(|| ProcurementError::validation("grouped order amount overflows"))
}

impl GroupedOrder {
    pub fn new(supplier_id: &str, currency: Currency, auto_validate: bool) -> Result<Self> {
        Ok(Self {
            id: new_uuid_to_bech32(GROUPED_ORDER_HRP)?,
            supplier_id: supplier_id.to_string(),
            currency,
            status: GroupedOrderStatus::Open,
            current_amount: Money::ZERO,
            threshold_alert_sent: false,
            auto_validate_on_threshold: auto_validate,
            validated_by: None,
            validated_at: None,
            supplier_order_id: None,
            allocation_ids: Vec::new(),
            notes: Vec::new(),
            created_at: TimeStamp::new(),
            ordered_at: None,
            cancelled_at: None,
            delivered_at: None,
        })
    }

    pub fn can_be_modified(&self) -> bool {
        self.status.is_open()
    }
    pub fn can_be_validated(&self) -> bool {
        self.can_be_modified() && !self.allocation_ids.is_empty()
    }

    /// Recomputes `current_amount` from the given allocations; only the ones attached to
    /// this order count. Calling it again with the same allocations yields the same amount.
    pub fn recalculate_amount<'a, I>(&mut self, allocations: I) -> Result<Money>
    where
        I: IntoIterator<Item = &'a OrderAllocation>,
    {
        let amount = total_amount(
            allocations
                .into_iter()
                .filter(|allocation| self.allocation_ids.contains(&allocation.id)),
        )?;
        self.current_amount = amount;
        Ok(amount)
    }

    pub fn threshold_progress(&self, threshold: Option<Money>) -> ThresholdProgress {
        let threshold = threshold.filter(|t| !t.is_zero());
        match threshold {
            Some(t) => ThresholdProgress {
                current_amount: self.current_amount,
                threshold: Some(t),
                remaining: t.saturating_sub(self.current_amount),
                reached: self.current_amount >= t,
            },
            None => ThresholdProgress {
                current_amount: self.current_amount,
                threshold: None,
                remaining: Money::ZERO,
                reached: false,
            },
        }
    }

    pub(crate) fn transition(&mut self, next: GroupedOrderStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(ProcurementError::invalid_state(format!(
                "grouped order `{}` cannot move from {:?} to {:?}",
                self.id, self.status, next
            )));
        }
        self.status = next;
        Ok(())
    }

    pub(crate) fn ensure_modifiable(&self) -> Result<()> {
        if !self.can_be_modified() {
            return Err(ProcurementError::invalid_state(format!(
                "grouped order `{}` is {:?} and can no longer be modified",
                self.id, self.status
            )));
        }
        Ok(())
    }

    pub(crate) fn attach(&mut self, allocation_id: &str) {
        if !self.allocation_ids.iter().any(|id| id == allocation_id) {
            self.allocation_ids.push(allocation_id.to_string());
        }
    }
    pub(crate) fn detach(&mut self, allocation_id: &str) {
        self.allocation_ids.retain(|id| id != allocation_id);
    }

    pub(crate) fn validate(&mut self, validator: &str) -> Result<()> {
        if !self.can_be_validated() {
            return Err(ProcurementError::invalid_state(format!(
                "grouped order `{}` in {:?} with {} allocations cannot be validated",
                self.id,
                self.status,
                self.allocation_ids.len()
            )));
        }
        self.transition(GroupedOrderStatus::Validated)?;
        self.validated_by = Some(validator.to_string());
        self.validated_at = Some(TimeStamp::new());
        Ok(())
    }

    pub(crate) fn cancel(&mut self, reason: &str) -> Result<()> {
        self.transition(GroupedOrderStatus::Cancelled)?;
        self.cancelled_at = Some(TimeStamp::new());
        self.notes.push(format!("cancelled: {}", reason));
        Ok(())
    }
}
