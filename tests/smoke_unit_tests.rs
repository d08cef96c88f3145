//! Smoke Screen Unit tests for procurement engine components
//!
//! These test are unit tests that span the codebase, testing behavior in
//! isolation from the workflow scenarios. These are intended as smoke-screen
//! and generally test the happy-path.
//!

use chrono::{Datelike, Utc};
use material_procurement::{
    allocation::{AllocationStatus, OrderAllocation},
    catalog::{CatalogReference, InMemoryCatalog, Supplier},
    config::ProcurementConfig,
    grouped_order::{GroupedOrder, GroupedOrderStatus, total_amount},
    invariants,
    locks::{LockKey, LockTable},
    request::{RequestDraft, RequestStatus},
    store::Store,
    types::{Currency, Money, TimeStamp},
    utils::{ALLOCATION_HRP, GROUPED_ORDER_HRP, REQUEST_HRP, new_uuid_to_bech32},
};
use std::collections::BTreeSet;

fn allocation(id: &str, quantity: u32, price: Money) -> OrderAllocation {
    OrderAllocation {
        id: id.to_string(),
        request_id: "req_smoke".into(),
        item_id: "item_smoke".into(),
        supplier_id: "sup_smoke".into(),
        grouped_order_id: None,
        supplier_order: None,
        allocated_quantity: quantity,
        delivered_quantity: 0,
        estimated_price: price,
        currency: Currency::EUR,
        status: AllocationStatus::Allocated,
        notes: Vec::new(),
        created_at: TimeStamp::new(),
        delivered_at: None,
        cancelled_at: None,
    }
}

// UTILS MODULE TESTS
#[cfg(test)]
mod utils_tests {
    use super::*;

    /// Test that every record prefix yields a bech32 id that starts with it
    #[test]
    fn ids_carry_their_prefix() {
        for hrp in [REQUEST_HRP, ALLOCATION_HRP, GROUPED_ORDER_HRP] {
            let id = new_uuid_to_bech32(hrp).unwrap();
            assert!(id.starts_with(&format!("{}1", hrp)));
        }
    }

    /// Test that consecutive ids differ
    #[test]
    fn generates_unique_ids() {
        let id1 = new_uuid_to_bech32(REQUEST_HRP).unwrap();
        let id2 = new_uuid_to_bech32(REQUEST_HRP).unwrap();
        assert_ne!(id1, id2);
    }
}

// TYPES MODULE TESTS
#[cfg(test)]
mod types_tests {
    use super::*;

    /// Test that TimeStamp can be created with specific date/time values
    #[test]
    fn timestamp_new_with_specific_values() {
        let ts = TimeStamp::new_with(2025, 3, 14, 9, 30, 0).unwrap();
        let dt = ts.to_datetime_utc();

        assert_eq!(dt.year(), 2025);
        assert_eq!(dt.month(), 3);
        assert_eq!(dt.day(), 14);
    }

    /// Test that impossible dates are refused rather than panicking
    #[test]
    fn timestamp_rejects_impossible_dates() {
        assert!(TimeStamp::new_with(2025, 2, 30, 0, 0, 0).is_none());
    }

    /// Test that a fresh TimeStamp is close to now
    #[test]
    fn timestamp_new_creates_current_time() {
        let diff = (Utc::now() - TimeStamp::new().to_datetime_utc())
            .num_seconds()
            .abs();
        assert!(diff < 1);
    }

    /// Test money arithmetic stays in minor units
    #[test]
    fn money_in_minor_units() {
        assert_eq!(Money::from_major(50).minor(), 5_000);
        assert_eq!(
            Money::from_major(50).checked_add(Money::from_minor(5)),
            Some(Money::from_minor(5_005))
        );
        assert_eq!(Money::from_major(5).saturating_sub(Money::from_major(9)), Money::ZERO);
    }
}

// REQUEST MODULE TESTS
#[cfg(test)]
mod request_tests {
    use super::*;

    /// Test that a finalised draft starts in DRAFT without items
    #[test]
    fn finalised_draft_is_empty_draft() {
        let request = RequestDraft::new()
            .set_requester("Sam Site", "sam@site.example")
            .set_project_ref("PRJ-2291")
            .validate_and_finalise()
            .unwrap();

        assert_eq!(request.status, RequestStatus::Draft);
        assert!(request.items.is_empty());
        assert_eq!(request.project_ref.as_deref(), Some("PRJ-2291"));
        assert!(request.id.starts_with(REQUEST_HRP));
    }

    /// Test that a requester without a usable email is refused
    #[test]
    fn requester_email_is_checked() {
        for email in ["", "sam", "@site.example", "sam@"] {
            let result = RequestDraft::new()
                .set_requester("Sam Site", email)
                .validate_and_finalise();
            assert!(result.is_err(), "{:?} accepted", email);
        }
    }

    /// Test the request lifecycle table
    #[test]
    fn request_transitions() {
        use RequestStatus::*;

        assert!(Draft.can_transition_to(PendingApproval));
        assert!(PendingApproval.can_transition_to(Rejected));
        assert!(Approved.can_transition_to(Integrated));
        assert!(!Draft.can_transition_to(Approved));
        assert!(!Rejected.can_transition_to(Approved));
        assert!(Rejected.is_terminal() && Integrated.is_terminal());
    }
}

// GROUPED ORDER MODULE TESTS
#[cfg(test)]
mod grouped_order_tests {
    use super::*;

    /// Test that the amount only counts active allocations attached to the order
    #[test]
    fn amount_counts_attached_active_allocations() {
        let mut order = GroupedOrder::new("sup_smoke", Currency::EUR, false).unwrap();
        order.allocation_ids = vec!["a1".into(), "a2".into()];

        let mut cancelled = allocation("a2", 3, Money::from_major(10));
        cancelled.status = AllocationStatus::Cancelled;
        let allocations = vec![
            allocation("a1", 2, Money::from_major(25)),
            cancelled,
            allocation("stray", 100, Money::from_major(1)),
        ];

        assert_eq!(order.recalculate_amount(&allocations).unwrap(), Money::from_major(50));
        assert_eq!(order.current_amount, Money::from_major(50));
        assert!(invariants::check_order_amount(&order, &allocations).is_ok());
    }

    /// Test that overflowing amounts are reported instead of wrapping
    #[test]
    fn total_amount_overflow_is_an_error() {
        let allocations = vec![
            allocation("a1", u32::MAX, Money::from_minor(u64::MAX / 2)),
            allocation("a2", 1, Money::from_minor(1)),
        ];
        assert!(total_amount(&allocations).is_err());
    }

    /// Test threshold progress with and without a threshold
    #[test]
    fn threshold_progress() {
        let mut order = GroupedOrder::new("sup_smoke", Currency::EUR, false).unwrap();
        order.current_amount = Money::from_major(320);

        let progress = order.threshold_progress(Some(Money::from_major(500)));
        assert_eq!(progress.remaining, Money::from_major(180));
        assert!(!progress.reached);

        let unset = order.threshold_progress(Some(Money::ZERO));
        assert_eq!(unset.threshold, None);
        assert!(!unset.reached);
    }

    /// Test that an order without allocations cannot be validated
    #[test]
    fn empty_order_is_not_validatable() {
        let order = GroupedOrder::new("sup_smoke", Currency::EUR, true).unwrap();
        assert_eq!(order.status, GroupedOrderStatus::Open);
        assert!(order.can_be_modified());
        assert!(!order.can_be_validated());
    }
}

// ALLOCATION MODULE TESTS
#[cfg(test)]
mod allocation_tests {
    use super::*;

    /// Test the allocation lifecycle table; delivered and cancelled lines are final
    #[test]
    fn allocation_transitions() {
        use AllocationStatus::*;

        assert!(Allocated.can_transition_to(Confirmed));
        assert!(BackOrdered.can_transition_to(Confirmed));
        assert!(Confirmed.can_transition_to(PartiallyDelivered));
        assert!(PartiallyDelivered.can_transition_to(Delivered));
        assert!(PartiallyDelivered.can_transition_to(Cancelled));
        assert!(!Confirmed.can_transition_to(Allocated));

        for terminal in [Delivered, Cancelled] {
            assert!(terminal.is_terminal());
            for next in [Allocated, Confirmed, BackOrdered, PartiallyDelivered, Delivered, Cancelled] {
                assert!(!terminal.can_transition_to(next), "{:?} -> {:?}", terminal, next);
            }
        }
    }
}


#[cfg(test)]
mod catalog_tests {
    use super::*;

    /// Test that a zero threshold counts as no threshold
    #[test]
    fn zero_threshold_is_unset() {
        let supplier = Supplier::new("sup_smoke", "Smoke Ltd").set_free_shipping_threshold(Money::ZERO);
        assert_eq!(supplier.threshold(), None);
    }

    /// Test that upserts replace suppliers in place
    #[test]
    fn upsert_replaces_supplier() {
        let catalog = InMemoryCatalog::new().with_supplier(Supplier::new("sup_smoke", "Smoke Ltd"));
        catalog.upsert_supplier(Supplier::new("sup_smoke", "Smoke Ltd").set_currency(Currency::GBP));

        assert_eq!(catalog.supplier("sup_smoke").unwrap().currency, Currency::GBP);
    }
}

// STORE MODULE TESTS
#[cfg(test)]
mod store_tests {
    use super::*;

    /// Test that an empty store answers lookups with nothing
    #[test]
    fn empty_store_has_no_records() {
        let store = Store::temporary().unwrap();

        assert!(store.request("req_missing").unwrap().is_none());
        assert!(store.grouped_orders().unwrap().is_empty());
        assert!(store.grouped_order_ids_for_supplier("sup_smoke").unwrap().is_empty());
    }
}

// LOCKS MODULE TESTS
#[cfg(test)]
mod locks_tests {
    use super::*;

    /// Test that disjoint key sets can be held at the same time
    #[test]
    fn disjoint_sets_do_not_block() {
        let table = LockTable::new();
        let supplier = table.acquire(BTreeSet::from([LockKey::Supplier("sup_a".into())]));
        let request = table.acquire(BTreeSet::from([LockKey::Request("req_a".into())]));

        assert!(table.is_held(&LockKey::Supplier("sup_a".into())));
        assert!(table.is_held(&LockKey::Request("req_a".into())));
        drop(supplier);
        drop(request);
        assert!(!table.is_held(&LockKey::Supplier("sup_a".into())));
    }
}

// CONFIG MODULE TESTS
#[cfg(test)]
mod config_tests {
    use super::*;

    /// Test that the defaults keep auto validation off
    #[test]
    fn defaults() {
        let config = ProcurementConfig::default();
        assert!(!config.consolidation.auto_validate_on_threshold);
        assert_eq!(config.consolidation.system_validator, "SYSTEM_AUTO");
        assert_eq!(config.logging.filter, "info");
    }
}
