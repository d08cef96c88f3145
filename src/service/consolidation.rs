//! Consolidation engine: grouped orders, threshold tracking and the hand-off to supplier orders
use super::ProcurementService;
use crate::allocation::SupplierOrderLink;
use crate::catalog::Supplier;
use crate::error::{ProcurementError, Result};
use crate::grouped_order::{GroupedOrder, GroupedOrderStatus, ThresholdProgress};
use crate::locks::LockKey;
use crate::notify::Event;
use crate::supplier_order::SupplierOrderRef;
use crate::types::{Money, TimeStamp};
use crate::unit_of_work::UnitOfWork;
use std::collections::BTreeSet;
use tracing::{debug, info, instrument, warn};

impl ProcurementService {
    /// The supplier's OPEN or THRESHOLD_REACHED order, created if none exists.
    #[instrument(skip(self))]
    pub fn create_or_get_open_order(&self, supplier_id: &str) -> Result<GroupedOrder> {
        let supplier = self.catalog.supplier(supplier_id)?;

        self.locked(
            || Ok(BTreeSet::from([LockKey::Supplier(supplier_id.to_string())])),
            |uow| {
                let order_id = self.open_order_in(uow, &supplier)?;
                Ok(uow.order(&order_id)?.clone())
            },
        )
    }

    /// Recompute the order amount from its allocations and store it.
    #[instrument(skip(self))]
    pub fn recalculate_amount(&self, order_id: &str) -> Result<Money> {
        self.locked(
            || self.order_keys(order_id, false),
            |uow| self.recalculate_in(uow, order_id),
        )
    }

    /// Advance an OPEN order whose amount reached the supplier threshold.
    #[instrument(skip(self))]
    pub fn check_and_update_threshold_status(&self, order_id: &str) -> Result<GroupedOrder> {
        self.locked(
            || self.order_keys(order_id, false),
            |uow| {
                self.check_threshold_in(uow, order_id)?;
                Ok(uow.order(order_id)?.clone())
            },
        )
    }

    #[instrument(skip(self))]
    pub fn validate(&self, order_id: &str, validator: &str) -> Result<GroupedOrder> {
        if validator.trim().is_empty() {
            return Err(ProcurementError::validation("validator is empty"));
        }

        self.locked(
            || self.order_keys(order_id, false),
            |uow| {
                self.validate_in(uow, order_id, validator)?;
                Ok(uow.order(order_id)?.clone())
            },
        )
    }

    /// Turn a validated grouped order into a binding supplier order.
    #[instrument(skip(self))]
    pub fn convert_to_supplier_order(&self, order_id: &str) -> Result<SupplierOrderRef> {
        self.locked(
            || self.order_keys(order_id, false),
            |uow| {
                let order = uow.order(order_id)?.clone();
                if order.status != GroupedOrderStatus::Validated {
                    return Err(ProcurementError::invalid_state(format!(
                        "grouped order `{}` is {:?}; only validated orders can be ordered",
                        order_id, order.status
                    )));
                }
                let active: Vec<_> = uow
                    .order_allocations(order_id)?
                    .into_iter()
                    .filter(|allocation| allocation.is_active())
                    .collect();

                let supplier_order = self
                    .supplier_orders
                    .create_from_grouped_order(&order, &active)?;

                for allocation in &active {
                    let line = supplier_order.line_for(&allocation.id).ok_or_else(|| {
                        anyhow::anyhow!(
                            "supplier order `{}` has no line for allocation `{}`",
                            supplier_order.supplier_order_id,
                            allocation.id
                        )
                    })?;
                    uow.allocation_mut(&allocation.id)?.supplier_order = Some(SupplierOrderLink {
                        supplier_order_id: supplier_order.supplier_order_id.clone(),
                        order_item_id: line.order_item_id.clone(),
                    });
                }

                let order = uow.order_mut(order_id)?;
                order.transition(GroupedOrderStatus::Ordered)?;
                order.supplier_order_id = Some(supplier_order.supplier_order_id.clone());
                order.ordered_at = Some(TimeStamp::new());
                info!(
                    order = %order_id,
                    supplier_order = %supplier_order.supplier_order_id,
                    lines = supplier_order.lines.len(),
                    "grouped order converted"
                );

                let snapshot = order.clone();
                uow.emit(Event::OrderCreated {
                    order: snapshot,
                    supplier_order: supplier_order.clone(),
                });
                Ok(supplier_order)
            },
        )
    }

    /// Cancel a grouped order and release every active allocation back to its item.
    #[instrument(skip(self))]
    pub fn cancel_order(&self, order_id: &str, reason: &str) -> Result<GroupedOrder> {
        self.locked(
            || self.order_keys(order_id, true),
            |uow| {
                let status = uow.order(order_id)?.status;
                if matches!(
                    status,
                    GroupedOrderStatus::Ordered | GroupedOrderStatus::Delivered
                ) {
                    return Err(ProcurementError::invalid_state(format!(
                        "grouped order `{}` is already {:?} with the supplier",
                        order_id, status
                    )));
                }
                uow.order_mut(order_id)?.cancel(reason)?;

                let allocations = uow.order_allocations(order_id)?;
                for allocation in allocations.iter().filter(|a| a.is_active()) {
                    uow.request_mut(&allocation.request_id)?
                        .item_mut(&allocation.item_id)?
                        .release(allocation.allocated_quantity)?;
                    uow.allocation_mut(&allocation.id)?.cancel(reason)?;
                }

                self.recalculate_in(uow, order_id)?;
                info!(order = %order_id, released = allocations.len(), reason = %reason, "grouped order cancelled");
                Ok(uow.order(order_id)?.clone())
            },
        )
    }

    /// Toggle validation-on-threshold for an order that still accepts changes.
    #[instrument(skip(self))]
    pub fn set_auto_validate(&self, order_id: &str, auto_validate: bool) -> Result<GroupedOrder> {
        self.locked(
            || self.order_keys(order_id, false),
            |uow| {
                let order = uow.order_mut(order_id)?;
                order.ensure_modifiable()?;
                order.auto_validate_on_threshold = auto_validate;
                Ok(order.clone())
            },
        )
    }

    /// Sweep: re-check every open order whose threshold alert has not gone out.
    /// Returns the number of alerts emitted. An order that fails its check is logged and
    /// skipped; the rest of the sweep carries on.
    #[instrument(skip(self))]
    pub fn check_and_send_threshold_alerts(&self) -> Result<usize> {
        let candidates: Vec<String> = self
            .store
            .grouped_orders()?
            .into_iter()
            .filter(|order| order.status.is_open() && !order.threshold_alert_sent)
            .map(|order| order.id)
            .collect();

        let mut alerts = 0;
        let mut failed = 0;
        for order_id in &candidates {
            let checked = self.locked(
                || self.order_keys(order_id, false),
                |uow| {
                    let before = uow.order(order_id)?.threshold_alert_sent;
                    self.check_threshold_in(uow, order_id)?;
                    Ok(!before && uow.order(order_id)?.threshold_alert_sent)
                },
            );
            match checked {
                Ok(true) => alerts += 1,
                Ok(false) => {}
                Err(err) => {
                    failed += 1;
                    warn!(order = %order_id, error = %err, "threshold check failed, order skipped");
                }
            }
        }
        debug!(checked = candidates.len(), alerts, failed, "threshold sweep finished");
        Ok(alerts)
    }

    pub fn threshold_progress(&self, order_id: &str) -> Result<ThresholdProgress> {
        let order = self.get_order(order_id)?;
        let supplier = self.catalog.supplier(&order.supplier_id)?;
        Ok(order.threshold_progress(supplier.threshold()))
    }

    pub fn get_order(&self, order_id: &str) -> Result<GroupedOrder> {
        self.store
            .grouped_order(order_id)?
            .ok_or_else(|| ProcurementError::not_found("grouped order", order_id))
    }

    pub fn list_orders(&self, status: Option<GroupedOrderStatus>) -> Result<Vec<GroupedOrder>> {
        Ok(self
            .store
            .grouped_orders()?
            .into_iter()
            .filter(|order| status.is_none_or(|status| order.status == status))
            .collect())
    }

    pub fn orders_for_supplier(&self, supplier_id: &str) -> Result<Vec<GroupedOrder>> {
        let mut orders = Vec::new();
        for order_id in self.store.grouped_order_ids_for_supplier(supplier_id)? {
            orders.push(self.get_order(&order_id)?);
        }
        orders.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(orders)
    }

    pub(crate) fn open_order_in(&self, uow: &mut UnitOfWork<'_>, supplier: &Supplier) -> Result<String> {
        if let Some(order_id) = uow.open_order_for_supplier(&supplier.id)? {
            return Ok(order_id);
        }

        let auto_validate = supplier
            .auto_validate_on_threshold
            .unwrap_or(self.config.auto_validate_on_threshold);
        let order = GroupedOrder::new(&supplier.id, supplier.currency, auto_validate)?;
        info!(order = %order.id, supplier = %supplier.id, auto_validate, "grouped order opened");

        let order_id = order.id.clone();
        uow.insert_order(order);
        Ok(order_id)
    }

    pub(crate) fn recalculate_in(&self, uow: &mut UnitOfWork<'_>, order_id: &str) -> Result<Money> {
        let allocations = uow.order_allocations(order_id)?;
        let order = uow.order_mut(order_id)?;
        let amount = order.recalculate_amount(&allocations)?;
        debug!(order = %order_id, amount = %amount, "grouped order amount recalculated");
        Ok(amount)
    }

    pub(crate) fn check_threshold_in(&self, uow: &mut UnitOfWork<'_>, order_id: &str) -> Result<()> {
        let order = uow.order(order_id)?;
        if !order.status.is_open() {
            return Ok(());
        }
        let supplier = self.catalog.supplier(&order.supplier_id)?;
        let progress = order.threshold_progress(supplier.threshold());
        if !progress.reached {
            return Ok(());
        }

        let order = uow.order_mut(order_id)?;
        let crossed = order.status == GroupedOrderStatus::Open;
        if crossed {
            order.transition(GroupedOrderStatus::ThresholdReached)?;
            info!(order = %order_id, amount = %order.current_amount, "threshold reached");
        }
        if !order.threshold_alert_sent {
            order.threshold_alert_sent = true;
            let snapshot = order.clone();
            uow.emit(Event::ThresholdReached(snapshot));
        }

        let order = uow.order(order_id)?;
        if crossed && order.auto_validate_on_threshold && order.can_be_validated() {
            let validator = self.config.system_validator.clone();
            self.validate_in(uow, order_id, &validator)?;
        }
        Ok(())
    }

    pub(crate) fn validate_in(
        &self,
        uow: &mut UnitOfWork<'_>,
        order_id: &str,
        validator: &str,
    ) -> Result<()> {
        let active = uow
            .order_allocations(order_id)?
            .iter()
            .filter(|allocation| allocation.is_active())
            .count();

        let order = uow.order_mut(order_id)?;
        if active == 0 {
            return Err(ProcurementError::invalid_state(format!(
                "grouped order `{}` has no active allocations",
                order_id
            )));
        }
        order.validate(validator)?;
        info!(order = %order_id, validator = %validator, amount = %order.current_amount, "grouped order validated");

        let snapshot = order.clone();
        uow.emit(Event::OrderValidated(snapshot));
        Ok(())
    }
}
