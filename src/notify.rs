//! Fire-and-forget notification hooks
//!
//! Events are gathered while an operation runs and handed to the gateway only after the
//! operation's records are committed. A failing gateway is logged and otherwise ignored.
use crate::allocation::OrderAllocation;
use crate::grouped_order::GroupedOrder;
use crate::request::MaterialRequest;
use crate::supplier_order::SupplierOrderRef;
use tracing::{info, warn};

pub trait NotificationGateway: Send + Sync {
    fn on_request_submitted(&self, request: &MaterialRequest) -> anyhow::Result<()>;
    fn on_request_approved(&self, request: &MaterialRequest) -> anyhow::Result<()>;
    fn on_request_rejected(&self, request: &MaterialRequest) -> anyhow::Result<()>;
    fn on_threshold_reached(&self, order: &GroupedOrder) -> anyhow::Result<()>;
    fn on_order_validated(&self, order: &GroupedOrder) -> anyhow::Result<()>;
    fn on_order_created(
        &self,
        order: &GroupedOrder,
        supplier_order: &SupplierOrderRef,
    ) -> anyhow::Result<()>;
    fn on_delivery_received(&self, allocation: &OrderAllocation) -> anyhow::Result<()>;
}

/// Snapshot of an entity at the moment something happened to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    RequestSubmitted(MaterialRequest),
    RequestApproved(MaterialRequest),
    RequestRejected(MaterialRequest),
    ThresholdReached(GroupedOrder),
    OrderValidated(GroupedOrder),
    OrderCreated {
        order: GroupedOrder,
        supplier_order: SupplierOrderRef,
    },
    DeliveryReceived(OrderAllocation),
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::RequestSubmitted(_) => "request_submitted",
            Event::RequestApproved(_) => "request_approved",
            Event::RequestRejected(_) => "request_rejected",
            Event::ThresholdReached(_) => "threshold_reached",
            Event::OrderValidated(_) => "order_validated",
            Event::OrderCreated { .. } => "order_created",
            Event::DeliveryReceived(_) => "delivery_received",
        }
    }
    fn subject(&self) -> &str {
        match self {
            Event::RequestSubmitted(r) | Event::RequestApproved(r) | Event::RequestRejected(r) => {
                &r.id
            }
            Event::ThresholdReached(o) | Event::OrderValidated(o) => &o.id,
            Event::OrderCreated { order, .. } => &order.id,
            Event::DeliveryReceived(a) => &a.id,
        }
    }
}

pub(crate) fn dispatch(gateway: &dyn NotificationGateway, events: Vec<Event>) {
    for event in events {
        let outcome = match &event {
            Event::RequestSubmitted(r) => gateway.on_request_submitted(r),
            Event::RequestApproved(r) => gateway.on_request_approved(r),
            Event::RequestRejected(r) => gateway.on_request_rejected(r),
            Event::ThresholdReached(o) => gateway.on_threshold_reached(o),
            Event::OrderValidated(o) => gateway.on_order_validated(o),
            Event::OrderCreated {
                order,
                supplier_order,
            } => gateway.on_order_created(order, supplier_order),
            Event::DeliveryReceived(a) => gateway.on_delivery_received(a),
        };
        if let Err(err) = outcome {
            warn!(
                event = event.name(),
                subject = event.subject(),
                error = %err,
                "notification delivery failed"
            );
        }
    }
}

/// Gateway that only writes a log line per event.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingNotifier;

impl NotificationGateway for LoggingNotifier {
    fn on_request_submitted(&self, request: &MaterialRequest) -> anyhow::Result<()> {
        info!(request = %request.id, requester = %request.requester.email, "request submitted for approval");
        Ok(())
    }
    fn on_request_approved(&self, request: &MaterialRequest) -> anyhow::Result<()> {
        info!(request = %request.id, approver = ?request.approver, "request approved");
        Ok(())
    }
    fn on_request_rejected(&self, request: &MaterialRequest) -> anyhow::Result<()> {
        info!(request = %request.id, reason = ?request.rejection_reason, "request rejected");
        Ok(())
    }
    fn on_threshold_reached(&self, order: &GroupedOrder) -> anyhow::Result<()> {
        info!(order = %order.id, supplier = %order.supplier_id, amount = %order.current_amount, "free shipping threshold reached");
        Ok(())
    }
    fn on_order_validated(&self, order: &GroupedOrder) -> anyhow::Result<()> {
        info!(order = %order.id, validator = ?order.validated_by, "grouped order validated");
        Ok(())
    }
    fn on_order_created(
        &self,
        order: &GroupedOrder,
        supplier_order: &SupplierOrderRef,
    ) -> anyhow::Result<()> {
        info!(order = %order.id, supplier_order = %supplier_order.supplier_order_id, "supplier order created");
        Ok(())
    }
    fn on_delivery_received(&self, allocation: &OrderAllocation) -> anyhow::Result<()> {
        info!(allocation = %allocation.id, delivered = allocation.delivered_quantity, "delivery received");
        Ok(())
    }
}
