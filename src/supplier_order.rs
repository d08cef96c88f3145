//! Hand-off to the binding supplier order subsystem
use crate::allocation::OrderAllocation;
use crate::grouped_order::GroupedOrder;
use crate::types::{Currency, Money, TimeStamp};
use crate::utils::{ORDER_LINE_HRP, new_uuid_to_bech32};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupplierOrderLineRef {
    pub allocation_id: String,
    pub order_item_id: String,
}

/// What the subsystem hands back: the order and one line per allocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupplierOrderRef {
    pub supplier_order_id: String,
    pub lines: Vec<SupplierOrderLineRef>,
}

impl SupplierOrderRef {
    pub fn line_for(&self, allocation_id: &str) -> Option<&SupplierOrderLineRef> {
        self.lines
            .iter()
            .find(|line| line.allocation_id == allocation_id)
    }
}

pub trait SupplierOrderSubsystem: Send + Sync {
    /// Called once per grouped order, with its active allocations.
    fn create_from_grouped_order(
        &self,
        order: &GroupedOrder,
        allocations: &[OrderAllocation],
    ) -> anyhow::Result<SupplierOrderRef>;
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct SupplierOrderLine {
    #[n(0)]
    pub order_item_id: String,
    #[n(1)]
    pub allocation_id: String,
    #[n(2)]
    pub request_id: String,
    #[n(3)]
    pub item_id: String,
    #[n(4)]
    pub quantity: u32,
    #[n(5)]
    pub unit_price: Money,
}

// key is the sha256 of this struct encoded into cbor
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct SupplierOrder {
    #[n(0)]
    pub grouped_order_id: String,
    #[n(1)]
    pub supplier_id: String,
    #[n(2)]
    pub currency: Currency,
    #[n(3)]
    pub lines: Vec<SupplierOrderLine>,
    #[n(4)]
    pub total: Money,
    #[n(5)]
    pub created_at: TimeStamp,
}

/// Content-addressed supplier orders stored in their own sled tree.
pub struct SupplierOrderBook {
    tree: sled::Tree,
}

impl SupplierOrderBook {
    pub const TREE: &'static str = "supplier_orders";

    pub fn open(db: &Arc<sled::Db>) -> anyhow::Result<Self> {
        Ok(Self {
            tree: db.open_tree(Self::TREE)?,
        })
    }

    pub fn get(&self, supplier_order_id: &str) -> anyhow::Result<Option<SupplierOrder>> {
        match self.tree.get(supplier_order_id.as_bytes())? {
            Some(bytes) => Ok(Some(minicbor::decode(&bytes)?)),
            None => Ok(None),
        }
    }
}

impl SupplierOrderSubsystem for SupplierOrderBook {
    fn create_from_grouped_order(
        &self,
        order: &GroupedOrder,
        allocations: &[OrderAllocation],
    ) -> anyhow::Result<SupplierOrderRef> {
        let lines = allocations
            .iter()
            .map(|allocation| {
                Ok(SupplierOrderLine {
                    order_item_id: new_uuid_to_bech32(ORDER_LINE_HRP)?,
                    allocation_id: allocation.id.clone(),
                    request_id: allocation.request_id.clone(),
                    item_id: allocation.item_id.clone(),
                    quantity: allocation.allocated_quantity,
                    unit_price: allocation.estimated_price,
                })
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        let supplier_order = SupplierOrder {
            grouped_order_id: order.id.clone(),
            supplier_id: order.supplier_id.clone(),
            currency: order.currency,
            lines,
            total: order.current_amount,
            created_at: TimeStamp::new(),
        };

        let contents = minicbor::to_vec(&supplier_order)?;
        let hash = sha256::digest(&contents);
        self.tree.insert(hash.as_bytes(), contents)?;

        Ok(SupplierOrderRef {
            supplier_order_id: hash,
            lines: supplier_order
                .lines
                .into_iter()
                .map(|line| SupplierOrderLineRef {
                    allocation_id: line.allocation_id,
                    order_item_id: line.order_item_id,
                })
                .collect(),
        })
    }
}
