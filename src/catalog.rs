//! Read-only view of suppliers and catalog items owned by another subsystem
use crate::error::{ProcurementError, Result};
use crate::types::{Currency, Money};
use std::collections::HashMap;
use std::sync::RwLock;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Supplier {
    pub id: String,
    pub name: String,
    pub currency: Currency,
    /// Amount from which shipping is free. `None` or zero means no threshold.
    pub free_shipping_threshold: Option<Money>,
    /// Default for orders created for this supplier; falls back to the engine config.
    pub auto_validate_on_threshold: Option<bool>,
}

impl Supplier {
    pub fn new(id: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            currency: Currency::EUR,
            free_shipping_threshold: None,
            auto_validate_on_threshold: None,
        }
    }
    pub fn set_currency(mut self, currency: Currency) -> Self {
        self.currency = currency;
        self
    }
    pub fn set_free_shipping_threshold(mut self, threshold: Money) -> Self {
        self.free_shipping_threshold = Some(threshold);
        self
    }
    pub fn set_auto_validate(mut self, auto_validate: bool) -> Self {
        self.auto_validate_on_threshold = Some(auto_validate);
        self
    }
    pub fn threshold(&self) -> Option<Money> {
        self.free_shipping_threshold.filter(|t| !t.is_zero())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogItem {
    pub id: String,
    pub supplier_id: String,
    pub unit_price: Money,
}

pub trait CatalogReference: Send + Sync {
    /// Supplier that sells a catalog item. Fails with `NotFound` for unknown items.
    fn resolve_supplier(&self, catalog_item_id: &str) -> Result<String>;
    fn supplier(&self, supplier_id: &str) -> Result<Supplier>;
    fn unit_price(&self, catalog_item_id: &str) -> Result<Option<Money>>;
}

/// Catalog kept in memory, for embedding and tests.
#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    suppliers: RwLock<HashMap<String, Supplier>>,
    items: RwLock<HashMap<String, CatalogItem>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn with_supplier(self, supplier: Supplier) -> Self {
        self.upsert_supplier(supplier);
        self
    }
    pub fn with_item(self, catalog_item_id: &str, supplier_id: &str, unit_price: Money) -> Self {
        self.upsert_item(CatalogItem {
            id: catalog_item_id.to_string(),
            supplier_id: supplier_id.to_string(),
            unit_price,
        });
        self
    }
    pub fn upsert_supplier(&self, supplier: Supplier) {
        let mut suppliers = self
            .suppliers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        suppliers.insert(supplier.id.clone(), supplier);
    }
    pub fn upsert_item(&self, item: CatalogItem) {
        let mut items = self
            .items
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        items.insert(item.id.clone(), item);
    }

    fn item(&self, catalog_item_id: &str) -> Result<CatalogItem> {
        let items = self
            .items
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        items
            .get(catalog_item_id)
            .cloned()
            .ok_or_else(|| ProcurementError::not_found("catalog item", catalog_item_id))
    }
}

impl CatalogReference for InMemoryCatalog {
    fn resolve_supplier(&self, catalog_item_id: &str) -> Result<String> {
        self.item(catalog_item_id).map(|item| item.supplier_id)
    }
    fn supplier(&self, supplier_id: &str) -> Result<Supplier> {
        let suppliers = self
            .suppliers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        suppliers
            .get(supplier_id)
            .cloned()
            .ok_or_else(|| ProcurementError::not_found("supplier", supplier_id))
    }
    fn unit_price(&self, catalog_item_id: &str) -> Result<Option<Money>> {
        self.item(catalog_item_id).map(|item| Some(item.unit_price))
    }
}
