pub mod allocation;
pub mod catalog;
pub mod config;
pub mod error;
pub mod grouped_order;
pub mod invariants;
pub mod locks;
pub mod logging;
pub mod notify;
pub mod request;
pub mod service;
pub mod store;
pub mod supplier_order;
pub mod types;
mod unit_of_work;
pub mod utils;

pub use allocation::{AllocationStatus, OrderAllocation};
pub use catalog::{CatalogReference, InMemoryCatalog, Supplier};
pub use crate::config::ProcurementConfig;
pub use error::{ProcurementError, Result};
pub use grouped_order::{GroupedOrder, GroupedOrderStatus, ThresholdProgress};
pub use notify::{Event, LoggingNotifier, NotificationGateway};
pub use request::{MaterialRequest, MaterialRequestItem, NewItem, RequestDraft, RequestStatus};
pub use service::ProcurementService;
pub use supplier_order::{SupplierOrderRef, SupplierOrderSubsystem};
pub use types::{Currency, Money, TimeStamp};
