//! Material requests and their requested lines
use crate::error::{ProcurementError, Result};
use crate::types::{Currency, Money, TimeStamp};
use crate::utils::{ITEM_HRP, REQUEST_HRP, new_uuid_to_bech32};

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, Eq, Ord, PartialEq, PartialOrd, Hash)]
pub enum RequestStatus {
    #[n(0)]
    Draft,
    #[n(1)]
    PendingApproval,
    #[n(2)]
    Approved,
    #[n(3)]
    Rejected,
    #[n(4)]
    Integrated,
}

impl RequestStatus {
    /// Transition table for the request lifecycle.
    pub fn can_transition_to(self, next: RequestStatus) -> bool {
        use RequestStatus::*;

        matches!(
            (self, next),
            (Draft, PendingApproval)
                | (PendingApproval, Approved)
                | (PendingApproval, Rejected)
                | (Approved, Integrated)
        )
    }
    pub fn is_terminal(self) -> bool {
        matches!(self, RequestStatus::Rejected | RequestStatus::Integrated)
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum RequestContext {
    #[n(0)]
    Internal,
    #[n(1)]
    Sales,
    #[n(2)]
    Installation,
    #[n(3)]
    Rental,
    #[n(4)]
    Maintenance,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, Eq, Ord, PartialEq, PartialOrd, Hash)]
pub enum Urgency {
    #[n(0)]
    Low,
    #[n(1)]
    Normal,
    #[n(2)]
    High,
    #[n(3)]
    Critical,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Eq, PartialEq)]
pub struct Requester {
    #[n(0)]
    pub name: String,
    #[n(1)]
    pub email: String,
}

/// Where a requested line comes from.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Eq, PartialEq)]
pub enum ItemSource {
    #[n(0)]
    Catalog {
        #[n(0)]
        catalog_item_id: String,
    },
    #[n(1)]
    FreeText,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Eq, PartialEq)]
pub struct MaterialRequestItem {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub source: ItemSource,
    #[n(2)]
    pub description: String,
    #[n(3)]
    pub requested_quantity: u32,
    #[n(4)]
    pub unit_price: Money, // estimate, snapshotted into allocations
    #[n(5)]
    pub currency: Currency,
    #[n(6)]
    pub quantity_allocated: u32,
    #[n(7)]
    pub quantity_delivered: u32,
    #[n(8)]
    pub supplier_override: Option<String>,
    #[n(9)]
    pub allocation_ids: Vec<String>,
}

impl MaterialRequestItem {
    pub fn quantity_pending(&self) -> u32 {
        self.requested_quantity
            .saturating_sub(self.quantity_allocated)
    }
    pub fn catalog_item_id(&self) -> Option<&str> {
        match &self.source {
            ItemSource::Catalog { catalog_item_id } => Some(catalog_item_id),
            ItemSource::FreeText => None,
        }
    }
    /// Commit `quantity` units of the pending quantity.
    pub(crate) fn reserve(&mut self, quantity: u32) -> Result<()> {
        if quantity == 0 {
            return Err(ProcurementError::validation(
                "allocated quantity must be at least 1",
            ));
        }
        if quantity > self.quantity_pending() {
            return Err(ProcurementError::validation(format!(
                "cannot allocate {} units of item `{}`: only {} pending",
                quantity,
                self.id,
                self.quantity_pending()
            )));
        }
        self.quantity_allocated += quantity;
        Ok(())
    }
    /// Give back `quantity` previously committed units.
    pub(crate) fn release(&mut self, quantity: u32) -> Result<()> {
        let remaining = self.quantity_allocated.checked_sub(quantity).ok_or_else(|| {
            ProcurementError::validation(format!(
                "cannot release {} units of item `{}`: only {} allocated",
                quantity, self.id, self.quantity_allocated
            ))
        })?;
        if remaining < self.quantity_delivered {
            return Err(ProcurementError::validation(format!(
                "cannot release {} units of item `{}`: {} already delivered",
                quantity, self.id, self.quantity_delivered
            )));
        }
        self.quantity_allocated = remaining;
        Ok(())
    }
    pub(crate) fn record_delivered(&mut self, quantity: u32) -> Result<()> {
        let delivered = self.quantity_delivered.saturating_add(quantity);
        if delivered > self.quantity_allocated {
            return Err(ProcurementError::validation(format!(
                "item `{}` would have {} delivered for {} allocated",
                self.id, delivered, self.quantity_allocated
            )));
        }
        self.quantity_delivered = delivered;
        Ok(())
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Eq, PartialEq)]
pub struct MaterialRequest {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub requester: Requester,
    #[n(2)]
    pub context: RequestContext,
    #[n(3)]
    pub project_ref: Option<String>,
    #[n(4)]
    pub urgency: Urgency,
    #[n(5)]
    pub status: RequestStatus,
    #[n(6)]
    pub items: Vec<MaterialRequestItem>,
    #[n(7)]
    pub approver: Option<String>,
    #[n(8)]
    pub rejection_reason: Option<String>,
    #[n(9)]
    pub created_at: TimeStamp,
    #[n(10)]
    pub submitted_at: Option<TimeStamp>,
    #[n(11)]
    pub approved_at: Option<TimeStamp>,
    #[n(12)]
    pub rejected_at: Option<TimeStamp>,
    #[n(13)]
    pub integrated_at: Option<TimeStamp>,
}

impl MaterialRequest {
    pub fn item(&self, item_id: &str) -> Result<&MaterialRequestItem> {
        self.items
            .iter()
            .find(|item| item.id == item_id)
            .ok_or_else(|| ProcurementError::not_found("request item", item_id))
    }
    pub(crate) fn item_mut(&mut self, item_id: &str) -> Result<&mut MaterialRequestItem> {
        self.items
            .iter_mut()
            .find(|item| item.id == item_id)
            .ok_or_else(|| ProcurementError::not_found("request item", item_id))
    }
    pub fn is_fully_allocated(&self) -> bool {
        self.items.iter().all(|item| item.quantity_pending() == 0)
    }
    pub fn total_estimate(&self) -> Option<Money> {
        self.items.iter().try_fold(Money::ZERO, |acc, item| {
            acc.checked_add(item.unit_price.checked_mul(item.requested_quantity)?)
        })
    }

    pub(crate) fn transition(&mut self, next: RequestStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(ProcurementError::invalid_state(format!(
                "request `{}` cannot move from {:?} to {:?}",
                self.id, self.status, next
            )));
        }
        self.status = next;
        Ok(())
    }
    pub(crate) fn ensure_draft(&self, action: &str) -> Result<()> {
        if self.status != RequestStatus::Draft {
            return Err(ProcurementError::invalid_state(format!(
                "cannot {} on request `{}` in {:?}; only drafts can be edited",
                action, self.id, self.status
            )));
        }
        Ok(())
    }
    pub(crate) fn submit(&mut self) -> Result<()> {
        self.ensure_draft("submit")?;
        if self.items.is_empty() {
            return Err(ProcurementError::invalid_state(format!(
                "request `{}` has no items",
                self.id
            )));
        }
        self.transition(RequestStatus::PendingApproval)?;
        self.submitted_at = Some(TimeStamp::new());
        Ok(())
    }
    pub(crate) fn approve(&mut self, approver: &str) -> Result<()> {
        self.transition(RequestStatus::Approved)?;
        self.approver = Some(approver.to_string());
        self.approved_at = Some(TimeStamp::new());
        Ok(())
    }
    pub(crate) fn reject(&mut self, reason: &str) -> Result<()> {
        self.transition(RequestStatus::Rejected)?;
        self.rejection_reason = Some(reason.to_string());
        self.rejected_at = Some(TimeStamp::new());
        Ok(())
    }
    pub(crate) fn mark_integrated(&mut self) -> Result<()> {
        self.transition(RequestStatus::Integrated)?;
        self.integrated_at = Some(TimeStamp::new());
        Ok(())
    }
}

/// Builder for a new draft request.
#[derive(Debug, Clone)]
pub struct RequestDraft {
    pub requester_name: String,
    pub requester_email: String,
    pub context: RequestContext,
    pub project_ref: Option<String>,
    pub urgency: Urgency,
}

impl Default for RequestDraft {
    fn default() -> Self {
        Self {
            requester_name: String::new(),
            requester_email: String::new(),
            context: RequestContext::Internal,
            project_ref: None,
            urgency: Urgency::Normal,
        }
    }
}

impl RequestDraft {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn set_requester(mut self, name: &str, email: &str) -> Self {
        self.requester_name = name.trim().to_string();
        self.requester_email = email.trim().to_string();
        self
    }
    pub fn set_context(mut self, context: RequestContext) -> Self {
        self.context = context;
        self
    }
    pub fn set_project_ref(mut self, project_ref: &str) -> Self {
        self.project_ref = Some(project_ref.to_string());
        self
    }
    pub fn set_urgency(mut self, urgency: Urgency) -> Self {
        self.urgency = urgency;
        self
    }
    // Checks the requester fields, then produces an empty DRAFT request
    pub fn validate_and_finalise(self) -> Result<MaterialRequest> {
        if self.requester_name.is_empty() {
            return Err(ProcurementError::validation("requester name is empty"));
        }
        let at = self.requester_email.find('@');
        if !matches!(at, Some(pos) if pos > 0 && pos + 1 < self.requester_email.len()) {
            return Err(ProcurementError::validation(format!(
                "`{}` is not a valid requester email",
                self.requester_email
            )));
        }

        Ok(MaterialRequest {
            id: new_uuid_to_bech32(REQUEST_HRP)?,
            requester: Requester {
                name: self.requester_name,
                email: self.requester_email,
            },
            context: self.context,
            project_ref: self.project_ref,
            urgency: self.urgency,
            status: RequestStatus::Draft,
            items: Vec::new(),
            approver: None,
            rejection_reason: None,
            created_at: TimeStamp::new(),
            submitted_at: None,
            approved_at: None,
            rejected_at: None,
            integrated_at: None,
        })
    }
}

/// A line to add to a draft request.
#[derive(Debug, Clone)]
pub struct NewItem {
    pub source: ItemSource,
    pub description: String,
    pub quantity: u32,
    pub unit_price: Option<Money>,
    pub currency: Currency,
    pub supplier_override: Option<String>,
}

impl NewItem {
    pub fn catalog(catalog_item_id: &str, quantity: u32) -> Self {
        Self {
            source: ItemSource::Catalog {
                catalog_item_id: catalog_item_id.to_string(),
            },
            description: String::new(),
            quantity,
            unit_price: None,
            currency: Currency::EUR,
            supplier_override: None,
        }
    }
    pub fn free_text(description: &str, quantity: u32) -> Self {
        Self {
            source: ItemSource::FreeText,
            description: description.to_string(),
            quantity,
            unit_price: None,
            currency: Currency::EUR,
            supplier_override: None,
        }
    }
    pub fn set_description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }
    pub fn set_unit_price(mut self, price: Money) -> Self {
        self.unit_price = Some(price);
        self
    }
    pub fn set_currency(mut self, currency: Currency) -> Self {
        self.currency = currency;
        self
    }
    pub fn set_supplier_override(mut self, supplier_id: &str) -> Self {
        self.supplier_override = Some(supplier_id.to_string());
        self
    }

    /// `catalog_price` is the catalog's current unit price, used when no estimate was given.
    pub(crate) fn into_item(self, catalog_price: Option<Money>) -> Result<MaterialRequestItem> {
        if self.quantity == 0 {
            return Err(ProcurementError::validation(
                "requested quantity must be at least 1",
            ));
        }
        if matches!(self.source, ItemSource::FreeText) && self.description.trim().is_empty() {
            return Err(ProcurementError::validation(
                "free-text items need a description",
            ));
        }
        let unit_price = self.unit_price.or(catalog_price).ok_or_else(|| {
            ProcurementError::validation("no unit price estimate for the item")
        })?;

        Ok(MaterialRequestItem {
            id: new_uuid_to_bech32(ITEM_HRP)?,
            source: self.source,
            description: self.description,
            requested_quantity: self.quantity,
            unit_price,
            currency: self.currency,
            quantity_allocated: 0,
            quantity_delivered: 0,
            supplier_override: self.supplier_override,
            allocation_ids: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft() -> MaterialRequest {
        RequestDraft::new()
            .set_requester("Ana", "ana@rental.example")
            .validate_and_finalise()
            .unwrap()
    }

    #[test]
    fn empty_request_cannot_leave_draft() {
        let mut request = draft();
        assert!(matches!(
            request.submit(),
            Err(ProcurementError::InvalidState(_))
        ));
        assert_eq!(request.status, RequestStatus::Draft);
    }

    #[test]
    fn item_reserve_and_release_round_trip() {
        let mut item = NewItem::free_text("cable drum", 10)
            .set_unit_price(Money::from_major(5))
            .into_item(None)
            .unwrap();

        item.reserve(4).unwrap();
        assert_eq!(item.quantity_pending(), 6);
        assert!(item.reserve(7).is_err());
        item.release(4).unwrap();
        assert_eq!(item.quantity_allocated, 0);
        assert!(item.release(1).is_err());
    }

    #[test]
    fn rejected_is_terminal() {
        for next in [
            RequestStatus::Draft,
            RequestStatus::PendingApproval,
            RequestStatus::Approved,
            RequestStatus::Integrated,
        ] {
            assert!(!RequestStatus::Rejected.can_transition_to(next));
            assert!(!RequestStatus::Integrated.can_transition_to(next));
        }
    }
}
