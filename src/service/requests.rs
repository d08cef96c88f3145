//! Request ledger: drafting, submission, approval and integration of material requests
use super::ProcurementService;
use crate::allocation::OrderAllocation;
use crate::error::{ProcurementError, Result};
use crate::locks::LockKey;
use crate::notify::Event;
use crate::request::{
    ItemSource, MaterialRequest, MaterialRequestItem, NewItem, RequestDraft, RequestStatus,
};
use crate::unit_of_work::UnitOfWork;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{info, instrument};

impl ProcurementService {
    /// Create a new DRAFT request
    #[instrument(skip(self, draft))]
    pub fn create_request(&self, draft: RequestDraft) -> Result<MaterialRequest> {
        let request = draft.validate_and_finalise()?;
        let request_id = request.id.clone();

        self.locked(
            || Ok(BTreeSet::from([LockKey::Request(request_id.clone())])),
            |uow| {
                info!(request = %request.id, requester = %request.requester.email, "request drafted");
                uow.insert_request(request.clone());
                Ok(request)
            },
        )
    }

    pub fn get_request(&self, request_id: &str) -> Result<MaterialRequest> {
        self.store
            .request(request_id)?
            .ok_or_else(|| ProcurementError::not_found("material request", request_id))
    }

    pub fn list_requests(&self, status: Option<RequestStatus>) -> Result<Vec<MaterialRequest>> {
        Ok(self
            .store
            .requests()?
            .into_iter()
            .filter(|request| status.is_none_or(|status| request.status == status))
            .collect())
    }

    /// Add a line to a draft. Catalog lines default to the catalog's unit price.
    #[instrument(skip(self, item))]
    pub fn add_item(&self, request_id: &str, item: NewItem) -> Result<MaterialRequestItem> {
        let catalog_price = match &item.source {
            ItemSource::Catalog { catalog_item_id } => {
                // unknown catalog items fail here rather than at approval
                self.catalog.resolve_supplier(catalog_item_id)?;
                self.catalog.unit_price(catalog_item_id)?
            }
            ItemSource::FreeText => None,
        };

        self.locked(
            || Ok(BTreeSet::from([LockKey::Request(request_id.to_string())])),
            |uow| {
                let request = uow.request_mut(request_id)?;
                request.ensure_draft("add items")?;

                let item = item.into_item(catalog_price)?;
                request.items.push(item.clone());
                info!(request = %request_id, item = %item.id, quantity = item.requested_quantity, "item added");
                Ok(item)
            },
        )
    }

    #[instrument(skip(self))]
    pub fn remove_item(&self, request_id: &str, item_id: &str) -> Result<MaterialRequestItem> {
        self.locked(
            || Ok(BTreeSet::from([LockKey::Request(request_id.to_string())])),
            |uow| {
                let request = uow.request_mut(request_id)?;
                request.ensure_draft("remove items")?;

                let position = request
                    .items
                    .iter()
                    .position(|item| item.id == item_id)
                    .ok_or_else(|| ProcurementError::not_found("request item", item_id))?;
                info!(request = %request_id, item = %item_id, "item removed");
                Ok(request.items.remove(position))
            },
        )
    }

    /// Manually pick the supplier of an item, e.g. for free-text lines.
    #[instrument(skip(self))]
    pub fn assign_supplier(
        &self,
        request_id: &str,
        item_id: &str,
        supplier_id: &str,
    ) -> Result<MaterialRequestItem> {
        self.catalog.supplier(supplier_id)?;

        self.locked(
            || Ok(BTreeSet::from([LockKey::Request(request_id.to_string())])),
            |uow| {
                let request = uow.request_mut(request_id)?;
                if !matches!(
                    request.status,
                    RequestStatus::Draft | RequestStatus::PendingApproval | RequestStatus::Approved
                ) {
                    return Err(ProcurementError::invalid_state(format!(
                        "request `{}` is {:?}; suppliers can no longer be assigned",
                        request_id, request.status
                    )));
                }
                let item = request.item_mut(item_id)?;
                item.supplier_override = Some(supplier_id.to_string());
                info!(request = %request_id, item = %item_id, supplier = %supplier_id, "supplier assigned");
                Ok(item.clone())
            },
        )
    }

    /// Submit a draft for approval
    #[instrument(skip(self))]
    pub fn submit_for_approval(&self, request_id: &str) -> Result<MaterialRequest> {
        self.locked(
            || Ok(BTreeSet::from([LockKey::Request(request_id.to_string())])),
            |uow| {
                let request = uow.request_mut(request_id)?;
                request.submit()?;
                let estimate = request.total_estimate().ok_or_else(|| {
                    ProcurementError::validation(format!(
                        "estimated total of request `{}` overflows",
                        request_id
                    ))
                })?;
                info!(request = %request_id, items = request.items.len(), estimate = %estimate, "request submitted");

                let snapshot = request.clone();
                uow.emit(Event::RequestSubmitted(snapshot.clone()));
                Ok(snapshot)
            },
        )
    }

    /// Approve a pending request and integrate it into grouped orders.
    ///
    /// Approval and integration commit together: if any item cannot be allocated the
    /// request stays PENDING_APPROVAL and nothing is written.
    #[instrument(skip(self))]
    pub fn approve(&self, request_id: &str, approver: &str) -> Result<MaterialRequest> {
        if approver.trim().is_empty() {
            return Err(ProcurementError::validation("approver is empty"));
        }

        self.locked(
            || self.integration_keys(request_id),
            |uow| {
                let request = uow.request_mut(request_id)?;
                request.approve(approver)?;
                info!(request = %request_id, approver = %approver, "request approved");
                let snapshot = request.clone();
                uow.emit(Event::RequestApproved(snapshot));

                self.integrate_in(uow, request_id)?;
                Ok(uow.request(request_id)?.clone())
            },
        )
    }

    /// Reject a pending request. Terminal.
    #[instrument(skip(self))]
    pub fn reject(&self, request_id: &str, reason: &str) -> Result<MaterialRequest> {
        if reason.trim().is_empty() {
            return Err(ProcurementError::validation("a rejection needs a reason"));
        }

        self.locked(
            || Ok(BTreeSet::from([LockKey::Request(request_id.to_string())])),
            |uow| {
                let request = uow.request_mut(request_id)?;
                request.reject(reason)?;
                info!(request = %request_id, reason = %reason, "request rejected");

                let snapshot = request.clone();
                uow.emit(Event::RequestRejected(snapshot.clone()));
                Ok(snapshot)
            },
        )
    }

    /// Allocate every pending quantity of an approved request. Safe to run again: only
    /// items with a pending quantity are touched.
    #[instrument(skip(self))]
    pub fn integrate_to_grouped_orders(&self, request_id: &str) -> Result<Vec<OrderAllocation>> {
        self.locked(
            || self.integration_keys(request_id),
            |uow| {
                let status = uow.request(request_id)?.status;
                if !matches!(status, RequestStatus::Approved | RequestStatus::Integrated) {
                    return Err(ProcurementError::invalid_state(format!(
                        "request `{}` is {:?}; only approved requests are integrated",
                        request_id, status
                    )));
                }
                self.integrate_in(uow, request_id)
            },
        )
    }

    /// The request plus the supplier of every item still waiting for an allocation.
    fn integration_keys(&self, request_id: &str) -> Result<BTreeSet<LockKey>> {
        let mut keys = BTreeSet::from([LockKey::Request(request_id.to_string())]);
        let Some(request) = self.store.request(request_id)? else {
            return Ok(keys);
        };
        if !matches!(
            request.status,
            RequestStatus::PendingApproval | RequestStatus::Approved | RequestStatus::Integrated
        ) {
            return Ok(keys);
        }
        for item in request.items.iter().filter(|item| item.quantity_pending() > 0) {
            keys.insert(LockKey::Supplier(self.resolve_supplier(request_id, item)?));
        }
        Ok(keys)
    }

    pub(crate) fn integrate_in(
        &self,
        uow: &mut UnitOfWork<'_>,
        request_id: &str,
    ) -> Result<Vec<OrderAllocation>> {
        let pending: BTreeMap<String, (String, u32)> = {
            let request = uow.request(request_id)?;
            request
                .items
                .iter()
                .filter(|item| item.quantity_pending() > 0)
                .map(|item| -> Result<(String, (String, u32))> {
                    let supplier_id = self.resolve_supplier(request_id, item)?;
                    Ok((item.id.clone(), (supplier_id, item.quantity_pending())))
                })
                .collect::<Result<_>>()?
        };

        let mut created = Vec::with_capacity(pending.len());
        for (item_id, (supplier_id, quantity)) in &pending {
            created.push(self.allocate_in(uow, request_id, item_id, supplier_id, *quantity)?);
        }

        let request = uow.request_mut(request_id)?;
        if request.status == RequestStatus::Approved && request.is_fully_allocated() {
            request.mark_integrated()?;
            info!(request = %request_id, allocations = created.len(), "request integrated");
        }
        Ok(created)
    }
}
