use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::catalog::{EmployeeId, ResolutionTypeId};
use crate::domain::complaint::{
    Complaint, ComplaintDetail, ComplaintDetailId, ComplaintId, ComplaintStatus,
};
use crate::errors::DomainError;

entity_id!(ResolutionId, ResolutionDetailId);

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub id: ResolutionId,
    pub complaint_id: ComplaintId,
    pub employee_id: EmployeeId,
    pub closed_at: DateTime<Utc>,
    pub comment: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionDetail {
    pub id: ResolutionDetailId,
    /// Empty only while a detail is detached from its resolution.
    pub resolution_id: Option<ResolutionId>,
    pub complaint_detail_id: ComplaintDetailId,
    pub resolution_type_id: ResolutionTypeId,
    pub observation: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolutionRequest {
    pub complaint_id: ComplaintId,
    pub employee_id: EmployeeId,
    pub comment: String,
}

/// Outcome of closing a complaint: the status it left and the record to
/// persist alongside the status change.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClosedComplaint {
    pub previous_status: ComplaintStatus,
    pub complaint_id: ComplaintId,
    pub employee_id: EmployeeId,
    pub comment: String,
    pub closed_at: DateTime<Utc>,
}

impl ResolutionRequest {
    /// Moves `complaint` to `Resolved`. Fails with `InvalidState` when it
    /// is already resolved and leaves it untouched.
    pub fn close(
        self,
        complaint: &mut Complaint,
        closed_at: DateTime<Utc>,
    ) -> Result<ClosedComplaint, DomainError> {
        if complaint.id != self.complaint_id {
            return Err(DomainError::ReferentialIntegrity(format!(
                "resolution targets complaint {} but complaint {} was supplied",
                self.complaint_id.0, complaint.id.0
            )));
        }

        let previous_status = complaint.status();
        complaint.transition_to(ComplaintStatus::Resolved)?;

        Ok(ClosedComplaint {
            previous_status,
            complaint_id: self.complaint_id,
            employee_id: self.employee_id,
            comment: self.comment,
            closed_at,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewResolutionDetail {
    pub resolution_id: ResolutionId,
    pub complaint_detail_id: ComplaintDetailId,
    pub resolution_type_id: ResolutionTypeId,
    pub observation: String,
}

/// A resolution may only settle details of the complaint it closes.
pub fn ensure_detail_belongs(
    resolution: &Resolution,
    detail: &ComplaintDetail,
) -> Result<(), DomainError> {
    if detail.complaint_id != resolution.complaint_id {
        return Err(DomainError::ReferentialIntegrity(format!(
            "complaint detail {} belongs to complaint {}, not to complaint {} closed by resolution {}",
            detail.id.0, detail.complaint_id.0, resolution.complaint_id.0, resolution.id.0
        )));
    }
    Ok(())
}
