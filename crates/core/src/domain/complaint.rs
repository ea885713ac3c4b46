use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::catalog::{ComplaintTypeId, ProductId};
use crate::domain::invoice::InvoiceId;
use crate::errors::DomainError;

entity_id!(ComplaintId, ComplaintDetailId);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplaintStatus {
    Pending,
    InProgress,
    Resolved,
}

impl ComplaintStatus {
    pub const RESOLVABLE: [ComplaintStatus; 2] = [Self::Pending, Self::InProgress];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Resolved => "resolved",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "in_progress" => Some(Self::InProgress),
            "resolved" => Some(Self::Resolved),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        self == Self::Resolved
    }

    pub fn can_transition_to(self, next: ComplaintStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::InProgress)
                | (Self::Pending, Self::Resolved)
                | (Self::InProgress, Self::Resolved)
        )
    }
}

/// A customer complaint raised against an invoice.
///
/// `status` is private: callers read it through [`Complaint::status`], may
/// move a pending complaint into handling with [`Complaint::begin_handling`],
/// and can only reach `Resolved` through
/// [`ResolutionRequest::close`](crate::domain::resolution::ResolutionRequest::close).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Complaint {
    pub id: ComplaintId,
    pub invoice_id: InvoiceId,
    pub description: String,
    pub created_at: DateTime<Utc>,
    status: ComplaintStatus,
}

impl Complaint {
    /// Rebuilds a complaint from its stored row.
    pub fn restore(
        id: ComplaintId,
        invoice_id: InvoiceId,
        description: String,
        status: ComplaintStatus,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self { id, invoice_id, description, created_at, status }
    }

    pub fn status(&self) -> ComplaintStatus {
        self.status
    }

    pub fn is_resolvable(&self) -> bool {
        ComplaintStatus::RESOLVABLE.contains(&self.status)
    }

    pub fn begin_handling(&mut self) -> Result<(), DomainError> {
        self.transition_to(ComplaintStatus::InProgress)
    }

    pub(crate) fn transition_to(&mut self, next: ComplaintStatus) -> Result<(), DomainError> {
        if self.status.can_transition_to(next) {
            self.status = next;
            return Ok(());
        }

        Err(DomainError::InvalidState { from: self.status, to: next })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewComplaint {
    pub invoice_id: InvoiceId,
    pub description: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplaintDetail {
    pub id: ComplaintDetailId,
    pub complaint_id: ComplaintId,
    pub product_id: ProductId,
    pub complaint_type_id: ComplaintTypeId,
    pub reason: String,
    /// Opaque reference to an uploaded photo or file.
    pub evidence_path: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewComplaintDetail {
    pub complaint_id: ComplaintId,
    pub product_id: ProductId,
    pub complaint_type_id: ComplaintTypeId,
    pub reason: String,
    pub evidence_path: Option<String>,
}
