pub mod audit;
pub mod config;
pub mod domain;
pub mod errors;

pub use audit::{AuditCategory, AuditEvent, AuditOutcome};
pub use domain::complaint::{
    Complaint, ComplaintDetail, ComplaintDetailId, ComplaintId, ComplaintStatus,
    NewComplaint, NewComplaintDetail,
};
pub use domain::invoice::{
    recompute_total, Invoice, InvoiceCode, InvoiceId, InvoiceNumbering, LineItem, LineItemId,
    NewInvoice,
};
pub use domain::resolution::{
    NewResolutionDetail, Resolution, ResolutionDetail, ResolutionDetailId, ResolutionId,
    ResolutionRequest,
};
pub use errors::{ApplicationError, DomainError, InterfaceError};
