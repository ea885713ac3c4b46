use thiserror::Error;

use crate::domain::complaint::ComplaintStatus;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("referential integrity violation: {0}")]
    ReferentialIntegrity(String),
    #[error("invalid complaint transition from {from:?} to {to:?}")]
    InvalidState { from: ComplaintStatus, to: ComplaintStatus },
    #[error("complaint detail {complaint_detail_id} already has a resolution detail")]
    DuplicateResolution { complaint_detail_id: i64 },
    #[error("uniqueness violation: {0}")]
    UniquenessViolation(String),
}

impl DomainError {
    /// Only a uniqueness collision can succeed when the same call is repeated.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::UniquenessViolation(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::ReferentialIntegrity(_) => "referential_integrity",
            Self::InvalidState { .. } => "invalid_state",
            Self::DuplicateResolution { .. } => "duplicate_resolution",
            Self::UniquenessViolation(_) => "uniqueness_violation",
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("configuration failure: {0}")]
    Configuration(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("conflict: {message}")]
    Conflict { message: String, retryable: bool, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => {
                "The request could not be processed. Check inputs and try again."
            }
            Self::Conflict { retryable: true, .. } => {
                "The record changed while saving. Please submit it again."
            }
            Self::Conflict { retryable: false, .. } => {
                "The record is no longer in a state that allows this change."
            }
            Self::ServiceUnavailable { .. } => {
                "The service is temporarily unavailable. Please retry shortly."
            }
            Self::Internal { .. } => "An unexpected internal error occurred.",
        }
    }
}

impl ApplicationError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::BadRequest { correlation_id: id, .. }
            | InterfaceError::Conflict { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

impl From<ApplicationError> for InterfaceError {
    fn from(value: ApplicationError) -> Self {
        match value {
            ApplicationError::Domain(
                error @ (DomainError::Validation(_) | DomainError::ReferentialIntegrity(_)),
            ) => Self::BadRequest {
                message: error.to_string(),
                correlation_id: "unassigned".to_owned(),
            },
            ApplicationError::Domain(
                error @ (DomainError::InvalidState { .. }
                | DomainError::DuplicateResolution { .. }
                | DomainError::UniquenessViolation(_)),
            ) => Self::Conflict {
                retryable: error.is_retryable(),
                message: error.to_string(),
                correlation_id: "unassigned".to_owned(),
            },
            ApplicationError::Persistence(message) => {
                Self::ServiceUnavailable { message, correlation_id: "unassigned".to_owned() }
            }
            ApplicationError::Configuration(message) => {
                Self::Internal { message, correlation_id: "unassigned".to_owned() }
            }
        }
    }
}
