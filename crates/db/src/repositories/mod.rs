use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use rust_decimal::Decimal;
use thiserror::Error;

use comanda_core::domain::catalog::{
    City, ComplaintType, Country, CountryId, Customer, CustomerId, Employee, EmployeeId,
    JobTitle, NewCustomer, NewEmployee, NewJobTitle, NewProduct, NewRestaurant, Product,
    ProductId, Province, ProvinceId, ResolutionType, Restaurant, RestaurantId,
};
use comanda_core::domain::complaint::{
    Complaint, ComplaintDetail, ComplaintId, ComplaintStatus, NewComplaint, NewComplaintDetail,
};
use comanda_core::domain::invoice::{Invoice, InvoiceId, LineItem, LineItemId, NewInvoice};
use comanda_core::domain::resolution::{
    NewResolutionDetail, Resolution, ResolutionDetail, ResolutionId, ResolutionRequest,
};
use comanda_core::errors::{ApplicationError, DomainError};

pub mod audit;
pub mod catalog;
pub mod complaint;
pub mod invoice;
pub mod resolution;

pub use audit::SqlAuditLog;
pub use catalog::SqlReferenceCatalog;
pub use complaint::SqlComplaintTracker;
pub use invoice::SqlInvoiceLedger;
pub use resolution::SqlResolutionCloser;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

impl RepositoryError {
    pub fn as_domain(&self) -> Option<&DomainError> {
        match self {
            Self::Domain(error) => Some(error),
            _ => None,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.as_domain().is_some_and(DomainError::is_retryable)
    }
}

impl From<RepositoryError> for ApplicationError {
    fn from(value: RepositoryError) -> Self {
        match value {
            RepositoryError::Domain(error) => Self::Domain(error),
            RepositoryError::Database(error) => Self::Persistence(error.to_string()),
            RepositoryError::Decode(message) => {
                Self::Persistence(format!("stored data could not be decoded: {message}"))
            }
        }
    }
}

/// Records sales: invoices, their line items and the derived total.
#[async_trait]
pub trait InvoiceLedger: Send + Sync {
    async fn create_invoice(&self, invoice: NewInvoice) -> Result<Invoice, RepositoryError>;

    async fn add_line_item(
        &self,
        invoice_id: InvoiceId,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<LineItem, RepositoryError>;

    async fn update_line_item_quantity(
        &self,
        line_item_id: LineItemId,
        quantity: u32,
    ) -> Result<LineItem, RepositoryError>;

    async fn remove_line_item(&self, line_item_id: LineItemId) -> Result<Invoice, RepositoryError>;

    async fn recompute_total(&self, invoice_id: InvoiceId) -> Result<Decimal, RepositoryError>;

    async fn find_invoice(&self, id: InvoiceId) -> Result<Option<Invoice>, RepositoryError>;

    async fn find_invoice_by_code(&self, code: &str) -> Result<Option<Invoice>, RepositoryError>;

    async fn list_line_items(&self, invoice_id: InvoiceId)
        -> Result<Vec<LineItem>, RepositoryError>;

    async fn delete_invoice(&self, id: InvoiceId) -> Result<(), RepositoryError>;
}

/// Opens complaints against invoices and collects the claimed products.
/// Nothing here marks a complaint resolved; see [`ResolutionCloser`].
#[async_trait]
pub trait ComplaintTracker: Send + Sync {
    async fn create_complaint(&self, complaint: NewComplaint)
        -> Result<Complaint, RepositoryError>;

    async fn add_complaint_detail(
        &self,
        detail: NewComplaintDetail,
    ) -> Result<ComplaintDetail, RepositoryError>;

    async fn begin_handling(&self, id: ComplaintId) -> Result<Complaint, RepositoryError>;

    async fn find_complaint(&self, id: ComplaintId) -> Result<Option<Complaint>, RepositoryError>;

    async fn list_complaint_details(
        &self,
        complaint_id: ComplaintId,
    ) -> Result<Vec<ComplaintDetail>, RepositoryError>;

    async fn list_complaints(
        &self,
        status: Option<ComplaintStatus>,
    ) -> Result<Vec<Complaint>, RepositoryError>;

    async fn delete_complaint(&self, id: ComplaintId) -> Result<(), RepositoryError>;
}

/// Closes complaints. Creating a resolution is the only path to `Resolved`.
#[async_trait]
pub trait ResolutionCloser: Send + Sync {
    async fn create_resolution(
        &self,
        request: ResolutionRequest,
    ) -> Result<Resolution, RepositoryError>;

    async fn add_resolution_detail(
        &self,
        detail: NewResolutionDetail,
    ) -> Result<ResolutionDetail, RepositoryError>;

    async fn find_resolution(
        &self,
        id: ResolutionId,
    ) -> Result<Option<Resolution>, RepositoryError>;

    async fn find_resolution_for_complaint(
        &self,
        complaint_id: ComplaintId,
    ) -> Result<Option<Resolution>, RepositoryError>;

    async fn list_resolution_details(
        &self,
        resolution_id: ResolutionId,
    ) -> Result<Vec<ResolutionDetail>, RepositoryError>;

    async fn delete_resolution(&self, id: ResolutionId) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait ReferenceCatalog: Send + Sync {
    async fn create_country(&self, name: String) -> Result<Country, RepositoryError>;

    async fn create_province(
        &self,
        country_id: CountryId,
        name: String,
    ) -> Result<Province, RepositoryError>;

    async fn create_city(&self, province_id: ProvinceId, name: String)
        -> Result<City, RepositoryError>;

    async fn create_restaurant(
        &self,
        restaurant: NewRestaurant,
    ) -> Result<Restaurant, RepositoryError>;

    async fn create_job_title(&self, job_title: NewJobTitle) -> Result<JobTitle, RepositoryError>;

    async fn create_employee(&self, employee: NewEmployee) -> Result<Employee, RepositoryError>;

    async fn create_customer(&self, customer: NewCustomer) -> Result<Customer, RepositoryError>;

    async fn create_product(&self, product: NewProduct) -> Result<Product, RepositoryError>;

    async fn create_complaint_type(
        &self,
        name: String,
        description: String,
    ) -> Result<ComplaintType, RepositoryError>;

    async fn create_resolution_type(
        &self,
        name: String,
        description: String,
    ) -> Result<ResolutionType, RepositoryError>;

    async fn find_product(&self, id: ProductId) -> Result<Option<Product>, RepositoryError>;

    async fn update_product_price(
        &self,
        id: ProductId,
        price: Decimal,
    ) -> Result<Product, RepositoryError>;

    async fn find_customer(&self, id: CustomerId) -> Result<Option<Customer>, RepositoryError>;

    async fn find_employee(&self, id: EmployeeId) -> Result<Option<Employee>, RepositoryError>;

    async fn find_restaurant(
        &self,
        id: RestaurantId,
    ) -> Result<Option<Restaurant>, RepositoryError>;

    async fn delete_product(&self, id: ProductId) -> Result<(), RepositoryError>;

    async fn delete_customer(&self, id: CustomerId) -> Result<(), RepositoryError>;

    async fn delete_employee(&self, id: EmployeeId) -> Result<(), RepositoryError>;
}

/// Translates SQLite constraint failures into the matching domain error,
/// leaving every other failure as a database error.
pub(crate) fn constraint_error(context: &'static str) -> impl Fn(sqlx::Error) -> RepositoryError {
    move |error| {
        let Some(db_error) = error.as_database_error() else {
            return RepositoryError::Database(error);
        };

        let mapped = if db_error.is_unique_violation() {
            DomainError::UniquenessViolation(format!("{context}: {}", db_error.message()))
        } else if db_error.is_foreign_key_violation() {
            DomainError::ReferentialIntegrity(format!("{context}: {}", db_error.message()))
        } else if db_error.is_check_violation() {
            DomainError::Validation(format!("{context}: {}", db_error.message()))
        } else {
            return RepositoryError::Database(error);
        };

        RepositoryError::Domain(mapped)
    }
}

pub(crate) fn missing(entity: &str, id: i64) -> RepositoryError {
    RepositoryError::Domain(DomainError::ReferentialIntegrity(format!(
        "{entity} {id} does not exist"
    )))
}

/// Stored timestamps keep microsecond precision so text order matches time order.
pub(crate) fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

pub(crate) fn format_timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_decimal(column: &str, value: String) -> Result<Decimal, RepositoryError> {
    Decimal::from_str(&value).map_err(|error| {
        RepositoryError::Decode(format!("invalid decimal in `{column}`: `{value}` ({error})"))
    })
}

pub(crate) fn parse_u32(column: &str, value: i64) -> Result<u32, RepositoryError> {
    u32::try_from(value).map_err(|_| {
        RepositoryError::Decode(format!(
            "invalid value for `{column}` (expected non-negative u32): {value}"
        ))
    })
}

pub(crate) fn parse_timestamp(column: &str, value: String) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value).map(|timestamp| timestamp.with_timezone(&Utc)).map_err(
        |error| {
            RepositoryError::Decode(format!("invalid timestamp in `{column}`: `{value}` ({error})"))
        },
    )
}
