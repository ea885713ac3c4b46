//! Reference data supplied to the ledger. These records carry no business
//! rules of their own beyond existence and uniqueness.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::errors::DomainError;

entity_id!(
    CountryId,
    ProvinceId,
    CityId,
    RestaurantId,
    JobTitleId,
    EmployeeId,
    CustomerId,
    ProductId,
    ComplaintTypeId,
    ResolutionTypeId,
);

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Country {
    pub id: CountryId,
    pub name: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Province {
    pub id: ProvinceId,
    pub country_id: CountryId,
    pub name: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct City {
    pub id: CityId,
    pub province_id: ProvinceId,
    pub name: String,
}

/// A restaurant branch. `branch_number` is unique per `tax_id`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Restaurant {
    pub id: RestaurantId,
    pub name: String,
    pub tax_id: String,
    pub branch_number: u32,
    pub city_id: CityId,
    pub street_address: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobTitle {
    pub id: JobTitleId,
    pub name: String,
    pub salary: Decimal,
    pub description: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Employee {
    pub id: EmployeeId,
    pub job_title_id: JobTitleId,
    pub national_id: Option<String>,
    pub first_name: String,
    pub last_name: Option<String>,
    pub age: Option<u32>,
    pub home_address: Option<String>,
    pub landline: Option<String>,
    pub mobile: Option<String>,
}

impl Employee {
    pub fn display_name(&self) -> String {
        match &self.last_name {
            Some(last_name) => format!("{} {}", self.first_name, last_name),
            None => self.first_name.clone(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    pub id: CustomerId,
    pub name: String,
    pub email: String,
    pub phone: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub price: Decimal,
    pub description: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplaintType {
    pub id: ComplaintTypeId,
    pub name: String,
    pub description: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionType {
    pub id: ResolutionTypeId,
    pub name: String,
    pub description: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewRestaurant {
    pub name: String,
    pub tax_id: String,
    pub branch_number: u32,
    pub city_id: CityId,
    pub street_address: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewJobTitle {
    pub name: String,
    pub salary: Decimal,
    pub description: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewEmployee {
    pub job_title_id: JobTitleId,
    pub national_id: Option<String>,
    pub first_name: String,
    pub last_name: Option<String>,
    pub age: Option<u32>,
    pub home_address: Option<String>,
    pub landline: Option<String>,
    pub mobile: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewCustomer {
    pub name: String,
    pub email: String,
    pub phone: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewProduct {
    pub name: String,
    pub price: Decimal,
    pub description: Option<String>,
}

/// 99999999.99, the largest amount a ten-digit, two-decimal column holds.
pub const MAX_PRICE: Decimal = Decimal::from_parts(1_410_065_407, 2, 0, false, 2);

/// Prices are stored with at most two decimal places, never go negative and
/// fit ten digits.
pub fn validate_price(price: Decimal) -> Result<(), DomainError> {
    if price < Decimal::ZERO {
        return Err(DomainError::Validation(format!("price must not be negative, got {price}")));
    }
    if price > MAX_PRICE {
        return Err(DomainError::Validation(format!(
            "price must not exceed {MAX_PRICE}, got {price}"
        )));
    }
    if price.normalize().scale() > 2 {
        return Err(DomainError::Validation(format!(
            "price must have at most two decimal places, got {price}"
        )));
    }
    Ok(())
}

pub fn require_text(field: &str, value: &str) -> Result<(), DomainError> {
    if value.trim().is_empty() {
        return Err(DomainError::Validation(format!("{field} is required")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::{require_text, validate_price, Employee, EmployeeId, JobTitleId, MAX_PRICE};
    use crate::errors::DomainError;

    #[test]
    fn price_accepts_cents_and_rejects_sub_cent_precision() {
        assert!(validate_price(Decimal::new(350, 2)).is_ok());
        assert!(validate_price(Decimal::new(35000, 4)).is_ok());

        let error = validate_price(Decimal::new(3505, 3)).expect_err("three decimals");
        assert!(matches!(error, DomainError::Validation(_)));
    }

    #[test]
    fn negative_price_is_rejected() {
        let error = validate_price(Decimal::new(-100, 2)).expect_err("negative price");
        assert!(matches!(error, DomainError::Validation(ref message) if message.contains("negative")));
    }

    #[test]
    fn price_is_capped_at_ten_digits() {
        assert_eq!(MAX_PRICE, Decimal::new(9_999_999_999, 2));
        assert!(validate_price(MAX_PRICE).is_ok());

        let error = validate_price(MAX_PRICE + Decimal::new(1, 2)).expect_err("eleven digits");
        assert!(matches!(error, DomainError::Validation(ref message) if message.contains("exceed")));

        let huge = Decimal::from_i128_with_scale(10_000_000_000_000_000_000_000_000_000, 0);
        assert!(matches!(validate_price(huge), Err(DomainError::Validation(_))));
    }

    #[test]
    fn blank_text_is_rejected() {
        assert!(require_text("reason", "arrived cold").is_ok());
        assert!(matches!(require_text("reason", "   "), Err(DomainError::Validation(_))));
    }

    #[test]
    fn employee_display_name_skips_missing_last_name() {
        let mut employee = Employee {
            id: EmployeeId(1),
            job_title_id: JobTitleId(1),
            national_id: None,
            first_name: "Lucia".to_string(),
            last_name: None,
            age: None,
            home_address: None,
            landline: None,
            mobile: None,
        };
        assert_eq!(employee.display_name(), "Lucia");

        employee.last_name = Some("Mora".to_string());
        assert_eq!(employee.display_name(), "Lucia Mora");
    }
}
