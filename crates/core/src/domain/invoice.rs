use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::catalog::{CustomerId, EmployeeId, ProductId, RestaurantId};
use crate::errors::DomainError;

entity_id!(InvoiceId, LineItemId);

/// Printed invoice number, e.g. `001-001-000000042`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InvoiceCode(pub String);

impl fmt::Display for InvoiceCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Establishment and emission point that prefix every invoice code. Each
/// series owns its own counter.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InvoiceNumbering {
    pub establishment: String,
    pub emission_point: String,
    pub sequence_width: usize,
}

impl Default for InvoiceNumbering {
    fn default() -> Self {
        Self {
            establishment: "001".to_string(),
            emission_point: "001".to_string(),
            sequence_width: 9,
        }
    }
}

impl InvoiceNumbering {
    pub fn series(&self) -> String {
        format!("{}-{}", self.establishment, self.emission_point)
    }

    pub fn format(&self, sequence: u64) -> InvoiceCode {
        InvoiceCode(format!(
            "{}-{:0width$}",
            self.series(),
            sequence,
            width = self.sequence_width
        ))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Invoice {
    pub id: InvoiceId,
    pub code: InvoiceCode,
    pub customer_id: CustomerId,
    pub employee_id: EmployeeId,
    pub restaurant_id: RestaurantId,
    pub issued_at: DateTime<Utc>,
    pub total: Decimal,
}

impl fmt::Display for Invoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invoice #{} (${})", self.code, self.total)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewInvoice {
    pub customer_id: CustomerId,
    pub employee_id: EmployeeId,
    pub restaurant_id: RestaurantId,
    pub issued_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    pub id: LineItemId,
    pub invoice_id: InvoiceId,
    pub product_id: ProductId,
    pub quantity: u32,
    /// Product price at the moment the line was created.
    pub unit_price: Decimal,
}

impl LineItem {
    pub fn subtotal(&self) -> Result<Decimal, DomainError> {
        Decimal::from(self.quantity).checked_mul(self.unit_price).ok_or_else(|| {
            DomainError::Validation(format!(
                "subtotal of line {} overflows ({} x {})",
                self.id, self.quantity, self.unit_price
            ))
        })
    }
}

pub const MAX_LINE_QUANTITY: u32 = 100_000;

pub fn validate_quantity(quantity: u32) -> Result<(), DomainError> {
    if quantity == 0 {
        return Err(DomainError::Validation("quantity must be a positive integer".to_string()));
    }
    if quantity > MAX_LINE_QUANTITY {
        return Err(DomainError::Validation(format!(
            "quantity must not exceed {MAX_LINE_QUANTITY}, got {quantity}"
        )));
    }
    Ok(())
}

/// Sole source of truth for `Invoice::total`.
pub fn recompute_total<'a>(
    lines: impl IntoIterator<Item = &'a LineItem>,
) -> Result<Decimal, DomainError> {
    lines.into_iter().try_fold(Decimal::ZERO, |total, line| {
        total
            .checked_add(line.subtotal()?)
            .ok_or_else(|| DomainError::Validation("invoice total overflows".to_string()))
    })
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::{
        recompute_total, validate_quantity, InvoiceId, InvoiceNumbering, LineItem, LineItemId,
        MAX_LINE_QUANTITY,
    };
    use crate::domain::catalog::ProductId;
    use crate::errors::DomainError;

    fn line(id: i64, quantity: u32, unit_price: Decimal) -> LineItem {
        LineItem {
            id: LineItemId(id),
            invoice_id: InvoiceId(1),
            product_id: ProductId(id),
            quantity,
            unit_price,
        }
    }

    #[test]
    fn default_numbering_matches_printed_format() {
        let numbering = InvoiceNumbering::default();
        assert_eq!(numbering.series(), "001-001");
        assert_eq!(numbering.format(42).0, "001-001-000000042");
    }

    #[test]
    fn numbering_keeps_digits_beyond_width() {
        let numbering = InvoiceNumbering {
            establishment: "002".to_string(),
            emission_point: "010".to_string(),
            sequence_width: 3,
        };
        assert_eq!(numbering.format(7).0, "002-010-007");
        assert_eq!(numbering.format(12345).0, "002-010-12345");
    }

    #[test]
    fn total_of_no_lines_is_zero() {
        let lines: Vec<LineItem> = Vec::new();
        assert_eq!(recompute_total(&lines).expect("empty total"), Decimal::ZERO);
    }

    #[test]
    fn total_sums_quantity_times_unit_price() {
        let lines =
            vec![line(1, 2, Decimal::new(500, 2)), line(2, 1, Decimal::new(350, 2))];

        let total = recompute_total(&lines).expect("total");
        assert_eq!(total, Decimal::new(1350, 2));
        assert_eq!(recompute_total(&lines).expect("total"), total, "recompute is idempotent");
        assert_eq!(recompute_total(&lines[1..]).expect("partial"), Decimal::new(350, 2));
    }

    #[test]
    fn overflowing_subtotal_is_a_validation_error() {
        let huge = Decimal::from_i128_with_scale(10_000_000_000_000_000_000_000_000_000, 0);
        let lines = vec![line(1, 10, huge)];

        assert!(matches!(lines[0].subtotal(), Err(DomainError::Validation(_))));
        assert!(matches!(recompute_total(&lines), Err(DomainError::Validation(_))));
    }

    #[test]
    fn zero_quantity_is_rejected() {
        assert!(validate_quantity(3).is_ok());
        assert!(matches!(validate_quantity(0), Err(DomainError::Validation(_))));
        assert!(validate_quantity(MAX_LINE_QUANTITY).is_ok());
        assert!(matches!(
            validate_quantity(MAX_LINE_QUANTITY + 1),
            Err(DomainError::Validation(_))
        ));
    }
}
