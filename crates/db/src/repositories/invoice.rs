use async_trait::async_trait;
use chrono::SubsecRound;
use rust_decimal::Decimal;
use sqlx::{sqlite::SqliteRow, Row, SqliteConnection};
use tracing::info;

use comanda_core::audit::{AuditCategory, AuditEvent};
use comanda_core::domain::catalog::{CustomerId, EmployeeId, ProductId, RestaurantId};
use comanda_core::domain::invoice::{
    recompute_total, validate_quantity, Invoice, InvoiceCode, InvoiceId, InvoiceNumbering,
    LineItem, LineItemId, NewInvoice,
};
use comanda_core::errors::DomainError;

use super::audit::insert_event;
use super::{
    constraint_error, format_timestamp, missing, now, parse_decimal, parse_timestamp, parse_u32,
    InvoiceLedger, RepositoryError,
};
use crate::DbPool;

/// SQLite-backed invoice ledger.
///
/// Every mutation runs in one transaction that writes to the invoice row (or
/// the line item being changed) before reading anything, so concurrent
/// writers queue on SQLite's write lock instead of failing on a stale
/// snapshot. The stored total is always rewritten from the current lines
/// before the transaction commits.
pub struct SqlInvoiceLedger {
    pool: DbPool,
    numbering: InvoiceNumbering,
}

impl SqlInvoiceLedger {
    pub fn new(pool: DbPool) -> Self {
        Self::with_numbering(pool, InvoiceNumbering::default())
    }

    pub fn with_numbering(pool: DbPool, numbering: InvoiceNumbering) -> Self {
        Self { pool, numbering }
    }

    pub fn numbering(&self) -> &InvoiceNumbering {
        &self.numbering
    }

    /// Draws the next number of this ledger's series. The counter update
    /// commits on its own, so a failed invoice insert leaves a gap and a
    /// retry draws a fresh number.
    async fn allocate_code(&self) -> Result<InvoiceCode, RepositoryError> {
        let next: i64 = sqlx::query_scalar(
            "INSERT INTO invoice_sequence (series, last_value) VALUES (?, 1)
             ON CONFLICT(series) DO UPDATE SET last_value = last_value + 1
             RETURNING last_value",
        )
        .bind(self.numbering.series())
        .fetch_one(&self.pool)
        .await?;

        let next = u64::try_from(next).map_err(|_| {
            RepositoryError::Decode(format!("invoice sequence returned negative value {next}"))
        })?;
        Ok(self.numbering.format(next))
    }
}

#[async_trait]
impl InvoiceLedger for SqlInvoiceLedger {
    async fn create_invoice(&self, invoice: NewInvoice) -> Result<Invoice, RepositoryError> {
        let code = self.allocate_code().await?;
        let created_at = now();
        let issued_at =
            invoice.issued_at.map(|value| value.trunc_subsecs(6)).unwrap_or(created_at);

        let mut tx = self.pool.begin().await?;

        let id = sqlx::query(
            "INSERT INTO invoice (
                code, customer_id, employee_id, restaurant_id, issued_at, total, updated_at
             ) VALUES (?, ?, ?, ?, ?, '0', ?)",
        )
        .bind(&code.0)
        .bind(invoice.customer_id.0)
        .bind(invoice.employee_id.0)
        .bind(invoice.restaurant_id.0)
        .bind(format_timestamp(issued_at))
        .bind(format_timestamp(created_at))
        .execute(&mut *tx)
        .await
        .map_err(|error| {
            let mapped = constraint_error("invoice")(error);
            match mapped {
                RepositoryError::Domain(DomainError::ReferentialIntegrity(_)) => {
                    RepositoryError::Domain(DomainError::ReferentialIntegrity(format!(
                        "invoice references an unknown customer ({}), employee ({}) or \
                         restaurant ({})",
                        invoice.customer_id, invoice.employee_id, invoice.restaurant_id
                    )))
                }
                other => other,
            }
        })?
        .last_insert_rowid();

        insert_event(
            &mut *tx,
            &AuditEvent::success(AuditCategory::Invoice, id, "invoice.created")
                .with_metadata("code", code.0.clone())
                .with_metadata("customer_id", invoice.customer_id.to_string()),
        )
        .await?;

        tx.commit().await?;

        info!(
            event_name = "invoice.created",
            invoice_id = id,
            invoice_code = %code,
            "invoice created"
        );

        Ok(Invoice {
            id: InvoiceId(id),
            code,
            customer_id: invoice.customer_id,
            employee_id: invoice.employee_id,
            restaurant_id: invoice.restaurant_id,
            issued_at,
            total: Decimal::ZERO,
        })
    }

    async fn add_line_item(
        &self,
        invoice_id: InvoiceId,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<LineItem, RepositoryError> {
        validate_quantity(quantity)?;
        let mut tx = self.pool.begin().await?;

        touch_invoice(&mut tx, invoice_id).await?;

        let price: Option<String> = sqlx::query_scalar("SELECT price FROM product WHERE id = ?")
            .bind(product_id.0)
            .fetch_optional(&mut *tx)
            .await?;
        let unit_price = match price {
            Some(price) => parse_decimal("price", price)?,
            None => return Err(missing("product", product_id.0)),
        };

        let line_id = sqlx::query(
            "INSERT INTO invoice_line_item (invoice_id, product_id, quantity, unit_price)
             VALUES (?, ?, ?, ?)",
        )
        .bind(invoice_id.0)
        .bind(product_id.0)
        .bind(i64::from(quantity))
        .bind(unit_price.to_string())
        .execute(&mut *tx)
        .await
        .map_err(constraint_error("invoice line item"))?
        .last_insert_rowid();

        let total = refresh_total(&mut tx, invoice_id).await?;

        insert_event(
            &mut *tx,
            &AuditEvent::success(AuditCategory::Invoice, invoice_id.0, "invoice.line_item_added")
                .with_metadata("line_item_id", line_id.to_string())
                .with_metadata("product_id", product_id.to_string())
                .with_metadata("quantity", quantity.to_string())
                .with_metadata("total", total.to_string()),
        )
        .await?;

        tx.commit().await?;

        info!(
            event_name = "invoice.line_item.added",
            invoice_id = invoice_id.0,
            line_item_id = line_id,
            product_id = product_id.0,
            quantity,
            total = %total,
            "line item added"
        );

        Ok(LineItem {
            id: LineItemId(line_id),
            invoice_id,
            product_id,
            quantity,
            unit_price,
        })
    }

    async fn update_line_item_quantity(
        &self,
        line_item_id: LineItemId,
        quantity: u32,
    ) -> Result<LineItem, RepositoryError> {
        validate_quantity(quantity)?;
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            "UPDATE invoice_line_item SET quantity = ? WHERE id = ?
             RETURNING id, invoice_id, product_id, quantity, unit_price",
        )
        .bind(i64::from(quantity))
        .bind(line_item_id.0)
        .fetch_optional(&mut *tx)
        .await?;
        let line = match row {
            Some(row) => line_item_from_row(row)?,
            None => return Err(missing("line item", line_item_id.0)),
        };

        let total = refresh_total(&mut tx, line.invoice_id).await?;

        insert_event(
            &mut *tx,
            &AuditEvent::success(
                AuditCategory::Invoice,
                line.invoice_id.0,
                "invoice.line_item_updated",
            )
            .with_metadata("line_item_id", line_item_id.0.to_string())
            .with_metadata("quantity", quantity.to_string())
            .with_metadata("total", total.to_string()),
        )
        .await?;

        tx.commit().await?;

        info!(
            event_name = "invoice.line_item.updated",
            invoice_id = line.invoice_id.0,
            line_item_id = line_item_id.0,
            quantity,
            total = %total,
            "line item quantity updated"
        );

        Ok(line)
    }

    async fn remove_line_item(&self, line_item_id: LineItemId) -> Result<Invoice, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let invoice_id: Option<i64> =
            sqlx::query_scalar("DELETE FROM invoice_line_item WHERE id = ? RETURNING invoice_id")
                .bind(line_item_id.0)
                .fetch_optional(&mut *tx)
                .await?;
        let invoice_id = InvoiceId(invoice_id.ok_or_else(|| missing("line item", line_item_id.0))?);

        let total = refresh_total(&mut tx, invoice_id).await?;

        insert_event(
            &mut *tx,
            &AuditEvent::success(AuditCategory::Invoice, invoice_id.0, "invoice.line_item_removed")
                .with_metadata("line_item_id", line_item_id.0.to_string())
                .with_metadata("total", total.to_string()),
        )
        .await?;

        let invoice = fetch_invoice(&mut tx, invoice_id)
            .await?
            .ok_or_else(|| missing("invoice", invoice_id.0))?;

        tx.commit().await?;

        info!(
            event_name = "invoice.line_item.removed",
            invoice_id = invoice_id.0,
            line_item_id = line_item_id.0,
            total = %total,
            "line item removed"
        );

        Ok(invoice)
    }

    async fn recompute_total(&self, invoice_id: InvoiceId) -> Result<Decimal, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        touch_invoice(&mut tx, invoice_id).await?;
        let total = refresh_total(&mut tx, invoice_id).await?;

        insert_event(
            &mut *tx,
            &AuditEvent::success(AuditCategory::Invoice, invoice_id.0, "invoice.total_recomputed")
                .with_metadata("total", total.to_string()),
        )
        .await?;

        tx.commit().await?;
        Ok(total)
    }

    async fn find_invoice(&self, id: InvoiceId) -> Result<Option<Invoice>, RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        fetch_invoice(&mut conn, id).await
    }

    async fn find_invoice_by_code(&self, code: &str) -> Result<Option<Invoice>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, code, customer_id, employee_id, restaurant_id, issued_at, total
             FROM invoice
             WHERE code = ?",
        )
        .bind(code)
        .fetch_optional(&self.pool)
        .await?;

        row.map(invoice_from_row).transpose()
    }

    async fn list_line_items(
        &self,
        invoice_id: InvoiceId,
    ) -> Result<Vec<LineItem>, RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        fetch_line_items(&mut conn, invoice_id).await
    }

    async fn delete_invoice(&self, id: InvoiceId) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        touch_invoice(&mut tx, id).await?;

        let has_complaints: i64 =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM complaint WHERE invoice_id = ?)")
                .bind(id.0)
                .fetch_one(&mut *tx)
                .await?;
        if has_complaints == 1 {
            return Err(DomainError::ReferentialIntegrity(format!(
                "invoice {} is referenced by complaints",
                id.0
            ))
            .into());
        }

        sqlx::query("DELETE FROM invoice WHERE id = ?")
            .bind(id.0)
            .execute(&mut *tx)
            .await
            .map_err(constraint_error("invoice"))?;

        insert_event(
            &mut *tx,
            &AuditEvent::success(AuditCategory::Invoice, id.0, "invoice.deleted"),
        )
        .await?;

        tx.commit().await?;

        info!(event_name = "invoice.deleted", invoice_id = id.0, "invoice deleted");
        Ok(())
    }
}

/// First write of a transaction on an existing invoice.
async fn touch_invoice(
    conn: &mut SqliteConnection,
    invoice_id: InvoiceId,
) -> Result<(), RepositoryError> {
    let result = sqlx::query("UPDATE invoice SET updated_at = ? WHERE id = ?")
        .bind(format_timestamp(now()))
        .bind(invoice_id.0)
        .execute(&mut *conn)
        .await?;

    if result.rows_affected() == 0 {
        return Err(missing("invoice", invoice_id.0));
    }
    Ok(())
}

async fn refresh_total(
    conn: &mut SqliteConnection,
    invoice_id: InvoiceId,
) -> Result<Decimal, RepositoryError> {
    let lines = fetch_line_items(&mut *conn, invoice_id).await?;
    let total = recompute_total(&lines)?;

    sqlx::query("UPDATE invoice SET total = ?, updated_at = ? WHERE id = ?")
        .bind(total.to_string())
        .bind(format_timestamp(now()))
        .bind(invoice_id.0)
        .execute(&mut *conn)
        .await?;

    Ok(total)
}

async fn fetch_invoice(
    conn: &mut SqliteConnection,
    id: InvoiceId,
) -> Result<Option<Invoice>, RepositoryError> {
    let row = sqlx::query(
        "SELECT id, code, customer_id, employee_id, restaurant_id, issued_at, total
         FROM invoice
         WHERE id = ?",
    )
    .bind(id.0)
    .fetch_optional(&mut *conn)
    .await?;

    row.map(invoice_from_row).transpose()
}

async fn fetch_line_items(
    conn: &mut SqliteConnection,
    invoice_id: InvoiceId,
) -> Result<Vec<LineItem>, RepositoryError> {
    let rows = sqlx::query(
        "SELECT id, invoice_id, product_id, quantity, unit_price
         FROM invoice_line_item
         WHERE invoice_id = ?
         ORDER BY id ASC",
    )
    .bind(invoice_id.0)
    .fetch_all(&mut *conn)
    .await?;

    rows.into_iter().map(line_item_from_row).collect()
}

fn invoice_from_row(row: SqliteRow) -> Result<Invoice, RepositoryError> {
    Ok(Invoice {
        id: InvoiceId(row.try_get("id")?),
        code: InvoiceCode(row.try_get("code")?),
        customer_id: CustomerId(row.try_get("customer_id")?),
        employee_id: EmployeeId(row.try_get("employee_id")?),
        restaurant_id: RestaurantId(row.try_get("restaurant_id")?),
        issued_at: parse_timestamp("issued_at", row.try_get("issued_at")?)?,
        total: parse_decimal("total", row.try_get("total")?)?,
    })
}

fn line_item_from_row(row: SqliteRow) -> Result<LineItem, RepositoryError> {
    Ok(LineItem {
        id: LineItemId(row.try_get("id")?),
        invoice_id: InvoiceId(row.try_get("invoice_id")?),
        product_id: ProductId(row.try_get("product_id")?),
        quantity: parse_u32("quantity", row.try_get("quantity")?)?,
        unit_price: parse_decimal("unit_price", row.try_get("unit_price")?)?,
    })
}
