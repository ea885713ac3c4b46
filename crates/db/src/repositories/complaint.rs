use async_trait::async_trait;
use sqlx::{sqlite::SqliteRow, Row, SqliteConnection};
use tracing::{info, warn};

use comanda_core::audit::{AuditCategory, AuditEvent};
use comanda_core::domain::catalog::{require_text, ComplaintTypeId, ProductId};
use comanda_core::domain::complaint::{
    Complaint, ComplaintDetail, ComplaintDetailId, ComplaintId, ComplaintStatus, NewComplaint,
    NewComplaintDetail,
};
use comanda_core::domain::invoice::InvoiceId;
use comanda_core::errors::DomainError;

use super::audit::{insert_event, record_rejection};
use super::{
    constraint_error, format_timestamp, missing, now, parse_timestamp, ComplaintTracker,
    RepositoryError,
};
use crate::DbPool;

pub struct SqlComplaintTracker {
    pool: DbPool,
}

impl SqlComplaintTracker {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ComplaintTracker for SqlComplaintTracker {
    async fn create_complaint(
        &self,
        complaint: NewComplaint,
    ) -> Result<Complaint, RepositoryError> {
        require_text("complaint description", &complaint.description)?;
        let created_at = now();
        let mut tx = self.pool.begin().await?;

        let id = sqlx::query(
            "INSERT INTO complaint (invoice_id, description, status, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(complaint.invoice_id.0)
        .bind(&complaint.description)
        .bind(ComplaintStatus::Pending.as_str())
        .bind(format_timestamp(created_at))
        .bind(format_timestamp(created_at))
        .execute(&mut *tx)
        .await
        .map_err(|error| match constraint_error("complaint")(error) {
            RepositoryError::Domain(DomainError::ReferentialIntegrity(_)) => {
                missing("invoice", complaint.invoice_id.0)
            }
            other => other,
        })?
        .last_insert_rowid();

        insert_event(
            &mut *tx,
            &AuditEvent::success(AuditCategory::Complaint, id, "complaint.created")
                .with_metadata("invoice_id", complaint.invoice_id.to_string()),
        )
        .await?;

        tx.commit().await?;

        info!(
            event_name = "complaint.created",
            complaint_id = id,
            invoice_id = complaint.invoice_id.0,
            "complaint opened"
        );

        Ok(Complaint::restore(
            ComplaintId(id),
            complaint.invoice_id,
            complaint.description,
            ComplaintStatus::Pending,
            created_at,
        ))
    }

    async fn add_complaint_detail(
        &self,
        detail: NewComplaintDetail,
    ) -> Result<ComplaintDetail, RepositoryError> {
        require_text("complaint detail reason", &detail.reason)?;
        let mut tx = self.pool.begin().await?;

        // Writing the complaint first takes the write lock, so the line item
        // check below cannot interleave with a concurrent removal.
        let invoice_id: Option<i64> = sqlx::query_scalar(
            "UPDATE complaint SET updated_at = ? WHERE id = ? RETURNING invoice_id",
        )
        .bind(format_timestamp(now()))
        .bind(detail.complaint_id.0)
        .fetch_optional(&mut *tx)
        .await?;
        let invoice_id =
            InvoiceId(invoice_id.ok_or_else(|| missing("complaint", detail.complaint_id.0))?);

        let on_invoice: i64 = sqlx::query_scalar(
            "SELECT EXISTS(
                SELECT 1 FROM invoice_line_item WHERE invoice_id = ? AND product_id = ?
             )",
        )
        .bind(invoice_id.0)
        .bind(detail.product_id.0)
        .fetch_one(&mut *tx)
        .await?;

        if on_invoice != 1 {
            tx.rollback().await?;

            record_rejection(
                &self.pool,
                &AuditEvent::rejected(
                    AuditCategory::Complaint,
                    detail.complaint_id.0,
                    "complaint.detail_rejected",
                )
                .with_metadata("product_id", detail.product_id.to_string())
                .with_metadata("invoice_id", invoice_id.to_string())
                .with_metadata("reason", "product_not_on_invoice"),
            )
            .await;

            warn!(
                event_name = "complaint.detail.rejected",
                complaint_id = detail.complaint_id.0,
                invoice_id = invoice_id.0,
                product_id = detail.product_id.0,
                "complaint detail names a product that is not on the invoice"
            );

            return Err(DomainError::ReferentialIntegrity(format!(
                "product {} does not appear on invoice {}",
                detail.product_id, invoice_id
            ))
            .into());
        }

        let id = sqlx::query(
            "INSERT INTO complaint_detail (
                complaint_id, product_id, complaint_type_id, reason, evidence_path
             ) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(detail.complaint_id.0)
        .bind(detail.product_id.0)
        .bind(detail.complaint_type_id.0)
        .bind(&detail.reason)
        .bind(detail.evidence_path.as_deref())
        .execute(&mut *tx)
        .await
        .map_err(constraint_error("complaint detail"))?
        .last_insert_rowid();

        insert_event(
            &mut *tx,
            &AuditEvent::success(
                AuditCategory::Complaint,
                detail.complaint_id.0,
                "complaint.detail_added",
            )
            .with_metadata("complaint_detail_id", id.to_string())
            .with_metadata("product_id", detail.product_id.to_string()),
        )
        .await?;

        tx.commit().await?;

        info!(
            event_name = "complaint.detail.added",
            complaint_id = detail.complaint_id.0,
            complaint_detail_id = id,
            product_id = detail.product_id.0,
            "complaint detail added"
        );

        Ok(ComplaintDetail {
            id: ComplaintDetailId(id),
            complaint_id: detail.complaint_id,
            product_id: detail.product_id,
            complaint_type_id: detail.complaint_type_id,
            reason: detail.reason,
            evidence_path: detail.evidence_path,
        })
    }

    async fn begin_handling(&self, id: ComplaintId) -> Result<Complaint, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        touch_complaint(&mut tx, id).await?;
        let mut complaint =
            fetch_complaint(&mut tx, id).await?.ok_or_else(|| missing("complaint", id.0))?;
        complaint.begin_handling()?;

        sqlx::query("UPDATE complaint SET status = ? WHERE id = ? AND status = ?")
            .bind(ComplaintStatus::InProgress.as_str())
            .bind(id.0)
            .bind(ComplaintStatus::Pending.as_str())
            .execute(&mut *tx)
            .await?;

        insert_event(
            &mut *tx,
            &AuditEvent::success(AuditCategory::Complaint, id.0, "complaint.handling_started"),
        )
        .await?;

        tx.commit().await?;

        info!(
            event_name = "complaint.handling_started",
            complaint_id = id.0,
            "complaint in progress"
        );
        Ok(complaint)
    }

    async fn find_complaint(&self, id: ComplaintId) -> Result<Option<Complaint>, RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        fetch_complaint(&mut conn, id).await
    }

    async fn list_complaint_details(
        &self,
        complaint_id: ComplaintId,
    ) -> Result<Vec<ComplaintDetail>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, complaint_id, product_id, complaint_type_id, reason, evidence_path
             FROM complaint_detail
             WHERE complaint_id = ?
             ORDER BY id ASC",
        )
        .bind(complaint_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(detail_from_row).collect()
    }

    async fn list_complaints(
        &self,
        status: Option<ComplaintStatus>,
    ) -> Result<Vec<Complaint>, RepositoryError> {
        let rows = if let Some(status) = status {
            sqlx::query(
                "SELECT id, invoice_id, description, status, created_at
                 FROM complaint
                 WHERE status = ?
                 ORDER BY created_at ASC, id ASC",
            )
            .bind(status.as_str())
            .fetch_all(&self.pool)
            .await?
        } else {
            sqlx::query(
                "SELECT id, invoice_id, description, status, created_at
                 FROM complaint
                 ORDER BY created_at ASC, id ASC",
            )
            .fetch_all(&self.pool)
            .await?
        };

        rows.into_iter().map(complaint_from_row).collect()
    }

    async fn delete_complaint(&self, id: ComplaintId) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        touch_complaint(&mut tx, id).await?;

        let resolved: i64 =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM resolution WHERE complaint_id = ?)")
                .bind(id.0)
                .fetch_one(&mut *tx)
                .await?;
        if resolved == 1 {
            return Err(DomainError::ReferentialIntegrity(format!(
                "complaint {} is referenced by a resolution",
                id.0
            ))
            .into());
        }

        sqlx::query("DELETE FROM complaint WHERE id = ?")
            .bind(id.0)
            .execute(&mut *tx)
            .await
            .map_err(constraint_error("complaint"))?;

        insert_event(
            &mut *tx,
            &AuditEvent::success(AuditCategory::Complaint, id.0, "complaint.deleted"),
        )
        .await?;

        tx.commit().await?;

        info!(event_name = "complaint.deleted", complaint_id = id.0, "complaint deleted");
        Ok(())
    }
}

async fn touch_complaint(
    conn: &mut SqliteConnection,
    id: ComplaintId,
) -> Result<(), RepositoryError> {
    let result = sqlx::query("UPDATE complaint SET updated_at = ? WHERE id = ?")
        .bind(format_timestamp(now()))
        .bind(id.0)
        .execute(&mut *conn)
        .await?;

    if result.rows_affected() == 0 {
        return Err(missing("complaint", id.0));
    }
    Ok(())
}

pub(crate) async fn fetch_complaint(
    conn: &mut SqliteConnection,
    id: ComplaintId,
) -> Result<Option<Complaint>, RepositoryError> {
    let row = sqlx::query(
        "SELECT id, invoice_id, description, status, created_at FROM complaint WHERE id = ?",
    )
    .bind(id.0)
    .fetch_optional(&mut *conn)
    .await?;

    row.map(complaint_from_row).transpose()
}

pub(crate) fn detail_from_row(row: SqliteRow) -> Result<ComplaintDetail, RepositoryError> {
    Ok(ComplaintDetail {
        id: ComplaintDetailId(row.try_get("id")?),
        complaint_id: ComplaintId(row.try_get("complaint_id")?),
        product_id: ProductId(row.try_get("product_id")?),
        complaint_type_id: ComplaintTypeId(row.try_get("complaint_type_id")?),
        reason: row.try_get("reason")?,
        evidence_path: row.try_get("evidence_path")?,
    })
}

fn complaint_from_row(row: SqliteRow) -> Result<Complaint, RepositoryError> {
    let status_raw = row.try_get::<String, _>("status")?;
    let status = ComplaintStatus::parse(&status_raw).ok_or_else(|| {
        RepositoryError::Decode(format!("unknown complaint status `{status_raw}`"))
    })?;

    Ok(Complaint::restore(
        ComplaintId(row.try_get("id")?),
        InvoiceId(row.try_get("invoice_id")?),
        row.try_get("description")?,
        status,
        parse_timestamp("created_at", row.try_get("created_at")?)?,
    ))
}

#[cfg(test)]
mod tests {
    use comanda_core::audit::{AuditCategory, AuditOutcome};
    use comanda_core::domain::complaint::{
        ComplaintId, ComplaintStatus, NewComplaint, NewComplaintDetail,
    };
    use comanda_core::domain::invoice::{Invoice, InvoiceId, NewInvoice};
    use comanda_core::errors::DomainError;

    use super::SqlComplaintTracker;
    use crate::repositories::test_support::{seed_catalog, setup_pool, Catalog};
    use crate::repositories::{
        ComplaintTracker, InvoiceLedger, RepositoryError, SqlAuditLog, SqlInvoiceLedger,
    };
    use crate::DbPool;

    async fn invoice_with_product_a(pool: &DbPool, catalog: &Catalog) -> Invoice {
        let ledger = SqlInvoiceLedger::new(pool.clone());
        let invoice = ledger
            .create_invoice(NewInvoice {
                customer_id: catalog.customer,
                employee_id: catalog.employee,
                restaurant_id: catalog.restaurant,
                issued_at: None,
            })
            .await
            .expect("create invoice");
        ledger.add_line_item(invoice.id, catalog.product_a, 1).await.expect("add line");
        invoice
    }

    fn detail(
        complaint_id: ComplaintId,
        catalog: &Catalog,
        on_invoice: bool,
    ) -> NewComplaintDetail {
        NewComplaintDetail {
            complaint_id,
            product_id: if on_invoice { catalog.product_a } else { catalog.product_c },
            complaint_type_id: catalog.quality,
            reason: "arrived cold".to_string(),
            evidence_path: Some("uploads/photo-1.jpg".to_string()),
        }
    }

    #[tokio::test]
    async fn new_complaints_start_pending() {
        let pool = setup_pool().await;
        let catalog = seed_catalog(&pool).await;
        let invoice = invoice_with_product_a(&pool, &catalog).await;
        let tracker = SqlComplaintTracker::new(pool.clone());

        let complaint = tracker
            .create_complaint(NewComplaint {
                invoice_id: invoice.id,
                description: "cold food".to_string(),
            })
            .await
            .expect("create complaint");

        assert_eq!(complaint.status(), ComplaintStatus::Pending);
        assert_eq!(tracker.find_complaint(complaint.id).await.expect("find"), Some(complaint));
        pool.close().await;
    }

    #[tokio::test]
    async fn complaint_input_is_validated() {
        let pool = setup_pool().await;
        let catalog = seed_catalog(&pool).await;
        let invoice = invoice_with_product_a(&pool, &catalog).await;
        let tracker = SqlComplaintTracker::new(pool.clone());

        let blank = tracker
            .create_complaint(NewComplaint { invoice_id: invoice.id, description: "  ".to_string() })
            .await;
        assert!(matches!(blank, Err(RepositoryError::Domain(DomainError::Validation(_)))));

        let unknown = tracker
            .create_complaint(NewComplaint {
                invoice_id: InvoiceId(404),
                description: "late".to_string(),
            })
            .await;
        assert!(matches!(
            unknown,
            Err(RepositoryError::Domain(DomainError::ReferentialIntegrity(_)))
        ));
        pool.close().await;
    }

    #[tokio::test]
    async fn detail_requires_product_on_the_invoice() {
        let pool = setup_pool().await;
        let catalog = seed_catalog(&pool).await;
        let invoice = invoice_with_product_a(&pool, &catalog).await;
        let tracker = SqlComplaintTracker::new(pool.clone());
        let complaint = tracker
            .create_complaint(NewComplaint {
                invoice_id: invoice.id,
                description: "cold food".to_string(),
            })
            .await
            .expect("create complaint");

        let accepted = tracker
            .add_complaint_detail(detail(complaint.id, &catalog, true))
            .await
            .expect("product on invoice");
        assert_eq!(accepted.evidence_path.as_deref(), Some("uploads/photo-1.jpg"));

        let error = tracker
            .add_complaint_detail(detail(complaint.id, &catalog, false))
            .await
            .expect_err("product not on invoice");
        assert!(matches!(error, RepositoryError::Domain(DomainError::ReferentialIntegrity(_))));

        let details = tracker.list_complaint_details(complaint.id).await.expect("details");
        assert_eq!(details, vec![accepted]);

        let events = SqlAuditLog::new(pool.clone())
            .list_for_entity(AuditCategory::Complaint, complaint.id.0)
            .await
            .expect("audit events");
        let rejected = events
            .iter()
            .find(|event| event.event_type == "complaint.detail_rejected")
            .expect("rejection is audited");
        assert_eq!(rejected.outcome, AuditOutcome::Rejected);

        pool.close().await;
    }

    #[tokio::test]
    async fn detail_rejection_survives_a_failed_audit_write() {
        let pool = setup_pool().await;
        let catalog = seed_catalog(&pool).await;
        let invoice = invoice_with_product_a(&pool, &catalog).await;
        let tracker = SqlComplaintTracker::new(pool.clone());
        let complaint = tracker
            .create_complaint(NewComplaint {
                invoice_id: invoice.id,
                description: "cold food".to_string(),
            })
            .await
            .expect("create complaint");

        sqlx::query("DROP TABLE audit_event").execute(&pool).await.expect("drop audit table");

        let error = tracker
            .add_complaint_detail(detail(complaint.id, &catalog, false))
            .await
            .expect_err("product not on invoice");
        assert!(matches!(error, RepositoryError::Domain(DomainError::ReferentialIntegrity(_))));
        assert!(tracker.list_complaint_details(complaint.id).await.expect("details").is_empty());

        pool.close().await;
    }

    #[tokio::test]
    async fn begin_handling_moves_pending_to_in_progress_once() {
        let pool = setup_pool().await;
        let catalog = seed_catalog(&pool).await;
        let invoice = invoice_with_product_a(&pool, &catalog).await;
        let tracker = SqlComplaintTracker::new(pool.clone());
        let complaint = tracker
            .create_complaint(NewComplaint {
                invoice_id: invoice.id,
                description: "wrong order".to_string(),
            })
            .await
            .expect("create complaint");

        let handled = tracker.begin_handling(complaint.id).await.expect("begin handling");
        assert_eq!(handled.status(), ComplaintStatus::InProgress);

        let error = tracker.begin_handling(complaint.id).await.expect_err("already handled");
        assert!(matches!(error, RepositoryError::Domain(DomainError::InvalidState { .. })));

        let in_progress = tracker
            .list_complaints(Some(ComplaintStatus::InProgress))
            .await
            .expect("list in progress");
        assert_eq!(in_progress.len(), 1);
        assert!(tracker
            .list_complaints(Some(ComplaintStatus::Pending))
            .await
            .expect("list pending")
            .is_empty());
        pool.close().await;
    }

    #[tokio::test]
    async fn complaints_block_invoice_deletion_until_removed() {
        let pool = setup_pool().await;
        let catalog = seed_catalog(&pool).await;
        let invoice = invoice_with_product_a(&pool, &catalog).await;
        let tracker = SqlComplaintTracker::new(pool.clone());
        let ledger = SqlInvoiceLedger::new(pool.clone());
        let complaint = tracker
            .create_complaint(NewComplaint {
                invoice_id: invoice.id,
                description: "cold food".to_string(),
            })
            .await
            .expect("create complaint");
        tracker
            .add_complaint_detail(detail(complaint.id, &catalog, true))
            .await
            .expect("add detail");

        let blocked = ledger.delete_invoice(invoice.id).await;
        assert!(matches!(
            blocked,
            Err(RepositoryError::Domain(DomainError::ReferentialIntegrity(_)))
        ));
        assert!(ledger.find_invoice(invoice.id).await.expect("find").is_some());

        tracker.delete_complaint(complaint.id).await.expect("delete complaint");
        assert!(tracker.list_complaint_details(complaint.id).await.expect("details").is_empty());

        ledger.delete_invoice(invoice.id).await.expect("delete invoice");
        pool.close().await;
    }
}
