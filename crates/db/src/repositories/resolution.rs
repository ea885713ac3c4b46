use async_trait::async_trait;
use sqlx::{sqlite::SqliteRow, Row, SqliteConnection};
use tracing::{info, warn};

use comanda_core::audit::{AuditCategory, AuditEvent};
use comanda_core::domain::catalog::{require_text, EmployeeId, ResolutionTypeId};
use comanda_core::domain::complaint::{ComplaintDetailId, ComplaintId, ComplaintStatus};
use comanda_core::domain::resolution::{
    ensure_detail_belongs, NewResolutionDetail, Resolution, ResolutionDetail, ResolutionDetailId,
    ResolutionId, ResolutionRequest,
};
use comanda_core::errors::DomainError;

use super::audit::{insert_event, record_rejection};
use super::complaint::{detail_from_row, fetch_complaint};
use super::{
    constraint_error, format_timestamp, missing, now, parse_timestamp, RepositoryError,
    ResolutionCloser,
};
use crate::DbPool;

pub struct SqlResolutionCloser {
    pool: DbPool,
}

impl SqlResolutionCloser {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn reject(&self, complaint_id: ComplaintId, error: &DomainError) {
        record_rejection(
            &self.pool,
            &AuditEvent::rejected(AuditCategory::Complaint, complaint_id.0, "resolution.rejected")
                .with_metadata("reason", error.kind()),
        )
        .await;

        warn!(
            event_name = "resolution.rejected",
            complaint_id = complaint_id.0,
            error_kind = error.kind(),
            "complaint could not be resolved"
        );
    }
}

#[async_trait]
impl ResolutionCloser for SqlResolutionCloser {
    async fn create_resolution(
        &self,
        request: ResolutionRequest,
    ) -> Result<Resolution, RepositoryError> {
        let complaint_id = request.complaint_id;
        let closed_at = now();
        let mut tx = self.pool.begin().await?;

        let touched = sqlx::query("UPDATE complaint SET updated_at = ? WHERE id = ?")
            .bind(format_timestamp(closed_at))
            .bind(complaint_id.0)
            .execute(&mut *tx)
            .await?;
        if touched.rows_affected() == 0 {
            return Err(missing("complaint", complaint_id.0));
        }

        let mut complaint = fetch_complaint(&mut tx, complaint_id)
            .await?
            .ok_or_else(|| missing("complaint", complaint_id.0))?;

        let closed = match request.close(&mut complaint, closed_at) {
            Ok(closed) => closed,
            Err(error) => {
                tx.rollback().await?;
                self.reject(complaint_id, &error).await;
                return Err(error.into());
            }
        };

        let flipped = sqlx::query(
            "UPDATE complaint SET status = ?
             WHERE id = ? AND status IN (?, ?)",
        )
        .bind(ComplaintStatus::Resolved.as_str())
        .bind(complaint_id.0)
        .bind(ComplaintStatus::Pending.as_str())
        .bind(ComplaintStatus::InProgress.as_str())
        .execute(&mut *tx)
        .await?;
        if flipped.rows_affected() == 0 {
            let error = DomainError::InvalidState {
                from: ComplaintStatus::Resolved,
                to: ComplaintStatus::Resolved,
            };
            tx.rollback().await?;
            self.reject(complaint_id, &error).await;
            return Err(error.into());
        }

        let id = sqlx::query(
            "INSERT INTO resolution (complaint_id, employee_id, closed_at, comment)
             VALUES (?, ?, ?, ?)",
        )
        .bind(complaint_id.0)
        .bind(closed.employee_id.0)
        .bind(format_timestamp(closed.closed_at))
        .bind(&closed.comment)
        .execute(&mut *tx)
        .await
        .map_err(|error| match constraint_error("resolution")(error) {
            RepositoryError::Domain(DomainError::ReferentialIntegrity(_)) => {
                missing("employee", closed.employee_id.0)
            }
            RepositoryError::Domain(DomainError::UniquenessViolation(_)) => {
                RepositoryError::Domain(DomainError::InvalidState {
                    from: ComplaintStatus::Resolved,
                    to: ComplaintStatus::Resolved,
                })
            }
            other => other,
        })?
        .last_insert_rowid();

        insert_event(
            &mut *tx,
            &AuditEvent::success(AuditCategory::Resolution, id, "resolution.created")
                .with_metadata("complaint_id", complaint_id.to_string())
                .with_metadata("employee_id", closed.employee_id.to_string())
                .with_metadata("previous_status", closed.previous_status.as_str()),
        )
        .await?;

        tx.commit().await?;

        info!(
            event_name = "resolution.created",
            resolution_id = id,
            complaint_id = complaint_id.0,
            employee_id = closed.employee_id.0,
            previous_status = closed.previous_status.as_str(),
            "complaint resolved"
        );

        Ok(Resolution {
            id: ResolutionId(id),
            complaint_id,
            employee_id: closed.employee_id,
            closed_at: closed.closed_at,
            comment: closed.comment,
        })
    }

    async fn add_resolution_detail(
        &self,
        detail: NewResolutionDetail,
    ) -> Result<ResolutionDetail, RepositoryError> {
        require_text("resolution observation", &detail.observation)?;
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            "UPDATE resolution SET comment = comment WHERE id = ?
             RETURNING id, complaint_id, employee_id, closed_at, comment",
        )
        .bind(detail.resolution_id.0)
        .fetch_optional(&mut *tx)
        .await?;
        let resolution = row
            .map(resolution_from_row)
            .transpose()?
            .ok_or_else(|| missing("resolution", detail.resolution_id.0))?;

        let row = sqlx::query(
            "SELECT id, complaint_id, product_id, complaint_type_id, reason, evidence_path
             FROM complaint_detail
             WHERE id = ?",
        )
        .bind(detail.complaint_detail_id.0)
        .fetch_optional(&mut *tx)
        .await?;
        let complaint_detail = row
            .map(detail_from_row)
            .transpose()?
            .ok_or_else(|| missing("complaint detail", detail.complaint_detail_id.0))?;
        ensure_detail_belongs(&resolution, &complaint_detail)?;

        let already_resolved: i64 = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM resolution_detail WHERE complaint_detail_id = ?)",
        )
        .bind(detail.complaint_detail_id.0)
        .fetch_one(&mut *tx)
        .await?;
        if already_resolved == 1 {
            return Err(duplicate(detail.complaint_detail_id));
        }

        let id = sqlx::query(
            "INSERT INTO resolution_detail (
                resolution_id, complaint_detail_id, resolution_type_id, observation
             ) VALUES (?, ?, ?, ?)",
        )
        .bind(detail.resolution_id.0)
        .bind(detail.complaint_detail_id.0)
        .bind(detail.resolution_type_id.0)
        .bind(&detail.observation)
        .execute(&mut *tx)
        .await
        .map_err(|error| match constraint_error("resolution detail")(error) {
            RepositoryError::Domain(DomainError::UniquenessViolation(_)) => {
                duplicate(detail.complaint_detail_id)
            }
            RepositoryError::Domain(DomainError::ReferentialIntegrity(_)) => {
                missing("resolution type", detail.resolution_type_id.0)
            }
            other => other,
        })?
        .last_insert_rowid();

        insert_event(
            &mut *tx,
            &AuditEvent::success(
                AuditCategory::Resolution,
                detail.resolution_id.0,
                "resolution.detail_added",
            )
            .with_metadata("resolution_detail_id", id.to_string())
            .with_metadata("complaint_detail_id", detail.complaint_detail_id.to_string()),
        )
        .await?;

        tx.commit().await?;

        info!(
            event_name = "resolution.detail.added",
            resolution_id = detail.resolution_id.0,
            resolution_detail_id = id,
            complaint_detail_id = detail.complaint_detail_id.0,
            "resolution detail added"
        );

        Ok(ResolutionDetail {
            id: ResolutionDetailId(id),
            resolution_id: Some(detail.resolution_id),
            complaint_detail_id: detail.complaint_detail_id,
            resolution_type_id: detail.resolution_type_id,
            observation: detail.observation,
        })
    }

    async fn find_resolution(
        &self,
        id: ResolutionId,
    ) -> Result<Option<Resolution>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, complaint_id, employee_id, closed_at, comment FROM resolution WHERE id = ?",
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(resolution_from_row).transpose()
    }

    async fn find_resolution_for_complaint(
        &self,
        complaint_id: ComplaintId,
    ) -> Result<Option<Resolution>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, complaint_id, employee_id, closed_at, comment
             FROM resolution
             WHERE complaint_id = ?",
        )
        .bind(complaint_id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(resolution_from_row).transpose()
    }

    async fn list_resolution_details(
        &self,
        resolution_id: ResolutionId,
    ) -> Result<Vec<ResolutionDetail>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, resolution_id, complaint_detail_id, resolution_type_id, observation
             FROM resolution_detail
             WHERE resolution_id = ?
             ORDER BY id ASC",
        )
        .bind(resolution_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(resolution_detail_from_row).collect()
    }

    async fn delete_resolution(&self, id: ResolutionId) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let complaint_id = delete_resolution_row(&mut tx, id).await?;

        insert_event(
            &mut *tx,
            &AuditEvent::success(AuditCategory::Resolution, id.0, "resolution.deleted")
                .with_metadata("complaint_id", complaint_id.to_string()),
        )
        .await?;

        tx.commit().await?;

        info!(
            event_name = "resolution.deleted",
            resolution_id = id.0,
            complaint_id = complaint_id.0,
            "resolution deleted; complaint stays resolved"
        );
        Ok(())
    }
}

/// Details go with the resolution through the cascade.
async fn delete_resolution_row(
    conn: &mut SqliteConnection,
    id: ResolutionId,
) -> Result<ComplaintId, RepositoryError> {
    let complaint_id: Option<i64> =
        sqlx::query_scalar("DELETE FROM resolution WHERE id = ? RETURNING complaint_id")
            .bind(id.0)
            .fetch_optional(&mut *conn)
            .await
            .map_err(constraint_error("resolution"))?;

    complaint_id.map(ComplaintId).ok_or_else(|| missing("resolution", id.0))
}

fn duplicate(complaint_detail_id: ComplaintDetailId) -> RepositoryError {
    RepositoryError::Domain(DomainError::DuplicateResolution {
        complaint_detail_id: complaint_detail_id.0,
    })
}

fn resolution_from_row(row: SqliteRow) -> Result<Resolution, RepositoryError> {
    Ok(Resolution {
        id: ResolutionId(row.try_get("id")?),
        complaint_id: ComplaintId(row.try_get("complaint_id")?),
        employee_id: EmployeeId(row.try_get("employee_id")?),
        closed_at: parse_timestamp("closed_at", row.try_get("closed_at")?)?,
        comment: row.try_get("comment")?,
    })
}

fn resolution_detail_from_row(row: SqliteRow) -> Result<ResolutionDetail, RepositoryError> {
    Ok(ResolutionDetail {
        id: ResolutionDetailId(row.try_get("id")?),
        resolution_id: row.try_get::<Option<i64>, _>("resolution_id")?.map(ResolutionId),
        complaint_detail_id: ComplaintDetailId(row.try_get("complaint_detail_id")?),
        resolution_type_id: ResolutionTypeId(row.try_get("resolution_type_id")?),
        observation: row.try_get("observation")?,
    })
}
