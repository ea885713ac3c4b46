use std::collections::BTreeMap;

use comanda_core::audit::{AuditCategory, AuditEvent, AuditOutcome};
use sqlx::{sqlite::SqliteRow, Executor, Row, Sqlite};
use tracing::warn;

use super::{format_timestamp, parse_timestamp, RepositoryError};
use crate::DbPool;

/// Read side of the audit trail. Writers append through [`insert_event`]
/// inside their own transactions.
pub struct SqlAuditLog {
    pool: DbPool,
}

impl SqlAuditLog {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn record(&self, event: &AuditEvent) -> Result<(), RepositoryError> {
        insert_event(&self.pool, event).await
    }

    pub async fn list_for_entity(
        &self,
        category: AuditCategory,
        entity_id: i64,
    ) -> Result<Vec<AuditEvent>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, category, entity_id, event_type, outcome, metadata_json, occurred_at
             FROM audit_event
             WHERE category = ? AND entity_id = ?
             ORDER BY occurred_at ASC, rowid ASC",
        )
        .bind(category.as_str())
        .bind(entity_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(event_from_row).collect()
    }

    pub async fn list_recent(&self, limit: u32) -> Result<Vec<AuditEvent>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, category, entity_id, event_type, outcome, metadata_json, occurred_at
             FROM audit_event
             ORDER BY occurred_at DESC, rowid DESC
             LIMIT ?",
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(event_from_row).collect()
    }
}

pub(crate) async fn insert_event<'e, E>(
    executor: E,
    event: &AuditEvent,
) -> Result<(), RepositoryError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let metadata_json = serde_json::to_string(&event.metadata)
        .map_err(|error| RepositoryError::Decode(error.to_string()))?;

    sqlx::query(
        "INSERT INTO audit_event (
            id, category, entity_id, event_type, outcome, metadata_json, occurred_at
         ) VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&event.event_id)
    .bind(event.category.as_str())
    .bind(event.entity_id)
    .bind(&event.event_type)
    .bind(event.outcome.as_str())
    .bind(metadata_json)
    .bind(format_timestamp(event.occurred_at))
    .execute(executor)
    .await?;

    Ok(())
}

/// Appends a rejection after its transaction rolled back. A failed write is
/// logged and swallowed so the caller still returns the rule that fired.
pub(crate) async fn record_rejection(pool: &DbPool, event: &AuditEvent) {
    if let Err(error) = insert_event(pool, event).await {
        warn!(
            event_name = "audit.write_failed",
            audit_event_type = %event.event_type,
            entity_id = event.entity_id,
            error = %error,
            "could not record rejection in the audit trail"
        );
    }
}

fn event_from_row(row: SqliteRow) -> Result<AuditEvent, RepositoryError> {
    let category_raw = row.try_get::<String, _>("category")?;
    let category = AuditCategory::parse(&category_raw).ok_or_else(|| {
        RepositoryError::Decode(format!("unknown audit category `{category_raw}`"))
    })?;

    let outcome_raw = row.try_get::<String, _>("outcome")?;
    let outcome = AuditOutcome::parse(&outcome_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown audit outcome `{outcome_raw}`")))?;

    let metadata_json = row.try_get::<String, _>("metadata_json")?;
    let metadata: BTreeMap<String, String> = serde_json::from_str(&metadata_json)
        .map_err(|error| RepositoryError::Decode(error.to_string()))?;

    Ok(AuditEvent {
        event_id: row.try_get("id")?,
        category,
        entity_id: row.try_get("entity_id")?,
        event_type: row.try_get("event_type")?,
        outcome,
        metadata,
        occurred_at: parse_timestamp("occurred_at", row.try_get("occurred_at")?)?,
    })
}

#[cfg(test)]
mod tests {
    use comanda_core::audit::{AuditCategory, AuditEvent, AuditOutcome};

    use super::SqlAuditLog;
    use crate::repositories::test_support::setup_pool;

    #[tokio::test]
    async fn recorded_events_are_listed_per_entity() {
        let pool = setup_pool().await;
        let log = SqlAuditLog::new(pool.clone());

        let created = AuditEvent::success(AuditCategory::Complaint, 7, "complaint.created")
            .with_metadata("invoice_id", "3");
        let rejected = AuditEvent::rejected(AuditCategory::Complaint, 7, "complaint.detail_rejected")
            .with_metadata("product_id", "9");
        let other = AuditEvent::success(AuditCategory::Invoice, 7, "invoice.created");

        log.record(&created).await.expect("record created");
        log.record(&rejected).await.expect("record rejected");
        log.record(&other).await.expect("record other");

        let events =
            log.list_for_entity(AuditCategory::Complaint, 7).await.expect("list for complaint");
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, "complaint.created");
        assert_eq!(events[1].outcome, AuditOutcome::Rejected);
        assert_eq!(events[1].metadata.get("product_id").map(String::as_str), Some("9"));

        let recent = log.list_recent(1).await.expect("list recent");
        assert_eq!(recent.len(), 1);

        pool.close().await;
    }
}
