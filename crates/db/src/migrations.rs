use sqlx::migrate::{MigrateError, Migrator};

use crate::DbPool;

pub static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");

pub async fn run_pending(pool: &DbPool) -> Result<(), MigrateError> {
    MIGRATOR.run(pool).await
}

/// Versions embedded in this build, oldest first.
pub fn known_versions() -> Vec<i64> {
    MIGRATOR
        .iter()
        .filter(|migration| migration.migration_type.is_up_migration())
        .map(|migration| migration.version)
        .collect()
}

/// Versions recorded as successfully applied. Empty before the first run.
pub async fn applied_versions(pool: &DbPool) -> Result<Vec<i64>, sqlx::Error> {
    let tracked: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = '_sqlx_migrations'",
    )
    .fetch_one(pool)
    .await?;
    if tracked == 0 {
        return Ok(Vec::new());
    }

    sqlx::query_scalar("SELECT version FROM _sqlx_migrations WHERE success = 1 ORDER BY version")
        .fetch_all(pool)
        .await
}

#[cfg(test)]
mod tests {
    use sqlx::Row;

    use super::{applied_versions, known_versions, run_pending};
    use crate::{connect_with_settings, migrations::MIGRATOR, DbPool};

    const LEDGER_TABLES: &[&str] = &[
        "country",
        "province",
        "city",
        "restaurant",
        "job_title",
        "employee",
        "customer",
        "product",
        "complaint_type",
        "resolution_type",
        "invoice_sequence",
        "invoice",
        "invoice_line_item",
        "complaint",
        "complaint_detail",
        "resolution",
        "resolution_detail",
        "audit_event",
    ];

    const MANAGED_SCHEMA_OBJECTS: &[&str] = &[
        "country",
        "province",
        "city",
        "restaurant",
        "job_title",
        "employee",
        "customer",
        "product",
        "complaint_type",
        "resolution_type",
        "invoice_sequence",
        "invoice",
        "invoice_line_item",
        "complaint",
        "complaint_detail",
        "resolution",
        "resolution_detail",
        "audit_event",
        "idx_province_country_id",
        "idx_city_province_id",
        "idx_restaurant_city_id",
        "idx_employee_job_title_id",
        "idx_invoice_customer_id",
        "idx_invoice_issued_at",
        "idx_invoice_line_item_invoice_id",
        "idx_invoice_line_item_product_id",
        "idx_complaint_invoice_id",
        "idx_complaint_status",
        "idx_complaint_detail_complaint_id",
        "idx_resolution_detail_resolution_id",
        "idx_audit_event_entity",
        "idx_audit_event_occurred_at",
        "idx_audit_event_type",
    ];

    async fn table_exists(pool: &DbPool, name: &str) -> bool {
        sqlx::query(
            "SELECT COUNT(*) AS count FROM sqlite_master WHERE type = 'table' AND name = ?",
        )
        .bind(name)
        .fetch_one(pool)
        .await
        .expect("query sqlite_master")
        .get::<i64, _>("count")
            == 1
    }

    #[tokio::test]
    async fn migrations_create_ledger_tables() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");

        for table in LEDGER_TABLES {
            assert!(table_exists(&pool, table).await, "missing table `{table}`");
        }
    }

    #[tokio::test]
    async fn applied_versions_track_embedded_migrations() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        assert!(applied_versions(&pool).await.expect("before first run").is_empty());

        run_pending(&pool).await.expect("run migrations");

        assert_eq!(known_versions(), vec![1, 2, 3, 4]);
        assert_eq!(applied_versions(&pool).await.expect("after run"), known_versions());
    }

    #[tokio::test]
    async fn migrations_are_reversible() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");

        MIGRATOR.undo(&pool, 2).await.expect("undo down to invoicing");
        assert!(table_exists(&pool, "invoice").await);
        assert!(!table_exists(&pool, "complaint").await);
        assert!(!table_exists(&pool, "audit_event").await);

        MIGRATOR.undo(&pool, 0).await.expect("undo migrations");
        for table in LEDGER_TABLES {
            assert!(!table_exists(&pool, table).await, "table `{table}` survived undo");
        }
    }

    #[tokio::test]
    async fn migrations_up_down_up_preserves_schema_signature() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");

        let initial_signature = managed_schema_signature(&pool).await;
        assert_eq!(
            initial_signature.len(),
            MANAGED_SCHEMA_OBJECTS.len(),
            "initial migration pass should create all managed schema objects",
        );

        MIGRATOR.undo(&pool, 0).await.expect("undo migrations");

        let after_down_signature = managed_schema_signature(&pool).await;
        assert!(
            after_down_signature.is_empty(),
            "managed schema objects should be removed after full undo",
        );

        run_pending(&pool).await.expect("re-run migrations");

        let after_second_up_signature = managed_schema_signature(&pool).await;
        assert_eq!(
            after_second_up_signature, initial_signature,
            "up/down/up should preserve migration-managed schema signature",
        );
    }

    async fn managed_schema_signature(pool: &DbPool) -> Vec<(String, String, String)> {
        let mut signature: Vec<(String, String, String)> = sqlx::query(
            "SELECT type, name, IFNULL(sql, '') AS sql
             FROM sqlite_master
             WHERE type IN ('table', 'index')",
        )
        .fetch_all(pool)
        .await
        .expect("load schema objects")
        .into_iter()
        .filter_map(|row| {
            let name = row.get::<String, _>("name");
            if MANAGED_SCHEMA_OBJECTS.contains(&name.as_str()) {
                Some((row.get::<String, _>("type"), name, row.get::<String, _>("sql")))
            } else {
                None
            }
        })
        .collect();
        signature.sort();
        signature
    }
}
