use serde::Serialize;

use crate::DbPool;

/// Row counts for the ledger tables, read without locking anything.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct LedgerCounts {
    pub invoices: i64,
    pub open_complaints: i64,
    pub resolutions: i64,
}

pub async fn ping(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query_scalar::<_, i64>("SELECT 1").fetch_one(pool).await.map(|_| ())
}

pub async fn ledger_counts(pool: &DbPool) -> Result<LedgerCounts, sqlx::Error> {
    let (invoices, open_complaints, resolutions) = sqlx::query_as::<_, (i64, i64, i64)>(
        "SELECT
            (SELECT COUNT(*) FROM invoice),
            (SELECT COUNT(*) FROM complaint WHERE status != 'resolved'),
            (SELECT COUNT(*) FROM resolution)",
    )
    .fetch_one(pool)
    .await?;

    Ok(LedgerCounts { invoices, open_complaints, resolutions })
}

/// Next value the counter row for `series` will hand out.
pub async fn next_sequence(pool: &DbPool, series: &str) -> Result<u64, sqlx::Error> {
    let last: Option<i64> =
        sqlx::query_scalar("SELECT last_value FROM invoice_sequence WHERE series = ?")
            .bind(series)
            .fetch_optional(pool)
            .await?;

    Ok(last.and_then(|value| u64::try_from(value).ok()).unwrap_or(0) + 1)
}
