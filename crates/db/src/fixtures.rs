use std::str::FromStr;

use rust_decimal::Decimal;
use sqlx::Executor;

use crate::connection::DbPool;
use crate::repositories::RepositoryError;

/// Reference rows the demo catalog guarantees, in foreign key order.
const SEED_TABLES: &[SeedTableContract] = &[
    SeedTableContract { table: "country", ids: &[901] },
    SeedTableContract { table: "province", ids: &[901, 902] },
    SeedTableContract { table: "city", ids: &[901, 902] },
    SeedTableContract { table: "restaurant", ids: &[901, 902] },
    SeedTableContract { table: "job_title", ids: &[901, 902] },
    SeedTableContract { table: "employee", ids: &[901, 902] },
    SeedTableContract { table: "customer", ids: &[901, 902] },
    SeedTableContract { table: "product", ids: &[901, 902, 903, 904] },
    SeedTableContract { table: "complaint_type", ids: &[901, 902, 903] },
    SeedTableContract { table: "resolution_type", ids: &[901, 902, 903] },
];

const SEED_PRODUCT_PRICES: &[(i64, &str)] =
    &[(901, "5.00"), (902, "3.50"), (903, "4.00"), (904, "9.75")];

/// Deterministic reference catalog for local runs: two branches, two
/// employees, two customers, four products and the complaint and
/// resolution types.
///
/// Loading is idempotent. Rows that already exist under a fixture id are
/// left as they are, so a catalog edited after seeding is not reset.
pub struct DemoCatalog;

impl DemoCatalog {
    pub const SQL: &'static str = include_str!("../../../config/fixtures/demo_catalog.sql");

    pub async fn load(pool: &DbPool) -> Result<SeedResult, RepositoryError> {
        let mut tx = pool.begin().await?;
        tx.execute(sqlx::query(Self::SQL)).await?;
        tx.commit().await?;

        let mut tables_seeded = Vec::with_capacity(SEED_TABLES.len());
        for contract in SEED_TABLES {
            tables_seeded.push(TableSeedInfo {
                table: contract.table,
                rows: Self::count_present(pool, contract).await?,
            });
        }

        Ok(SeedResult { tables_seeded })
    }

    pub async fn verify(pool: &DbPool) -> Result<VerificationResult, RepositoryError> {
        let mut checks = Vec::new();

        for contract in SEED_TABLES {
            let present = Self::count_present(pool, contract).await?;
            checks.push((contract.table, present == contract.ids.len()));
        }

        for (id, expected) in SEED_PRODUCT_PRICES {
            let stored: Option<String> =
                sqlx::query_scalar("SELECT price FROM product WHERE id = ?")
                    .bind(id)
                    .fetch_optional(pool)
                    .await?;
            checks.push(("product-price", price_matches(stored.as_deref(), expected)));
        }

        let all_present = checks.iter().all(|(_, ok)| *ok);
        Ok(VerificationResult { all_present, checks })
    }

    async fn count_present(
        pool: &DbPool,
        contract: &SeedTableContract,
    ) -> Result<usize, RepositoryError> {
        let count: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(1) FROM {} WHERE id IN {}",
            contract.table,
            sql_array_from_ids(contract.ids)
        ))
        .fetch_one(pool)
        .await?;

        usize::try_from(count)
            .map_err(|_| RepositoryError::Decode(format!("negative count for {}", contract.table)))
    }
}

struct SeedTableContract {
    table: &'static str,
    ids: &'static [i64],
}

fn price_matches(stored: Option<&str>, expected: &str) -> bool {
    match (stored.map(Decimal::from_str), Decimal::from_str(expected)) {
        (Some(Ok(stored)), Ok(expected)) => stored == expected,
        _ => false,
    }
}

fn sql_array_from_ids(ids: &[i64]) -> String {
    let joined = ids.iter().map(i64::to_string).collect::<Vec<_>>().join(",");
    format!("({joined})")
}

#[derive(Debug)]
pub struct SeedResult {
    pub tables_seeded: Vec<TableSeedInfo>,
}

impl SeedResult {
    pub fn total_rows(&self) -> usize {
        self.tables_seeded.iter().map(|table| table.rows).sum()
    }
}

#[derive(Debug)]
pub struct TableSeedInfo {
    pub table: &'static str,
    pub rows: usize,
}

#[derive(Debug)]
pub struct VerificationResult {
    pub all_present: bool,
    pub checks: Vec<(&'static str, bool)>,
}

impl VerificationResult {
    pub fn failed_checks(&self) -> Vec<&'static str> {
        self.checks.iter().filter(|(_, ok)| !ok).map(|(name, _)| *name).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::test_support::setup_pool;

    #[test]
    fn sql_fixture_is_valid() {
        assert!(!DemoCatalog::SQL.is_empty());
        for contract in SEED_TABLES {
            assert!(
                DemoCatalog::SQL.contains(&format!("INSERT OR IGNORE INTO {} ", contract.table)),
                "fixture should seed {}",
                contract.table
            );
        }
    }

    #[tokio::test]
    async fn verify_seed_contract_and_idempotency() {
        let pool = setup_pool().await;

        let first = DemoCatalog::load(&pool).await.expect("load seed fixtures");
        let first_verification = DemoCatalog::verify(&pool).await.expect("verify seed fixtures");
        assert!(first_verification.all_present, "{:?}", first_verification.failed_checks());
        assert_eq!(first.tables_seeded.len(), SEED_TABLES.len());
        assert_eq!(first.total_rows(), 23);

        let second = DemoCatalog::load(&pool).await.expect("reload seed fixtures");
        let second_verification =
            DemoCatalog::verify(&pool).await.expect("re-verify seed fixtures");
        assert!(second_verification.all_present);
        assert_eq!(second.total_rows(), first.total_rows());
        assert_eq!(first_verification.checks, second_verification.checks);
    }

    #[tokio::test]
    async fn verify_reports_drift_in_seeded_prices() {
        let pool = setup_pool().await;
        DemoCatalog::load(&pool).await.expect("load seed fixtures");

        sqlx::query("UPDATE product SET price = '6.25' WHERE id = 901")
            .execute(&pool)
            .await
            .expect("edit price");

        let verification = DemoCatalog::verify(&pool).await.expect("verify");
        assert!(!verification.all_present);
        assert_eq!(verification.failed_checks(), vec!["product-price"]);
    }

    #[tokio::test]
    async fn verify_fails_before_loading() {
        let pool = setup_pool().await;

        let verification = DemoCatalog::verify(&pool).await.expect("verify empty database");
        assert!(!verification.all_present);
        assert!(verification.failed_checks().contains(&"country"));
    }

    #[test]
    fn price_comparison_ignores_trailing_zeros() {
        assert!(price_matches(Some("3.5"), "3.50"));
        assert!(!price_matches(Some("3.51"), "3.50"));
        assert!(!price_matches(None, "3.50"));
    }
}
