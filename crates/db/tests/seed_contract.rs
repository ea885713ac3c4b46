use std::collections::HashSet;

use serde::Deserialize;

type SeedContractTestResult<T = ()> = Result<T, String>;

macro_rules! require {
    ($cond:expr) => {
        if !$cond {
            return Err(format!("assertion failed: `{}`", stringify!($cond)));
        }
    };
    ($cond:expr, $($arg:tt)*) => {
        if !$cond {
            return Err(format!($($arg)*));
        }
    };
}

macro_rules! require_eq {
    ($left:expr, $right:expr) => {
        if $left != $right {
            return Err(format!(
                "assertion failed: `left == right` (`{:?}` != `{:?}`)",
                $left,
                $right
            ));
        }
    };
}

#[derive(Debug, Deserialize)]
struct SeedTableContract {
    table: String,
    ids: Vec<i64>,
}

#[derive(Debug, Deserialize)]
struct SeedProductContract {
    id: i64,
    name: String,
    price: String,
}

#[derive(Debug, Deserialize)]
struct SeedContract {
    dataset_version: String,
    seed_dataset: String,
    tables: Vec<SeedTableContract>,
    products: Vec<SeedProductContract>,
}

fn load_contract() -> SeedContractTestResult<SeedContract> {
    serde_json::from_str(include_str!("../../../config/fixtures/demo_catalog_contract.json"))
        .map_err(|error| format!("seed contract JSON must parse: {error}"))
}

#[test]
fn seed_contract_matches_demo_catalog_sql_fixture() -> SeedContractTestResult {
    let fixture_sql = include_str!("../../../config/fixtures/demo_catalog.sql");
    let contract = load_contract()?;
    let mut tables_seen = HashSet::new();

    require_eq!(contract.dataset_version, "demo-catalog-1");
    require_eq!(contract.seed_dataset, "deterministic_demo_catalog");
    require_eq!(contract.tables.len(), 10);

    for table in &contract.tables {
        require!(tables_seen.insert(table.table.clone()), "duplicate table: {}", table.table);
        require!(!table.ids.is_empty(), "{} should seed at least one row", table.table);
        require!(
            fixture_sql.contains(&format!("INSERT OR IGNORE INTO {} ", table.table)),
            "seed SQL fixture should insert into {}",
            table.table
        );

        for id in &table.ids {
            require!(
                *id >= 901,
                "fixture id {} in {} should stay in the demo range",
                id,
                table.table
            );
        }
    }

    Ok(())
}

#[test]
fn seed_contract_products_match_fixture_prices() -> SeedContractTestResult {
    let fixture_sql = include_str!("../../../config/fixtures/demo_catalog.sql");
    let contract = load_contract()?;

    let product_ids = contract
        .tables
        .iter()
        .find(|table| table.table == "product")
        .map(|table| table.ids.clone())
        .ok_or_else(|| "contract should list product ids".to_string())?;
    require_eq!(product_ids.len(), contract.products.len());

    for product in &contract.products {
        require!(product_ids.contains(&product.id), "product {} missing from ids", product.id);
        let row_prefix = format!("({}, '{}', '{}'", product.id, product.name, product.price);
        require!(
            fixture_sql.contains(&row_prefix),
            "seed SQL fixture should price product {} ({}) at {}",
            product.id,
            product.name,
            product.price
        );
    }

    Ok(())
}
