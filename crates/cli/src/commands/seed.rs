use crate::commands::{prepare, CommandResult};
use comanda_db::{connect_with_config, migrations, DemoCatalog, TableSeedInfo};

pub fn run() -> CommandResult {
    let (config, runtime) = match prepare("seed") {
        Ok(prepared) => prepared,
        Err(failure) => return failure,
    };

    let result = runtime.block_on(async {
        let pool = connect_with_config(&config.database)
            .await
            .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;

        migrations::run_pending(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), 5u8))?;

        let seed_result = DemoCatalog::load(&pool)
            .await
            .map_err(|error| ("seed_execution", error.to_string(), 5u8))?;

        let verification = DemoCatalog::verify(&pool)
            .await
            .map_err(|error| ("seed_verification", error.to_string(), 6u8))?;

        let run_result: Result<Vec<TableSeedInfo>, (&'static str, String, u8)> =
            if verification.all_present {
                Ok(seed_result.tables_seeded)
            } else {
                let message = verification_message(&verification.failed_checks());
                Err(("seed_verification", message, 6u8))
            };

        pool.close().await;
        run_result
    });

    match result {
        Ok(tables) => CommandResult::success("seed", summary(&tables)),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("seed", error_class, message, exit_code)
        }
    }
}

fn summary(tables: &[TableSeedInfo]) -> String {
    let lines: Vec<String> =
        tables.iter().map(|table| format!("  - {}: {} rows", table.table, table.rows)).collect();
    format!("demo catalog loaded and verified:\n{}", lines.join("\n"))
}

fn verification_message(failed_checks: &[&str]) -> String {
    if failed_checks.is_empty() {
        "Some seed data failed to load".to_string()
    } else {
        format!("Seed verification failed for checks: {}", failed_checks.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use comanda_db::TableSeedInfo;

    use super::{summary, verification_message};

    #[test]
    fn verification_error_message_targets_failed_checks() {
        assert_eq!(
            verification_message(&["product", "product-price"]),
            "Seed verification failed for checks: product, product-price"
        );
    }

    #[test]
    fn verification_error_message_falls_back_to_generic_when_no_labels() {
        assert_eq!(verification_message(&[]), "Some seed data failed to load");
    }

    #[test]
    fn summary_lists_each_table() {
        let tables = vec![
            TableSeedInfo { table: "country", rows: 1 },
            TableSeedInfo { table: "product", rows: 4 },
        ];
        assert_eq!(
            summary(&tables),
            "demo catalog loaded and verified:\n  - country: 1 rows\n  - product: 4 rows"
        );
    }
}
