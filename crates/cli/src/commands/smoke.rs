use std::time::Instant;

use crate::commands::CommandResult;
use comanda_core::config::{AppConfig, LoadOptions};
use comanda_db::{connect_with_config, health, migrations};
use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum SmokeStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct SmokeCheck {
    name: &'static str,
    status: SmokeStatus,
    elapsed_ms: u64,
    message: String,
}

#[derive(Debug, Serialize)]
struct SmokeReport {
    command: &'static str,
    status: SmokeStatus,
    summary: String,
    total_elapsed_ms: u64,
    checks: Vec<SmokeCheck>,
}

pub fn run() -> CommandResult {
    let started = Instant::now();
    let mut checks = Vec::new();

    let config = match timed_check(|| AppConfig::load(LoadOptions::default())) {
        Ok((elapsed_ms, config)) => {
            checks.push(SmokeCheck {
                name: "config_validation",
                status: SmokeStatus::Pass,
                elapsed_ms,
                message: "configuration loaded and validated".to_string(),
            });
            config
        }
        Err((elapsed_ms, error)) => {
            checks.push(SmokeCheck {
                name: "config_validation",
                status: SmokeStatus::Fail,
                elapsed_ms,
                message: error.to_string(),
            });
            checks.push(skipped("invoice_numbering"));
            checks.push(skipped("db_connectivity"));
            checks.push(skipped("migration_visibility"));
            checks.push(skipped("ledger_query"));
            return finalize_report(checks, elapsed_since(started));
        }
    };

    let numbering_started = Instant::now();
    let sample = config.invoicing.numbering().format(1);
    checks.push(SmokeCheck {
        name: "invoice_numbering",
        status: SmokeStatus::Pass,
        elapsed_ms: elapsed_since(numbering_started),
        message: format!("first code in series is `{sample}`"),
    });

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            checks.push(SmokeCheck {
                name: "db_connectivity",
                status: SmokeStatus::Fail,
                elapsed_ms: 0,
                message: format!("failed to initialize async runtime: {error}"),
            });
            checks.push(skipped("migration_visibility"));
            checks.push(skipped("ledger_query"));
            return finalize_report(checks, elapsed_since(started));
        }
    };

    let db_started = Instant::now();
    let pool = match runtime.block_on(connect_with_config(&config.database)) {
        Ok(pool) => {
            checks.push(SmokeCheck {
                name: "db_connectivity",
                status: SmokeStatus::Pass,
                elapsed_ms: elapsed_since(db_started),
                message: format!("connected using `{}`", config.database.url),
            });
            pool
        }
        Err(error) => {
            checks.push(SmokeCheck {
                name: "db_connectivity",
                status: SmokeStatus::Fail,
                elapsed_ms: elapsed_since(db_started),
                message: format!("failed to connect: {error}"),
            });
            checks.push(skipped("migration_visibility"));
            checks.push(skipped("ledger_query"));
            return finalize_report(checks, elapsed_since(started));
        }
    };

    let migration_started = Instant::now();
    let migrated = match runtime.block_on(migrations::run_pending(&pool)) {
        Ok(()) => {
            checks.push(SmokeCheck {
                name: "migration_visibility",
                status: SmokeStatus::Pass,
                elapsed_ms: elapsed_since(migration_started),
                message: "migrations are visible and executable".to_string(),
            });
            true
        }
        Err(error) => {
            checks.push(SmokeCheck {
                name: "migration_visibility",
                status: SmokeStatus::Fail,
                elapsed_ms: elapsed_since(migration_started),
                message: format!("migration execution failed: {error}"),
            });
            false
        }
    };

    if migrated {
        let query_started = Instant::now();
        let check = match runtime.block_on(health::ledger_counts(&pool)) {
            Ok(counts) => SmokeCheck {
                name: "ledger_query",
                status: SmokeStatus::Pass,
                elapsed_ms: elapsed_since(query_started),
                message: format!(
                    "{} invoices, {} open complaints, {} resolutions",
                    counts.invoices, counts.open_complaints, counts.resolutions
                ),
            },
            Err(error) => SmokeCheck {
                name: "ledger_query",
                status: SmokeStatus::Fail,
                elapsed_ms: elapsed_since(query_started),
                message: format!("ledger tables could not be read: {error}"),
            },
        };
        checks.push(check);
    } else {
        checks.push(skipped("ledger_query"));
    }

    runtime.block_on(pool.close());
    finalize_report(checks, elapsed_since(started))
}

fn timed_check<T, E>(check: impl FnOnce() -> Result<T, E>) -> Result<(u64, T), (u64, E)> {
    let started = Instant::now();
    match check() {
        Ok(value) => Ok((elapsed_since(started), value)),
        Err(error) => Err((elapsed_since(started), error)),
    }
}

fn elapsed_since(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

fn skipped(name: &'static str) -> SmokeCheck {
    SmokeCheck {
        name,
        status: SmokeStatus::Skipped,
        elapsed_ms: 0,
        message: "skipped due previous failure".to_string(),
    }
}

fn finalize_report(checks: Vec<SmokeCheck>, total_elapsed_ms: u64) -> CommandResult {
    let passed = checks.iter().filter(|check| check.status == SmokeStatus::Pass).count();
    let total = checks.len();
    let failed = checks.iter().any(|check| check.status == SmokeStatus::Fail);

    let report = SmokeReport {
        command: "smoke",
        status: if failed { SmokeStatus::Fail } else { SmokeStatus::Pass },
        summary: format!("smoke: {passed}/{total} checks passed in {total_elapsed_ms}ms"),
        total_elapsed_ms,
        checks,
    };

    let human = report.summary.clone();
    let machine = serde_json::to_string(&report).unwrap_or_else(|error| {
        format!(
            "{{\"command\":\"smoke\",\"status\":\"fail\",\"summary\":\"serialization failed\",\"error\":\"{}\"}}",
            error.to_string().replace('\\', "\\\\").replace('"', "\\\"")
        )
    });

    CommandResult { exit_code: if failed { 6 } else { 0 }, output: format!("{human}\n{machine}") }
}
