use comanda_core::config::{AppConfig, LoadOptions};
use comanda_db::{connect_existing, health, migrations, DbPool};
use serde::Serialize;
use tokio::runtime::Runtime;

use super::CommandResult;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

const DATABASE_CHECKS: [&str; 3] = ["database_connectivity", "migration_state", "invoice_series"];

/// Exit code when any readiness check does not pass.
const EXIT_CHECKS_FAILED: u8 = 6;

pub fn run(json_output: bool) -> CommandResult {
    let report = build_report();
    let exit_code = if report.overall_status == CheckStatus::Pass { 0 } else { EXIT_CHECKS_FAILED };

    let output = if json_output {
        serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        })
    } else {
        render_human(&report)
    };

    CommandResult { exit_code, output }
}

fn build_report() -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Pass,
                details: "configuration loaded and validated".to_string(),
            });
            checks.extend(check_database(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Fail,
                details: error.to_string(),
            });
            checks.extend(
                DATABASE_CHECKS
                    .iter()
                    .map(|name| skipped(name, "skipped because configuration did not load")),
            );
        }
    }

    let all_pass = checks.iter().all(|check| check.status == CheckStatus::Pass);
    let overall_status = if all_pass { CheckStatus::Pass } else { CheckStatus::Fail };
    let summary = if all_pass {
        "doctor: all readiness checks passed".to_string()
    } else {
        "doctor: one or more readiness checks failed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

/// Doctor only inspects: it never creates the database, applies migrations
/// or writes rows.
fn check_database(config: &AppConfig) -> Vec<DoctorCheck> {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return vec![
                DoctorCheck {
                    name: "database_connectivity",
                    status: CheckStatus::Fail,
                    details: format!("failed to initialize async runtime: {error}"),
                },
                skipped("migration_state", "skipped because the runtime did not start"),
                skipped("invoice_series", "skipped because the runtime did not start"),
            ];
        }
    };

    let pool = match runtime.block_on(connect(config)) {
        Ok(pool) => pool,
        Err(error) => {
            return vec![
                DoctorCheck {
                    name: "database_connectivity",
                    status: CheckStatus::Fail,
                    details: error,
                },
                skipped("migration_state", "skipped because the database is unreachable"),
                skipped("invoice_series", "skipped because the database is unreachable"),
            ];
        }
    };

    let checks = vec![
        DoctorCheck {
            name: "database_connectivity",
            status: CheckStatus::Pass,
            details: format!("connected using `{}`", config.database.url),
        },
        check_migrations(&runtime, &pool),
        check_invoice_series(&runtime, &pool, config),
    ];

    runtime.block_on(pool.close());
    checks
}

async fn connect(config: &AppConfig) -> Result<DbPool, String> {
    let pool = connect_existing(&config.database)
        .await
        .map_err(|error| format!("failed to open existing database: {error}"))?;
    health::ping(&pool).await.map_err(|error| format!("database did not answer: {error}"))?;
    Ok(pool)
}

fn check_migrations(runtime: &Runtime, pool: &DbPool) -> DoctorCheck {
    let known = migrations::known_versions();
    match runtime.block_on(migrations::applied_versions(pool)) {
        Ok(applied) => {
            let pending = known.iter().filter(|version| !applied.contains(version)).count();
            if pending == 0 {
                DoctorCheck {
                    name: "migration_state",
                    status: CheckStatus::Pass,
                    details: format!("all {} migrations applied", known.len()),
                }
            } else {
                DoctorCheck {
                    name: "migration_state",
                    status: CheckStatus::Fail,
                    details: format!(
                        "{pending} of {} migrations pending; run `comanda migrate`",
                        known.len()
                    ),
                }
            }
        }
        Err(error) => DoctorCheck {
            name: "migration_state",
            status: CheckStatus::Fail,
            details: format!("could not read migration history: {error}"),
        },
    }
}

fn check_invoice_series(runtime: &Runtime, pool: &DbPool, config: &AppConfig) -> DoctorCheck {
    let numbering = config.invoicing.numbering();
    let series = numbering.series();

    match runtime.block_on(health::next_sequence(pool, &series)) {
        Ok(next) => DoctorCheck {
            name: "invoice_series",
            status: CheckStatus::Pass,
            details: format!("next invoice code is `{}`", numbering.format(next)),
        },
        Err(error) => DoctorCheck {
            name: "invoice_series",
            status: CheckStatus::Fail,
            details: format!("could not read counter for series {series}: {error}"),
        },
    }
}

fn skipped(name: &'static str, details: &str) -> DoctorCheck {
    DoctorCheck { name, status: CheckStatus::Skipped, details: details.to_string() }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
