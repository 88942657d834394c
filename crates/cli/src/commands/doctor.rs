use serde::Serialize;
use tutorbot_core::config::{AppConfig, LoadOptions};
use tutorbot_db::{connect_with_config, DbPool};

use crate::commands::migrate::known_versions;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Warn,
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

pub fn run(json_output: bool) -> String {
    let report = build_report();

    if json_output {
        return serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        });
    }

    render_human(&report)
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
            checks.push(check_classifier(&config));
            checks.push(check_gateway(&config));
            checks.extend(check_database(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Fail,
                details: error.to_string(),
            });
            for name in ["classifier", "whatsapp_gateway", "database_connectivity", "schema"] {
                checks.push(DoctorCheck {
                    name,
                    status: CheckStatus::Skipped,
                    details: "skipped because configuration did not load".to_string(),
                });
            }
        }
    }

    // Warnings describe degraded-but-working setups and do not fail the run.
    let failed = checks
        .iter()
        .any(|check| matches!(check.status, CheckStatus::Fail | CheckStatus::Skipped));
    let overall_status = if failed { CheckStatus::Fail } else { CheckStatus::Pass };
    let summary = if failed {
        "doctor: one or more readiness checks failed".to_string()
    } else {
        "doctor: all readiness checks passed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

fn check_classifier(config: &AppConfig) -> DoctorCheck {
    match &config.classifier.base_url {
        Some(base_url) => DoctorCheck {
            name: "classifier",
            status: CheckStatus::Pass,
            details: format!(
                "http classifier at `{base_url}` (timeout {} ms, {} retries)",
                config.classifier.timeout_ms, config.classifier.retries
            ),
        },
        None => DoctorCheck {
            name: "classifier",
            status: CheckStatus::Warn,
            details: "no classifier.base_url; every message takes the fallback step".to_string(),
        },
    }
}

fn check_gateway(config: &AppConfig) -> DoctorCheck {
    match &config.whatsapp.base_url {
        Some(base_url) => DoctorCheck {
            name: "whatsapp_gateway",
            status: CheckStatus::Pass,
            details: format!("sending through `{base_url}` as `{}`", config.whatsapp.instance),
        },
        None => DoctorCheck {
            name: "whatsapp_gateway",
            status: CheckStatus::Warn,
            details: "no whatsapp.base_url; replies are logged but not sent".to_string(),
        },
    }
}

fn check_database(config: &AppConfig) -> Vec<DoctorCheck> {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return vec![DoctorCheck {
                name: "database_connectivity",
                status: CheckStatus::Fail,
                details: format!("failed to initialize async runtime: {error}"),
            }];
        }
    };

    runtime.block_on(async {
        let pool = match connect_with_config(&config.database).await {
            Ok(pool) => pool,
            Err(error) => {
                return vec![
                    DoctorCheck {
                        name: "database_connectivity",
                        status: CheckStatus::Fail,
                        details: format!("failed to connect to database: {error}"),
                    },
                    DoctorCheck {
                        name: "schema",
                        status: CheckStatus::Skipped,
                        details: "skipped because the database is unreachable".to_string(),
                    },
                ];
            }
        };

        let connectivity = DoctorCheck {
            name: "database_connectivity",
            status: CheckStatus::Pass,
            details: format!("connected using `{}`", config.database.url),
        };
        let schema = check_schema(&pool).await;
        pool.close().await;
        vec![connectivity, schema]
    })
}

async fn check_schema(pool: &DbPool) -> DoctorCheck {
    let known = known_versions();
    let applied = sqlx::query_scalar::<_, i64>(
        "SELECT version FROM _sqlx_migrations WHERE success = 1 ORDER BY version",
    )
    .fetch_all(pool)
    .await
    .unwrap_or_default();

    let pending = known.iter().filter(|version| !applied.contains(version)).count();
    if pending == 0 {
        DoctorCheck {
            name: "schema",
            status: CheckStatus::Pass,
            details: format!("{} migrations applied", applied.len()),
        }
    } else {
        DoctorCheck {
            name: "schema",
            status: CheckStatus::Fail,
            details: format!("{pending} pending migrations; run `tutorbot migrate`"),
        }
    }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Warn => "warn",
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
