use chrono::{Duration, Utc};
use tutorbot_db::{connect_with_config, IdempotencyLedger, SqlIdempotencyLedger};

use crate::commands::{prepare, CommandResult};

/// Removes processed-message records older than the retention window.
///
/// A purged message that is redelivered afterwards is processed again, so the
/// window must stay longer than the gateway's redelivery horizon.
pub fn run(older_than_hours: Option<u64>) -> CommandResult {
    let (config, runtime) = match prepare("purge") {
        Ok(prepared) => prepared,
        Err(failure) => return failure,
    };

    let hours = older_than_hours.unwrap_or(config.idempotency.retention_hours);
    let Some(cutoff) = i64::try_from(hours)
        .ok()
        .and_then(Duration::try_hours)
        .and_then(|window| Utc::now().checked_sub_signed(window))
    else {
        return CommandResult::failure(
            "purge",
            "invalid_window",
            format!("retention window of {hours} hours is out of range"),
            2,
        );
    };

    let result = runtime.block_on(async {
        let pool = connect_with_config(&config.database)
            .await
            .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;
        let removed = SqlIdempotencyLedger::new(pool.clone())
            .purge_before(cutoff)
            .await
            .map_err(|error| ("purge", error.to_string(), 5u8))?;
        pool.close().await;
        Ok::<u64, (&'static str, String, u8)>(removed)
    });

    match result {
        Ok(removed) => CommandResult::success(
            "purge",
            format!("removed {removed} processed records older than {}", cutoff.to_rfc3339()),
        ),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("purge", error_class, message, exit_code)
        }
    }
}
