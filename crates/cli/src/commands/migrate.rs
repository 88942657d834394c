use std::collections::BTreeSet;

use tutorbot_db::{connect_with_config, migrations};

use crate::commands::{prepare, CommandResult};

pub fn run() -> CommandResult {
    let (config, runtime) = match prepare("migrate") {
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
        pool.close().await;
        Ok::<(), (&'static str, String, u8)>(())
    });

    match result {
        Ok(()) => CommandResult::success(
            "migrate",
            format!("applied pending migrations; schema at version {}", latest_version()),
        ),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("migrate", error_class, message, exit_code)
        }
    }
}

/// Versions embedded in the binary. Reversible migrations list each version twice.
pub(crate) fn known_versions() -> BTreeSet<i64> {
    migrations::MIGRATOR.iter().map(|migration| migration.version).collect()
}

pub(crate) fn latest_version() -> i64 {
    known_versions().last().copied().unwrap_or_default()
}
