use anyhow::Result;
use tracing::info;

use crate::cli::PurgeArgs;
use crate::config::{
    Config, EMAIL_REPORT_PATTERN, INPUT_COPY_PATTERN, LOG_PATTERNS, resolve_config_path,
};
use crate::retention;

pub fn run(args: PurgeArgs) -> Result<()> {
    let config_path = resolve_config_path(args.config.as_deref())?;
    let config = Config::load(&config_path)?;
    let days = args.days.unwrap_or(config.retention.days);

    let removed = sweep(&config, days)?;
    info!(
        base_dir = %config.paths.base_dir.display(),
        days,
        removed,
        "retention sweep finished"
    );
    Ok(())
}

/// Applies the run's retention rules to every managed folder.
pub fn sweep(config: &Config, days: i64) -> Result<usize> {
    let folders = config.folders();
    let mut targets = vec![
        (&folders.input, INPUT_COPY_PATTERN),
        (&folders.emails, EMAIL_REPORT_PATTERN),
    ];
    targets.extend(LOG_PATTERNS.iter().map(|pattern| (&folders.logs, *pattern)));

    let mut removed = 0;
    for (folder, pattern) in targets {
        removed += retention::purge(folder, pattern, days)?;
    }
    Ok(removed)
}
