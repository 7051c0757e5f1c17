use std::fs;

use anyhow::{Context, Result, bail};
use tracing::info;

use crate::cli::InitConfigArgs;
use crate::config::Config;
use crate::util::ensure_directory;

pub fn run(args: InitConfigArgs) -> Result<()> {
    if args.path.exists() && !args.force {
        bail!(
            "{} already exists (pass --force to overwrite)",
            args.path.display()
        );
    }

    if let Some(parent) = args.path.parent().filter(|p| !p.as_os_str().is_empty()) {
        ensure_directory(parent)?;
    }

    let rendered = Config::template().to_toml_string()?;
    fs::write(&args.path, rendered)
        .with_context(|| format!("failed to write {}", args.path.display()))?;

    info!(path = %args.path.display(), "wrote configuration template");
    Ok(())
}
