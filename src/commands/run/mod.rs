use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;

use anyhow::{Result, anyhow};
use tracing::{error, info, warn};

use crate::cli::RunArgs;
use crate::config::{Config, resolve_config_path};
use crate::mailer::SmtpMailer;
use crate::model::{RunOutcome, RunStamp};
use crate::util::{app_dir, append_text};

mod pipeline;

pub use pipeline::Pipeline;

/// Scheduled entry point. Errors never propagate to the caller: anything that
/// escapes the pipeline lands in the fallback log beside the executable.
pub fn run(args: RunArgs) -> Result<()> {
    let stamp = RunStamp::now();
    let run_stamp = stamp.stamp.clone();

    match guarded(|| execute(&args, stamp)) {
        Ok(outcome) => {
            info!(
                run = %outcome.run_stamp,
                status = %outcome.status,
                records = outcome.counts.records_parsed,
                loader = %outcome.loader_summary,
                "run finished"
            );
            if args.json {
                match serde_json::to_string_pretty(&outcome) {
                    Ok(json) => println!("{json}"),
                    Err(err) => warn!(error = %err, "failed to render run manifest"),
                }
            }
        }
        Err(err) => {
            error!(run = %run_stamp, error = %err, "run aborted");
            record_fatal(&app_dir(), &run_stamp, &err);
        }
    }

    Ok(())
}

fn execute(args: &RunArgs, stamp: RunStamp) -> Result<RunOutcome> {
    let config_path = resolve_config_path(args.config.as_deref())?;
    let config = Config::load(&config_path)?;
    info!(config = %config_path.display(), run = %stamp.stamp, "starting run");

    for address in config.malformed_recipients()? {
        warn!(address = %address, "recipient address looks malformed");
    }

    let mailer = SmtpMailer::new(config.email.smtp_host.trim(), config.email.smtp_port);
    Pipeline::new(&config, &mailer).execute(stamp)
}

/// Runs `step`, turning a panic into an error so it reaches the fallback log.
fn guarded<T>(step: impl FnOnce() -> Result<T>) -> Result<T> {
    panic::catch_unwind(AssertUnwindSafe(step))
        .unwrap_or_else(|payload| Err(anyhow!("run panicked: {}", panic_message(payload.as_ref()))))
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "unknown panic payload"
    }
}

fn record_fatal(dir: &Path, run_stamp: &str, err: &anyhow::Error) {
    let path = dir.join(format!("DepartmentUpdate_LOG_{run_stamp}.txt"));
    if let Err(write_err) = append_text(&path, &format!("[FATAL] {err:#}\n")) {
        error!(path = %path.display(), error = %write_err, "failed to write fallback log");
    }
}
