use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::SecondsFormat;
use tracing::warn;

use crate::config::{
    Config, EMAIL_REPORT_PATTERN, INPUT_COPY_PATTERN, LOG_PATTERNS, ManagedFolders,
};
use crate::loader::{DEFAULT_TIMEOUT, LoaderJob, find_loader_log};
use crate::mailer::Mailer;
use crate::model::{RunCounts, RunOutcome, RunPaths, RunStamp, UnmatchedRecord};
use crate::records::read_unmatched;
use crate::reference::ReferenceIndex;
use crate::report::{RunContext, email_subject, render_report};
use crate::retention::purge;
use crate::util::{now_utc_string, sha256_file, write_json_pretty};
use crate::workbook::build_workbook;

const MANIFEST_VERSION: u32 = 1;

/// One reconciliation run: stage input, build the loader workbook, hand it to
/// the data loader, then report.
pub struct Pipeline<'a> {
    config: &'a Config,
    mailer: &'a dyn Mailer,
}

struct DocumentStats {
    path: PathBuf,
    rows_written: usize,
    rows_excluded: usize,
}

impl<'a> Pipeline<'a> {
    pub fn new(config: &'a Config, mailer: &'a dyn Mailer) -> Self {
        Self { config, mailer }
    }

    pub fn execute(&self, stamp: RunStamp) -> Result<RunOutcome> {
        let folders = self.config.folders();
        folders.prepare()?;

        let mut ctx = RunContext::new(stamp);
        let run_log = folders
            .logs
            .join(format!("DepartmentUpdate_LOG_{}.txt", ctx.stamp.stamp));
        ctx.open_log(run_log.clone())?;
        let retain_days = self.config.retention.days;

        let input_copy = self.stage_input(&mut ctx, &folders);
        let input_sha256 = input_copy.as_deref().and_then(|path| match sha256_file(path) {
            Ok(digest) => Some(digest),
            Err(err) => {
                warn!(error = %err, "failed to hash staged input");
                None
            }
        });
        let input_copies_removed = prune(
            &mut ctx,
            &folders.input,
            INPUT_COPY_PATTERN,
            "input files",
            retain_days,
        );

        let records = parse_records(&mut ctx, input_copy.as_deref());

        let document_name = format!("{} update operator depts.xml", ctx.stamp.date);
        let document = write_document(&mut ctx, &records, &folders.dataload.join(&document_name));

        let job = LoaderJob {
            working_dir: folders.dataload.clone(),
            host: self.config.server.host.trim().to_string(),
            port: self.config.server.port,
            user: self.config.upload.user.trim().to_string(),
            password: self.config.upload.password.clone(),
            document_name,
            show_window: self.config.options.show_loader_window,
            timeout: DEFAULT_TIMEOUT,
        };
        match job.write_runfile() {
            Ok(_) => ctx.add("Data loader runfile prepared"),
            Err(err) => ctx.add(format!("Runfile write failed: {err:#}")),
        }

        let invocation = job.invoke(document.is_some());
        ctx.settle(invocation.outcome.run_status());
        ctx.add(format!("Data loader: {}", invocation.outcome));

        let index = ReferenceIndex::load(&self.config.paths.reference_file);
        if index.is_empty() {
            warn!("reference index is empty; report names will show as Not Found");
        }

        let log_folder = job.log_folder();
        let loader_log_path = find_loader_log(&log_folder, invocation.started_at);
        let loader_log = loader_log_path.as_deref().and_then(read_loader_log);
        let loader_log_text = loader_log.clone().unwrap_or_else(|| {
            format!("(No FA .txt log found in {})", log_folder.display())
        });

        let html = render_report(&ctx.stamp, &records, &index, &loader_log_text);
        let email_path = folders
            .emails
            .join(format!("DepartmentUpdate_EMAIL_{}.html", ctx.stamp.stamp));
        let email_report = match fs::write(&email_path, &html) {
            Ok(()) => {
                ctx.add("Email report generated and saved");
                Some(email_path)
            }
            Err(err) => {
                ctx.add(format!("Email HTML save failed: {err}"));
                None
            }
        };

        let subject = email_subject(&ctx.stamp, ctx.status(), records.len());
        let email_sent = match self.mailer.send_html(
            &self.config.email.from_address,
            &self.config.recipient_list(),
            &subject,
            &html,
        ) {
            Ok(()) => {
                ctx.add("Email sent");
                true
            }
            Err(err) => {
                ctx.add(format!("Email send failed: {err:#}"));
                false
            }
        };

        let logs_removed: usize = LOG_PATTERNS
            .iter()
            .map(|pattern| prune(&mut ctx, &folders.logs, pattern, "logs", retain_days))
            .sum();
        let emails_removed = prune(
            &mut ctx,
            &folders.emails,
            EMAIL_REPORT_PATTERN,
            "email reports",
            retain_days,
        );

        if let Some(raw) = &loader_log {
            if let Err(err) = ctx.append_loader_log(raw) {
                warn!(error = %err, "failed to append loader log to run log");
            }
        }

        let outcome = RunOutcome {
            manifest_version: MANIFEST_VERSION,
            run_stamp: ctx.stamp.stamp.clone(),
            started_at: ctx.stamp.when.to_rfc3339_opts(SecondsFormat::Secs, false),
            finished_at: now_utc_string(),
            status: ctx.status(),
            loader_summary: invocation.outcome.to_string(),
            loader_outcome: invocation.outcome,
            email_sent,
            input_sha256,
            paths: RunPaths {
                base_dir: self.config.paths.base_dir.display().to_string(),
                run_log: run_log.display().to_string(),
                input_copy: display(input_copy.as_deref()),
                document: display(document.as_ref().map(|stats| stats.path.as_path())),
                email_report: display(email_report.as_deref()),
                loader_log: display(loader_log_path.as_deref()),
            },
            counts: RunCounts {
                records_parsed: records.len(),
                document_rows: document.as_ref().map_or(0, |stats| stats.rows_written),
                document_rows_excluded: document.as_ref().map_or(0, |stats| stats.rows_excluded),
                input_copies_removed,
                logs_removed,
                emails_removed,
            },
            narrative: ctx.lines().to_vec(),
        };

        let manifest_path = folders
            .logs
            .join(format!("DepartmentUpdate_RUN_{}.json", ctx.stamp.stamp));
        if let Err(err) = write_json_pretty(&manifest_path, &outcome) {
            warn!(error = %err, "failed to write run manifest");
        }

        Ok(outcome)
    }

    fn stage_input(&self, ctx: &mut RunContext, folders: &ManagedFolders) -> Option<PathBuf> {
        let source = &self.config.paths.source_file;
        if !source.is_file() {
            ctx.issue(format!("Input source not found: {}", source.display()));
            return None;
        }

        let destination = folders
            .input
            .join(format!("UnmatchedDepartment_{}.csv", ctx.stamp.stamp));
        // The staged copy must carry this run's mtime, not the source's.
        match fs::read(source).and_then(|bytes| fs::write(&destination, bytes)) {
            Ok(()) => {
                ctx.add("Input CSV copied to local input folder");
                Some(destination)
            }
            Err(err) => {
                ctx.issue(format!("Input copy failed: {err}"));
                None
            }
        }
    }
}

fn parse_records(ctx: &mut RunContext, input_copy: Option<&Path>) -> Vec<UnmatchedRecord> {
    let Some(path) = input_copy else {
        return Vec::new();
    };

    match read_unmatched(path) {
        Ok(records) => {
            let message = format!("Parsed {} record(s) from CSV", records.len());
            if records.is_empty() {
                ctx.issue(message);
            } else {
                ctx.add(message);
            }
            records
        }
        Err(err) => {
            ctx.issue(format!("CSV parse failed: {err:#}"));
            Vec::new()
        }
    }
}

fn write_document(
    ctx: &mut RunContext,
    records: &[UnmatchedRecord],
    path: &Path,
) -> Option<DocumentStats> {
    if records.is_empty() {
        ctx.issue("No records to write into XML");
        return None;
    }

    let result = build_workbook(records).and_then(|workbook| {
        fs::write(path, &workbook.xml)?;
        Ok(workbook)
    });
    match result {
        Ok(workbook) => {
            let name = path.file_name().unwrap_or_default().to_string_lossy();
            ctx.add(format!(
                "XML generated: {name} ({} row(s), {} excluded)",
                workbook.rows_written, workbook.rows_excluded
            ));
            Some(DocumentStats {
                path: path.to_path_buf(),
                rows_written: workbook.rows_written,
                rows_excluded: workbook.rows_excluded,
            })
        }
        Err(err) => {
            ctx.issue(format!("XML generation failed: {err:#}"));
            None
        }
    }
}

fn prune(
    ctx: &mut RunContext,
    folder: &Path,
    pattern: &str,
    label: &str,
    retain_days: i64,
) -> usize {
    match purge(folder, pattern, retain_days) {
        Ok(0) => 0,
        Ok(removed) => {
            ctx.add(format!(
                "Removed old {label} older than {retain_days} days: {removed}"
            ));
            removed
        }
        Err(err) => {
            ctx.add(format!("Retention sweep of {} failed: {err:#}", folder.display()));
            0
        }
    }
}

fn read_loader_log(path: &Path) -> Option<String> {
    match fs::read(path) {
        Ok(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
        Err(err) => {
            warn!(path = %path.display(), error = %err, "failed to read loader log");
            None
        }
    }
}

fn display(path: Option<&Path>) -> Option<String> {
    path.map(|path| path.display().to_string())
}
