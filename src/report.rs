use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use quick_xml::escape::escape;
use tracing::{info, warn};

use crate::model::{RunStamp, RunStatus, UnmatchedRecord};
use crate::reference::ReferenceIndex;
use crate::util::append_text;

pub const REPORT_TITLE: &str = "Operator Department Updater \u{2014} Run Report";
pub const MAX_REPORT_ROWS: usize = 400;
pub const NOT_FOUND: &str = "Not Found";
const MISSING_CODE: &str = "\u{2014}";
const LOADER_LOG_BANNER: &str = "FA Data Loader Log (raw .txt)";

const REPORT_STYLE: &str = "body{font-family:Arial,sans-serif;font-size:14px;margin:24px;background:#111;color:#eee}\
table{border-collapse:collapse;width:1100px;table-layout:fixed;margin:0}\
th,td{border:1px solid #555;padding:8px 10px;text-align:left;white-space:nowrap;overflow:hidden;text-overflow:ellipsis}\
th{background:#222}\
.c1{width:350px}\
.c2{width:auto}\
h2{margin:0 0 10px 0} h3{margin:20px 0 8px 0}\
pre.log{background:#0b0b0b;border:1px solid #444;padding:10px;max-height:500px;overflow:auto;white-space:pre-wrap}\
hr{border:0;border-top:1px solid #444;margin:20px 0}";

/// Narrative and status for a single run. Every line is appended to the run
/// log as soon as it is recorded.
#[derive(Debug)]
pub struct RunContext {
    pub stamp: RunStamp,
    lines: Vec<String>,
    status: RunStatus,
    log_path: Option<PathBuf>,
}

impl RunContext {
    pub fn new(stamp: RunStamp) -> Self {
        Self {
            stamp,
            lines: Vec::new(),
            status: RunStatus::Ok,
            log_path: None,
        }
    }

    /// Creates the run log with its header; later lines are appended to it.
    pub fn open_log(&mut self, path: PathBuf) -> Result<()> {
        let header = format!("{REPORT_TITLE}\nDate: {}\n\n", self.stamp.display);
        fs::write(&path, header)
            .with_context(|| format!("failed to create run log {}", path.display()))?;
        self.log_path = Some(path);
        Ok(())
    }

    pub fn log_path(&self) -> Option<&Path> {
        self.log_path.as_deref()
    }

    pub fn add(&mut self, message: impl Into<String>) {
        let message = message.into();
        info!(run = %self.stamp.stamp, "{message}");
        if let Some(path) = &self.log_path {
            if let Err(err) = append_text(path, &format!("{message}\n")) {
                warn!(error = %err, "failed to append to run log");
            }
        }
        self.lines.push(message);
    }

    /// Records a recoverable failure and downgrades the run to ISSUE.
    pub fn issue(&mut self, message: impl Into<String>) {
        self.add(message);
        self.status = RunStatus::Issue;
    }

    /// The loader outcome is the authoritative terminal status.
    pub fn settle(&mut self, status: RunStatus) {
        self.status = status;
    }

    pub fn status(&self) -> RunStatus {
        self.status
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Appends the loader's raw log under a banner at the end of the run log.
    pub fn append_loader_log(&self, raw: &str) -> Result<()> {
        let Some(path) = self.log_path() else {
            return Ok(());
        };
        let rule = "=".repeat(72);
        append_text(path, &format!("\n{rule}\n{LOADER_LOG_BANNER}\n{rule}\n{raw}\n"))
    }
}

pub fn email_subject(stamp: &RunStamp, status: RunStatus, record_count: usize) -> String {
    format!(
        "[Operator Dept Update] {} \u{2014} {} \u{2014} {} records",
        stamp.display, status, record_count
    )
}

pub fn render_report(
    stamp: &RunStamp,
    records: &[UnmatchedRecord],
    index: &ReferenceIndex,
    loader_log: &str,
) -> String {
    let mut rows = String::new();
    for record in records.iter().take(MAX_REPORT_ROWS) {
        rows.push_str(&render_row(record, index));
    }

    let mut html = String::new();
    let _ = write!(
        html,
        "<!DOCTYPE html><html><head><style>{REPORT_STYLE}</style></head><body>\
         <h2>{}</h2><p>Date: {}</p>",
        escape(REPORT_TITLE),
        escape(&stamp.display)
    );
    if records.len() > MAX_REPORT_ROWS {
        let _ = write!(
            html,
            "<p>Showing first {MAX_REPORT_ROWS} of {} records.</p>",
            records.len()
        );
    }
    let _ = write!(
        html,
        "<table><tr><th class='c1'>Operator</th><th class='c2'>Old Dept &rarr; New Dept</th></tr>{rows}</table>\
         <hr><h3>DataLoader Confirmation</h3><pre class='log'>{}</pre></body></html>",
        escape(loader_log)
    );
    html
}

fn render_row(record: &UnmatchedRecord, index: &ReferenceIndex) -> String {
    let operator_name = index
        .operator_name(&record.operator_id)
        .unwrap_or(NOT_FOUND);
    let old_code = record
        .old_department
        .as_deref()
        .filter(|code| !code.is_empty());
    let old_name = old_code
        .and_then(|code| index.department_name(code))
        .unwrap_or(NOT_FOUND);
    let new_name = index
        .department_name(&record.new_department)
        .unwrap_or(NOT_FOUND);

    format!(
        "<tr><td class='c1'>{} ({})</td><td class='c2'>{} ({}) &rarr; {} ({})</td></tr>",
        escape(&record.operator_id),
        escape(operator_name),
        escape(old_code.unwrap_or(MISSING_CODE)),
        escape(old_name),
        escape(&record.new_department),
        escape(new_name),
    )
}

#[cfg(test)]
mod tests {
    use chrono::{Local, TimeZone};

    use super::*;

    fn stamp() -> RunStamp {
        RunStamp::from_datetime(Local.with_ymd_and_hms(2026, 5, 4, 6, 30, 0).unwrap())
    }

    fn record(operator: &str, old: Option<&str>, new: &str) -> UnmatchedRecord {
        UnmatchedRecord {
            operator_id: operator.into(),
            new_department: new.into(),
            old_department: old.map(str::to_string),
        }
    }

    #[test]
    fn lookup_misses_render_not_found() {
        let index = ReferenceIndex::from_csv(b"10,Sales,Jane,7\n").unwrap();
        let html = render_report(
            &stamp(),
            &[record("7", Some("99"), "10"), record("8", None, "11")],
            &index,
            "",
        );

        assert!(html.contains("7 (Jane)"));
        assert!(html.contains("99 (Not Found) &rarr; 10 (Sales)"));
        assert!(html.contains("8 (Not Found)"));
        assert!(html.contains("\u{2014} (Not Found) &rarr; 11 (Not Found)"));
    }

    #[test]
    fn table_is_capped_and_notes_truncation() {
        let records: Vec<_> = (0..450)
            .map(|n| record(&n.to_string(), None, "1"))
            .collect();
        let html = render_report(&stamp(), &records, &ReferenceIndex::default(), "");

        assert_eq!(html.matches("<tr><td").count(), MAX_REPORT_ROWS);
        assert!(html.contains("Showing first 400 of 450 records."));
    }

    #[test]
    fn loader_log_is_escaped_verbatim() {
        let html = render_report(&stamp(), &[], &ReferenceIndex::default(), "rows <ok> & done");
        assert!(html.contains("<pre class='log'>rows &lt;ok&gt; &amp; done</pre>"));
        assert!(html.contains("Date: May 04, 2026 06:30"));
    }

    #[test]
    fn reference_names_are_escaped_in_table() {
        let index = ReferenceIndex::from_csv(b"10,\"R&D \"\"Lab\"\"\",O'Neil <lead>,7\n").unwrap();
        let html = render_report(&stamp(), &[record("7", None, "10")], &index, "");

        assert!(html.contains("7 (O&apos;Neil &lt;lead&gt;)"));
        assert!(html.contains("10 (R&amp;D &quot;Lab&quot;)"));
    }

    #[test]
    fn subject_encodes_date_status_and_count() {
        assert_eq!(
            email_subject(&stamp(), RunStatus::Success, 12),
            "[Operator Dept Update] May 04, 2026 06:30 \u{2014} SUCCESS \u{2014} 12 records"
        );
    }

    #[test]
    fn narrative_lines_are_persisted_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.txt");
        let mut ctx = RunContext::new(stamp());
        ctx.open_log(path.clone()).unwrap();

        ctx.add("first step");
        ctx.issue("second step failed");

        let contents = fs::read_to_string(&path).unwrap();
        assert!(contents.starts_with(REPORT_TITLE));
        assert!(contents.contains("first step\nsecond step failed\n"));
        assert_eq!(ctx.status(), RunStatus::Issue);
    }

    #[test]
    fn settled_status_keeps_earlier_narrative() {
        let mut ctx = RunContext::new(stamp());
        ctx.issue("input missing");
        ctx.settle(RunStatus::Success);

        assert_eq!(ctx.status(), RunStatus::Success);
        assert_eq!(ctx.lines(), ["input missing".to_string()]);
    }

    #[test]
    fn loader_log_is_appended_under_banner() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.txt");
        let mut ctx = RunContext::new(stamp());
        ctx.open_log(path.clone()).unwrap();

        ctx.append_loader_log("loader says hi").unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        assert!(contents.contains(LOADER_LOG_BANNER));
        assert!(contents.trim_end().ends_with("loader says hi"));
    }
}
