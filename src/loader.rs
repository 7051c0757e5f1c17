use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant, SystemTime};

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::model::{FailureReason, LoaderOutcome, SkipReason};
use crate::retention::matching_files;
use crate::util::modified_time;

pub const LOADER_EXECUTABLE: &str = "FADATALOADER.EXE";
pub const RUNFILE_NAME: &str = "runfile.bat";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(180);
const RETRY_COUNT: &str = "10";
const LOG_SUBFOLDER: &str = "logs";
const LOG_YEAR_FOLDER: &str = "2022";
const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Everything needed to hand one generated document to the data loader.
#[derive(Debug, Clone)]
pub struct LoaderJob {
    pub working_dir: PathBuf,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub document_name: String,
    pub show_window: bool,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct LoaderInvocation {
    pub outcome: LoaderOutcome,
    pub started_at: SystemTime,
}

#[derive(Debug)]
enum WaitResult {
    Exited(ExitStatus),
    TimedOut,
}

impl LoaderJob {
    pub fn executable(&self) -> PathBuf {
        self.working_dir.join(LOADER_EXECUTABLE)
    }

    pub fn log_folder(&self) -> PathBuf {
        self.working_dir.join(LOG_SUBFOLDER).join(LOG_YEAR_FOLDER)
    }

    fn target(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn arguments(&self) -> Vec<String> {
        vec![
            "-n".to_string(),
            RETRY_COUNT.to_string(),
            "-l".to_string(),
            LOG_SUBFOLDER.to_string(),
            "-a".to_string(),
            self.target(),
            "-u".to_string(),
            self.user.clone(),
            "-p".to_string(),
            self.password.clone(),
            "-i".to_string(),
            self.document_name.clone(),
        ]
    }

    /// Batch script with the same arguments, for re-running the import by hand.
    pub fn runfile_script(&self) -> String {
        let quoted = self
            .arguments()
            .chunks(2)
            .map(|pair| format!("{} \"{}\"", pair[0], pair[1]))
            .collect::<Vec<_>>()
            .join(" ");
        format!(
            "setlocal\r\npushd \"%~dp0\"\r\n{LOADER_EXECUTABLE} {quoted}\r\npopd\r\nendlocal\r\n"
        )
    }

    pub fn write_runfile(&self) -> Result<PathBuf> {
        let path = self.working_dir.join(RUNFILE_NAME);
        fs::write(&path, self.runfile_script())
            .with_context(|| format!("failed to write runfile {}", path.display()))?;
        Ok(path)
    }

    /// Runs the loader synchronously. `document_ready` is false when no
    /// document was generated for this run.
    pub fn invoke(&self, document_ready: bool) -> LoaderInvocation {
        let started_at = SystemTime::now();
        let outcome = if !document_ready {
            LoaderOutcome::Skipped(SkipReason::NoDocument)
        } else if !self.executable().is_file() {
            warn!(path = %self.executable().display(), "data loader executable missing");
            LoaderOutcome::Skipped(SkipReason::ExecutableMissing)
        } else {
            self.execute()
        };
        LoaderInvocation {
            outcome,
            started_at,
        }
    }

    fn execute(&self) -> LoaderOutcome {
        let mut command = Command::new(self.executable());
        command
            .args(self.arguments())
            .current_dir(&self.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        self.configure_window(&mut command);

        info!(
            executable = %self.executable().display(),
            target = %self.target(),
            document = %self.document_name,
            timeout_secs = self.timeout.as_secs(),
            show_window = self.show_window,
            "starting data loader"
        );

        match run_with_timeout(&mut command, self.timeout) {
            Ok(WaitResult::Exited(status)) if status.success() => LoaderOutcome::Success,
            Ok(WaitResult::Exited(status)) => {
                LoaderOutcome::Failed(FailureReason::ExitCode(status.code().unwrap_or(-1)))
            }
            Ok(WaitResult::TimedOut) => LoaderOutcome::Failed(FailureReason::Timeout),
            Err(err) => LoaderOutcome::Failed(FailureReason::Exception(format!("{err:#}"))),
        }
    }

    #[cfg(windows)]
    fn configure_window(&self, command: &mut Command) {
        use std::os::windows::process::CommandExt;

        if !self.show_window {
            command.creation_flags(CREATE_NO_WINDOW);
        }
    }

    #[cfg(not(windows))]
    fn configure_window(&self, _command: &mut Command) {}
}

fn run_with_timeout(command: &mut Command, timeout: Duration) -> Result<WaitResult> {
    let mut child = command.spawn().context("failed to spawn data loader")?;
    let deadline = Instant::now() + timeout;

    loop {
        if let Some(status) = child.try_wait().context("failed to poll data loader")? {
            return Ok(WaitResult::Exited(status));
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            let _ = child.wait();
            return Ok(WaitResult::TimedOut);
        }
        thread::sleep(POLL_INTERVAL);
    }
}

/// Picks the loader's own log for this run: the newest `.txt` modified at or
/// after `since`, else the newest `.txt` present.
pub fn find_loader_log(folder: &Path, since: SystemTime) -> Option<PathBuf> {
    let candidates: Vec<(PathBuf, SystemTime)> = matching_files(folder, "*.txt")
        .ok()?
        .into_iter()
        .filter_map(|path| modified_time(&path).map(|mtime| (path, mtime)))
        .collect();

    newest(candidates.iter().filter(|(_, mtime)| *mtime >= since))
        .or_else(|| newest(candidates.iter()))
}

fn newest<'a>(items: impl Iterator<Item = &'a (PathBuf, SystemTime)>) -> Option<PathBuf> {
    items
        .max_by_key(|(_, mtime)| *mtime)
        .map(|(path, _)| path.clone())
}

#[cfg(test)]
mod tests {
    use std::fs::File;

    use super::*;

    fn job(dir: &Path) -> LoaderJob {
        LoaderJob {
            working_dir: dir.to_path_buf(),
            host: "loader.local".into(),
            port: 2000,
            user: "svc".into(),
            password: "hunter2".into(),
            document_name: "2026-01-02 update operator depts.xml".into(),
            show_window: false,
            timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn arguments_follow_loader_cli_contract() {
        let dir = tempfile::tempdir().unwrap();
        let args = job(dir.path()).arguments();
        assert_eq!(
            args,
            vec![
                "-n",
                "10",
                "-l",
                "logs",
                "-a",
                "loader.local:2000",
                "-u",
                "svc",
                "-p",
                "hunter2",
                "-i",
                "2026-01-02 update operator depts.xml",
            ]
        );
    }

    #[test]
    fn runfile_mirrors_invocation() {
        let dir = tempfile::tempdir().unwrap();
        let path = job(dir.path()).write_runfile().unwrap();
        let script = fs::read_to_string(path).unwrap();

        assert!(script.starts_with("setlocal\r\npushd \"%~dp0\"\r\n"));
        assert!(script.contains(
            "FADATALOADER.EXE -n \"10\" -l \"logs\" -a \"loader.local:2000\" -u \"svc\" -p \"hunter2\" -i \"2026-01-02 update operator depts.xml\"\r\n"
        ));
        assert!(script.ends_with("popd\r\nendlocal\r\n"));
    }

    #[test]
    fn missing_document_skips_invocation() {
        let dir = tempfile::tempdir().unwrap();
        let invocation = job(dir.path()).invoke(false);
        assert_eq!(invocation.outcome, LoaderOutcome::Skipped(SkipReason::NoDocument));
    }

    #[test]
    fn missing_executable_skips_invocation() {
        let dir = tempfile::tempdir().unwrap();
        let invocation = job(dir.path()).invoke(true);
        assert_eq!(
            invocation.outcome,
            LoaderOutcome::Skipped(SkipReason::ExecutableMissing)
        );
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn exit_status_maps_to_outcome() {
        let dir = tempfile::tempdir().unwrap();
        let loader = job(dir.path());

        std::os::unix::fs::symlink("/bin/true", loader.executable()).unwrap();
        assert_eq!(loader.invoke(true).outcome, LoaderOutcome::Success);

        fs::remove_file(loader.executable()).unwrap();
        std::os::unix::fs::symlink("/bin/false", loader.executable()).unwrap();
        assert_eq!(
            loader.invoke(true).outcome,
            LoaderOutcome::Failed(FailureReason::ExitCode(1))
        );
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn hung_loader_is_reported_as_timeout() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let mut loader = job(dir.path());
        loader.timeout = Duration::from_millis(200);
        fs::write(loader.executable(), "#!/bin/sh\nexec sleep 5\n").unwrap();
        fs::set_permissions(loader.executable(), fs::Permissions::from_mode(0o755)).unwrap();

        let started = Instant::now();
        let outcome = loader.invoke(true).outcome;

        assert_eq!(outcome, LoaderOutcome::Failed(FailureReason::Timeout));
        assert_eq!(outcome.to_string(), "FAILED (timeout)");
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn unlaunchable_loader_is_reported_as_exception() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let loader = job(dir.path());
        fs::write(loader.executable(), "not a program").unwrap();
        fs::set_permissions(loader.executable(), fs::Permissions::from_mode(0o644)).unwrap();

        let outcome = loader.invoke(true).outcome;
        let LoaderOutcome::Failed(FailureReason::Exception(message)) = outcome else {
            panic!("expected exception outcome, got {outcome:?}");
        };
        assert!(message.contains("failed to spawn data loader"));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn slow_process_times_out() {
        let mut command = Command::new("sleep");
        command.arg("5");
        let started = Instant::now();

        let result = run_with_timeout(&mut command, Duration::from_millis(200)).unwrap();

        assert!(matches!(result, WaitResult::TimedOut));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn spawn_failure_is_reported_as_error() {
        let mut command = Command::new("/nonexistent/loader-binary");
        assert!(run_with_timeout(&mut command, Duration::from_secs(1)).is_err());
    }

    #[test]
    fn loader_log_prefers_files_written_after_start() {
        let dir = tempfile::tempdir().unwrap();
        let now = SystemTime::now();
        let stamp = |name: &str, age_secs: u64| {
            let path = dir.path().join(name);
            File::create(&path)
                .unwrap()
                .set_modified(now - Duration::from_secs(age_secs))
                .unwrap();
            path
        };
        stamp("older.txt", 600);
        let current = stamp("current.txt", 5);
        stamp("ignored.log", 1);

        let since = now - Duration::from_secs(60);
        assert_eq!(find_loader_log(dir.path(), since), Some(current));
    }

    #[test]
    fn loader_log_falls_back_to_newest_file() {
        let dir = tempfile::tempdir().unwrap();
        let now = SystemTime::now();
        for (name, age) in [("a.txt", 900), ("b.txt", 300)] {
            File::create(dir.path().join(name))
                .unwrap()
                .set_modified(now - Duration::from_secs(age))
                .unwrap();
        }

        assert_eq!(
            find_loader_log(dir.path(), now),
            Some(dir.path().join("b.txt"))
        );
    }

    #[test]
    fn loader_log_absent_folder_yields_none() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(find_loader_log(&dir.path().join("logs/2022"), SystemTime::now()), None);
    }
}
