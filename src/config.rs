use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::util::{app_dir, ensure_directory};

pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const CONFIG_ENV_VAR: &str = "ODU_CONFIG";
const DEFAULT_RETENTION_DAYS: i64 = 30;
const DEFAULT_SMTP_PORT: u16 = 25;
const EMAIL_PATTERN: &str = r"^[^@\s]+@[^@\s]+\.[^@\s]+$";

pub const INPUT_COPY_PATTERN: &str = "UnmatchedDepartment_*.csv";
pub const LOG_PATTERNS: [&str; 2] = ["*.txt", "*.json"];
pub const EMAIL_REPORT_PATTERN: &str = "DepartmentUpdate_EMAIL_*.html";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub paths: PathsConfig,
    pub server: ServerConfig,
    pub upload: UploadConfig,
    pub email: EmailConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
    #[serde(default)]
    pub options: OptionsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    pub base_dir: PathBuf,
    pub source_file: PathBuf,
    pub reference_file: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    pub user: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailConfig {
    pub from_address: String,
    #[serde(default)]
    pub recipients: String,
    pub smtp_host: String,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    pub days: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OptionsConfig {
    #[serde(default)]
    pub show_loader_window: bool,
}

fn default_smtp_port() -> u16 {
    DEFAULT_SMTP_PORT
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            days: DEFAULT_RETENTION_DAYS,
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::from_toml(&raw).with_context(|| format!("failed to parse {}", path.display()))
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        if config.server.host.trim().is_empty() {
            bail!("[server] host must not be empty");
        }
        Ok(config)
    }

    /// Starting point written by `init-config`.
    pub fn template() -> Self {
        Self {
            paths: PathsConfig {
                base_dir: PathBuf::from("C:/OperatorDepartmentUpdater"),
                source_file: PathBuf::from("C:/OperatorDepartmentUpdater/assets/UnmatchedDepartment.csv"),
                reference_file: PathBuf::from(
                    "C:/OperatorDepartmentUpdater/assets/Active Operator List.csv",
                ),
            },
            server: ServerConfig {
                host: "localhost".to_string(),
                port: 2000,
            },
            upload: UploadConfig {
                user: "dataloader".to_string(),
                password: String::new(),
            },
            email: EmailConfig {
                from_address: "no-reply@example.com".to_string(),
                recipients: String::new(),
                smtp_host: "localhost".to_string(),
                smtp_port: DEFAULT_SMTP_PORT,
            },
            retention: RetentionConfig::default(),
            options: OptionsConfig::default(),
        }
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).context("failed to serialize configuration")
    }

    pub fn folders(&self) -> ManagedFolders {
        ManagedFolders::under(&self.paths.base_dir)
    }

    /// Recipients split on `;`, `,` or newlines.
    pub fn recipient_list(&self) -> Vec<String> {
        self.email
            .recipients
            .split([';', ',', '\n'])
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn malformed_recipients(&self) -> Result<Vec<String>> {
        let pattern = Regex::new(EMAIL_PATTERN).context("failed to compile email regex")?;
        Ok(self
            .recipient_list()
            .into_iter()
            .filter(|address| !pattern.is_match(address))
            .collect())
    }
}

/// Config file lookup: explicit path, then `ODU_CONFIG`, then next to the
/// executable, then the working directory.
pub fn resolve_config_path(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        if !path.is_file() {
            bail!("config file not found: {}", path.display());
        }
        return Ok(path.to_path_buf());
    }

    let mut candidates = Vec::new();
    if let Some(from_env) = std::env::var_os(CONFIG_ENV_VAR) {
        candidates.push(PathBuf::from(from_env));
    }
    candidates.push(app_dir().join(CONFIG_FILE_NAME));
    if let Ok(cwd) = std::env::current_dir() {
        candidates.push(cwd.join(CONFIG_FILE_NAME));
    }

    candidates
        .into_iter()
        .find(|path| path.is_file())
        .with_context(|| {
            format!("{CONFIG_FILE_NAME} not found (checked {CONFIG_ENV_VAR}, app dir, and cwd)")
        })
}

/// Pipeline-owned directories under the base directory.
#[derive(Debug, Clone)]
pub struct ManagedFolders {
    pub input: PathBuf,
    pub dataload: PathBuf,
    pub emails: PathBuf,
    pub logs: PathBuf,
}

impl ManagedFolders {
    pub fn under(base: &Path) -> Self {
        Self {
            input: base.join("UnmatchedDepartment_Input"),
            dataload: base.join("DataLoad_21.1.x"),
            emails: base.join("emails"),
            logs: base.join("logs"),
        }
    }

    pub fn prepare(&self) -> Result<()> {
        for folder in [&self.input, &self.dataload, &self.emails, &self.logs] {
            ensure_directory(folder)?;
        }
        Ok(())
    }
}
