use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const DEFAULT_USER: &str = "root";
pub const MYSQLDUMP: &str = "mysqldump";
pub const GZIP: &str = "gzip";

/// Optional TOML configuration file.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    backup: Option<BackupSection>,
    mysql: Option<MysqlSection>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct BackupSection {
    destination: Option<PathBuf>,
    databases: Option<Vec<String>>,
    mysqldump: Option<PathBuf>,
    gzip: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct MysqlSection {
    user: Option<String>,
    password: Option<String>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }
}

/// Settings collected from the command line and the config file, before
/// defaults are applied.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Settings {
    pub destination: Option<PathBuf>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub mysqldump: Option<PathBuf>,
    pub gzip: Option<PathBuf>,
    pub databases: Vec<String>,
}

/// Fully resolved configuration used by the backup run.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub destination: PathBuf,
    pub user: String,
    pub password: String,
    pub mysqldump: PathBuf,
    pub gzip: PathBuf,
    pub databases: Vec<String>,
}

impl Settings {
    /// Fills fields left unset on the command line from the config file.
    /// Databases named on the command line replace the file's list.
    pub fn merge_file(self, file: FileConfig) -> Self {
        let backup = file.backup.unwrap_or_default();
        let mysql = file.mysql.unwrap_or_default();
        let databases = if self.databases.is_empty() {
            backup.databases.unwrap_or_default()
        } else {
            self.databases
        };

        Self {
            destination: self.destination.or(backup.destination),
            user: self.user.or(mysql.user),
            password: self.password.or(mysql.password),
            mysqldump: self.mysqldump.or(backup.mysqldump),
            gzip: self.gzip.or(backup.gzip),
            databases,
        }
    }

    /// Checks explicitly supplied values.
    pub fn validate(&self) -> Result<()> {
        if let Some(ref destination) = self.destination {
            if !destination.is_dir() {
                bail!(
                    "Destination directory does not exist: {}",
                    destination.display()
                );
            }
        }
        if let Some(ref path) = self.mysqldump {
            ensure_executable(path, "--mysqldump")?;
        }
        if let Some(ref path) = self.gzip {
            ensure_executable(path, "--gzip")?;
        }
        for database in &self.databases {
            if database.is_empty() {
                bail!("Database name must not be empty");
            }
            if database.starts_with('-') {
                bail!("Invalid database name: {}", database);
            }
        }
        Ok(())
    }

    /// Applies defaults and locates the external tools on `search_path`.
    ///
    /// Fails before any lookup when no database was requested.
    pub fn resolve(self, search_path: Option<&OsStr>, cwd: &Path) -> Result<Config> {
        if self.databases.is_empty() {
            bail!("No databases specified; pass at least one database name");
        }

        let mysqldump = resolve_tool(self.mysqldump, MYSQLDUMP, "--mysqldump", search_path, cwd)?;
        let gzip = resolve_tool(self.gzip, GZIP, "--gzip", search_path, cwd)?;

        Ok(Config {
            destination: self.destination.unwrap_or_else(|| cwd.to_path_buf()),
            user: self.user.unwrap_or_else(|| DEFAULT_USER.to_string()),
            password: self.password.unwrap_or_default(),
            mysqldump,
            gzip,
            databases: self.databases,
        })
    }
}

fn resolve_tool(
    explicit: Option<PathBuf>,
    name: &str,
    flag: &str,
    search_path: Option<&OsStr>,
    cwd: &Path,
) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path);
    }
    let path = which::which_in(name, search_path, cwd).with_context(|| {
        format!(
            "Could not find {} in PATH; use {} to set its location",
            name, flag
        )
    })?;
    debug!("Found {} at {}", name, path.display());
    Ok(path)
}

fn ensure_executable(path: &Path, flag: &str) -> Result<()> {
    if !path.exists() {
        bail!("{}: no such file: {}", flag, path.display());
    }
    if !path.is_file() || !is_executable(path)? {
        bail!("{}: file is not executable: {}", flag, path.display());
    }
    Ok(())
}

#[cfg(unix)]
fn is_executable(path: &Path) -> Result<bool> {
    use std::os::unix::fs::PermissionsExt;

    let metadata = fs::metadata(path)
        .with_context(|| format!("Failed to read metadata: {}", path.display()))?;
    Ok(metadata.permissions().mode() & 0o111 != 0)
}

#[cfg(not(unix))]
fn is_executable(_path: &Path) -> Result<bool> {
    Ok(true)
}
