use crate::config::Config;
use crate::runner::{CommandRunner, Invocation};
use anyhow::{bail, Result};
use chrono::{DateTime, Local};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%S";
const KERNEL_HOSTNAME: &str = "/proc/sys/kernel/hostname";
const FALLBACK_HOST: &str = "localhost";

/// Result of backing up a single database.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    pub database: String,
    pub status: Status,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Status {
    /// Path of the compressed dump.
    Success(PathBuf),
    Failure(String),
}

#[cfg(test)]
impl Outcome {
    pub fn error(&self) -> Option<&str> {
        match self.status {
            Status::Success(_) => None,
            Status::Failure(ref message) => Some(message.as_str()),
        }
    }
}

/// Backs up every requested database in order. A failed database does not
/// stop the run.
pub fn run_backups<R: CommandRunner>(config: &Config, runner: &R, host: &str) -> Vec<Outcome> {
    config
        .databases
        .iter()
        .map(|database| backup_database(config, runner, host, database))
        .collect()
}

fn backup_database<R: CommandRunner>(
    config: &Config,
    runner: &R,
    host: &str,
    database: &str,
) -> Outcome {
    let base = unique_base(
        &config.destination,
        &artifact_base(host, database, &Local::now()),
    );
    let dump_path = config.destination.join(format!("{}.sql", base));
    let archive_path = config.destination.join(format!("{}.sql.gz", base));

    info!("Backing up database {} to {}", database, archive_path.display());

    let status = match dump_and_compress(config, runner, database, &dump_path) {
        Ok(()) if archive_path.is_file() => {
            info!("Backup of {} completed: {}", database, archive_path.display());
            Status::Success(archive_path)
        }
        Ok(()) => {
            remove_partial(&dump_path);
            let message = format!(
                "{} did not produce {}",
                config.gzip.display(),
                archive_path.display()
            );
            warn!("Backup of {} failed: {}", database, message);
            Status::Failure(message)
        }
        Err(err) => {
            remove_partial(&dump_path);
            remove_partial(&archive_path);
            let message = format!("{:#}", err);
            warn!("Backup of {} failed: {}", database, message);
            Status::Failure(message)
        }
    };

    Outcome {
        database: database.to_string(),
        status,
    }
}

fn dump_and_compress<R: CommandRunner>(
    config: &Config,
    runner: &R,
    database: &str,
    dump_path: &Path,
) -> Result<()> {
    let dump = dump_invocation(config, database, dump_path);
    let output = runner.run(&dump)?;
    if !output.success {
        bail!(output.describe_failure(&dump.program_name()));
    }

    let compress = Invocation::new(&config.gzip)
        .arg("-9")
        .arg("--")
        .arg(dump_path);
    let output = runner.run(&compress)?;
    if !output.success {
        bail!(output.describe_failure(&compress.program_name()));
    }
    Ok(())
}

/// mysqldump command line for one database. The password travels as an
/// argument and is therefore visible in the process list while it runs.
pub fn dump_invocation(config: &Config, database: &str, dump_path: &Path) -> Invocation {
    let mut invocation = Invocation::new(&config.mysqldump)
        .arg("--routines")
        .arg("--comments")
        .arg(format!("--user={}", config.user));
    // Left out when empty so mysqldump falls back to its option files.
    if !config.password.is_empty() {
        invocation = invocation.arg(format!("--password={}", config.password));
    }
    invocation.arg(database).stdout_to(dump_path)
}

/// `<host>-<database>-<timestamp>` with path separators removed from the
/// database name.
pub fn artifact_base(host: &str, database: &str, timestamp: &DateTime<Local>) -> String {
    let database: String = database
        .chars()
        .map(|c| if c == '/' || c == '\\' { '_' } else { c })
        .collect();
    format!("{}-{}-{}", host, database, timestamp.format(TIMESTAMP_FORMAT))
}

fn unique_base(destination: &Path, base: &str) -> String {
    let taken = |candidate: &str| {
        destination.join(format!("{}.sql", candidate)).exists()
            || destination.join(format!("{}.sql.gz", candidate)).exists()
    };

    let mut candidate = base.to_string();
    let mut suffix = 1;
    while taken(&candidate) {
        candidate = format!("{}-{}", base, suffix);
        suffix += 1;
    }
    candidate
}

fn remove_partial(path: &Path) {
    if path.exists() {
        match fs::remove_file(path) {
            Ok(()) => info!("Removed partial file: {}", path.display()),
            Err(e) => warn!("Failed to remove {}: {}", path.display(), e),
        }
    }
}

/// Name of the machine running the backup: the kernel's host name, then
/// the output of `hostname`, then `localhost`.
pub fn host_name<R: CommandRunner>(runner: &R) -> String {
    resolve_host_name(fs::read_to_string(KERNEL_HOSTNAME).ok(), runner)
}

fn resolve_host_name<R: CommandRunner>(kernel: Option<String>, runner: &R) -> String {
    if let Some(name) = kernel.as_deref().map(str::trim) {
        if !name.is_empty() {
            return name.to_string();
        }
    }

    match runner.run(&Invocation::new("hostname")) {
        Ok(output) if output.success && !output.stdout.trim().is_empty() => {
            return output.stdout.trim().to_string();
        }
        Ok(output) => debug!("{}", output.describe_failure("hostname")),
        Err(e) => debug!("{:#}", e),
    }

    warn!("Could not determine host name, using {}", FALLBACK_HOST);
    FALLBACK_HOST.to_string()
}
