mod backup;
mod config;
mod report;
mod runner;

use anyhow::{Context, Result};
use clap::error::ErrorKind;
use clap::{ArgAction, CommandFactory, Parser};
use config::{FileConfig, Settings};
use report::{EXIT_SUCCESS, EXIT_USAGE};
use runner::SystemRunner;
use std::env;
use std::ffi::OsString;
use std::io::{self, IsTerminal};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "mysql-backup")]
#[command(about = "Back up MySQL databases with mysqldump and gzip")]
#[command(version, disable_help_flag = true)]
struct Cli {
    /// Directory to write backups to (must exist, default: current directory)
    #[arg(short, long, value_name = "DIR")]
    destination: Option<PathBuf>,

    /// MySQL user [default: root]
    #[arg(short, long)]
    user: Option<String>,

    /// MySQL password [default: empty]
    #[arg(short, long, allow_hyphen_values = true)]
    password: Option<String>,

    /// Path to the mysqldump executable (default: search PATH)
    #[arg(short, long, value_name = "PATH")]
    mysqldump: Option<PathBuf>,

    /// Path to the gzip executable (default: search PATH)
    #[arg(short, long, value_name = "PATH")]
    gzip: Option<PathBuf>,

    /// Path to a TOML configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    /// Print usage and exit
    #[arg(long, visible_alias = "usage", action = ArgAction::Help)]
    help: Option<bool>,

    /// Databases to back up
    #[arg(value_name = "DATABASE")]
    databases: Vec<String>,
}

impl Cli {
    fn settings(&self) -> Settings {
        Settings {
            destination: self.destination.clone(),
            user: self.user.clone(),
            password: self.password.clone(),
            mysqldump: self.mysqldump.clone(),
            gzip: self.gzip.clone(),
            databases: self.databases.clone(),
        }
    }
}

/// `--help` and `--usage` win over everything else on the command line,
/// including arguments clap would reject. A token that is the value of a
/// preceding option (`-p --help`) is not a help request.
fn wants_usage(args: &[OsString]) -> bool {
    let value_flags = value_flags();
    let mut tokens = args.iter().skip(1).take_while(|arg| *arg != "--");
    while let Some(arg) = tokens.next() {
        if arg == "--help" || arg == "--usage" {
            return true;
        }
        if arg.to_str().is_some_and(|a| value_flags.iter().any(|f| f == a)) {
            tokens.next();
        }
    }
    false
}

/// Spellings of the options that take a separate value, e.g. `-d` and
/// `--destination`.
fn value_flags() -> Vec<String> {
    let command = Cli::command();
    let mut flags = Vec::new();
    for arg in command.get_arguments() {
        if arg.is_positional() || !arg.get_action().takes_values() {
            continue;
        }
        if let Some(short) = arg.get_short() {
            flags.push(format!("-{}", short));
        }
        if let Some(long) = arg.get_long() {
            flags.push(format!("--{}", long));
        }
    }
    flags
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "mysql_backup=debug"
    } else {
        "mysql_backup=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_ansi(io::stderr().is_terminal())
        .init();
}

fn run(cli: Cli) -> Result<u8> {
    let mut settings = cli.settings();
    if let Some(ref path) = cli.config {
        let file = FileConfig::load(path)?;
        settings = settings.merge_file(file);
    }
    settings.validate()?;

    let cwd = env::current_dir().context("Failed to determine current directory")?;
    let path = env::var_os("PATH");
    let config = settings.resolve(path.as_deref(), &cwd)?;
    debug!(
        "Resolved configuration: destination={}, user={}, mysqldump={}, gzip={}",
        config.destination.display(),
        config.user,
        config.mysqldump.display(),
        config.gzip.display()
    );

    let host = backup::host_name(&SystemRunner);
    info!(
        "Backing up {} database(s) to {}",
        config.databases.len(),
        config.destination.display()
    );

    let outcomes = backup::run_backups(&config, &SystemRunner, &host);
    report::report(&outcomes, &mut io::stderr().lock()).context("Failed to write report")
}

fn main() -> ExitCode {
    let args: Vec<OsString> = env::args_os().collect();

    if wants_usage(&args) {
        let _ = Cli::command().print_help();
        return ExitCode::from(EXIT_SUCCESS);
    }

    let cli = match Cli::try_parse_from(&args) {
        Ok(cli) => cli,
        Err(err) => match err.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
                let _ = err.print();
                return ExitCode::from(EXIT_SUCCESS);
            }
            _ => {
                let message = err.to_string();
                eprint!(
                    "ERROR: {}",
                    message.strip_prefix("error: ").unwrap_or(&message)
                );
                return ExitCode::from(EXIT_USAGE);
            }
        },
    };

    init_tracing(cli.verbose);

    match run(cli) {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            eprintln!("ERROR: {:#}", err);
            ExitCode::from(EXIT_USAGE)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<OsString> {
        list.iter().map(OsString::from).collect()
    }

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_flags_and_databases() {
        let cli = Cli::try_parse_from(args(&[
            "mysql-backup",
            "-d",
            "/backups",
            "--user",
            "backup",
            "-p",
            "-dash-start",
            "-m",
            "/opt/mysqldump",
            "--gzip",
            "/bin/gzip",
            "shop",
            "crm",
            "shop",
        ]))
        .unwrap();

        let settings = cli.settings();
        assert_eq!(settings.destination, Some(PathBuf::from("/backups")));
        assert_eq!(settings.user.as_deref(), Some("backup"));
        assert_eq!(settings.password.as_deref(), Some("-dash-start"));
        assert_eq!(settings.mysqldump, Some(PathBuf::from("/opt/mysqldump")));
        assert_eq!(settings.gzip, Some(PathBuf::from("/bin/gzip")));
        assert_eq!(settings.databases, vec!["shop", "crm", "shop"]);
    }

    #[test]
    fn unset_flags_stay_unset() {
        let cli = Cli::try_parse_from(args(&["mysql-backup", "shop"])).unwrap();
        let settings = cli.settings();
        assert_eq!(settings.user, None);
        assert_eq!(settings.password, None);
        assert_eq!(settings.destination, None);
    }

    #[test]
    fn missing_flag_value_is_an_error() {
        assert!(Cli::try_parse_from(args(&["mysql-backup", "shop", "--destination"])).is_err());
        assert!(Cli::try_parse_from(args(&["mysql-backup", "shop", "-u"])).is_err());
    }

    #[test]
    fn unknown_flag_is_an_error() {
        let err = Cli::try_parse_from(args(&["mysql-backup", "--all-databases"])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownArgument);
    }

    #[test]
    fn usage_flags_are_detected_anywhere() {
        assert!(wants_usage(&args(&["mysql-backup", "--help"])));
        assert!(wants_usage(&args(&["mysql-backup", "-x", "shop", "--usage"])));
        assert!(!wants_usage(&args(&["mysql-backup", "shop"])));
        assert!(!wants_usage(&args(&["mysql-backup", "--", "--help"])));
    }

    #[test]
    fn option_value_spelled_like_help_is_not_a_help_request() {
        assert!(!wants_usage(&args(&["mysql-backup", "-p", "--help", "shop"])));
        assert!(!wants_usage(&args(&["mysql-backup", "--password", "--usage", "shop"])));
        assert!(wants_usage(&args(&["mysql-backup", "-p", "secret", "--help"])));
        assert!(wants_usage(&args(&["mysql-backup", "--password=x", "--help"])));
    }

    #[test]
    fn value_flags_cover_every_option_with_a_value() {
        let flags = value_flags();
        for flag in ["-d", "--destination", "-p", "--password", "-c", "--config"] {
            assert!(flags.iter().any(|f| f == flag), "{} missing", flag);
        }
        assert!(!flags.iter().any(|f| f == "-v" || f == "--help"));
    }

    #[test]
    fn password_may_be_spelled_like_help() {
        let cli = Cli::try_parse_from(args(&["mysql-backup", "-p", "--help", "shop"])).unwrap();
        assert_eq!(cli.password.as_deref(), Some("--help"));
        assert_eq!(cli.databases, vec!["shop"]);
    }

    #[test]
    fn help_flag_is_handled_by_clap_too() {
        let err = Cli::try_parse_from(args(&["mysql-backup", "--usage"])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DisplayHelp);
    }
}
