// Shared helpers for the binary-level tests.

#![allow(dead_code)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

/// Fake mysqldump: logs its arguments, fails for a database called `broken`
/// after writing partial output.
const FAKE_MYSQLDUMP: &str = r#"#!/bin/sh
for last; do :; done
echo "$@" >> "$FAKE_DUMP_LOG"
if [ "$last" = "broken" ]; then
    echo "-- partial dump"
    echo "mysqldump: Got error: 1049: Unknown database 'broken'" >&2
    exit 2
fi
echo "-- dump of $last"
"#;

/// Fake gzip: expects `-9 -- <file>`, rejects anything option-like in place
/// of the file, and renames the file to `<file>.gz`.
const FAKE_GZIP: &str = r#"#!/bin/sh
[ "$1" = "-9" ] || exit 3
[ "$2" = "--" ] || exit 4
mv -- "$3" "$3.gz"
"#;

const FAILING_GZIP: &str = r#"#!/bin/sh
echo "gzip: $3: No space left on device" >&2
exit 1
"#;

pub struct Fixture {
    pub root: TempDir,
    pub bin: PathBuf,
    pub dest: PathBuf,
    pub log: PathBuf,
}

impl Fixture {
    pub fn new() -> Self {
        let root = TempDir::new().unwrap();
        let bin = root.path().join("bin");
        let dest = root.path().join("dest");
        fs::create_dir(&bin).unwrap();
        fs::create_dir(&dest).unwrap();
        let log = root.path().join("dump.log");

        write_script(&bin.join("mysqldump"), FAKE_MYSQLDUMP);
        write_script(&bin.join("gzip"), FAKE_GZIP);

        Self {
            root,
            bin,
            dest,
            log,
        }
    }

    pub fn mysqldump(&self) -> PathBuf {
        self.bin.join("mysqldump")
    }

    pub fn gzip(&self) -> PathBuf {
        self.bin.join("gzip")
    }

    /// Writes a gzip stand-in that always fails and returns its path.
    pub fn failing_gzip(&self) -> PathBuf {
        let path = self.root.path().join("failing-gzip");
        write_script(&path, FAILING_GZIP);
        path
    }

    /// Runs the binary with the fake tools first on `PATH`.
    pub fn run(&self, args: &[&str]) -> Output {
        self.command(args).output().unwrap()
    }

    pub fn command(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_mysql-backup"));
        cmd.args(args)
            .current_dir(self.root.path())
            .env("PATH", format!("{}:/usr/bin:/bin", self.bin.display()))
            .env("FAKE_DUMP_LOG", &self.log)
            .env_remove("RUST_LOG");
        cmd
    }

    pub fn dump_log(&self) -> String {
        fs::read_to_string(&self.log).unwrap_or_default()
    }

    pub fn artifacts(&self) -> Vec<String> {
        files_in(&self.dest)
    }
}

pub fn write_script(path: &Path, body: &str) {
    fs::write(path, body).unwrap();
    fs::set_permissions(path, fs::Permissions::from_mode(0o755)).unwrap();
}

pub fn files_in(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

pub fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

pub fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}
