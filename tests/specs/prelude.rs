//! Shared helpers for CLI specs.

use assert_cmd::Command;

/// A `pio` invocation against a fresh temp storage root.
pub fn pio(dir: &tempfile::TempDir) -> Command {
    let mut command = Command::cargo_bin("pio").expect("pio binary");
    command
        .env("TESTING", "1")
        .env("DOT_PIOREACTOR", dir.path())
        .env("EXPERIMENT", "spec_exp");
    command
}

pub fn storage_root() -> tempfile::TempDir {
    tempfile::tempdir().expect("tempdir")
}
