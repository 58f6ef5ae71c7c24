use crate::prelude::*;

#[test]
fn unknown_subcommand_is_a_usage_error() {
    let dir = storage_root();
    pio(&dir).arg("florb").assert().failure().code(2);
}

#[test]
fn unknown_job_is_a_usage_error() {
    let dir = storage_root();
    pio(&dir)
        .args(["run", "warp_drive"])
        .assert()
        .failure()
        .code(2)
        .stderr(predicates::str::contains("unknown job"));
}

#[test]
fn kill_without_a_query_is_a_usage_error() {
    let dir = storage_root();
    pio(&dir)
        .arg("kill")
        .assert()
        .failure()
        .code(2)
        .stderr(predicates::str::contains("--all"));
}

#[test]
fn missing_calibration_is_a_plain_error() {
    let dir = storage_root();
    pio(&dir)
        .args(["calibrations", "display", "--device", "od90", "--name", "ghost"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicates::str::contains("not found"));
}
