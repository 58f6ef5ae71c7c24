use crate::prelude::*;

#[test]
fn help_lists_the_surface() {
    let dir = storage_root();
    pio(&dir)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicates::str::contains("run"))
        .stdout(predicates::str::contains("calibrations"))
        .stdout(predicates::str::contains("profile"));
}

#[test]
fn version_prints() {
    let dir = storage_root();
    pio(&dir)
        .arg("--version")
        .assert()
        .success()
        .stdout(predicates::str::contains("pio"));
}

#[test]
fn jobs_table_renders_on_a_fresh_unit() {
    let dir = storage_root();
    pio(&dir)
        .arg("jobs")
        .assert()
        .success()
        .stdout(predicates::str::contains("NAME"))
        .stdout(predicates::str::contains("PID"));
}
