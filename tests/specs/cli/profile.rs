use crate::prelude::*;

const GOOD_PROFILE: &str = r#"
experiment_profile_name: spec_profile
common:
  jobs:
    stirring:
      actions:
        - type: start
          hours_elapsed: 0.0
          options:
            target_rpm: 400
"#;

const BAD_PROFILE: &str = r#"
experiment_profile_name: spec_profile
common:
  jobs:
    dosing_automation:
      actions:
        - type: start
          hours_elapsed: 0.0
"#;

#[test]
fn verify_accepts_a_good_profile() {
    let dir = storage_root();
    let path = dir.path().join("good.yaml");
    std::fs::write(&path, GOOD_PROFILE).unwrap();
    pio(&dir)
        .args(["profile", "verify"])
        .arg(&path)
        .assert()
        .success()
        .stdout(predicates::str::contains("spec_profile"));
}

#[test]
fn verify_rejects_automation_starts() {
    let dir = storage_root();
    let path = dir.path().join("bad.yaml");
    std::fs::write(&path, BAD_PROFILE).unwrap();
    pio(&dir)
        .args(["profile", "verify"])
        .arg(&path)
        .assert()
        .failure()
        .code(1)
        .stderr(predicates::str::contains("automation"));
}

#[test]
fn dry_run_executes_without_side_effects() {
    let dir = storage_root();
    let path = dir.path().join("good.yaml");
    std::fs::write(&path, GOOD_PROFILE).unwrap();
    pio(&dir)
        .args(["profile", "run", "--dry-run"])
        .arg(&path)
        .assert()
        .success()
        .stdout(predicates::str::contains("fired 1"));
}
