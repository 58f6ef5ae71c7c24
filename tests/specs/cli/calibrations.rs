use crate::prelude::*;

const CALIBRATION_YAML: &str = r#"device: od90
calibration_name: spec-cal
created_at: 2026-02-01T09:00:00Z
calibrated_on_pioreactor_unit: unit1
recorded_data:
  x: [0.0, 0.5, 1.0, 2.0]
  y: [0.05, 0.55, 1.05, 2.05]
curve_data_:
  type: poly
  coefficients: [1.0, 0.05]
angle: '90'
pd_channel: '1'
ir_led_intensity: 70.0
"#;

fn seed_calibration(dir: &tempfile::TempDir) {
    let device_dir = dir.path().join("storage/calibrations/od90");
    std::fs::create_dir_all(&device_dir).unwrap();
    std::fs::write(device_dir.join("spec-cal.yaml"), CALIBRATION_YAML).unwrap();
}

#[test]
fn list_shows_saved_calibrations() {
    let dir = storage_root();
    seed_calibration(&dir);
    pio(&dir)
        .args(["calibrations", "list"])
        .assert()
        .success()
        .stdout(predicates::str::contains("od90"))
        .stdout(predicates::str::contains("spec-cal"));
}

#[test]
fn set_current_marks_the_active_calibration() {
    let dir = storage_root();
    seed_calibration(&dir);
    pio(&dir)
        .args(["calibrations", "set-current", "--device", "od90", "--name", "spec-cal"])
        .assert()
        .success()
        .stdout(predicates::str::contains("active"));

    pio(&dir)
        .args(["calibrations", "list", "--device", "od90"])
        .assert()
        .success()
        .stdout(predicates::str::contains("✔"));
}

#[test]
fn display_renders_an_ascii_chart() {
    let dir = storage_root();
    seed_calibration(&dir);
    pio(&dir)
        .args(["calibrations", "display", "--device", "od90", "--name", "spec-cal"])
        .assert()
        .success()
        .stdout(predicates::str::contains("●"))
        .stdout(predicates::str::contains("device: od90"));
}

#[test]
fn delete_removes_the_file() {
    let dir = storage_root();
    seed_calibration(&dir);
    pio(&dir)
        .args(["calibrations", "delete", "--device", "od90", "--name", "spec-cal"])
        .assert()
        .success();
    assert!(!dir
        .path()
        .join("storage/calibrations/od90/spec-cal.yaml")
        .exists());
}
