// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::document::Profile;
use std::collections::BTreeMap;

fn no_plugins() -> BTreeMap<String, String> {
    BTreeMap::new()
}

fn plugins(entries: &[(&str, &str)]) -> BTreeMap<String, String> {
    entries
        .iter()
        .map(|(name, version)| (name.to_string(), version.to_string()))
        .collect()
}

#[test]
fn bare_start_on_an_automation_is_rejected() {
    let raw = r#"
experiment_profile_name: x
common:
  jobs:
    dosing_automation:
      actions:
        - type: start
          hours_elapsed: 0.0
"#;
    let profile = Profile::from_yaml(raw).unwrap();
    let err = verify_profile(&profile, &no_plugins()).unwrap_err();
    assert!(matches!(err, VerifyError::AutomationStartStop { .. }));
}

#[test]
fn update_on_an_automation_is_fine() {
    let raw = r#"
experiment_profile_name: x
common:
  jobs:
    dosing_automation:
      actions:
        - type: update
          hours_elapsed: 1.0
          options:
            target_od: 1.5
"#;
    let profile = Profile::from_yaml(raw).unwrap();
    verify_profile(&profile, &no_plugins()).unwrap();
}

#[test]
fn controller_update_requires_automation_name() {
    let raw = r#"
experiment_profile_name: x
common:
  jobs:
    dosing_control:
      actions:
        - type: update
          hours_elapsed: 1.0
          options:
            volume: 1.0
"#;
    let profile = Profile::from_yaml(raw).unwrap();
    let err = verify_profile(&profile, &no_plugins()).unwrap_err();
    assert!(matches!(err, VerifyError::UpdateWithoutAutomationName { .. }));

    let ok = r#"
experiment_profile_name: x
common:
  jobs:
    dosing_control:
      actions:
        - type: update
          hours_elapsed: 1.0
          options:
            automation_name: turbidostat
            volume: 1.0
"#;
    verify_profile(&Profile::from_yaml(ok).unwrap(), &no_plugins()).unwrap();
}

#[test]
fn bad_if_expression_fails_verification() {
    let raw = r#"
experiment_profile_name: x
common:
  jobs:
    stirring:
      actions:
        - type: start
          hours_elapsed: 0.0
          if: "(True or False"
"#;
    let profile = Profile::from_yaml(raw).unwrap();
    let err = verify_profile(&profile, &no_plugins()).unwrap_err();
    assert!(matches!(err, VerifyError::Expression { .. }));
}

#[test]
fn repeat_inner_actions_are_checked_too() {
    let raw = r#"
experiment_profile_name: x
common:
  jobs:
    stirring:
      actions:
        - type: repeat
          hours_elapsed: 0.0
          repeat_every_hours: 1.0
          actions:
            - type: update
              hours_elapsed: 0.0
              if: "1 +"
              options: {}
"#;
    let profile = Profile::from_yaml(raw).unwrap();
    assert!(verify_profile(&profile, &no_plugins()).is_err());
}

#[yare::parameterized(
    exact_ok      = { "1.2.0", "1.2.0", true },
    exact_eq_ok   = { "==1.2.0", "1.2.0", true },
    exact_miss    = { "==1.2.1", "1.2.0", false },
    ge_ok         = { ">=1.0", "1.2.0", true },
    ge_equal_ok   = { ">=1.2.0", "1.2.0", true },
    ge_miss       = { ">=2.0", "1.2.0", false },
    le_ok         = { "<=2.0", "1.2.0", true },
    le_miss       = { "<=1.1", "1.2.0", false },
)]
fn plugin_version_constraints(constraint: &str, installed: &str, ok: bool) {
    let raw = format!(
        r#"
experiment_profile_name: x
plugins:
  - name: my_plugin
    version: "{constraint}"
"#
    );
    let profile = Profile::from_yaml(&raw).unwrap();
    let result = verify_profile(&profile, &plugins(&[("my_plugin", installed)]));
    assert_eq!(result.is_ok(), ok, "{constraint} vs {installed}");
}

#[test]
fn missing_plugin_aborts() {
    let raw = r#"
experiment_profile_name: x
plugins:
  - name: ghost_plugin
    version: ">=1.0"
"#;
    let profile = Profile::from_yaml(raw).unwrap();
    let err = verify_profile(&profile, &no_plugins()).unwrap_err();
    assert!(matches!(err, VerifyError::PluginMissing(_)));
}
