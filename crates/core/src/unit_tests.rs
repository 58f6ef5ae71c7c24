// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn placeholders_are_stable_wire_values() {
    // These appear in retained topics and persisted rows; changing them
    // strands existing state.
    assert_eq!(BROADCAST_UNIT, "$broadcast");
    assert_eq!(UNIVERSAL_EXPERIMENT, "$experiment");
    assert_eq!(NO_EXPERIMENT, "$no_experiment");
}

#[test]
fn unit_name_is_never_empty() {
    assert!(!get_unit_name().is_empty());
}
