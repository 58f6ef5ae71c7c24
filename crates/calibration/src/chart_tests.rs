// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::structs::CurveData;

#[test]
fn renders_points_and_labels() {
    let chart = render(
        &[0.0, 1.0, 2.0],
        &[0.0, 0.5, 1.0],
        "duration vs volume",
        "seconds",
        "mL",
        None,
        false,
    );
    assert!(chart.starts_with("duration vs volume\n"));
    assert!(chart.contains('●'));
    assert!(chart.contains("seconds"));
    assert!(chart.contains("mL"));
}

#[test]
fn highlights_the_most_recent_point() {
    let chart = render(&[0.0, 1.0], &[0.0, 1.0], "t", "", "", None, true);
    assert!(chart.contains('◉'));
}

#[test]
fn overlays_the_fitted_curve() {
    let curve = CurveData::Poly {
        coefficients: vec![0.5, 0.0],
    };
    let chart = render(&[0.0, 2.0], &[0.0, 1.0], "t", "", "", Some(&curve), false);
    assert!(chart.contains('·'));
}

#[test]
fn empty_data_degrades_gracefully() {
    let chart = render(&[], &[], "empty", "", "", None, false);
    assert!(chart.contains("(no data)"));
}
