// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[yare::parameterized(
    plain     = { "${{ 1 + 2 }}", Some("1 + 2") },
    no_spaces = { "${{unit()}}", Some("unit()") },
    padded    = { "  ${{ x }}  ", Some("x") },
    not_one   = { "1 + 2", None },
    unclosed  = { "${{ 1 + 2", None },
)]
fn dollar_brace_extraction(raw: &str, expected: Option<&str>) {
    assert_eq!(strip_dollar_braces(raw), expected);
}

#[test]
fn check_syntax_accepts_current_unit_placeholder() {
    check_syntax("::od_reading:od1.od > 1.0").unwrap();
    check_syntax("unit1:stirring:target_rpm < 600").unwrap();
    check_syntax("True and not False").unwrap();
}

#[test]
fn check_syntax_rejects_broken_expressions() {
    assert!(check_syntax("(False or True) or False)").is_err());
    assert!(check_syntax("1 +").is_err());
    assert!(check_syntax("test.test > 1").is_err());
}
