// SPDX-License-Identifier: AGPL-3.0-only

//! Integration test: the real 2D Euler MMS case on an installed solver.
//!
//! Needs `e4shared`, `e4zsss`, and `python3` on `PATH` and the case files
//! in the directory named by `MMS_HARNESS_CASE_DIR`. Run with
//! `cargo test -- --ignored`.

use mms_harness::config::{self, HarnessConfig};

#[test]
#[ignore = "requires the flow solver and the Euler MMS case directory"]
fn euler_mms_smoke_test() {
    let cfg = HarnessConfig::euler_smoke_test();
    let case_dir = match config::discover_case_dir(None, cfg.case_marker()) {
        Ok(dir) => dir,
        Err(e) => panic!("{e}"),
    };
    let report = cfg.run_in(&case_dir);
    for check in &report.harness.checks {
        println!("{}", check.message());
    }
    assert!(report.passed(), "{:?}", report.error());
}
