// SPDX-License-Identifier: AGPL-3.0-only

//! 2D Euler manufactured-solution smoke test — steady-state solver.
//!
//! Runs the solver as a black box in the case directory and validates:
//!
//!   1. Every prepare command succeeds (case staging, Lua generation, prep)
//!   2. The steady-state run converges in the expected number of steps
//!   3. Density error norms match the order-of-accuracy study
//!
//! Exit code 0 = pipeline passed, exit code 1 = any stage or check failed.
//!
//! # Validation targets
//!
//! | Check | Metric | Tolerance | Basis |
//! |-------|--------|-----------|-------|
//! | Convergence | pseudo-time steps | ±3 of 113 | `tolerances::STEP_COUNT_SLACK` |
//! | Accuracy | rho L1, L2, Linf | rel < 1e-3 | `tolerances::NORM_RELATIVE_TOLERANCE` |
//!
//! # Usage
//!
//! ```text
//! validate_mms_euler [--case-dir=DIR] [--config=FILE.json] [--json=OUT.json]
//! ```
//!
//! Without `--case-dir`, `MMS_HARNESS_CASE_DIR` or the working directory is
//! used. Without `--config`, `MMS_HARNESS_CONFIG` or the built-in Euler case.

use std::path::PathBuf;
use std::process;

use mms_harness::config::{self, HarnessConfig};
use mms_harness::provenance;
use mms_harness::reference::CaseReference;

fn main() {
    println!("═══════════════════════════════════════════════════════════");
    println!("  MMS Verification — 2D Euler, steady-state solver");
    println!("  prepare → run → validate (fail-fast)");
    println!("═══════════════════════════════════════════════════════════\n");

    let args: Vec<String> = std::env::args().collect();

    let cfg = match HarnessConfig::from_args_or_env(&args) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("  {e}");
            process::exit(1);
        }
    };

    let override_dir = config::parse_cli_value(&args, "--case-dir").map(PathBuf::from);
    let case_dir = match config::discover_case_dir(override_dir.as_deref(), cfg.case_marker()) {
        Ok(dir) => dir,
        Err(e) => {
            eprintln!("  {e}");
            process::exit(1);
        }
    };
    println!("  Case directory: {}", case_dir.display());
    print!("{}", cfg.reference.format_targets());
    if cfg.reference == CaseReference::euler_smoke_test() {
        provenance::print_provenance(&provenance::EULER_MMS_NORMS);
    }
    println!();

    let report = cfg.run_in(&case_dir);

    if let Some(out) = config::parse_cli_value(&args, "--json") {
        match serde_json::to_string_pretty(&report.to_json()) {
            Ok(s) => match std::fs::write(&out, s) {
                Ok(()) => println!("\n  Results saved to: {out}"),
                Err(e) => eprintln!("  WARNING: could not write {out}: {e}"),
            },
            Err(e) => eprintln!("  WARNING: JSON serialize: {e}"),
        }
    }

    report.finish();
}
