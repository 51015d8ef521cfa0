// SPDX-License-Identifier: AGPL-3.0-only

//! Provenance metadata for the frozen reference values.
//!
//! Every expected value the harness compares against traces back to a
//! specific solver run in an order-of-accuracy study. The values are frozen
//! here at authoring time and never derived from the run under test.
//!
//! # Provenance chain
//!
//! ```text
//! case file → accuracy study (grid sequence) → finest-grid post run → Rust constant
//! ```
//!
//! ## Sources
//!
//! | Case | Study | Date | Notes |
//! |------|-------|------|-------|
//! | 2D Euler MMS, steady-state | Order-of-accuracy sweep | 2020-02-29 | Density (`rho`) norms vs `ref-soln.lua` |

/// A single provenance record tying a reference norm to the run that produced it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BaselineProvenance {
    /// Human-readable label (e.g. "Euler MMS rho L1")
    pub label: &'static str,
    /// Case configuration the value was produced from
    pub case: &'static str,
    /// Date of the reference run (ISO 8601)
    pub date: &'static str,
    /// Exact command that printed the value
    pub command: &'static str,
    /// The reference value itself
    pub value: f64,
    /// Unit or description of the value
    pub unit: &'static str,
}

/// Provenance record for an integer step-count baseline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepBaseline {
    /// Human-readable label
    pub label: &'static str,
    /// Case configuration the value was produced from
    pub case: &'static str,
    /// Date of the reference run (ISO 8601)
    pub date: &'static str,
    /// Exact command whose output was counted
    pub command: &'static str,
    /// Expected number of pseudo-time steps
    pub value: u64,
}

const EULER_CASE: &str = "case-euler.txt";
const EULER_DATE: &str = "2020-02-29";
const EULER_POST: &str =
    "e4shared --job=mms --post --tindx-plot=last --ref-soln=ref-soln.lua --norms=rho";

// ═══════════════════════════════════════════════════════════════════
// 2D Euler manufactured solution, steady-state solver
// ═══════════════════════════════════════════════════════════════════

/// Steady-state solver step count on the smoke-test grid.
pub const EULER_MMS_STEPS: StepBaseline = StepBaseline {
    label: "Euler MMS pseudo-time steps",
    case: EULER_CASE,
    date: EULER_DATE,
    command: "e4zsss --job=mms",
    value: 113,
};

/// Density L1 error norm against the manufactured solution.
pub const EULER_MMS_RHO_L1: BaselineProvenance = BaselineProvenance {
    label: "Euler MMS rho L1",
    case: EULER_CASE,
    date: EULER_DATE,
    command: EULER_POST,
    value: 1.730_145_442_812_708_149e-03,
    unit: "kg/m^3",
};

/// Density L2 error norm against the manufactured solution.
pub const EULER_MMS_RHO_L2: BaselineProvenance = BaselineProvenance {
    label: "Euler MMS rho L2",
    case: EULER_CASE,
    date: EULER_DATE,
    command: EULER_POST,
    value: 2.436_181_746_051_479_212e-03,
    unit: "kg/m^3",
};

/// Density Linf error norm against the manufactured solution.
pub const EULER_MMS_RHO_LINF: BaselineProvenance = BaselineProvenance {
    label: "Euler MMS rho Linf",
    case: EULER_CASE,
    date: EULER_DATE,
    command: EULER_POST,
    value: 6.587_021_426_123_662_593e-03,
    unit: "kg/m^3",
};

/// All Euler norm baselines, in L1, L2, Linf order.
pub const EULER_MMS_NORMS: [BaselineProvenance; 3] =
    [EULER_MMS_RHO_L1, EULER_MMS_RHO_L2, EULER_MMS_RHO_LINF];

/// Print a provenance table for a set of baselines.
pub fn print_provenance(records: &[BaselineProvenance]) {
    println!("  Reference provenance:");
    for r in records {
        println!(
            "    {:<22} {:.6e} {}  [{} @ {}]",
            r.label, r.value, r.unit, r.case, r.date
        );
    }
}
