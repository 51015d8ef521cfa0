// SPDX-License-Identifier: AGPL-3.0-only

//! Assertion reporter: pass/fail checks with attributable diagnostics.
//!
//! Each check records the stage and metric it belongs to, the observed and
//! expected values, and the deviation, so a failure message always reads
//! like `[validate] Linf: observed=7.587e-3 expected=6.587e-3 rel dev
//! 1.518e-1 ≥ tol 1.000e-3`, never just "failed".
//!
//! Acceptance rules:
//!   - Absolute (step count): `|observed − expected| ≤ slack`
//!   - Relative (norms): `|observed − expected| / |expected| < tol`
//!   - Boolean (command status, metric presence): passed as given

use std::fmt::Write as _;
use std::process;

use serde::Serialize;

use crate::error::HarnessError;
use crate::pipeline::Stage;

/// A single validation check with result tracking.
#[derive(Debug, Clone, Serialize)]
pub struct Check {
    /// Stage that produced the checked value
    pub stage: Stage,
    /// Metric label (`steps`, `L1`, `e4zsss exit status`, ...)
    pub label: String,
    /// Whether this check passed
    pub passed: bool,
    /// Observed value
    pub observed: f64,
    /// Expected value
    pub expected: f64,
    /// Deviation in the units of `mode` (absolute or relative)
    pub deviation: f64,
    /// Tolerance used
    pub tolerance: f64,
    /// How the tolerance was applied
    pub mode: ToleranceMode,
}

/// How a tolerance threshold is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToleranceMode {
    /// |observed - expected| ≤ tolerance
    Absolute,
    /// |observed - expected| / |expected| < tolerance
    Relative,
    /// pass/fail flag, no numeric comparison
    Boolean,
}

impl std::fmt::Display for ToleranceMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Absolute => write!(f, "abs"),
            Self::Relative => write!(f, "rel"),
            Self::Boolean => write!(f, "bool"),
        }
    }
}

impl Check {
    /// Diagnostic line naming stage, metric, and deviation.
    #[must_use]
    pub fn message(&self) -> String {
        let verdict = if self.passed { "ok" } else { "FAILED" };
        match self.mode {
            ToleranceMode::Boolean => format!("[{}] {}: {verdict}", self.stage, self.label),
            ToleranceMode::Absolute => format!(
                "[{}] {}: observed={} expected={} abs dev {} {} slack {}",
                self.stage,
                self.label,
                self.observed,
                self.expected,
                self.deviation,
                if self.passed { "≤" } else { ">" },
                self.tolerance
            ),
            ToleranceMode::Relative => format!(
                "[{}] {}: observed={:.6e} expected={:.6e} rel dev {:.3e} {} tol {:.3e}",
                self.stage,
                self.label,
                self.observed,
                self.expected,
                self.deviation,
                if self.passed { "<" } else { "≥" },
                self.tolerance
            ),
        }
    }

    /// The failure as a typed error, or `None` if the check passed.
    #[must_use]
    pub fn to_error(&self) -> Option<HarnessError> {
        (!self.passed).then(|| HarnessError::ToleranceViolation {
            stage: self.stage,
            metric: self.label.clone(),
            detail: self.message(),
        })
    }
}

/// Accumulates validation checks and produces a summary with exit code.
#[derive(Debug, Default, Serialize)]
#[must_use]
pub struct ValidationHarness {
    /// Name of the case under validation
    pub name: String,
    /// All checks performed
    pub checks: Vec<Check>,
}

impl ValidationHarness {
    /// Create a new harness for a named case.
    #[must_use = "validation harness must be used to run checks"]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            checks: Vec::new(),
        }
    }

    /// Add an integer slack check: |observed - expected| ≤ slack.
    ///
    /// Symmetric: overshooting and undershooting by the same amount give the
    /// same verdict.
    #[allow(clippy::cast_precision_loss)] // step counts are far below 2^53
    pub fn check_count(&mut self, stage: Stage, label: &str, observed: u64, expected: u64, slack: u64) {
        let deviation = observed.abs_diff(expected);
        self.checks.push(Check {
            stage,
            label: label.to_string(),
            passed: deviation <= slack,
            observed: observed as f64,
            expected: expected as f64,
            deviation: deviation as f64,
            tolerance: slack as f64,
            mode: ToleranceMode::Absolute,
        });
    }

    /// Add a relative tolerance check: |observed - expected| / |expected| < tolerance.
    ///
    /// A deviation equal to the tolerance fails. For an expected value
    /// within [`crate::tolerances::NEAR_ZERO_EXPECTED`] of zero the absolute
    /// difference is used instead. The pipeline never reaches that branch,
    /// since [`crate::reference::ReferenceNormSet`] rejects such references
    /// on load; it applies only to direct callers.
    pub fn check_rel(&mut self, stage: Stage, label: &str, observed: f64, expected: f64, tolerance: f64) {
        let abs_err = (observed - expected).abs();
        let deviation = if expected.abs() > crate::tolerances::NEAR_ZERO_EXPECTED {
            abs_err / expected.abs()
        } else {
            abs_err
        };
        self.checks.push(Check {
            stage,
            label: label.to_string(),
            // NaN deviation compares false, so a NaN observation fails.
            passed: deviation < tolerance,
            observed,
            expected,
            deviation,
            tolerance,
            mode: ToleranceMode::Relative,
        });
    }

    /// Add a boolean pass/fail check.
    pub fn check_bool(&mut self, stage: Stage, label: &str, passed: bool) {
        self.checks.push(Check {
            stage,
            label: label.to_string(),
            passed,
            observed: f64::from(u8::from(passed)),
            expected: 1.0,
            deviation: f64::from(u8::from(!passed)),
            tolerance: 0.0,
            mode: ToleranceMode::Boolean,
        });
    }

    /// Number of checks that passed.
    #[must_use]
    pub fn passed_count(&self) -> usize {
        self.checks.iter().filter(|c| c.passed).count()
    }

    /// Total number of checks.
    #[must_use]
    pub fn total_count(&self) -> usize {
        self.checks.len()
    }

    /// Whether all checks passed.
    #[must_use]
    pub fn all_passed(&self) -> bool {
        self.checks.iter().all(|c| c.passed)
    }

    /// Checks that failed, in the order they were made.
    pub fn failures(&self) -> impl Iterator<Item = &Check> {
        self.checks.iter().filter(|c| !c.passed)
    }

    /// Check with the given label, if one was recorded.
    #[must_use]
    pub fn find(&self, label: &str) -> Option<&Check> {
        self.checks.iter().find(|c| c.label == label)
    }

    /// Format the validation summary as a string.
    #[must_use]
    pub fn format_summary(&self) -> String {
        let mut s = String::new();
        let _ = writeln!(
            s,
            "═══ {} validation: {}/{} checks passed ═══",
            self.name,
            self.passed_count(),
            self.total_count()
        );
        for check in &self.checks {
            let icon = if check.passed { "✓" } else { "✗" };
            let _ = writeln!(s, "  {icon} {}", check.message());
        }
        s
    }

    /// Print summary and exit with appropriate code.
    ///
    /// Exit 0 if all checks pass, exit 1 if any fails.
    pub fn finish(&self) -> ! {
        println!();
        print!("{}", self.format_summary());
        if self.all_passed() {
            println!("ALL CHECKS PASSED");
            process::exit(0);
        } else {
            let failed: Vec<String> = self
                .failures()
                .map(|c| format!("{}/{}", c.stage, c.label))
                .collect();
            println!("FAILED CHECKS: {}", failed.join(", "));
            process::exit(1);
        }
    }
}
