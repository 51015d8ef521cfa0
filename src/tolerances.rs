// SPDX-License-Identifier: AGPL-3.0-only

//! Centralized acceptance tolerances with justification.
//!
//! Every threshold the harness applies is defined here with its origin.
//! No ad-hoc magic numbers in the pipeline.
//!
//! | Check | Mode | Bound | Basis |
//! |-------|------|-------|-------|
//! | Pseudo-time steps | absolute | ±3 steps | Run-to-run drift of the steady-state solver |
//! | L1 / L2 / Linf density error | relative | < 1e-3 | Order-of-accuracy study |
//! | Wall time per command | bound | 1800 s | Smoke-test budget on a workstation |

/// Allowed absolute deviation of the steady-state solver's step count.
///
/// The Newton-Krylov steady-state solver converges in ~113 pseudo-time
/// steps on the smoke-test grid. Compiler flags and BLAS ordering shift the
/// residual history slightly; ±3 steps absorbs that without hiding a real
/// change in convergence behavior.
pub const STEP_COUNT_SLACK: u64 = 3;

/// Relative tolerance on the manufactured-solution error norms.
///
/// Reference norms carry ~16 significant digits, but only the leading three
/// are stable across platforms once the residual tolerance of the solver is
/// reached. 1e-3 accepts floating-point noise and rejects any change in the
/// discretization error.
pub const NORM_RELATIVE_TOLERANCE: f64 = 1.0e-3;

/// Upper bound on a single external command's wall time, in seconds.
///
/// The slowest stage (the steady-state run) finishes in well under a minute
/// on the smoke-test grid. 30 minutes only trips on a hung process.
pub const COMMAND_TIMEOUT_SECS: u64 = 1800;

/// Expected magnitudes below this are compared absolutely, not relatively.
///
/// Relative error is undefined at zero; a reference norm this small would
/// be a baseline authoring mistake, not a real solver accuracy.
pub const NEAR_ZERO_EXPECTED: f64 = 1e-300;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn norm_tolerance_is_a_fraction() {
        assert!(NORM_RELATIVE_TOLERANCE > 0.0 && NORM_RELATIVE_TOLERANCE < 1.0);
    }

    #[test]
    fn step_slack_smaller_than_run_length() {
        assert!(STEP_COUNT_SLACK < crate::provenance::EULER_MMS_STEPS.value);
    }

    #[test]
    fn timeout_is_positive() {
        assert!(COMMAND_TIMEOUT_SECS > 0);
    }
}
