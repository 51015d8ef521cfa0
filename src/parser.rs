// SPDX-License-Identifier: AGPL-3.0-only

//! Output parser: pull numeric signals out of free-form solver text.
//!
//! The solver prints human-readable diagnostics, not a schema, so both
//! extractors are line-oriented token scans:
//!
//! | Signal | Line selector | Field | Multiple matches |
//! |--------|---------------|-------|------------------|
//! | Step count | contains `STEP=` | token after the marker | last wins |
//! | Norm table | contains `Linf` | fields 2, 4, 6 (1-indexed) | first wins, scan stops |
//!
//! Both return `None` when no line matches. Whether that is fatal is decided
//! by the caller through [`MissPolicy`].
//!
//! Norm lines come in two shapes: `L1= a L2= b Linf= c` (six fields) and
//! `L1 = a  L2 = b  Linf = c` (nine fields). A free-standing `=` is folded
//! into the label before it, so both shapes present the same six fields.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::HarnessError;
use crate::pipeline::Stage;

/// Marker token on step-report lines of the time-stepping executable.
pub const STEP_MARKER: &str = "STEP=";

/// Token identifying the norm table line of the post-processor.
pub const NORM_LINE_TOKEN: &str = "Linf";

/// One of the error norms printed by the post-processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Norm {
    /// Mean absolute error
    L1,
    /// Root-mean-square error
    L2,
    /// Maximum absolute error
    Linf,
}

impl Norm {
    /// All norms in print order.
    pub const ALL: [Self; 3] = [Self::L1, Self::L2, Self::Linf];

    /// Zero-based field index of this norm's value on the normalized line.
    #[must_use]
    pub const fn field_index(self) -> usize {
        match self {
            Self::L1 => 1,
            Self::L2 => 3,
            Self::Linf => 5,
        }
    }

    /// Metric label as printed by the solver.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::L1 => "L1",
            Self::L2 => "L2",
            Self::Linf => "Linf",
        }
    }
}

impl fmt::Display for Norm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Parsed error norms keyed by metric. Keys are unique; order is irrelevant.
pub type NormSet = BTreeMap<Norm, f64>;

/// What to do when a signal is not found in the output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissPolicy {
    /// Fail the stage with [`HarnessError::ParseMiss`].
    #[default]
    Fail,
    /// Substitute zero and carry on. The subsequent comparison then judges
    /// the zero, which may pass silently if the reference is also near zero.
    DefaultZero,
}

impl MissPolicy {
    /// Resolve a step-count parse under this policy.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::ParseMiss`] when `parsed` is `None` and the
    /// policy is [`MissPolicy::Fail`].
    pub fn steps(self, parsed: Option<u64>, stage: Stage) -> Result<u64, HarnessError> {
        match (parsed, self) {
            (Some(steps), _) => Ok(steps),
            (None, Self::DefaultZero) => {
                eprintln!("  WARNING: no {STEP_MARKER} line in {stage} output, using 0 steps");
                Ok(0)
            }
            (None, Self::Fail) => Err(HarnessError::ParseMiss {
                stage,
                signal: "step count",
            }),
        }
    }

    /// Resolve a norm-table parse under this policy.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::ParseMiss`] when `parsed` is `None` and the
    /// policy is [`MissPolicy::Fail`].
    pub fn norms(self, parsed: Option<NormSet>, stage: Stage) -> Result<NormSet, HarnessError> {
        match (parsed, self) {
            (Some(norms), _) => Ok(norms),
            (None, Self::DefaultZero) => {
                eprintln!("  WARNING: no {NORM_LINE_TOKEN} line in {stage} output, using zero norms");
                Ok(Norm::ALL.iter().map(|&n| (n, 0.0)).collect())
            }
            (None, Self::Fail) => Err(HarnessError::ParseMiss {
                stage,
                signal: "norm table",
            }),
        }
    }
}

/// Extract the step count from time-stepping output.
///
/// Every line containing [`STEP_MARKER`] yields a candidate: the text glued
/// to the marker (`STEP=113`) or else the next whitespace-delimited field
/// (`STEP= 113`). Later candidates overwrite earlier ones, so the last
/// step report in the stream wins. Lines whose candidate is not a
/// non-negative integer are ignored.
///
/// ```
/// use mms_harness::parser::parse_step_count;
///
/// let out = "STEP= 10 dt= 1e-3\nSTEP= 113 dt= 1e-3\nDone.\n";
/// assert_eq!(parse_step_count(out), Some(113));
/// assert_eq!(parse_step_count("no steps here"), None);
/// ```
#[must_use]
pub fn parse_step_count(stdout: &str) -> Option<u64> {
    let mut steps = None;
    for line in stdout.lines().filter(|l| l.contains(STEP_MARKER)) {
        if let Some(value) = step_field(line).and_then(|f| f.parse::<u64>().ok()) {
            steps = Some(value);
        }
    }
    steps
}

fn step_field(line: &str) -> Option<&str> {
    let mut fields = line.split_whitespace();
    while let Some(field) = fields.next() {
        if let Some(pos) = field.find(STEP_MARKER) {
            let glued = &field[pos + STEP_MARKER.len()..];
            return if glued.is_empty() {
                fields.next()
            } else {
                Some(glued)
            };
        }
    }
    None
}

/// Extract L1/L2/Linf from post-processor output.
///
/// Only the first line containing [`NORM_LINE_TOKEN`] is read; scanning
/// stops there. A value field that is absent or not a float leaves that
/// norm out of the returned set, so the comparison step reports it as
/// missing instead of comparing a fabricated zero.
///
/// ```
/// use mms_harness::parser::{parse_norms, Norm};
///
/// let out = "L1= 1.0e-03 L2= 2.0e-03 Linf= 6.0e-03\n";
/// let norms = parse_norms(out).unwrap();
/// assert_eq!(norms[&Norm::L2], 2.0e-03);
/// ```
#[must_use]
pub fn parse_norms(stdout: &str) -> Option<NormSet> {
    let line = stdout.lines().find(|l| l.contains(NORM_LINE_TOKEN))?;
    let fields = normalized_fields(line);
    Some(
        Norm::ALL
            .iter()
            .filter_map(|&norm| {
                fields
                    .get(norm.field_index())
                    .and_then(|f| f.parse::<f64>().ok())
                    .map(|v| (norm, v))
            })
            .collect(),
    )
}

/// Whitespace fields with free-standing `=` folded into the previous field.
fn normalized_fields(line: &str) -> Vec<String> {
    let mut fields: Vec<String> = Vec::new();
    for field in line.split_whitespace() {
        if field == "=" {
            if let Some(prev) = fields.last_mut() {
                prev.push('=');
                continue;
            }
        }
        fields.push(field.to_string());
    }
    fields
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;

    const SPACED_NORM_LINE: &str = "L1 = 1.730145442812708149e-03  L2 = 2.436181746051479212e-03  Linf = 6.587021426123662593e-03";

    #[test]
    fn step_last_match_wins() {
        let out = "Starting\nSTEP= 5 pseudo-time= 0.1\nSTEP= 60 pseudo-time= 0.5\nSTEP= 113 pseudo-time= 1.0\n";
        assert_eq!(parse_step_count(out), Some(113));
    }

    #[test]
    fn step_later_smaller_value_still_wins() {
        let out = "STEP= 200\nSTEP= 3\n";
        assert_eq!(parse_step_count(out), Some(3));
    }

    #[test]
    fn step_glued_marker() {
        assert_eq!(parse_step_count("STEP=42 residual=1e-9"), Some(42));
    }

    #[test]
    fn step_marker_mid_line() {
        assert_eq!(parse_step_count("  [e4zsss] STEP= 17 cfl= 2.0"), Some(17));
    }

    #[test]
    fn step_unparseable_candidate_keeps_previous() {
        let out = "STEP= 113\nSTEP= ???\n";
        assert_eq!(parse_step_count(out), Some(113));
    }

    #[test]
    fn step_no_marker_is_none() {
        assert_eq!(parse_step_count("Step 113 done\nsteps= 5"), None);
        assert_eq!(parse_step_count(""), None);
    }

    #[test]
    fn step_marker_at_end_of_line_is_ignored() {
        assert_eq!(parse_step_count("STEP="), None);
    }

    #[test]
    fn norms_spaced_equals_line() {
        let norms = parse_norms(SPACED_NORM_LINE).unwrap();
        assert_eq!(norms.len(), 3);
        assert_eq!(norms[&Norm::L1], 1.730_145_442_812_708_149e-03);
        assert_eq!(norms[&Norm::L2], 2.436_181_746_051_479_212e-03);
        assert_eq!(norms[&Norm::Linf], 6.587_021_426_123_662_593e-03);
    }

    #[test]
    fn norms_six_field_line() {
        let norms = parse_norms("L1= 1.5 L2= 2.5 Linf= 3.5").unwrap();
        assert_eq!(norms[&Norm::L1], 1.5);
        assert_eq!(norms[&Norm::L2], 2.5);
        assert_eq!(norms[&Norm::Linf], 3.5);
    }

    #[test]
    fn norms_first_match_wins() {
        let out = "header\nL1= 1.0 L2= 2.0 Linf= 3.0\nL1= 9.0 L2= 9.0 Linf= 9.0\n";
        let norms = parse_norms(out).unwrap();
        assert_eq!(norms[&Norm::L1], 1.0);
        assert_eq!(norms[&Norm::Linf], 3.0);
    }

    #[test]
    fn norms_no_line_is_none() {
        assert!(parse_norms("L1= 1.0 L2= 2.0\nDone.").is_none());
    }

    #[test]
    fn norms_truncated_line_omits_missing_fields() {
        let norms = parse_norms("L1= 1.0 L2= 2.0 Linf=").unwrap();
        assert_eq!(norms.len(), 2);
        assert!(!norms.contains_key(&Norm::Linf));
    }

    #[test]
    fn norms_non_numeric_field_omitted() {
        let norms = parse_norms("L1= nope L2= 2.0 Linf= 3.0").unwrap();
        assert!(!norms.contains_key(&Norm::L1));
        assert_eq!(norms.len(), 2);
    }

    #[test]
    fn miss_policy_fail_reports_stage() {
        let err = MissPolicy::Fail.steps(None, Stage::Run).unwrap_err();
        assert_eq!(
            err,
            HarnessError::ParseMiss {
                stage: Stage::Run,
                signal: "step count"
            }
        );
    }

    #[test]
    fn miss_policy_default_zero_substitutes_zeros() {
        assert_eq!(MissPolicy::DefaultZero.steps(None, Stage::Run).unwrap(), 0);
        let norms = MissPolicy::DefaultZero.norms(None, Stage::Validate).unwrap();
        assert_eq!(norms.len(), 3);
        assert!(norms.values().all(|&v| v == 0.0));
    }

    #[test]
    fn miss_policy_passes_found_values_through() {
        assert_eq!(MissPolicy::Fail.steps(Some(113), Stage::Run).unwrap(), 113);
    }

    #[test]
    fn norm_serde_uses_solver_labels() {
        assert_eq!(serde_json::to_string(&Norm::Linf).unwrap(), "\"Linf\"");
        let n: Norm = serde_json::from_str("\"L2\"").unwrap();
        assert_eq!(n, Norm::L2);
    }
}
