// SPDX-License-Identifier: AGPL-3.0-only

//! Reference table: expected values and tolerance policy for one case.
//!
//! A [`CaseReference`] is built once (from the frozen constants in
//! [`crate::provenance`] or from a JSON config) and passed by shared
//! reference into the sequencer. Nothing in the pipeline mutates it.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use crate::error::HarnessError;
use crate::parser::{Norm, NormSet};
use crate::provenance;
use crate::tolerances;

/// Expected error norms. Non-empty, finite, and bounded away from zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "BTreeMap<Norm, f64>", into = "BTreeMap<Norm, f64>")]
pub struct ReferenceNormSet(BTreeMap<Norm, f64>);

impl ReferenceNormSet {
    /// Expected value for `norm`, if this reference checks it.
    #[must_use]
    pub fn get(&self, norm: Norm) -> Option<f64> {
        self.0.get(&norm).copied()
    }

    /// Iterate `(norm, expected)` pairs in L1, L2, Linf order.
    pub fn iter(&self) -> impl Iterator<Item = (Norm, f64)> + '_ {
        self.0.iter().map(|(&n, &v)| (n, v))
    }

    /// Number of norms checked.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Always false for a constructed set; present for API completeness.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Reference metrics absent from `observed`.
    #[must_use]
    pub fn missing_from(&self, observed: &NormSet) -> Vec<Norm> {
        self.0
            .keys()
            .filter(|n| !observed.contains_key(n))
            .copied()
            .collect()
    }
}

impl TryFrom<BTreeMap<Norm, f64>> for ReferenceNormSet {
    type Error = HarnessError;

    fn try_from(map: BTreeMap<Norm, f64>) -> Result<Self, Self::Error> {
        if map.is_empty() {
            return Err(HarnessError::ConfigLoad(
                "reference norm set is empty".into(),
            ));
        }
        for (norm, &value) in &map {
            if !value.is_finite() || value.abs() <= tolerances::NEAR_ZERO_EXPECTED {
                return Err(HarnessError::ConfigLoad(format!(
                    "reference {norm} = {value} cannot anchor a relative comparison"
                )));
            }
        }
        Ok(Self(map))
    }
}

impl From<ReferenceNormSet> for BTreeMap<Norm, f64> {
    fn from(set: ReferenceNormSet) -> Self {
        set.0
    }
}

/// Tolerance policy: relative bound for norms, absolute slack for steps.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ToleranceSpec {
    /// Dimensionless relative bound; a norm passes when its deviation is strictly below
    pub norm_relative: f64,
    /// Steps may differ from the expected count by at most this many
    pub step_slack: u64,
}

impl Default for ToleranceSpec {
    fn default() -> Self {
        Self {
            norm_relative: tolerances::NORM_RELATIVE_TOLERANCE,
            step_slack: tolerances::STEP_COUNT_SLACK,
        }
    }
}

/// Everything the Validate and Run checks compare against for one case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseReference {
    /// Case label used in reports
    pub name: String,
    /// Expected pseudo-time step count
    pub expected_steps: u64,
    /// Expected error norms
    pub norms: ReferenceNormSet,
    /// Acceptance bounds
    #[serde(default)]
    pub tolerance: ToleranceSpec,
}

impl CaseReference {
    /// Frozen baselines for the 2D Euler steady-state smoke test.
    #[must_use]
    pub fn euler_smoke_test() -> Self {
        let norms = Norm::ALL
            .iter()
            .zip(provenance::EULER_MMS_NORMS.iter())
            .map(|(&n, rec)| (n, rec.value))
            .collect::<BTreeMap<_, _>>();
        Self {
            name: "mms-euler-steady".to_string(),
            expected_steps: provenance::EULER_MMS_STEPS.value,
            // Constants are checked by `provenance` tests.
            norms: ReferenceNormSet(norms),
            tolerance: ToleranceSpec::default(),
        }
    }

    /// Human-readable table of the targets this reference checks.
    #[must_use]
    pub fn format_targets(&self) -> String {
        let mut s = String::new();
        let _ = writeln!(s, "  Reference targets ({}):", self.name);
        let _ = writeln!(
            s,
            "    {:<22} {} ± {}",
            "steps", self.expected_steps, self.tolerance.step_slack
        );
        for (norm, expected) in self.norms.iter() {
            let _ = writeln!(
                s,
                "    {:<22} {expected:.6e} (rel < {:.1e})",
                norm.label(),
                self.tolerance.norm_relative
            );
        }
        s
    }

    /// Check tolerance sanity (norm values are checked on construction).
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::ConfigLoad`] if the relative tolerance is not
    /// a positive finite number.
    pub fn validate(&self) -> Result<(), HarnessError> {
        let tol = self.tolerance.norm_relative;
        if !tol.is_finite() || tol <= 0.0 {
            return Err(HarnessError::ConfigLoad(format!(
                "norm_relative tolerance must be positive, got {tol}"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]
mod tests {
    use super::*;

    #[test]
    fn euler_reference_matches_provenance() {
        let r = CaseReference::euler_smoke_test();
        assert_eq!(r.expected_steps, 113);
        assert_eq!(r.norms.len(), 3);
        assert_eq!(r.norms.get(Norm::L1), Some(1.730_145_442_812_708_149e-03));
        assert_eq!(r.norms.get(Norm::Linf), Some(6.587_021_426_123_662_593e-03));
        assert_eq!(r.tolerance.step_slack, 3);
        assert_eq!(r.tolerance.norm_relative, 1.0e-3);
        r.validate().unwrap();
    }

    #[test]
    fn reference_from_json() {
        let json = r#"{
            "name": "coarse",
            "expected_steps": 50,
            "norms": {"L1": 0.01, "Linf": 0.05}
        }"#;
        let r: CaseReference = serde_json::from_str(json).expect("parse");
        assert_eq!(r.norms.len(), 2);
        assert_eq!(r.norms.get(Norm::L2), None);
        assert_eq!(r.tolerance, ToleranceSpec::default());
    }

    #[test]
    fn targets_table_shows_loaded_values() {
        let json = r#"{
            "name": "coarse",
            "expected_steps": 50,
            "norms": {"L1": 0.01, "Linf": 0.05},
            "tolerance": {"norm_relative": 0.01, "step_slack": 2}
        }"#;
        let r: CaseReference = serde_json::from_str(json).expect("parse");
        let table = r.format_targets();
        assert!(table.contains("coarse"));
        assert!(table.contains("50 ± 2"));
        assert!(table.contains("5.000000e-2"));
        assert!(!table.contains("L2"));
        assert!(!table.contains("6.587"));
    }

    #[test]
    fn zero_reference_rejected() {
        let json = r#"{"name": "bad", "expected_steps": 1, "norms": {"L1": 0.0}}"#;
        let err = serde_json::from_str::<CaseReference>(json).unwrap_err();
        assert!(err.to_string().contains("L1"));
    }

    #[test]
    fn empty_reference_rejected() {
        let map = BTreeMap::new();
        assert!(ReferenceNormSet::try_from(map).is_err());
    }

    #[test]
    fn missing_from_lists_absent_metrics() {
        let r = CaseReference::euler_smoke_test();
        let mut observed = NormSet::new();
        observed.insert(Norm::L1, 1.0);
        assert_eq!(r.norms.missing_from(&observed), vec![Norm::L2, Norm::Linf]);
    }

    #[test]
    fn nonpositive_tolerance_rejected() {
        let mut r = CaseReference::euler_smoke_test();
        r.tolerance.norm_relative = 0.0;
        assert!(r.validate().is_err());
        r.tolerance.norm_relative = f64::NAN;
        assert!(r.validate().is_err());
    }

    #[test]
    fn serializes_round_trip_shape() {
        let r = CaseReference::euler_smoke_test();
        let v = serde_json::to_value(&r).unwrap();
        assert!(v["norms"]["Linf"].is_f64());
        assert_eq!(v["tolerance"]["step_slack"], 3);
    }
}
