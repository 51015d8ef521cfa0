// SPDX-License-Identifier: AGPL-3.0-only

//! Typed errors for the verification pipeline.
//!
//! Every variant carries the stage (and, where relevant, the metric) that
//! failed, so a red test run always says *where* it went wrong rather than
//! just "failed".

use std::fmt;

use crate::pipeline::Stage;

/// Errors arising from stage execution, output parsing, or comparison.
#[derive(Debug, Clone, PartialEq)]
pub enum HarnessError {
    /// The external command could not be started at all.
    StageLaunch {
        /// Stage that owned the command
        stage: Stage,
        /// Rendered command line
        command: String,
        /// OS-level launch error
        reason: String,
    },

    /// The external command ran but reported failure through its exit status.
    StageFailed {
        /// Stage that owned the command
        stage: Stage,
        /// Rendered command line
        command: String,
        /// Exit code, `None` when terminated by a signal
        exit_code: Option<i32>,
        /// Last few lines of stderr for context
        stderr_tail: String,
    },

    /// The external command started, but waiting for it to exit failed.
    StageWait {
        /// Stage that owned the command
        stage: Stage,
        /// Rendered command line
        command: String,
        /// OS-level wait error
        reason: String,
    },

    /// The external command exceeded the configured wait and was killed.
    Timeout {
        /// Stage that owned the command
        stage: Stage,
        /// Rendered command line
        command: String,
        /// Wall time in seconds at which the process was killed
        secs: f64,
    },

    /// No line matching the expected pattern was found in stdout.
    ParseMiss {
        /// Stage whose output was scanned
        stage: Stage,
        /// What was being looked for (`"step count"`, `"norm table"`)
        signal: &'static str,
    },

    /// A reference metric has no counterpart in the parsed norm set.
    MissingNorm {
        /// Metric name (`L1`, `L2`, `Linf`)
        metric: String,
    },

    /// An extracted value deviates from its reference by more than allowed.
    ToleranceViolation {
        /// Stage that produced the value
        stage: Stage,
        /// Metric label
        metric: String,
        /// Observed / expected / deviation summary
        detail: String,
    },

    /// Staging the case configuration file failed.
    ArtifactCopy(String),

    /// Loading or validating harness configuration failed.
    ConfigLoad(String),
}

impl HarnessError {
    /// The stage this error is attributed to, if any.
    #[must_use]
    pub const fn stage(&self) -> Option<Stage> {
        match self {
            Self::StageLaunch { stage, .. }
            | Self::StageFailed { stage, .. }
            | Self::StageWait { stage, .. }
            | Self::Timeout { stage, .. }
            | Self::ParseMiss { stage, .. }
            | Self::ToleranceViolation { stage, .. } => Some(*stage),
            Self::MissingNorm { .. } => Some(Stage::Validate),
            Self::ArtifactCopy(_) => Some(Stage::Prepare),
            Self::ConfigLoad(_) => None,
        }
    }
}

impl fmt::Display for HarnessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StageLaunch {
                stage,
                command,
                reason,
            } => write!(f, "[{stage}] could not launch `{command}`: {reason}"),
            Self::StageFailed {
                stage,
                command,
                exit_code,
                stderr_tail,
            } => {
                match exit_code {
                    Some(code) => write!(f, "[{stage}] `{command}` exited with status {code}")?,
                    None => write!(f, "[{stage}] `{command}` terminated by signal")?,
                }
                if !stderr_tail.is_empty() {
                    write!(f, "; stderr: {stderr_tail}")?;
                }
                Ok(())
            }
            Self::Timeout {
                stage,
                command,
                secs,
            } => write!(f, "[{stage}] `{command}` killed at timeout after {secs:.1}s"),
            Self::StageWait {
                stage,
                command,
                reason,
            } => write!(f, "[{stage}] lost track of `{command}` while waiting: {reason}"),
            Self::ParseMiss { stage, signal } => {
                write!(f, "[{stage}] no {signal} found in solver output")
            }
            Self::MissingNorm { metric } => {
                write!(f, "[validate] norm {metric} missing from solver output")
            }
            Self::ToleranceViolation {
                stage,
                metric,
                detail,
            } => write!(f, "[{stage}] {metric} out of tolerance: {detail}"),
            Self::ArtifactCopy(msg) => write!(f, "[prepare] case staging failed: {msg}"),
            Self::ConfigLoad(msg) => write!(f, "Configuration loading failed: {msg}"),
        }
    }
}

impl std::error::Error for HarnessError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_stage_failed_with_code() {
        let err = HarnessError::StageFailed {
            stage: Stage::Run,
            command: "e4zsss --job=mms".into(),
            exit_code: Some(2),
            stderr_tail: String::new(),
        };
        assert_eq!(
            err.to_string(),
            "[run] `e4zsss --job=mms` exited with status 2"
        );
    }

    #[test]
    fn display_stage_failed_includes_stderr() {
        let err = HarnessError::StageFailed {
            stage: Stage::Prepare,
            command: "python3 make_lua_files.py".into(),
            exit_code: None,
            stderr_tail: "Traceback".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("signal"));
        assert!(msg.contains("Traceback"));
    }

    #[test]
    fn display_tolerance_violation_names_metric() {
        let err = HarnessError::ToleranceViolation {
            stage: Stage::Validate,
            metric: "Linf".into(),
            detail: "rel dev 1.5e-1".into(),
        };
        assert!(err.to_string().contains("Linf"));
        assert!(err.to_string().starts_with("[validate]"));
    }

    #[test]
    fn stage_attribution() {
        assert_eq!(
            HarnessError::MissingNorm {
                metric: "L2".into()
            }
            .stage(),
            Some(Stage::Validate)
        );
        assert_eq!(
            HarnessError::ArtifactCopy("x".into()).stage(),
            Some(Stage::Prepare)
        );
        assert_eq!(HarnessError::ConfigLoad("x".into()).stage(), None);
    }

    #[test]
    fn wait_failure_names_reason_not_signal() {
        let err = HarnessError::StageWait {
            stage: Stage::Run,
            command: "e4zsss --job=mms".into(),
            reason: "Interrupted system call".into(),
        };
        let msg = err.to_string();
        assert!(msg.starts_with("[run]"));
        assert!(msg.contains("Interrupted system call"));
        assert!(!msg.contains("signal"));
        assert_eq!(err.stage(), Some(Stage::Run));
    }

    #[test]
    fn error_trait_works() {
        let err = HarnessError::Timeout {
            stage: Stage::Run,
            command: "e4zsss".into(),
            secs: 5.0,
        };
        let dyn_err: &dyn std::error::Error = &err;
        assert!(dyn_err.to_string().contains("5.0s"));
    }
}
