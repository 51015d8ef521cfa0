// SPDX-License-Identifier: AGPL-3.0-only

//! Stage sequencer: Prepare → Run → Validate, fail-fast.
//!
//! The pipeline is an explicit state machine:
//!
//! ```text
//! NotStarted → Preparing → Running → Validating → Passed
//!                  │           │           │
//!                  └───────────┴───────────┴──→ Failed (terminal)
//! ```
//!
//! Each stage runs only if the previous one succeeded. A failed command
//! moves straight to `Failed` before any of its output is parsed, and no
//! later stage's commands are ever issued. There are no retries.
//!
//! | Stage | Commands | Check |
//! |-------|----------|-------|
//! | Prepare | stage-in copy, artifact generator, solver prep | every exit status |
//! | Run | time-stepping executable | `|steps − expected| ≤ slack` |
//! | Validate | post-processor | per-norm relative deviation `< tol` |

use std::fmt;
use std::path::PathBuf;
use std::process;
use std::time::Instant;

use serde::Serialize;

use crate::command::Command;
use crate::error::HarnessError;
use crate::executor::{Executor, StageResult};
use crate::parser::{self, MissPolicy, NormSet};
use crate::reference::CaseReference;
use crate::validation::ValidationHarness;

/// Lines of stdout echoed when a command fails.
const FAILURE_CONTEXT_LINES: usize = 5;

/// One phase of the verification pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Stage in the case file and build solver inputs
    Prepare,
    /// Time-step the solver to convergence
    Run,
    /// Post-process and compare error norms
    Validate,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Prepare => "prepare",
            Self::Run => "run",
            Self::Validate => "validate",
        })
    }
}

/// Pipeline state. `Passed` and `Failed` are terminal.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineState {
    /// Nothing has run yet
    NotStarted,
    /// Prepare stage in progress
    Preparing,
    /// Run stage in progress
    Running,
    /// Validate stage in progress
    Validating,
    /// Every stage and every check passed
    Passed,
    /// A stage failed; later stages were not executed
    Failed {
        /// Stage that failed
        stage: Stage,
        /// First error that stopped the pipeline
        error: HarnessError,
    },
}

impl PipelineState {
    /// The successor on the success path, or `None` from a terminal state.
    #[must_use]
    pub const fn next(&self) -> Option<Self> {
        match self {
            Self::NotStarted => Some(Self::Preparing),
            Self::Preparing => Some(Self::Running),
            Self::Running => Some(Self::Validating),
            Self::Validating => Some(Self::Passed),
            Self::Passed | Self::Failed { .. } => None,
        }
    }

    /// The stage executing in this state.
    #[must_use]
    pub const fn stage(&self) -> Option<Stage> {
        match self {
            Self::Preparing => Some(Stage::Prepare),
            Self::Running => Some(Stage::Run),
            Self::Validating => Some(Stage::Validate),
            Self::NotStarted | Self::Passed | Self::Failed { .. } => None,
        }
    }

    /// True for `Passed` and `Failed`.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Passed | Self::Failed { .. })
    }

    /// Short name for reports.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::Preparing => "preparing",
            Self::Running => "running",
            Self::Validating => "validating",
            Self::Passed => "passed",
            Self::Failed { .. } => "failed",
        }
    }
}

/// Copy of the case configuration into the solver's expected location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaseStaging {
    /// Variant-specific case file (e.g. `case-euler.txt`)
    pub source: PathBuf,
    /// Name the artifact generator reads (e.g. `case.txt`)
    pub target: PathBuf,
}

impl CaseStaging {
    fn apply(&self) -> Result<(), HarnessError> {
        std::fs::copy(&self.source, &self.target)
            .map(|_| ())
            .map_err(|e| {
                HarnessError::ArtifactCopy(format!(
                    "{} → {}: {e}",
                    self.source.display(),
                    self.target.display()
                ))
            })
    }
}

/// The concrete commands for each stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagePlan {
    /// Case file copy done before any prepare command
    pub staging: Option<CaseStaging>,
    /// Prepare commands in order (artifact generator, then solver prep)
    pub prepare: Vec<Command>,
    /// Time-stepping command
    pub run: Command,
    /// Post-processing command that prints the norm table
    pub validate: Command,
}

/// Timeline entry for one executed command.
#[derive(Debug, Clone, Serialize)]
pub struct StepRecord {
    /// Owning stage
    pub stage: Stage,
    /// Rendered command line
    pub command: String,
    /// Exit-status success
    pub success: bool,
    /// Exit code if any
    pub exit_code: Option<i32>,
    /// Killed at the deadline
    pub timed_out: bool,
    /// Wall time in seconds
    pub elapsed_s: f64,
}

/// Final outcome of one pipeline run.
#[derive(Debug)]
pub struct PipelineReport {
    /// Terminal state
    pub state: PipelineState,
    /// Every check made, in order
    pub harness: ValidationHarness,
    /// Every command issued, in order
    pub timeline: Vec<StepRecord>,
    /// Step count used for the Run check, if it got that far
    pub steps: Option<u64>,
    /// Norms used for the Validate checks, if it got that far
    pub norms: Option<NormSet>,
    /// Total wall time in seconds
    pub elapsed_s: f64,
}

impl PipelineReport {
    /// True only in the `Passed` state.
    #[must_use]
    pub fn passed(&self) -> bool {
        self.state == PipelineState::Passed
    }

    /// Stage that failed, if any.
    #[must_use]
    pub const fn failed_stage(&self) -> Option<Stage> {
        match &self.state {
            PipelineState::Failed { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// Error that stopped the pipeline, if any.
    #[must_use]
    pub const fn error(&self) -> Option<&HarnessError> {
        match &self.state {
            PipelineState::Failed { error, .. } => Some(error),
            _ => None,
        }
    }

    /// True if any issued command belongs to `stage`.
    #[must_use]
    pub fn stage_executed(&self, stage: Stage) -> bool {
        self.timeline.iter().any(|r| r.stage == stage)
    }

    /// Print the check summary and exit: 0 only if the pipeline passed.
    pub fn finish(&self) -> ! {
        if self.passed() {
            self.harness.finish();
        }
        println!();
        print!("{}", self.harness.format_summary());
        match self.error() {
            Some(error) => println!("STOPPED: {error}"),
            None => println!("STOPPED: pipeline did not reach a verdict"),
        }
        process::exit(1);
    }

    /// Machine-readable summary.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "case": self.harness.name,
            "state": self.state.name(),
            "failed_stage": self.failed_stage(),
            "error": self.error().map(ToString::to_string),
            "steps": self.steps,
            "norms": self.norms,
            "checks": self.harness.checks,
            "timeline": self.timeline,
            "elapsed_s": self.elapsed_s,
        })
    }
}

/// Drives a [`StagePlan`] through the state machine with a given executor.
pub struct Sequencer<'a, E: Executor> {
    executor: E,
    plan: &'a StagePlan,
    reference: &'a CaseReference,
    miss_policy: MissPolicy,
    state: PipelineState,
    harness: ValidationHarness,
    timeline: Vec<StepRecord>,
    steps: Option<u64>,
    norms: Option<NormSet>,
}

impl<'a, E: Executor> Sequencer<'a, E> {
    /// New sequencer in the `NotStarted` state.
    pub fn new(executor: E, plan: &'a StagePlan, reference: &'a CaseReference) -> Self {
        Self {
            executor,
            plan,
            reference,
            miss_policy: MissPolicy::default(),
            state: PipelineState::NotStarted,
            harness: ValidationHarness::new(&reference.name),
            timeline: Vec::new(),
            steps: None,
            norms: None,
        }
    }

    /// Choose how a missing step or norm line is handled.
    #[must_use]
    pub const fn with_miss_policy(mut self, policy: MissPolicy) -> Self {
        self.miss_policy = policy;
        self
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> &PipelineState {
        &self.state
    }

    /// Run all stages until `Passed` or the first failure.
    pub fn run(mut self) -> PipelineReport {
        let started = Instant::now();
        println!("  Case: {}", self.reference.name);
        while let Some(next) = self.state.next() {
            self.state = next;
            let Some(stage) = self.state.stage() else {
                continue;
            };
            if let Err(error) = self.run_stage(stage) {
                // A parse miss fails the stage without a failed check.
                if !self.harness.failures().any(|c| c.stage == stage) {
                    self.harness.check_bool(stage, &unchecked_failure_label(&error), false);
                }
                println!("  FAIL  {error}");
                self.state = PipelineState::Failed { stage, error };
            }
        }
        PipelineReport {
            state: self.state,
            harness: self.harness,
            timeline: self.timeline,
            steps: self.steps,
            norms: self.norms,
            elapsed_s: started.elapsed().as_secs_f64(),
        }
    }

    fn run_stage(&mut self, stage: Stage) -> Result<(), HarnessError> {
        match stage {
            Stage::Prepare => self.prepare(),
            Stage::Run => self.run_solver(),
            Stage::Validate => self.validate(),
        }
    }

    fn prepare(&mut self) -> Result<(), HarnessError> {
        let plan = self.plan;
        if let Some(staging) = &plan.staging {
            let result = staging.apply();
            self.harness
                .check_bool(Stage::Prepare, "case staging", result.is_ok());
            result?;
        }
        for command in &plan.prepare {
            self.execute(Stage::Prepare, command)?;
        }
        Ok(())
    }

    fn run_solver(&mut self) -> Result<(), HarnessError> {
        let plan = self.plan;
        let result = self.execute(Stage::Run, &plan.run)?;
        let steps = self
            .miss_policy
            .steps(parser::parse_step_count(&result.stdout), Stage::Run)?;
        self.steps = Some(steps);

        let tol = &self.reference.tolerance;
        self.harness.check_count(
            Stage::Run,
            "steps",
            steps,
            self.reference.expected_steps,
            tol.step_slack,
        );
        self.first_failure(Stage::Run)
    }

    fn validate(&mut self) -> Result<(), HarnessError> {
        let plan = self.plan;
        let result = self.execute(Stage::Validate, &plan.validate)?;
        let norms = self
            .miss_policy
            .norms(parser::parse_norms(&result.stdout), Stage::Validate)?;

        // Every reference metric is checked before deciding, so one report
        // shows which norms moved and which did not.
        let tol = self.reference.tolerance.norm_relative;
        for (norm, expected) in self.reference.norms.iter() {
            match norms.get(&norm) {
                Some(&observed) => {
                    self.harness
                        .check_rel(Stage::Validate, norm.label(), observed, expected, tol);
                }
                None => self.harness.check_bool(Stage::Validate, norm.label(), false),
            }
        }
        let missing = self.reference.norms.missing_from(&norms);
        self.norms = Some(norms);

        if let Some(norm) = missing.first() {
            return Err(HarnessError::MissingNorm {
                metric: norm.label().to_string(),
            });
        }
        self.first_failure(Stage::Validate)
    }

    /// First failed check recorded for `stage`, as an error.
    fn first_failure(&self, stage: Stage) -> Result<(), HarnessError> {
        match self
            .harness
            .failures()
            .find(|c| c.stage == stage)
            .and_then(crate::validation::Check::to_error)
        {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    /// Run one command, record it, and gate on its exit status.
    ///
    /// Output of a failed command is never handed to the parser.
    fn execute(&mut self, stage: Stage, command: &Command) -> Result<StageResult, HarnessError> {
        let rendered = command.to_string();
        print!("  RUN   {:<9} {rendered:<50} ", stage.to_string());
        let result = self.executor.execute(command);

        self.timeline.push(StepRecord {
            stage,
            command: rendered.clone(),
            success: result.success,
            exit_code: result.exit_code,
            timed_out: result.timed_out,
            elapsed_s: result.elapsed_s,
        });
        self.harness
            .check_bool(stage, &format!("{} exit status", command.program), result.success);

        if let Some(reason) = &result.launch_error {
            println!("ERROR");
            return Err(HarnessError::StageLaunch {
                stage,
                command: rendered,
                reason: reason.clone(),
            });
        }
        if result.timed_out {
            println!("TIMEOUT ({:.1}s)", result.elapsed_s);
            echo_tail(&result.stdout);
            return Err(HarnessError::Timeout {
                stage,
                command: rendered,
                secs: result.elapsed_s,
            });
        }
        if let Some(reason) = &result.wait_error {
            println!("ERROR");
            return Err(HarnessError::StageWait {
                stage,
                command: rendered,
                reason: reason.clone(),
            });
        }
        if !result.success {
            println!("FAIL  ({:.1}s)", result.elapsed_s);
            echo_tail(&result.stdout);
            return Err(HarnessError::StageFailed {
                stage,
                command: rendered,
                exit_code: result.exit_code,
                stderr_tail: StageResult::tail(&result.stderr, FAILURE_CONTEXT_LINES),
            });
        }
        println!("PASS  ({:.1}s)", result.elapsed_s);
        Ok(result)
    }
}

fn echo_tail(stdout: &str) {
    for line in StageResult::tail(stdout, FAILURE_CONTEXT_LINES).lines() {
        println!("        {line}");
    }
}

/// Check label for a stage error that no check recorded.
fn unchecked_failure_label(error: &HarnessError) -> String {
    match error {
        HarnessError::ParseMiss { signal, .. } => format!("{signal} found"),
        other => match other.stage() {
            Some(stage) => format!("{stage} completed"),
            None => "pipeline completed".to_string(),
        },
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Replays canned results and records every command it was asked to run.
    #[derive(Default)]
    struct Scripted {
        results: VecDeque<StageResult>,
        issued: Vec<String>,
    }

    impl Scripted {
        fn new(results: Vec<StageResult>) -> Self {
            Self {
                results: results.into(),
                issued: Vec::new(),
            }
        }
    }

    impl Executor for Scripted {
        fn execute(&mut self, command: &Command) -> StageResult {
            self.issued.push(command.program.clone());
            self.results
                .pop_front()
                .unwrap_or_else(|| StageResult::not_launched("script exhausted"))
        }
    }

    fn plan() -> StagePlan {
        StagePlan {
            staging: None,
            prepare: vec![
                Command::new("gen", Vec::<String>::new()),
                Command::new("prep", ["--job=mms"]),
            ],
            run: Command::new("solve", ["--job=mms"]),
            validate: Command::new("post", ["--job=mms"]),
        }
    }

    const GOOD_NORMS: &str = "L1 = 1.730145442812708149e-03  L2 = 2.436181746051479212e-03  Linf = 6.587021426123662593e-03\n";

    #[test]
    fn state_machine_success_path() {
        let mut s = PipelineState::NotStarted;
        let mut seen = vec![];
        while let Some(n) = s.next() {
            seen.push(n.name());
            s = n;
        }
        assert_eq!(seen, ["preparing", "running", "validating", "passed"]);
        assert!(s.is_terminal());
    }

    #[test]
    fn failed_state_is_terminal() {
        let s = PipelineState::Failed {
            stage: Stage::Run,
            error: HarnessError::ConfigLoad("x".into()),
        };
        assert!(s.next().is_none());
        assert!(s.stage().is_none());
        assert!(s.is_terminal());
    }

    #[test]
    fn all_stages_pass() {
        let reference = CaseReference::euler_smoke_test();
        let plan = plan();
        let mut exec = Scripted::new(vec![
            StageResult::ok(""),
            StageResult::ok(""),
            StageResult::ok("STEP= 50\nSTEP= 113  dt= 1.0\n"),
            StageResult::ok(GOOD_NORMS),
        ]);
        let report = Sequencer::new(&mut exec, &plan, &reference).run();
        assert!(report.passed(), "{:?}", report.error());
        assert_eq!(report.steps, Some(113));
        assert_eq!(exec.issued, ["gen", "prep", "solve", "post"]);
    }

    #[test]
    fn first_prepare_failure_halts_everything() {
        let reference = CaseReference::euler_smoke_test();
        let plan = plan();
        let mut exec = Scripted::new(vec![StageResult::failed(1, "boom")]);
        let report = Sequencer::new(&mut exec, &plan, &reference).run();
        assert_eq!(report.failed_stage(), Some(Stage::Prepare));
        assert_eq!(exec.issued, ["gen"]);
        assert!(!report.stage_executed(Stage::Run));
        assert!(!report.stage_executed(Stage::Validate));
    }

    #[test]
    fn failed_run_output_is_not_parsed() {
        let reference = CaseReference::euler_smoke_test();
        let plan = plan();
        let mut failed = StageResult::failed(2, "diverged");
        failed.stdout = "STEP= 113\n".into();
        let mut exec = Scripted::new(vec![StageResult::ok(""), StageResult::ok(""), failed]);
        let report = Sequencer::new(&mut exec, &plan, &reference).run();
        assert_eq!(report.failed_stage(), Some(Stage::Run));
        assert_eq!(report.steps, None);
        assert!(matches!(
            report.error(),
            Some(HarnessError::StageFailed { exit_code: Some(2), .. })
        ));
    }

    #[test]
    fn step_miss_fails_by_default() {
        let reference = CaseReference::euler_smoke_test();
        let plan = plan();
        let mut exec = Scripted::new(vec![
            StageResult::ok(""),
            StageResult::ok(""),
            StageResult::ok("converged\n"),
        ]);
        let report = Sequencer::new(&mut exec, &plan, &reference).run();
        assert!(matches!(
            report.error(),
            Some(HarnessError::ParseMiss { stage: Stage::Run, .. })
        ));
        assert!(!report.harness.all_passed());
        let check = report.harness.find("step count found").expect("parse check");
        assert_eq!(check.stage, Stage::Run);
        assert!(!check.passed);
    }

    #[test]
    fn norm_miss_leaves_a_failed_check() {
        let reference = CaseReference::euler_smoke_test();
        let plan = plan();
        let mut exec = Scripted::new(vec![
            StageResult::ok(""),
            StageResult::ok(""),
            StageResult::ok("STEP= 113\n"),
            StageResult::ok("Post-processing done.\n"),
        ]);
        let report = Sequencer::new(&mut exec, &plan, &reference).run();
        assert_eq!(report.failed_stage(), Some(Stage::Validate));
        let failed: Vec<&str> = report.harness.failures().map(|c| c.label.as_str()).collect();
        assert_eq!(failed, ["norm table found"]);
    }

    #[test]
    fn wait_error_is_not_reported_as_a_signal() {
        let reference = CaseReference::euler_smoke_test();
        let plan = plan();
        let broken = StageResult {
            wait_error: Some("Interrupted system call".into()),
            ..StageResult::default()
        };
        let mut exec = Scripted::new(vec![broken]);
        let report = Sequencer::new(&mut exec, &plan, &reference).run();
        let error = report.error().expect("error").to_string();
        assert!(matches!(report.error(), Some(HarnessError::StageWait { .. })));
        assert!(error.contains("Interrupted system call"));
        assert!(!error.contains("signal"));
        assert!(!report.harness.all_passed());
    }

    #[test]
    fn step_miss_default_zero_then_fails_tolerance() {
        let reference = CaseReference::euler_smoke_test();
        let plan = plan();
        let mut exec = Scripted::new(vec![
            StageResult::ok(""),
            StageResult::ok(""),
            StageResult::ok("converged\n"),
        ]);
        let report = Sequencer::new(&mut exec, &plan, &reference)
            .with_miss_policy(MissPolicy::DefaultZero)
            .run();
        assert_eq!(report.steps, Some(0));
        assert!(matches!(
            report.error(),
            Some(HarnessError::ToleranceViolation { stage: Stage::Run, .. })
        ));
    }

    #[test]
    fn partial_norm_line_reports_missing_metric() {
        let reference = CaseReference::euler_smoke_test();
        let plan = plan();
        let mut exec = Scripted::new(vec![
            StageResult::ok(""),
            StageResult::ok(""),
            StageResult::ok("STEP= 113\n"),
            StageResult::ok("L1= 1.730145442812708149e-03 L2= 2.436181746051479212e-03 Linf=\n"),
        ]);
        let report = Sequencer::new(&mut exec, &plan, &reference).run();
        assert_eq!(
            report.error(),
            Some(&HarnessError::MissingNorm {
                metric: "Linf".into()
            })
        );
        assert!(report.harness.find("L1").unwrap().passed);
    }

    #[test]
    fn report_json_has_state_and_checks() {
        let reference = CaseReference::euler_smoke_test();
        let plan = plan();
        let mut exec = Scripted::new(vec![StageResult::not_launched("No such file")]);
        let report = Sequencer::new(&mut exec, &plan, &reference).run();
        let v = report.to_json();
        assert_eq!(v["state"], "failed");
        assert_eq!(v["failed_stage"], "prepare");
        assert!(v["checks"].as_array().unwrap().len() == 1);
        assert!(v["error"].as_str().unwrap().contains("could not launch"));
    }

    #[test]
    fn new_sequencer_not_started() {
        let reference = CaseReference::euler_smoke_test();
        let plan = plan();
        let seq = Sequencer::new(Scripted::default(), &plan, &reference);
        assert_eq!(seq.state(), &PipelineState::NotStarted);
    }
}
