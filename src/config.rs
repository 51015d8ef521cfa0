// SPDX-License-Identifier: AGPL-3.0-only

//! Harness configuration and case-directory discovery.
//!
//! A [`HarnessConfig`] names the solver collaborators, the case artifacts,
//! and the [`CaseReference`] to check against. The built-in default is the
//! 2D Euler steady-state smoke test; any other solver/case pairing is a JSON
//! file with the same shape, so the pipeline is never duplicated per case.
//!
//! # Case directory discovery
//!
//! 1. Explicit override (tests, `--case-dir=`)
//! 2. `MMS_HARNESS_CASE_DIR` environment variable
//! 3. Current working directory
//!
//! The first candidate holding the case configuration source file wins.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::command::Command;
use crate::error::HarnessError;
use crate::executor::ProcessExecutor;
use crate::parser::MissPolicy;
use crate::pipeline::{CaseStaging, PipelineReport, Sequencer, StagePlan};
use crate::reference::CaseReference;
use crate::tolerances;

/// Environment variable naming the case directory.
pub const CASE_DIR_ENV: &str = "MMS_HARNESS_CASE_DIR";

/// Environment variable naming a JSON config file.
pub const CONFIG_ENV: &str = "MMS_HARNESS_CONFIG";

/// Solver collaborators, by role. Names are configuration, not code.
///
/// Role arguments are appended after any configured ones, so a launcher
/// prefix such as `mpirun -np 4 e4mpi` works unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SolverCommands {
    /// Case-artifact generator, run as given
    pub generator: Command,
    /// Preparation executable; receives `--prep --job=<job>`
    pub prep: Command,
    /// Time-stepping executable; receives `--job=<job>`
    pub run: Command,
    /// Post-processing executable; receives `--job=<job> --post ...`
    pub post: Command,
}

/// Options for the norm-printing post-processing call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostOptions {
    /// Time-index selector (`last`, or an index)
    pub tindx_plot: String,
    /// Reference-solution artifact, relative to the case directory
    pub ref_soln: PathBuf,
    /// Flow variable(s) whose norms are requested
    pub norms: String,
}

/// Complete description of one verification case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarnessConfig {
    /// Solver job identifier
    pub job: String,
    /// Variant case file copied to `case_target` before prepare (optional)
    #[serde(default)]
    pub case_source: Option<PathBuf>,
    /// Name the artifact generator expects
    pub case_target: PathBuf,
    /// External collaborators
    pub commands: SolverCommands,
    /// Post-processing options
    pub post: PostOptions,
    /// Per-command wall-time bound in seconds; 0 disables the bound
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Handling of a missing step or norm line
    #[serde(default)]
    pub miss_policy: MissPolicy,
    /// Expected values and tolerances
    pub reference: CaseReference,
}

const fn default_timeout_secs() -> u64 {
    tolerances::COMMAND_TIMEOUT_SECS
}

impl HarnessConfig {
    /// The 2D Euler manufactured-solution smoke test on the steady-state solver.
    #[must_use]
    pub fn euler_smoke_test() -> Self {
        Self {
            job: "mms".to_string(),
            case_source: Some(PathBuf::from("case-euler.txt")),
            case_target: PathBuf::from("case.txt"),
            commands: SolverCommands {
                generator: Command::new("python3", ["make_lua_files.py"]),
                prep: Command::new("e4shared", Vec::<String>::new()),
                run: Command::new("e4zsss", Vec::<String>::new()),
                post: Command::new("e4shared", Vec::<String>::new()),
            },
            post: PostOptions {
                tindx_plot: "last".to_string(),
                ref_soln: PathBuf::from("ref-soln.lua"),
                norms: "rho".to_string(),
            },
            timeout_secs: default_timeout_secs(),
            miss_policy: MissPolicy::default(),
            reference: CaseReference::euler_smoke_test(),
        }
    }

    /// Load a config from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::ConfigLoad`] if the file cannot be read, is not
    /// valid JSON for this shape, or fails [`HarnessConfig::validate`].
    pub fn load(path: &Path) -> Result<Self, HarnessError> {
        let file = std::fs::File::open(path)
            .map_err(|e| HarnessError::ConfigLoad(format!("{}: {e}", path.display())))?;
        let config: Self = serde_json::from_reader(std::io::BufReader::new(file))
            .map_err(|e| HarnessError::ConfigLoad(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Config from `--config=PATH`, else `MMS_HARNESS_CONFIG`, else the Euler default.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::ConfigLoad`] if a named config file fails to load.
    pub fn from_args_or_env(args: &[String]) -> Result<Self, HarnessError> {
        let named = parse_cli_value(args, "--config")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from));
        match named {
            Some(path) => {
                println!("  Config: {}", path.display());
                Self::load(&path)
            }
            None => Ok(Self::euler_smoke_test()),
        }
    }

    /// Reject configs the pipeline cannot run meaningfully.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::ConfigLoad`] naming the offending field.
    pub fn validate(&self) -> Result<(), HarnessError> {
        if self.job.trim().is_empty() {
            return Err(HarnessError::ConfigLoad("job must not be empty".into()));
        }
        for (role, program) in [
            ("generator", self.commands.generator.program.as_str()),
            ("prep", self.commands.prep.program.as_str()),
            ("run", self.commands.run.program.as_str()),
            ("post", self.commands.post.program.as_str()),
        ] {
            if program.trim().is_empty() {
                return Err(HarnessError::ConfigLoad(format!(
                    "{role} command has no program"
                )));
            }
        }
        self.reference.validate()
    }

    /// Per-command timeout, `None` when disabled.
    #[must_use]
    pub const fn timeout(&self) -> Option<Duration> {
        if self.timeout_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.timeout_secs))
        }
    }

    /// Concrete stage commands, with artifact paths resolved under `case_dir`.
    #[must_use]
    pub fn stage_plan(&self, case_dir: &Path) -> StagePlan {
        let job = format!("--job={}", self.job);
        let staging = self.case_source.as_ref().map(|source| CaseStaging {
            source: case_dir.join(source),
            target: case_dir.join(&self.case_target),
        });
        let prep = self.commands.prep.clone().arg("--prep").arg(job.as_str());
        let run = self.commands.run.clone().arg(job.as_str());
        let validate = self
            .commands
            .post
            .clone()
            .arg(job.as_str())
            .arg("--post")
            .arg(format!("--tindx-plot={}", self.post.tindx_plot))
            .arg(format!("--ref-soln={}", self.post.ref_soln.display()))
            .arg(format!("--norms={}", self.post.norms));
        StagePlan {
            staging,
            prepare: vec![self.commands.generator.clone(), prep],
            run,
            validate,
        }
    }

    /// Run the whole pipeline in `case_dir` with real processes.
    pub fn run_in(&self, case_dir: &Path) -> PipelineReport {
        let plan = self.stage_plan(case_dir);
        let executor = ProcessExecutor::new(Some(case_dir.to_path_buf()), self.timeout());
        Sequencer::new(executor, &plan, &self.reference)
            .with_miss_policy(self.miss_policy)
            .run()
    }

    /// File whose presence marks a usable case directory.
    #[must_use]
    pub fn case_marker(&self) -> &Path {
        self.case_source.as_deref().unwrap_or(self.case_target.as_path())
    }
}

/// Find the case directory, checking override, environment, then CWD.
///
/// # Errors
///
/// Returns [`HarnessError::ConfigLoad`] if no candidate contains `marker`.
pub fn discover_case_dir(override_dir: Option<&Path>, marker: &Path) -> Result<PathBuf, HarnessError> {
    let env_dir = std::env::var_os(CASE_DIR_ENV).map(PathBuf::from);
    let cwd = std::env::current_dir().ok();
    let candidates = override_dir
        .map(Path::to_path_buf)
        .into_iter()
        .chain(env_dir)
        .chain(cwd);
    for dir in candidates {
        if dir.join(marker).is_file() {
            return Ok(dir);
        }
    }
    Err(HarnessError::ConfigLoad(format!(
        "no case directory containing {} (set {CASE_DIR_ENV})",
        marker.display()
    )))
}

/// Parse `--key=value` from CLI args.
#[must_use]
pub fn parse_cli_value(args: &[String], key: &str) -> Option<String> {
    let prefix = format!("{key}=");
    args.iter()
        .find_map(|a| a.strip_prefix(&prefix))
        .map(str::to_string)
}
