// SPDX-License-Identifier: AGPL-3.0-only

//! Manufactured-solution regression harness
//!
//! Drives an external flow solver through prepare → run → post-process and
//! checks what it prints against frozen baselines: the pseudo-time step
//! count (absolute slack) and the L1/L2/Linf error norms against the
//! manufactured solution (relative tolerance). The solver is a black box;
//! the harness only sees exit statuses and stdout.
//!
//! ## Modules
//!   - `command` / `executor` — external process invocation with bounded wait
//!   - `parser` — step-count and norm-table extraction from solver text
//!   - `reference` / `provenance` / `tolerances` — expected values and bounds
//!   - `validation` — checks and attributable failure messages
//!   - `pipeline` — the fail-fast stage state machine
//!   - `config` — case configuration (JSON) and case-directory discovery
//!
//! ## Validation binary
//!   - `validate_mms_euler` — 2D Euler MMS smoke test, exit 0 (pass) / 1 (fail)

pub mod command;
pub mod config;
pub mod error;
pub mod executor;
pub mod parser;
pub mod pipeline;
pub mod provenance;
pub mod reference;
pub mod tolerances;
pub mod validation;
