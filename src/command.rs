// SPDX-License-Identifier: AGPL-3.0-only

//! External command description.

use std::fmt;

use serde::{Deserialize, Serialize};

/// An executable plus its ordered arguments.
///
/// Immutable once built; each stage constructs its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    /// Executable name, resolved against `PATH` by the executor
    pub program: String,
    /// Arguments, passed verbatim (no shell interpretation)
    #[serde(default)]
    pub args: Vec<String>,
}

impl Command {
    /// Build a command from a program and argument list.
    pub fn new<I, S>(program: &str, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.to_string(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Split a whitespace-separated command line into program and arguments.
    ///
    /// No quoting rules: `--norms="rho"` stays one argument, quotes included.
    /// Returns `None` for a blank line.
    ///
    /// ```
    /// use mms_harness::command::Command;
    ///
    /// let cmd = Command::from_line("e4shared --prep --job=mms").unwrap();
    /// assert_eq!(cmd.program, "e4shared");
    /// assert_eq!(cmd.args, ["--prep", "--job=mms"]);
    /// ```
    #[must_use]
    pub fn from_line(line: &str) -> Option<Self> {
        let mut fields = line.split_whitespace();
        let program = fields.next()?;
        Some(Self::new(program, fields))
    }

    /// Append one argument, returning the extended command.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}
