//! External editor supervision.
//!
//! Runs `$EDITOR` in the foreground on the scratch root and waits for the
//! operator to quit it.

use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};

use crate::error::SessionError;

/// `$EDITOR` split into a program and its leading arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditorCommand {
    program: String,
    args: Vec<String>,
}

impl EditorCommand {
    /// Split a command string on whitespace. `None` when it is blank.
    pub fn parse(command: &str) -> Option<Self> {
        let mut words = command.split_whitespace().map(str::to_string);
        let program = words.next()?;
        Some(Self {
            program,
            args: words.collect(),
        })
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// The command that opens `target`, attached to our terminal.
    pub fn command_for(&self, target: &Path) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .arg(target)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());
        command
    }

    /// Launch the editor on `target`.
    ///
    /// # Errors
    /// Returns [`SessionError::Spawn`] if the program cannot be started.
    pub fn spawn(&self, target: &Path) -> Result<Child, SessionError> {
        tracing::debug!(program = %self.program, args = ?self.args, target = %target.display(), "launching editor");
        self.command_for(target)
            .spawn()
            .map_err(|source| SessionError::Spawn {
                program: self.program.clone(),
                source,
            })
    }

    /// Launch the editor and block until it exits, keeping the child in
    /// `slot` so teardown can still reach it if waiting fails.
    ///
    /// Any exit status is a normal outcome.
    ///
    /// # Errors
    /// Returns an error if the editor cannot be started or waited on.
    pub fn run(&self, target: &Path, slot: &mut Option<Child>) -> Result<ExitStatus, SessionError> {
        let child = slot.insert(self.spawn(target)?);
        let status = child.wait().map_err(SessionError::EditorWait)?;
        tracing::debug!(%status, "editor exited");
        Ok(status)
    }
}
