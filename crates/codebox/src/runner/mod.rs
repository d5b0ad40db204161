//! Code runner for codebox
//!
//! Runs a source snippet in an open session: installs libraries, places the
//! code in the container, compiles it if the language needs it, and runs it.

use tracing::{debug, instrument};

use crate::session::{Session, SessionError};
use crate::types::{ConsoleOutput, Stage};

mod compile;
mod execute;
mod install;

impl Session {
    /// Run source code with optional libraries
    ///
    /// Steps, in order: install `libraries` (if any), write the code to
    /// `code.<ext>` in the language working directory, compile it (compiled
    /// languages only), then execute the run commands. Returns the
    /// concatenated output of the run commands.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Unsupported`] before touching the container
    /// when libraries are requested for a language without installation
    /// support, and [`SessionError::Execution`] for the first setup, install,
    /// compile or run command that exits non-zero, carrying the output
    /// captured so far. Later steps are skipped.
    #[instrument(skip(self, code), fields(language = %self.language(), len = code.len()))]
    pub async fn run(
        &mut self,
        code: &str,
        libraries: &[&str],
    ) -> Result<ConsoleOutput, SessionError> {
        self.open_container("run code")?;
        let profile = self.profile();

        if !libraries.is_empty() {
            install::install_libraries(self, profile, libraries).await?;
        }

        let workspace = tempfile::tempdir()?;
        let host_source = workspace.path().join(profile.source_name());
        tokio::fs::write(&host_source, code).await?;
        self.copy_to_runtime(&host_source, &profile.source_path())
            .await?;
        debug!(source = %profile.source_path(), "code placed");

        if let Some(command) = profile.compile_command() {
            compile::compile(self, &command, profile.workdir).await?;
        }

        execute::run_program(self, profile).await
    }
}

/// Execute a step command and fail on a non-zero exit
async fn run_step(
    session: &mut Session,
    stage: Stage,
    command: &str,
    workdir: &str,
) -> Result<ConsoleOutput, SessionError> {
    let output = session.execute_command_in(command, Some(workdir)).await?;
    if !output.is_success() {
        return Err(SessionError::Execution {
            stage,
            command: command.to_string(),
            exit_code: output.exit_code,
            output: output.text,
        });
    }
    Ok(output)
}
