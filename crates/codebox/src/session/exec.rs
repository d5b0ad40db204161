//! Command execution inside the session container

use futures::StreamExt;
use tracing::{debug, instrument};

use crate::runtime::{ExecRequest, OutputStream, RuntimeError};
use crate::session::{Session, SessionError};
use crate::types::ConsoleOutput;

impl Session {
    /// Run a shell command in the container's default working directory
    ///
    /// A non-zero exit code is reported in the output, not as an error.
    pub async fn execute_command(&mut self, command: &str) -> Result<ConsoleOutput, SessionError> {
        self.execute_command_in(command, None).await
    }

    /// Run a shell command, optionally in a specific working directory
    ///
    /// The command runs through `/bin/sh -c`. Output chunks are streamed as
    /// progress events and concatenated in arrival order.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::EmptyCommand`] for a blank command,
    /// [`SessionError::State`] unless the session is open, and
    /// [`SessionError::Timeout`] when the session command timeout elapses.
    #[instrument(skip(self), fields(language = %self.language))]
    pub async fn execute_command_in(
        &mut self,
        command: &str,
        workdir: Option<&str>,
    ) -> Result<ConsoleOutput, SessionError> {
        if command.trim().is_empty() {
            return Err(SessionError::EmptyCommand);
        }
        let container = self.open_container("execute a command")?;

        progress!(self.verbose, command, ?workdir, "executing command");
        let mut request = ExecRequest::shell(command);
        if let Some(workdir) = workdir {
            request = request.in_dir(workdir);
        }
        let exec = self.runtime.exec(&container, request).await?;

        let mut output = Vec::new();
        let read = collect_output(exec.output, &mut output, self.verbose);
        let finished = match self.command_timeout {
            Some(limit) => tokio::time::timeout(limit, read).await.ok(),
            None => Some(read.await),
        };
        let Some(finished) = finished else {
            let timeout = self.command_timeout.unwrap_or_default();
            return Err(SessionError::Timeout {
                command: command.to_string(),
                timeout,
                output: String::from_utf8_lossy(&output).into_owned(),
            });
        };
        finished?;

        let exit_code = self.runtime.exec_exit_code(&exec.id).await?;
        let text = String::from_utf8_lossy(&output).into_owned();
        debug!(?exit_code, len = text.len(), "command finished");
        Ok(ConsoleOutput::new(text, exit_code))
    }
}

/// Drain an exec's output into `buffer`, reporting each chunk
async fn collect_output(
    mut stream: OutputStream,
    buffer: &mut Vec<u8>,
    verbose: bool,
) -> Result<(), RuntimeError> {
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        progress!(verbose, output = %String::from_utf8_lossy(&chunk).trim_end(), "command output");
        buffer.extend_from_slice(&chunk);
    }
    Ok(())
}
