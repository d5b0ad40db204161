//! Execution step for code execution

use tracing::{debug, instrument};

use crate::config::LanguageProfile;
use crate::session::{Session, SessionError};
use crate::types::{ConsoleOutput, Stage};

/// Run the profile's run commands in order, concatenating their output
///
/// Stops at the first command that exits non-zero or times out; the error
/// carries everything printed up to that point.
#[instrument(skip(session, profile), fields(language = profile.name))]
pub(super) async fn run_program(
    session: &mut Session,
    profile: &LanguageProfile,
) -> Result<ConsoleOutput, SessionError> {
    let mut combined = String::new();
    let mut exit_code = None;

    for command in profile.run_commands() {
        let output = match session
            .execute_command_in(&command, Some(profile.workdir))
            .await
        {
            Ok(output) => output,
            Err(SessionError::Timeout {
                command,
                timeout,
                output,
            }) => {
                return Err(SessionError::Timeout {
                    command,
                    timeout,
                    output: combined + &output,
                });
            }
            Err(error) => return Err(error),
        };

        combined.push_str(&output.text);
        if !output.is_success() {
            return Err(SessionError::Execution {
                stage: Stage::Run,
                command,
                exit_code: output.exit_code,
                output: combined,
            });
        }
        exit_code = output.exit_code;
    }

    debug!(?exit_code, len = combined.len(), "execution complete");
    Ok(ConsoleOutput::new(combined, exit_code))
}
