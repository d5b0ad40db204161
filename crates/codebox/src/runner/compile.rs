//! Compilation step for code execution

use tracing::{debug, instrument};

use crate::runner::run_step;
use crate::session::{Session, SessionError};
use crate::types::{ConsoleOutput, Stage};

/// Compile the placed source
///
/// A failing compiler aborts the run with its output.
#[instrument(skip(session))]
pub(super) async fn compile(
    session: &mut Session,
    command: &str,
    workdir: &str,
) -> Result<ConsoleOutput, SessionError> {
    let output = run_step(session, Stage::Compile, command, workdir).await?;
    debug!(
        exit_code = ?output.exit_code,
        output_len = output.text.len(),
        "compilation complete"
    );
    Ok(output)
}
