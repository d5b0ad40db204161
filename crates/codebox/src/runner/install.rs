//! Library installation step

use tracing::{debug, instrument};

use crate::config::LanguageProfile;
use crate::runner::run_step;
use crate::session::{Session, SessionError};
use crate::types::Stage;

/// Install libraries with the language's package manager
///
/// Runs the profile's setup command first (e.g., creating a Go module in the
/// working directory).
#[instrument(skip(session, profile), fields(language = profile.name))]
pub(super) async fn install_libraries(
    session: &mut Session,
    profile: &LanguageProfile,
    libraries: &[&str],
) -> Result<(), SessionError> {
    let command = profile
        .install_command(libraries)
        .ok_or(SessionError::Unsupported(session.language()))?;

    session.ensure_directory(profile.workdir, Stage::Setup).await?;
    if let Some(setup) = profile.setup {
        run_step(session, Stage::Setup, setup, profile.workdir).await?;
    }

    progress!(session.verbose(), ?libraries, "installing libraries");
    let output = run_step(session, Stage::Install, &command, profile.workdir).await?;
    debug!(len = output.text.len(), "libraries installed");
    Ok(())
}
