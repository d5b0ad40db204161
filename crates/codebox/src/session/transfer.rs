//! File transfer between the host and the session container

use std::path::Path;

use tracing::{debug, instrument};

use crate::runtime::{archive, shell_quote};
use crate::session::{Session, SessionError, TransferError};
use crate::types::Stage;

impl Session {
    /// Copy a host file into the container at `dest`
    ///
    /// The destination directory is created if missing. The file lands under
    /// the destination's own name, so `dest` may rename it.
    #[instrument(skip(self), fields(language = %self.language))]
    pub async fn copy_to_runtime(&mut self, src: &Path, dest: &str) -> Result<(), SessionError> {
        let container = self.open_container("copy files into the container")?;

        let dest_path = Path::new(dest);
        let name = dest_path
            .file_name()
            .ok_or_else(|| TransferError::InvalidPath(dest.to_string()))?
            .to_string_lossy()
            .into_owned();
        let directory = match dest_path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_string_lossy().into_owned(),
            _ => "/".to_string(),
        };

        if self.ensure_directory(&directory, Stage::Transfer).await? {
            progress!(self.verbose, %directory, "created directory in container");
        }

        let content = tokio::fs::read(src).await.map_err(TransferError::Io)?;
        let metadata = tokio::fs::metadata(src).await.map_err(TransferError::Io)?;
        let archive = archive::pack_bytes(&name, &content, archive::file_mode(&metadata))
            .map_err(TransferError::Io)?;

        progress!(self.verbose, src = %src.display(), dest, "copying file into container");
        self.runtime
            .put_archive(&container, &directory, archive)
            .await?;
        debug!(len = content.len(), "file copied");
        Ok(())
    }

    /// Copy a path out of the container to `dest` on the host
    ///
    /// The copied file or directory is written at `dest` itself; missing host
    /// directories above it are created.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::NotFound`] if the path does not exist in the
    /// container. Nothing is written to the host in that case.
    #[instrument(skip(self), fields(language = %self.language))]
    pub async fn copy_from_runtime(&mut self, src: &str, dest: &Path) -> Result<(), SessionError> {
        let container = self.open_container("copy files out of the container")?;

        let root = Path::new(src)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        progress!(self.verbose, src, dest = %dest.display(), "copying file from container");
        let archive = self
            .runtime
            .get_archive(&container, src)
            .await?
            .filter(|archive| !archive.is_empty())
            .ok_or_else(|| TransferError::NotFound {
                path: src.to_string(),
            })?;

        let target = dest.to_path_buf();
        let entries =
            tokio::task::spawn_blocking(move || archive::unpack_into(&archive, &root, &target))
                .await
                .map_err(std::io::Error::other)
                .map_err(TransferError::Io)?
                .map_err(TransferError::Io)?;
        if entries == 0 {
            return Err(TransferError::NotFound {
                path: src.to_string(),
            }
            .into());
        }

        debug!(entries, "archive extracted");
        Ok(())
    }

    /// Make sure a directory exists in the container
    ///
    /// Returns whether it had to be created. A failing `mkdir` is reported
    /// under `stage`.
    pub(crate) async fn ensure_directory(
        &mut self,
        directory: &str,
        stage: Stage,
    ) -> Result<bool, SessionError> {
        let quoted = shell_quote(directory);
        let check = self.execute_command(&format!("test -d {quoted}")).await?;
        if check.is_success() {
            return Ok(false);
        }

        let command = format!("mkdir -p {quoted}");
        let created = self.execute_command(&command).await?;
        if !created.is_success() {
            return Err(SessionError::Execution {
                stage,
                command,
                exit_code: created.exit_code,
                output: created.text,
            });
        }
        Ok(true)
    }
}
