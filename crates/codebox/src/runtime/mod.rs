//! Container runtime boundary
//!
//! Sessions talk to containers only through [`ContainerRuntime`], which
//! exposes the primitives they need: image lookup, pull and build, container
//! start and removal, command execution with streamed output, and tar archive
//! upload/download. [`DockerRuntime`] implements it on top of the Docker
//! Engine API.

use std::borrow::Cow;
use std::fmt;
use std::path::Path;

use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;

pub use crate::runtime::docker::DockerRuntime;

pub mod archive;
mod docker;

/// Errors reported by a container runtime
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("failed to connect to container runtime: {0}")]
    Connect(#[source] bollard::errors::Error),

    #[error("{operation} failed: {source}")]
    Api {
        operation: &'static str,
        #[source]
        source: bollard::errors::Error,
    },

    #[error("image '{0}' not found")]
    ImageNotFound(String),

    #[error("container '{0}' not found")]
    ContainerNotFound(String),

    #[error("image build failed: {0}")]
    BuildFailed(String),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A locally available image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageInfo {
    /// Content-addressed image id (e.g., "sha256:...")
    pub id: String,

    /// Repository tags pointing at the image, possibly owned by others
    pub tags: Vec<String>,
}

/// A container known to the runtime, running or stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSummary {
    pub id: String,

    /// Id of the image the container was created from
    pub image_id: String,
}

/// Command to execute inside a running container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecRequest {
    /// Argument vector
    pub command: Vec<String>,

    /// Working directory inside the container (container default if None)
    pub workdir: Option<String>,
}

impl ExecRequest {
    /// Run `command` through `/bin/sh -c`
    pub fn shell(command: &str) -> Self {
        Self {
            command: vec!["/bin/sh".to_string(), "-c".to_string(), command.to_string()],
            workdir: None,
        }
    }

    pub fn in_dir(mut self, workdir: impl Into<String>) -> Self {
        self.workdir = Some(workdir.into());
        self
    }

    /// The shell command string, if this request runs one
    pub fn shell_command(&self) -> Option<&str> {
        match self.command.as_slice() {
            [shell, flag, command] if shell == "/bin/sh" && flag == "-c" => Some(command),
            _ => None,
        }
    }
}

/// Raw output chunks of an exec, stdout and stderr interleaved as produced
pub type OutputStream = BoxStream<'static, Result<Vec<u8>, RuntimeError>>;

/// A started exec
pub struct ExecStream {
    /// Runtime exec id, used to query the exit code once output ends
    pub id: String,

    pub output: OutputStream,
}

impl fmt::Debug for ExecStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecStream")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

/// Primitives a session needs from a container runtime
#[async_trait]
pub trait ContainerRuntime: Send + Sync + fmt::Debug {
    /// Check if an image is available locally
    async fn image_exists(&self, reference: &str) -> Result<bool, RuntimeError>;

    /// Look up a local image
    async fn get_image(&self, reference: &str) -> Result<ImageInfo, RuntimeError>;

    /// Pull an image from its registry
    async fn pull_image(&self, reference: &str) -> Result<ImageInfo, RuntimeError>;

    /// Build an image from a dockerfile, using its directory as the build context
    async fn build_image(&self, dockerfile: &Path, tag: &str) -> Result<ImageInfo, RuntimeError>;

    /// Remove a local image
    async fn remove_image(&self, reference: &str) -> Result<(), RuntimeError>;

    /// Create and start a long-lived container from an image, returning its id
    async fn run_container(&self, image: &str) -> Result<String, RuntimeError>;

    /// Snapshot a container's filesystem into an image reference
    async fn commit_container(&self, container: &str, reference: &str)
    -> Result<(), RuntimeError>;

    /// Force-remove a container, stopping it if needed
    async fn remove_container(&self, container: &str) -> Result<(), RuntimeError>;

    /// List every container, running or not
    async fn list_containers(&self) -> Result<Vec<ContainerSummary>, RuntimeError>;

    /// Start a command in a running container
    async fn exec(&self, container: &str, request: ExecRequest)
    -> Result<ExecStream, RuntimeError>;

    /// Exit code of a finished exec
    async fn exec_exit_code(&self, exec_id: &str) -> Result<Option<i64>, RuntimeError>;

    /// Download a path as a tar archive
    ///
    /// Returns `None` if the path does not exist in the container.
    async fn get_archive(&self, container: &str, path: &str)
    -> Result<Option<Vec<u8>>, RuntimeError>;

    /// Extract a tar archive into an existing directory of the container
    async fn put_archive(
        &self,
        container: &str,
        directory: &str,
        archive: Vec<u8>,
    ) -> Result<(), RuntimeError>;
}

/// Quote a word for `/bin/sh`, leaving plain words untouched
pub fn shell_quote(word: &str) -> Cow<'_, str> {
    let plain = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:@+,%^".contains(c));
    if plain {
        Cow::Borrowed(word)
    } else {
        Cow::Owned(format!("'{}'", word.replace('\'', r"'\''")))
    }
}

/// Split an image reference into repository and tag
///
/// A missing tag means "latest". A colon before the last `/` belongs to a
/// registry port, not a tag.
pub fn split_reference(reference: &str) -> (&str, &str) {
    let name_start = reference.rfind('/').map_or(0, |i| i + 1);
    match reference[name_start..].rfind(':') {
        Some(i) => (
            &reference[..name_start + i],
            &reference[name_start + i + 1..],
        ),
        None => (reference, "latest"),
    }
}

/// First 12 hex digits of an image or container id
pub(crate) fn short_id(id: &str) -> &str {
    let id = id.strip_prefix("sha256:").unwrap_or(id);
    match id.char_indices().nth(12) {
        Some((end, _)) => &id[..end],
        None => id,
    }
}
