//! Session lifecycle
//!
//! A [`Session`] binds one language to one container. Opening it resolves the
//! image (reusing a local one, pulling, or building from a dockerfile) and
//! starts a container; closing it removes the container and, unless the
//! session keeps its template, the image it created.
//!
//! Sessions are explicitly closed. Dropping an open session only attempts a
//! best-effort removal of its container and created image on the current
//! tokio runtime:
//!
//! ```rust,ignore
//! let mut session = Session::new(runtime, SessionConfig::new(Language::Cpp))?;
//! session.open().await?;
//! // ... use the session ...
//! session.close().await; // Always close explicitly!
//! ```
//!
//! [`with_session`] scopes a session to a closure and closes it on every exit
//! path.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::config::{ConfigError, Language, LanguageProfile, SessionConfig};
use crate::runtime::{ContainerRuntime, ImageInfo, RuntimeError, short_id};
use crate::types::Stage;

mod exec;
mod transfer;

/// Errors that occur while using a session
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("cannot {operation}: session is {state}")]
    State {
        state: SessionState,
        operation: &'static str,
    },

    #[error("library installation is not supported for {0}")]
    Unsupported(Language),

    #[error("{stage} command `{command}` failed with exit code {}", display_exit_code(.exit_code))]
    Execution {
        stage: Stage,
        command: String,
        exit_code: Option<i64>,
        output: String,
    },

    #[error("command `{command}` did not finish within {timeout:?}")]
    Timeout {
        command: String,
        timeout: Duration,
        output: String,
    },

    #[error("command must not be empty")]
    EmptyCommand,

    #[error("transfer failed: {0}")]
    Transfer(#[from] TransferError),

    #[error("container runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SessionError {
    /// Output captured before the failure, if any
    pub fn output(&self) -> Option<&str> {
        match self {
            SessionError::Execution { output, .. } | SessionError::Timeout { output, .. } => {
                Some(output)
            }
            _ => None,
        }
    }
}

fn display_exit_code(code: &Option<i64>) -> String {
    code.map_or_else(|| "unknown".to_string(), |code| code.to_string())
}

/// Errors moving files across the container boundary
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("{path} not found in the container")]
    NotFound { path: String },

    #[error("invalid transfer path: {0}")]
    InvalidPath(String),

    #[error("archive I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Lifecycle state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created, no container yet
    Unopened,
    /// Container running
    Open,
    /// Container removed; terminal
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Unopened => "unopened",
            SessionState::Open => "open",
            SessionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Where a session's image comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    /// Image reference, pulled if not available locally
    Name(String),
    /// Dockerfile built into `sandbox-<lang>-<dir>`
    Dockerfile(PathBuf),
}

/// A session's image, before and after `open`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageRef {
    Unresolved(ImageSource),
    /// `reference` is the name the session pulled, reused or built; the
    /// image may carry other tags that belong to someone else
    Resolved { reference: String, info: ImageInfo },
}

impl ImageRef {
    /// Reference the session runs, commits and removes, once resolved
    pub fn reference(&self) -> Option<&str> {
        match self {
            ImageRef::Unresolved(_) => None,
            ImageRef::Resolved { reference, .. } => Some(reference),
        }
    }
}

/// What happened to the container on close
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ContainerCleanup {
    /// The session had no container
    #[default]
    NotOpen,
    Removed,
    Failed(String),
}

/// What happened to the session image on close
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ImageCleanup {
    /// The image was not created by this session, or was already handled
    #[default]
    Untouched,
    /// Kept because the session keeps its template
    Retained,
    /// Kept because other containers still reference it
    InUse,
    Removed,
    Failed(String),
}

/// Outcome of closing a session
///
/// Close never fails; cleanup problems are reported here and logged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CloseReport {
    pub container: ContainerCleanup,

    /// Whether the container was committed into the session image
    pub committed: bool,

    pub image: ImageCleanup,
}

/// A container-backed code execution session
#[derive(Debug)]
pub struct Session {
    runtime: Arc<dyn ContainerRuntime>,

    language: Language,

    image: ImageRef,

    /// Container id while open
    container: Option<String>,

    /// Whether `open` pulled or built the image
    created_image: bool,

    keep_template: bool,

    verbose: bool,

    command_timeout: Option<Duration>,

    state: SessionState,
}

impl Session {
    /// Create an unopened session
    ///
    /// Validates the settings; no runtime calls are made until [`open`](Self::open).
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        config: SessionConfig,
    ) -> Result<Self, SessionError> {
        config.validate()?;

        let source = match (config.image, config.dockerfile) {
            (Some(image), None) => ImageSource::Name(image),
            (None, Some(path)) => ImageSource::Dockerfile(path),
            (None, None) => ImageSource::Name(config.lang.profile().default_image.to_string()),
            (Some(_), Some(_)) => return Err(ConfigError::ConflictingImageSource.into()),
        };

        Ok(Self {
            runtime,
            language: config.lang,
            image: ImageRef::Unresolved(source),
            container: None,
            created_image: false,
            keep_template: config.keep_template,
            verbose: config.verbose,
            command_timeout: config.command_timeout,
            state: SessionState::Unopened,
        })
    }

    pub fn language(&self) -> Language {
        self.language
    }

    /// Build and run policy of the session language
    pub fn profile(&self) -> &'static LanguageProfile {
        self.language.profile()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == SessionState::Open
    }

    pub fn image(&self) -> &ImageRef {
        &self.image
    }

    /// Container id while the session is open
    pub fn container_id(&self) -> Option<&str> {
        self.container.as_deref()
    }

    pub fn keep_template(&self) -> bool {
        self.keep_template
    }

    pub fn verbose(&self) -> bool {
        self.verbose
    }

    pub fn command_timeout(&self) -> Option<Duration> {
        self.command_timeout
    }

    /// Resolve the image and start the session container
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::State`] unless the session is unopened, and a
    /// runtime error if the image cannot be resolved or the container cannot
    /// start. An image created for a container that failed to start is
    /// removed again, and the session stays unopened.
    #[instrument(skip(self), fields(language = %self.language))]
    pub async fn open(&mut self) -> Result<(), SessionError> {
        if self.state != SessionState::Unopened {
            return Err(SessionError::State {
                state: self.state,
                operation: "open",
            });
        }

        let source = match &self.image {
            ImageRef::Unresolved(source) => source.clone(),
            ImageRef::Resolved { reference, .. } => ImageSource::Name(reference.clone()),
        };
        let (reference, info, created) = self.resolve_image(&source).await?;
        self.image = ImageRef::Resolved {
            reference: reference.clone(),
            info,
        };
        self.created_image = created;

        if self.keep_template {
            progress!(
                self.verbose,
                image = %reference,
                "keep_template is set; the image will outlive this session"
            );
        }

        match self.runtime.run_container(&reference).await {
            Ok(container) => {
                progress!(self.verbose, container = short_id(&container), image = %reference, "container started");
                self.container = Some(container);
                self.state = SessionState::Open;
                Ok(())
            }
            Err(error) => {
                self.release_image().await;
                self.image = ImageRef::Unresolved(source);
                Err(error.into())
            }
        }
    }

    /// Find, pull or build the session image
    ///
    /// Returns the reference the session addresses the image by, the image,
    /// and whether this call created it.
    async fn resolve_image(
        &self,
        source: &ImageSource,
    ) -> Result<(String, ImageInfo, bool), SessionError> {
        match source {
            ImageSource::Dockerfile(path) => {
                let tag = dockerfile_tag(self.language, path);
                progress!(self.verbose, dockerfile = %path.display(), %tag, "building image");
                let image = self.runtime.build_image(path, &tag).await?;
                Ok((tag, image, true))
            }
            ImageSource::Name(name) => {
                if self.runtime.image_exists(name).await? {
                    progress!(self.verbose, image = %name, "using local image");
                    let image = self.runtime.get_image(name).await?;
                    Ok((name.clone(), image, false))
                } else {
                    progress!(self.verbose, image = %name, "pulling image");
                    let image = self.runtime.pull_image(name).await?;
                    Ok((name.clone(), image, true))
                }
            }
        }
    }

    /// Remove the container and release the image
    ///
    /// With `keep_template`, the container is first committed into the
    /// session image. A created image is removed only if no other container
    /// references it. Closing an unopened or closed session does nothing.
    #[instrument(skip(self), fields(language = %self.language))]
    pub async fn close(&mut self) -> CloseReport {
        let Some(container) = self.container.take() else {
            return CloseReport::default();
        };
        self.state = SessionState::Closed;

        let mut report = CloseReport::default();
        if self.keep_template
            && let Some(reference) = self.image.reference()
        {
            match self.runtime.commit_container(&container, reference).await {
                Ok(()) => {
                    progress!(self.verbose, image = reference, "committed container");
                    report.committed = true;
                }
                Err(error) => warn!(container = short_id(&container), %error, "commit failed"),
            }
        }

        report.container = match self.runtime.remove_container(&container).await {
            Ok(()) => {
                progress!(self.verbose, container = short_id(&container), "container removed");
                ContainerCleanup::Removed
            }
            Err(error) => {
                warn!(container = short_id(&container), %error, "failed to remove container");
                ContainerCleanup::Failed(error.to_string())
            }
        };

        report.image = self.release_image().await;
        debug!(?report, "session closed");
        report
    }

    /// Remove the session image if this session created it and nothing uses it
    ///
    /// Runs at most once per created image.
    async fn release_image(&mut self) -> ImageCleanup {
        if !self.created_image {
            return ImageCleanup::Untouched;
        }
        self.created_image = false;

        let ImageRef::Resolved { reference, info } = &self.image else {
            return ImageCleanup::Untouched;
        };
        if self.keep_template {
            progress!(self.verbose, image = %reference, "keeping image");
            return ImageCleanup::Retained;
        }

        release_created_image(self.runtime.as_ref(), reference, &info.id, self.verbose).await
    }

    /// Image this session created and still has to release
    fn take_created_image(&mut self) -> Option<(String, String)> {
        if !std::mem::take(&mut self.created_image) || self.keep_template {
            return None;
        }
        match &self.image {
            ImageRef::Resolved { reference, info } => Some((reference.clone(), info.id.clone())),
            ImageRef::Unresolved(_) => None,
        }
    }

    /// Container id, if the session is open
    pub(crate) fn open_container(&self, operation: &'static str) -> Result<String, SessionError> {
        match (&self.container, self.state) {
            (Some(container), SessionState::Open) => Ok(container.clone()),
            (_, state) => Err(SessionError::State { state, operation }),
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let Some(container) = self.container.take() else {
            return;
        };
        let image = self.take_created_image();

        warn!(
            container = short_id(&container),
            image = image.as_ref().map(|(reference, _)| reference.as_str()),
            "Session dropped while open! \
             Call close() before dropping to release the container and image. \
             Attempting best-effort cleanup (may not complete)."
        );

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let runtime = Arc::clone(&self.runtime);
                let verbose = self.verbose;
                handle.spawn(async move {
                    if let Err(error) = runtime.remove_container(&container).await {
                        warn!(container = short_id(&container), %error, "best-effort removal failed");
                    }
                    if let Some((reference, id)) = image {
                        release_created_image(runtime.as_ref(), &reference, &id, verbose).await;
                    }
                });
            }
            Err(_) => {
                warn!(
                    container = short_id(&container),
                    "no async runtime available, container and image leaked"
                );
            }
        }
    }
}

/// Remove an image unless a container still references its id
async fn release_created_image(
    runtime: &dyn ContainerRuntime,
    reference: &str,
    image_id: &str,
    verbose: bool,
) -> ImageCleanup {
    let containers = match runtime.list_containers().await {
        Ok(containers) => containers,
        Err(error) => {
            warn!(image = reference, %error, "failed to list containers, keeping image");
            return ImageCleanup::Failed(error.to_string());
        }
    };
    if containers
        .iter()
        .any(|container| container.image_id == image_id)
    {
        progress!(verbose, image = reference, "image still in use, keeping it");
        return ImageCleanup::InUse;
    }

    match runtime.remove_image(reference).await {
        Ok(()) => {
            progress!(verbose, image = reference, "image removed");
            ImageCleanup::Removed
        }
        Err(error) => {
            warn!(image = reference, %error, "failed to remove image");
            ImageCleanup::Failed(error.to_string())
        }
    }
}

/// Run `f` against an open session, closing it on every exit path
///
/// If the returned future is dropped before it completes (a timeout, a
/// `select!`) or `f` panics, the session's `Drop` removes the container and
/// releases the image it created on the current runtime.
///
/// ```rust,ignore
/// let output = with_session(runtime, SessionConfig::new(Language::Python), |session| {
///     Box::pin(async move { session.run("print(42)", &[]).await })
/// })
/// .await?;
/// ```
pub async fn with_session<T, F>(
    runtime: Arc<dyn ContainerRuntime>,
    config: SessionConfig,
    f: F,
) -> Result<T, SessionError>
where
    F: for<'s> FnOnce(&'s mut Session) -> BoxFuture<'s, Result<T, SessionError>>,
{
    let mut session = Session::new(runtime, config)?;
    session.open().await?;
    let result = f(&mut session).await;
    session.close().await;
    result
}

/// Tag for an image built from a dockerfile: `sandbox-<lang>-<dir>`
pub(crate) fn dockerfile_tag(language: Language, dockerfile: &Path) -> String {
    let dir = dockerfile
        .parent()
        .and_then(Path::file_name)
        .map(|name| name.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    let dir: String = dir
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || "._-".contains(c) {
                c
            } else {
                '-'
            }
        })
        .collect();
    let dir = dir.trim_matches(|c: char| !c.is_ascii_alphanumeric());

    if dir.is_empty() {
        format!("sandbox-{language}")
    } else {
        format!("sandbox-{language}-{dir}")
    }
}
