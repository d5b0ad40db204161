//! A library for running code snippets in disposable containers.
//!
//! codebox provides an async Rust API for executing source code in one of
//! several languages inside a container. A [`Session`] owns one container for
//! its lifetime: it resolves an image (existing, pulled, or built from a
//! dockerfile), runs commands in the container, moves files across the
//! boundary, and cleans up what it created when closed.
//!
//! # Features
//!
//! - **Language profiles**: Built-in images and build/run policy for Python, Java, JavaScript, C++, Go and Ruby.
//! - **Library installation**: Per-language package managers, run before the code is placed.
//! - **File transfer**: Copy files into and out of the container as tar archives.
//! - **Image lifecycle**: Remove session-created images on close, or commit and keep them as templates.
//! - **TOML configuration**: Layered defaults, config files and environment overrides.
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use codebox::{DockerRuntime, Language, Session, SessionConfig};
//!
//! let runtime = Arc::new(DockerRuntime::connect(None, Duration::from_secs(120))?);
//! let mut session = Session::new(runtime, SessionConfig::new(Language::Python))?;
//! session.open().await?;
//! let output = session.run("print('Hello, World!')", &[]).await;
//! session.close().await;
//! ```

pub use config::{Config, ConfigError, EXAMPLE_CONFIG, Language, LanguageProfile, SessionConfig};
pub use runtime::{ContainerRuntime, DockerRuntime, ImageInfo, RuntimeError};
pub use session::{
    CloseReport, ContainerCleanup, ImageCleanup, ImageRef, ImageSource, Session, SessionError,
    SessionState, TransferError, with_session,
};
pub use types::{ConsoleOutput, Stage};

/// Progress event: `info` for verbose sessions, `debug` otherwise
macro_rules! progress {
    ($verbose:expr, $($arg:tt)+) => {
        if $verbose {
            ::tracing::info!($($arg)+)
        } else {
            ::tracing::debug!($($arg)+)
        }
    };
}

pub mod config;
mod runner;
pub mod runtime;
pub mod session;
pub mod types;
