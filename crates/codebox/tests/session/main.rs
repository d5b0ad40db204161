//! Session tests against an in-memory container runtime
//!
//! These run without Docker: [`fake_runtime::FakeRuntime`] records every
//! runtime call so tests can assert on ordering and cleanup.

use std::sync::Arc;

use codebox::{ContainerRuntime, Language, Session, SessionConfig};

use crate::fake_runtime::FakeRuntime;

mod fake_runtime;

pub(crate) const PYTHON_IMAGE: &str = "python:3.9.19-bullseye";

/// Shared handle to the fake as a trait object
pub(crate) fn runtime(fake: &Arc<FakeRuntime>) -> Arc<dyn ContainerRuntime> {
    fake.clone()
}

/// Create a session with default settings for `language`
pub(crate) fn session(fake: &Arc<FakeRuntime>, language: Language) -> Session {
    Session::new(runtime(fake), SessionConfig::new(language).with_verbose(false))
        .expect("Failed to create session")
}

/// Create and open a session with default settings for `language`
pub(crate) async fn open_session(fake: &Arc<FakeRuntime>, language: Language) -> Session {
    let mut session = session(fake, language);
    session.open().await.expect("Failed to open session");
    session
}
