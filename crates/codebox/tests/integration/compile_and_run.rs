use codebox::{Language, Session, SessionConfig, SessionError, Stage};

use super::{docker_runtime, fixture_source};

async fn open(language: Language) -> Session {
    let config = SessionConfig::new(language).with_verbose(false);
    let mut session = Session::new(docker_runtime(), config).expect("Failed to create session");
    session.open().await.expect("Failed to open session");
    session
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_python_hello_world() {
    let mut session = open(Language::Python).await;

    let output = session
        .run(&fixture_source("hello.py"), &[])
        .await
        .expect("Run failed");

    assert_eq!(output.text, "Hello, World!\n");
    assert!(output.is_success());

    session.close().await;
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_cpp_compile_and_run() {
    let mut session = open(Language::Cpp).await;

    let output = session
        .run(&fixture_source("reverse.cpp"), &[])
        .await
        .expect("Compile and run failed");

    assert!(output.text.contains("5 4 3 2 1"));

    session.close().await;
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_cpp_compile_failure() {
    let mut session = open(Language::Cpp).await;

    let result = session.run(&fixture_source("compile_error.cpp"), &[]).await;

    match result {
        Err(SessionError::Execution { stage, output, .. }) => {
            assert_eq!(stage, Stage::Compile);
            assert!(output.contains("error"));
        }
        other => panic!("expected compile error, got {other:?}"),
    }

    session.close().await;
}

#[tokio::test]
#[ignore = "requires docker and network access"]
async fn test_python_with_library() {
    let mut session = open(Language::Python).await;

    let output = session
        .run("import six\nprint(six.PY3)\n", &["six"])
        .await
        .expect("Run with library failed");

    assert_eq!(output.text.lines().last(), Some("True"));

    session.close().await;
}
