use std::time::Duration;

use codebox::{Language, Session, SessionConfig, SessionError, TransferError};

use super::docker_runtime;

async fn open(config: SessionConfig) -> Session {
    let mut session = Session::new(docker_runtime(), config).expect("Failed to create session");
    session.open().await.expect("Failed to open session");
    session
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_execute_command_output_and_exit_code() {
    let mut session = open(SessionConfig::new(Language::Python).with_verbose(false)).await;

    let output = session
        .execute_command("echo out; echo err >&2; exit 3")
        .await
        .expect("Execution failed");

    assert!(output.text.contains("out"));
    assert!(output.text.contains("err"));
    assert_eq!(output.exit_code, Some(3));

    session.close().await;
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_execute_in_workdir() {
    let mut session = open(SessionConfig::new(Language::Python).with_verbose(false)).await;

    let output = session
        .execute_command_in("pwd", Some("/usr"))
        .await
        .expect("Execution failed");

    assert_eq!(output.text.trim(), "/usr");

    session.close().await;
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_command_timeout() {
    let config = SessionConfig::new(Language::Python)
        .with_verbose(false)
        .with_command_timeout(Duration::from_secs(1));
    let mut session = open(config).await;

    let result = session.execute_command("echo begin; sleep 30").await;

    assert!(matches!(result, Err(SessionError::Timeout { .. })));

    session.close().await;
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_transfer_round_trip() {
    let mut session = open(SessionConfig::new(Language::Python).with_verbose(false)).await;
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("input.txt");
    std::fs::write(&src, "line one\nline two\n").unwrap();

    session
        .copy_to_runtime(&src, "/data/copied.txt")
        .await
        .expect("Copy into container failed");
    let output = session.execute_command("wc -l < /data/copied.txt").await.unwrap();
    assert_eq!(output.text.trim(), "2");

    let dest = dir.path().join("back.txt");
    session
        .copy_from_runtime("/data/copied.txt", &dest)
        .await
        .expect("Copy out of container failed");
    assert_eq!(std::fs::read_to_string(&dest).unwrap(), "line one\nline two\n");

    session.close().await;
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_copy_missing_path() {
    let mut session = open(SessionConfig::new(Language::Python).with_verbose(false)).await;
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("missing.txt");

    let result = session.copy_from_runtime("/no/such/file", &dest).await;

    assert!(matches!(
        result,
        Err(SessionError::Transfer(TransferError::NotFound { .. }))
    ));
    assert!(!dest.exists());

    session.close().await;
}
