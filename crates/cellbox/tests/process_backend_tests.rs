//! Session lifecycle against the real process backend.
//!
//! Interpreter runners here are small `sh` scripts that speak just enough of
//! the wire protocol for the provisioning handshake; execution semantics are
//! covered by the scripted in-memory interpreter in `session_tests.rs`.
#![cfg(unix)]

use cellbox::{
    ProcessBackend, ProvisionError, Session, SessionConfig, SessionState, TemplateCatalog,
    TemplateSpec,
};

fn sh_template(script: &str) -> TemplateSpec {
    TemplateSpec {
        command: "sh".to_string(),
        args: vec!["-c".to_string(), script.to_string()],
        ..TemplateSpec::default()
    }
}

#[tokio::test]
async fn test_create_and_close_against_real_process() {
    let _ = env_logger::builder().is_test(true).try_init();
    let catalog = TemplateCatalog::new().with_template(
        "sh",
        sh_template(r#"echo '{"type":"ready"}'; sleep 30"#),
    );
    let backend = ProcessBackend::new(catalog);

    let session = Session::create(SessionConfig::for_template("sh"), &backend)
        .await
        .unwrap();
    assert_eq!(session.state(), SessionState::Ready);
    assert!(session.healthcheck());

    session.close().await;
    assert_eq!(session.state(), SessionState::Terminated);
    assert!(!session.healthcheck());
}

#[tokio::test]
async fn test_create_times_out_on_mute_interpreter() {
    let catalog = TemplateCatalog::new().with_template("mute", sh_template("sleep 30"));
    let backend = ProcessBackend::new(catalog);

    let config = SessionConfig::for_template("mute").with_timeout_ms(300);
    let err = Session::create(config, &backend).await.err().unwrap();
    assert!(matches!(err, ProvisionError::Timeout(300)));
}

#[tokio::test]
async fn test_create_fails_when_interpreter_exits_early() {
    let catalog = TemplateCatalog::new().with_template("crash", sh_template("exit 7"));
    let backend = ProcessBackend::new(catalog);

    // The pipe closes before `ready`, which surfaces as a provisioning error,
    // never as a half-open session.
    let err = Session::create(SessionConfig::for_template("crash"), &backend)
        .await
        .err()
        .unwrap();
    assert!(matches!(err, ProvisionError::Io(_)));
}

#[tokio::test]
async fn test_missing_interpreter_binary() {
    let catalog = TemplateCatalog::new().with_template(
        "ghost",
        TemplateSpec {
            command: "cellbox-no-such-interpreter".to_string(),
            ..TemplateSpec::default()
        },
    );
    let backend = ProcessBackend::new(catalog);

    let err = Session::create(SessionConfig::for_template("ghost"), &backend)
        .await
        .err()
        .unwrap();
    assert!(matches!(err, ProvisionError::Spawn { .. }));
}

#[tokio::test]
async fn test_env_reaches_the_interpreter() {
    // The runner only emits `ready` when the variable arrived, so a working
    // env plumb is what makes create() succeed.
    let catalog = TemplateCatalog::new().with_template(
        "envcheck",
        sh_template(r#"[ "$CELLBOX_MARK" = "42" ] && echo '{"type":"ready"}' && sleep 30"#),
    );
    let backend = ProcessBackend::new(catalog);

    let config = SessionConfig::for_template("envcheck")
        .with_timeout_ms(2_000)
        .with_env("CELLBOX_MARK", "42");
    let session = Session::create(config, &backend).await.unwrap();
    session.close().await;
}
