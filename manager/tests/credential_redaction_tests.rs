//! Credential secrets must never leave the process
//!
//! Runs sessions with a recording subscriber installed and checks that the
//! secret shows up in none of the logs, snapshots, events or errors.

mod common;

use common::fixtures::*;
use forensic_manager::remote::FakeRemote;
use forensic_manager::session::SessionState;
use std::io::Write;
use std::sync::{Arc, Mutex};
use tracing_subscriber::fmt::MakeWriter;

#[derive(Clone, Default)]
struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl LogBuffer {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for LogBuffer {
    type Writer = LogBuffer;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

fn recording_subscriber(buffer: &LogBuffer) -> tracing::subscriber::DefaultGuard {
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::TRACE)
        .with_ansi(false)
        .with_writer(buffer.clone())
        .finish();
    tracing::subscriber::set_default(subscriber)
}

fn assert_no_secret(text: &str, context: &str) {
    assert!(
        !text.contains(accounts::SECRET),
        "{} leaked the secret: {}",
        context,
        text
    );
    assert!(
        !text.contains(accounts::WRONG_SECRET),
        "{} leaked the rejected secret: {}",
        context,
        text
    );
}

#[test]
fn test_request_debug_output_is_redacted() {
    let request = file_browser_request(targets::WORKSTATION);
    let debug = format!("{:?}", request);

    assert_no_secret(&debug, "SessionRequest Debug");
    assert!(debug.contains("ir-responder"));

    assert_no_secret(&format!("{:?}", wrong_credential()), "CredentialInput Debug");
}

#[tokio::test(start_paused = true)]
async fn test_successful_session_never_logs_the_secret() {
    let buffer = LogBuffer::default();
    let _guard = recording_subscriber(&buffer);

    let ts = TestService::new();
    let mut events = ts.service.subscribe();

    let id = ts
        .service
        .request_session(file_browser_request(targets::WORKSTATION))
        .await
        .unwrap();
    ts.wait_for_state(id, SessionState::Running).await;
    ts.service.stop_session(id).await.unwrap();
    let done = ts.wait_until_final(id).await;
    assert_eq!(done.state, SessionState::Cleaned);

    let logs = buffer.contents();
    assert!(!logs.is_empty(), "nothing was logged");
    assert_no_secret(&logs, "log output");

    assert_no_secret(&serde_json::to_string(&done).unwrap(), "session snapshot");
    assert_no_secret(&format!("{:?}", done), "session snapshot Debug");

    while let Ok(event) = events.try_recv() {
        assert_no_secret(&serde_json::to_string(&event).unwrap(), "session event");
    }
}

#[tokio::test(start_paused = true)]
async fn test_rejected_credential_never_appears_in_errors_or_logs() {
    let buffer = LogBuffer::default();
    let _guard = recording_subscriber(&buffer);

    let ts = TestService::new();
    let mut request = file_browser_request(targets::WORKSTATION);
    request.credential = wrong_credential();

    let id = ts.service.request_session(request).await.unwrap();
    let done = ts.wait_until_final(id).await;

    assert_eq!(done.state, SessionState::Failed);
    let error = done.error.clone().unwrap_or_default();
    assert!(!error.is_empty());
    assert_no_secret(&error, "session error");
    assert_no_secret(&serde_json::to_string(&done).unwrap(), "session snapshot");
    assert_no_secret(&buffer.contents(), "log output");
}

#[tokio::test(start_paused = true)]
async fn test_residual_state_reports_are_redacted() {
    let buffer = LogBuffer::default();
    let _guard = recording_subscriber(&buffer);

    let remote = FakeRemote::new()
        .with_credential(accounts::USERNAME, accounts::SECRET)
        .failing_remove("filebrowser.exe");
    let ts = TestService::with_remote(remote);

    let id = ts
        .service
        .request_session(file_browser_request(targets::WORKSTATION))
        .await
        .unwrap();
    ts.wait_for_state(id, SessionState::Running).await;
    ts.service.stop_session(id).await.unwrap();
    let done = ts.wait_until_final(id).await;
    assert_eq!(done.state, SessionState::FailedCleanup);

    let result = ts
        .service
        .retry_cleanup(id, Some(wrong_credential()))
        .await
        .unwrap_err();
    assert_no_secret(&result.to_string(), "retry error");
    assert_no_secret(&format!("{:?}", result), "retry error Debug");

    assert_no_secret(&buffer.contents(), "log output");
}
