//! Tests for the HTTP client that talks to the forensic agent
//!
//! Every request goes to a wiremock server standing in for the agent.

mod common;

use common::fixtures::mock_agent::TOKEN;
use common::fixtures::*;
use forensic_manager::cancel::CancelToken;
use forensic_manager::config::ConnectionSettings;
use forensic_manager::connection::ConnectionManager;
use forensic_manager::credential::Credential;
use forensic_manager::errors::{ErrorKind, RemoteError};
use forensic_manager::remote::{
    ChannelToken, HttpRemoteExecutor, ProcessHandle, ProcessStatus, RemoteChannel, RemoteExecutor,
};
use forensic_manager::target::Target;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

fn executor() -> HttpRemoteExecutor {
    HttpRemoteExecutor::new()
        .unwrap()
        .with_probe_timeout(Duration::from_millis(500))
}

fn channel_for(agent: &MockAgentServer) -> RemoteChannel {
    RemoteChannel {
        target: agent.target(),
        token: ChannelToken::new(TOKEN),
    }
}

/// Port nothing listens on
async fn closed_port() -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    port
}

#[tokio::test]
async fn test_open_channel_returns_issued_token() {
    let agent = MockAgentServer::start().await;
    agent
        .mock_login_success(accounts::USERNAME, accounts::SECRET)
        .await;

    let channel = executor()
        .open_channel(
            &agent.target(),
            &Credential::new(accounts::USERNAME, accounts::SECRET),
        )
        .await
        .unwrap();

    assert_eq!(channel.token.as_str(), TOKEN);
    assert_eq!(channel.target, agent.target());
}

#[tokio::test]
async fn test_rejected_login_is_unauthorized() {
    let agent = MockAgentServer::start().await;
    agent.mock_login_rejected().await;

    let err = executor()
        .open_channel(
            &agent.target(),
            &Credential::new(accounts::USERNAME, accounts::WRONG_SECRET),
        )
        .await
        .unwrap_err();

    assert_eq!(err, RemoteError::Unauthorized);
}

#[tokio::test]
async fn test_closed_port_is_unreachable() {
    let target = Target::new("127.0.0.1").with_agent_port(closed_port().await);

    let err = executor()
        .open_channel(&target, &Credential::new(accounts::USERNAME, accounts::SECRET))
        .await
        .unwrap_err();

    assert!(matches!(err, RemoteError::Unreachable(_)), "got {:?}", err);
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_copy_file_uploads_local_binary() {
    let agent = MockAgentServer::start().await;
    agent.mock_upload(remote::FILE_BROWSER_BINARY).await;

    let mut local = tempfile::NamedTempFile::new().unwrap();
    local.write_all(b"MZ fake helper binary").unwrap();

    executor()
        .copy_file(&channel_for(&agent), local.path(), remote::FILE_BROWSER_BINARY)
        .await
        .unwrap();

    let requests = agent.server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].body, b"MZ fake helper binary");
}

#[tokio::test]
async fn test_copy_of_missing_local_binary_never_contacts_agent() {
    let agent = MockAgentServer::start().await;

    let err = executor()
        .copy_file(
            &channel_for(&agent),
            std::path::Path::new("/nonexistent/helper.exe"),
            remote::FILE_BROWSER_BINARY,
        )
        .await
        .unwrap_err();

    assert!(matches!(err, RemoteError::Rejected(_)));
    assert!(agent.server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_remove_file_reports_whether_file_existed() {
    let agent = MockAgentServer::start().await;
    agent.mock_remove(remote::FILE_BROWSER_BINARY, true).await;
    agent.mock_remove(remote::FILE_BROWSER_DB, false).await;

    let executor = executor();
    let channel = channel_for(&agent);

    assert!(executor
        .remove_file(&channel, remote::FILE_BROWSER_BINARY)
        .await
        .unwrap());
    assert!(!executor
        .remove_file(&channel, remote::FILE_BROWSER_DB)
        .await
        .unwrap());
}

#[tokio::test]
async fn test_file_size_of_growing_and_missing_output() {
    let agent = MockAgentServer::start().await;
    agent.mock_file_size(remote::MEMORY_IMAGE, Some(1_073_741_824)).await;
    agent.mock_file_size("C:\\Temp\\ir\\absent.raw", None).await;

    let executor = executor();
    let channel = channel_for(&agent);

    assert_eq!(
        executor.file_size(&channel, remote::MEMORY_IMAGE).await.unwrap(),
        Some(1_073_741_824)
    );
    assert_eq!(
        executor
            .file_size(&channel, "C:\\Temp\\ir\\absent.raw")
            .await
            .unwrap(),
        None
    );
}

#[tokio::test]
async fn test_launch_status_and_terminate() {
    let agent = MockAgentServer::start().await;
    agent.mock_launch("proc-42").await;
    agent.mock_status("proc-42", false, Some(0)).await;
    agent.mock_terminate().await;

    let executor = executor();
    let channel = channel_for(&agent);

    let handle = executor
        .launch(
            &channel,
            remote::MEMORY_IMAGER_BINARY,
            &[remote::MEMORY_IMAGE.to_string()],
        )
        .await
        .unwrap();
    assert_eq!(handle, ProcessHandle("proc-42".to_string()));

    let status = executor.status(&channel, &handle).await.unwrap();
    assert_eq!(status, ProcessStatus::exited(0));
    assert!(status.exited_successfully());

    executor.terminate(&channel, &handle).await.unwrap();

    let launch = agent
        .server
        .received_requests()
        .await
        .unwrap()
        .into_iter()
        .find(|r| r.url.path() == "/process/launch")
        .unwrap();
    let body: serde_json::Value = serde_json::from_slice(&launch.body).unwrap();
    assert_eq!(body["command"], remote::MEMORY_IMAGER_BINARY);
    assert_eq!(body["args"][0], remote::MEMORY_IMAGE);
    assert_eq!(
        launch.headers.get("authorization").unwrap().to_str().unwrap(),
        format!("Bearer {}", TOKEN)
    );
}

#[tokio::test]
async fn test_agent_side_failure_is_rejected() {
    let agent = MockAgentServer::start().await;
    agent.mock_launch_failure("binary not found").await;

    let err = executor()
        .launch(&channel_for(&agent), remote::MEMORY_IMAGER_BINARY, &[])
        .await
        .unwrap_err();

    assert_eq!(err, RemoteError::Rejected("binary not found".to_string()));
}

#[tokio::test]
async fn test_server_error_is_rejected_with_message() {
    let agent = MockAgentServer::start().await;
    agent.mock_server_error("/files").await;

    let err = executor()
        .remove_file(&channel_for(&agent), remote::FILE_BROWSER_BINARY)
        .await
        .unwrap_err();

    match err {
        RemoteError::Rejected(message) => assert!(message.contains("internal agent error")),
        other => panic!("expected rejection, got {:?}", other),
    }
}

#[tokio::test]
async fn test_non_agent_response_is_protocol_error() {
    let agent = MockAgentServer::start().await;
    agent.mock_garbage("/files/size").await;

    let err = executor()
        .file_size(&channel_for(&agent), remote::MEMORY_IMAGE)
        .await
        .unwrap_err();

    assert!(matches!(err, RemoteError::Protocol(_)), "got {:?}", err);
    assert!(!err.is_transient());
}

#[tokio::test]
async fn test_close_channel_tolerates_expired_token() {
    let agent = MockAgentServer::start().await;
    agent.mock_logout_expired().await;

    assert!(executor().close_channel(&channel_for(&agent)).await.is_ok());
}

#[tokio::test]
async fn test_close_channel_sends_token() {
    let agent = MockAgentServer::start().await;
    agent.mock_logout().await;

    executor().close_channel(&channel_for(&agent)).await.unwrap();
    assert_eq!(agent.server.received_requests().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_probe_open_and_closed_ports() {
    let agent = MockAgentServer::start().await;
    let executor = executor();
    let target = agent.target();

    assert!(executor.probe(&target, target.agent_port).await.unwrap());
    assert!(!executor.probe(&target, closed_port().await).await.unwrap());
}

#[tokio::test]
async fn test_connection_manager_does_not_retry_rejected_credentials() {
    let agent = MockAgentServer::start().await;
    agent.mock_login_rejected().await;

    let manager = ConnectionManager::new(Arc::new(executor()), &ConnectionSettings::default());
    let err = manager
        .connect(
            &agent.target(),
            Credential::new(accounts::USERNAME, accounts::WRONG_SECRET),
            Duration::from_secs(30),
            &CancelToken::new(),
        )
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Authentication);
    assert_eq!(agent.server.received_requests().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_connection_manager_round_trip_against_agent() {
    let agent = MockAgentServer::start().await;
    agent
        .mock_login_success(accounts::USERNAME, accounts::SECRET)
        .await;
    agent.mock_logout().await;

    let manager = ConnectionManager::new(Arc::new(executor()), &ConnectionSettings::default());
    let mut connection = manager
        .connect(
            &agent.target(),
            Credential::new(accounts::USERNAME, accounts::SECRET),
            Duration::from_secs(30),
            &CancelToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(connection.channel().token.as_str(), TOKEN);
    manager.disconnect(&mut connection).await.unwrap();
    assert!(connection.is_closed());
}
