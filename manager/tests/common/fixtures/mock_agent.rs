//! Mock HTTP agent server for testing
//!
//! This provides a fake agent that answers the agent API endpoints
//! without requiring a real agent running on a target.

use forensic_manager::target::Target;
use serde_json::json;
use wiremock::{
    matchers::{body_json, header, method, path, path_regex, query_param},
    Mock, MockServer, ResponseTemplate,
};

pub const TOKEN: &str = "test-channel-token";

/// Mock agent server that simulates agent HTTP responses
pub struct MockAgentServer {
    pub server: MockServer,
}

impl MockAgentServer {
    pub async fn start() -> Self {
        Self {
            server: MockServer::start().await,
        }
    }

    /// Target pointing at this server
    pub fn target(&self) -> Target {
        let address = self.server.address();
        Target::new(address.ip().to_string()).with_agent_port(address.port())
    }

    fn bearer() -> String {
        format!("Bearer {}", TOKEN)
    }

    pub async fn mock_login_success(&self, username: &str, password: &str) {
        Mock::given(method("POST"))
            .and(path("/auth/login"))
            .and(body_json(json!({ "username": username, "password": password })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "data": { "token": TOKEN }
            })))
            .mount(&self.server)
            .await;
    }

    pub async fn mock_login_rejected(&self) {
        Mock::given(method("POST"))
            .and(path("/auth/login"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "success": false,
                "error": "Invalid credentials"
            })))
            .mount(&self.server)
            .await;
    }

    pub async fn mock_logout(&self) {
        Mock::given(method("POST"))
            .and(path("/auth/logout"))
            .and(header("authorization", Self::bearer().as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "success": true })))
            .mount(&self.server)
            .await;
    }

    pub async fn mock_logout_expired(&self) {
        Mock::given(method("POST"))
            .and(path("/auth/logout"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&self.server)
            .await;
    }

    pub async fn mock_upload(&self, remote_path: &str) {
        Mock::given(method("PUT"))
            .and(path("/files"))
            .and(query_param("path", remote_path))
            .and(header("authorization", Self::bearer().as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "success": true })))
            .expect(1)
            .mount(&self.server)
            .await;
    }

    pub async fn mock_remove(&self, remote_path: &str, removed: bool) {
        Mock::given(method("DELETE"))
            .and(path("/files"))
            .and(query_param("path", remote_path))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "data": { "removed": removed }
            })))
            .mount(&self.server)
            .await;
    }

    pub async fn mock_file_size(&self, remote_path: &str, size: Option<u64>) {
        Mock::given(method("GET"))
            .and(path("/files/size"))
            .and(query_param("path", remote_path))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "data": { "size": size }
            })))
            .mount(&self.server)
            .await;
    }

    pub async fn mock_launch(&self, handle: &str) {
        Mock::given(method("POST"))
            .and(path("/process/launch"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "data": { "handle": handle }
            })))
            .mount(&self.server)
            .await;
    }

    pub async fn mock_launch_failure(&self, message: &str) {
        Mock::given(method("POST"))
            .and(path("/process/launch"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": false,
                "error": message
            })))
            .mount(&self.server)
            .await;
    }

    pub async fn mock_status(&self, handle: &str, running: bool, exit_code: Option<i32>) {
        Mock::given(method("GET"))
            .and(path(format!("/process/{}", handle)))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "data": { "running": running, "exit_code": exit_code }
            })))
            .mount(&self.server)
            .await;
    }

    pub async fn mock_terminate(&self) {
        Mock::given(method("POST"))
            .and(path_regex(r"^/process/[^/]+/terminate$"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "success": true })))
            .mount(&self.server)
            .await;
    }

    pub async fn mock_server_error(&self, endpoint: &str) {
        Mock::given(path(endpoint))
            .respond_with(ResponseTemplate::new(500).set_body_json(json!({
                "success": false,
                "error": "internal agent error"
            })))
            .mount(&self.server)
            .await;
    }

    pub async fn mock_garbage(&self, endpoint: &str) {
        Mock::given(path(endpoint))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>proxy login</html>"))
            .mount(&self.server)
            .await;
    }
}
