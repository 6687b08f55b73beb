//! Client for the forensic agent running on a target host

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::path::Path;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, warn};

use super::{ChannelToken, ProcessHandle, ProcessStatus, RemoteChannel, RemoteExecutor};
use crate::constants::connection::{CONNECT_TIMEOUT, PROBE_TIMEOUT, REQUEST_TIMEOUT};
use crate::credential::Credential;
use crate::errors::RemoteError;
use crate::target::Target;

/// Envelope every agent endpoint answers with
#[derive(Debug, Deserialize)]
struct AgentResponse<T> {
    success: bool,
    data: Option<T>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LoginData {
    token: String,
}

#[derive(Debug, Deserialize)]
struct RemovedData {
    removed: bool,
}

#[derive(Debug, Deserialize)]
struct SizeData {
    size: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct LaunchData {
    handle: String,
}

pub struct HttpRemoteExecutor {
    client: Client,
    probe_timeout: Duration,
}

impl HttpRemoteExecutor {
    pub fn new() -> Result<Self, RemoteError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| RemoteError::Protocol(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            probe_timeout: PROBE_TIMEOUT,
        })
    }

    pub fn with_probe_timeout(mut self, probe_timeout: Duration) -> Self {
        self.probe_timeout = probe_timeout;
        self
    }

    fn url(target: &Target, path: &str) -> String {
        format!("http://{}:{}{}", target.address, target.agent_port, path)
    }

    fn authorized(&self, builder: RequestBuilder, channel: &RemoteChannel) -> RequestBuilder {
        builder.header("Authorization", format!("Bearer {}", channel.token.as_str()))
    }

    async fn send(builder: RequestBuilder) -> Result<Response, RemoteError> {
        builder.send().await.map_err(map_transport_error)
    }

    /// Check the status and unwrap the `data` field of the agent envelope
    async fn read_data<T: DeserializeOwned>(response: Response) -> Result<Option<T>, RemoteError> {
        let status = response.status();

        if status == StatusCode::UNAUTHORIZED {
            return Err(RemoteError::Unauthorized);
        }

        let body = response
            .text()
            .await
            .map_err(|e| RemoteError::Protocol(format!("failed to read response body: {}", e)))?;

        if !status.is_success() {
            let message = serde_json::from_str::<AgentResponse<serde_json::Value>>(&body)
                .ok()
                .and_then(|r| r.error)
                .unwrap_or(body);
            return Err(RemoteError::Rejected(format!("{}: {}", status, message)));
        }

        let parsed: AgentResponse<T> = serde_json::from_str(&body)
            .map_err(|e| RemoteError::Protocol(format!("unexpected agent response: {}", e)))?;

        if !parsed.success {
            return Err(RemoteError::Rejected(
                parsed.error.unwrap_or_else(|| "Unknown error from agent".to_string()),
            ));
        }

        Ok(parsed.data)
    }

    async fn require_data<T: DeserializeOwned>(response: Response, what: &str) -> Result<T, RemoteError> {
        Self::read_data(response)
            .await?
            .ok_or_else(|| RemoteError::Protocol(format!("agent response is missing {}", what)))
    }
}

fn map_transport_error(e: reqwest::Error) -> RemoteError {
    if e.is_timeout() {
        RemoteError::Timeout
    } else if e.is_connect() || e.is_request() {
        RemoteError::Unreachable(e.to_string())
    } else {
        RemoteError::Protocol(e.to_string())
    }
}

#[async_trait]
impl RemoteExecutor for HttpRemoteExecutor {
    async fn open_channel(
        &self,
        target: &Target,
        credential: &Credential,
    ) -> Result<RemoteChannel, RemoteError> {
        debug!("Opening channel to {}", target.address);

        let response = Self::send(self.client.post(Self::url(target, "/auth/login")).json(&json!({
            "username": credential.username,
            "password": credential.secret.expose(),
        })))
        .await?;

        let data: LoginData = Self::require_data(response, "token").await?;

        Ok(RemoteChannel {
            target: target.clone(),
            token: ChannelToken::new(data.token),
        })
    }

    async fn ping(&self, channel: &RemoteChannel) -> Result<(), RemoteError> {
        let builder = self.client.get(Self::url(&channel.target, "/auth/ping"));
        let response = Self::send(self.authorized(builder, channel)).await?;
        Self::read_data::<serde_json::Value>(response).await?;
        Ok(())
    }

    async fn close_channel(&self, channel: &RemoteChannel) -> Result<(), RemoteError> {
        let builder = self.client.post(Self::url(&channel.target, "/auth/logout"));
        let response = Self::send(self.authorized(builder, channel)).await?;

        match Self::read_data::<serde_json::Value>(response).await {
            Ok(_) => Ok(()),
            // Token already expired or revoked: the channel is closed either way
            Err(RemoteError::Unauthorized) => {
                debug!("Channel to {} was already closed", channel.target.address);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn copy_file(
        &self,
        channel: &RemoteChannel,
        local: &Path,
        remote_path: &str,
    ) -> Result<(), RemoteError> {
        let bytes = tokio::fs::read(local).await.map_err(|e| {
            RemoteError::Rejected(format!("cannot read local binary {}: {}", local.display(), e))
        })?;

        debug!(
            "Copying {} ({} bytes) to {}:{}",
            local.display(),
            bytes.len(),
            channel.target.address,
            remote_path
        );

        let builder = self
            .client
            .put(Self::url(&channel.target, "/files"))
            .query(&[("path", remote_path)])
            .body(bytes);
        let response = Self::send(self.authorized(builder, channel)).await?;
        Self::read_data::<serde_json::Value>(response).await?;
        Ok(())
    }

    async fn remove_file(
        &self,
        channel: &RemoteChannel,
        remote_path: &str,
    ) -> Result<bool, RemoteError> {
        let builder = self
            .client
            .delete(Self::url(&channel.target, "/files"))
            .query(&[("path", remote_path)]);
        let response = Self::send(self.authorized(builder, channel)).await?;
        let data: RemovedData = Self::require_data(response, "removed flag").await?;
        Ok(data.removed)
    }

    async fn file_size(
        &self,
        channel: &RemoteChannel,
        remote_path: &str,
    ) -> Result<Option<u64>, RemoteError> {
        let builder = self
            .client
            .get(Self::url(&channel.target, "/files/size"))
            .query(&[("path", remote_path)]);
        let response = Self::send(self.authorized(builder, channel)).await?;
        let data: SizeData = Self::require_data(response, "file size").await?;
        Ok(data.size)
    }

    async fn launch(
        &self,
        channel: &RemoteChannel,
        command: &str,
        args: &[String],
    ) -> Result<ProcessHandle, RemoteError> {
        let builder = self
            .client
            .post(Self::url(&channel.target, "/process/launch"))
            .json(&json!({ "command": command, "args": args }));
        let response = Self::send(self.authorized(builder, channel)).await?;
        let data: LaunchData = Self::require_data(response, "process handle").await?;
        Ok(ProcessHandle(data.handle))
    }

    async fn status(
        &self,
        channel: &RemoteChannel,
        handle: &ProcessHandle,
    ) -> Result<ProcessStatus, RemoteError> {
        let path = format!("/process/{}", handle.0);
        let builder = self.client.get(Self::url(&channel.target, &path));
        let response = Self::send(self.authorized(builder, channel)).await?;
        Self::require_data(response, "process status").await
    }

    async fn terminate(
        &self,
        channel: &RemoteChannel,
        handle: &ProcessHandle,
    ) -> Result<(), RemoteError> {
        let path = format!("/process/{}/terminate", handle.0);
        let builder = self.client.post(Self::url(&channel.target, &path));
        let response = Self::send(self.authorized(builder, channel)).await?;
        Self::read_data::<serde_json::Value>(response).await?;
        Ok(())
    }

    async fn probe(&self, target: &Target, port: u16) -> Result<bool, RemoteError> {
        match timeout(
            self.probe_timeout,
            TcpStream::connect((target.address.as_str(), port)),
        )
        .await
        {
            Ok(Ok(_)) => Ok(true),
            Ok(Err(e)) => {
                debug!("Probe of {}:{} failed: {}", target.address, port, e);
                Ok(false)
            }
            Err(_) => {
                warn!("Probe of {}:{} timed out", target.address, port);
                Ok(false)
            }
        }
    }
}
