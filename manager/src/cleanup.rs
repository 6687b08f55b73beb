//! Teardown of everything a session left on its target

use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, instrument, warn};

use crate::cancel::CancelToken;
use crate::connection::{Connection, ConnectionManager};
use crate::deployer::{Deployment, ServiceDeployer};
use crate::errors::RemoteError;
use crate::retry::{retry_with_backoff, RetryError, RetryPolicy};
use crate::session::AcquisitionSession;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CleanupResult {
    pub fully_succeeded: bool,
    /// Items still present on the target, empty on success
    pub failed_items: Vec<String>,
}

impl CleanupResult {
    pub fn success() -> Self {
        Self {
            fully_succeeded: true,
            failed_items: Vec::new(),
        }
    }
}

pub struct CleanupCoordinator {
    connections: Arc<ConnectionManager>,
    deployer: Arc<ServiceDeployer>,
    policy: RetryPolicy,
}

impl CleanupCoordinator {
    pub fn new(
        connections: Arc<ConnectionManager>,
        deployer: Arc<ServiceDeployer>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            connections,
            deployer,
            policy,
        }
    }

    /// Tear down every outstanding deployment, then close the channel
    ///
    /// Items already torn down are skipped, so calling this again after a
    /// partial failure only retries what is left.
    #[instrument(skip(self, session), fields(session_id = %session.id, target = %session.target.address))]
    pub async fn cleanup(&self, session: &mut AcquisitionSession) -> CleanupResult {
        let AcquisitionSession {
            deployments,
            connection,
            ..
        } = session;

        let mut failed_items = Vec::new();

        match connection.as_mut() {
            Some(connection) => {
                let shared: &Connection = connection;
                let pending: Vec<_> = deployments
                    .iter_mut()
                    .filter(|d| d.cleanup_required)
                    .map(|d| self.teardown_with_retry(shared, d))
                    .collect();

                if !pending.is_empty() {
                    info!("Tearing down {} deployment(s)", pending.len());
                }

                for result in join_all(pending).await {
                    if let Err(item) = result {
                        failed_items.push(item);
                    }
                }

                if let Err(item) = self.disconnect_with_retry(connection).await {
                    failed_items.push(item);
                }
            }
            None => {
                // No channel to work with: anything still deployed stays behind
                for deployment in deployments.iter().filter(|d| d.cleanup_required) {
                    error!("No channel left to tear down {}", deployment.label());
                    failed_items.push(deployment.label());
                }
            }
        }

        if failed_items.is_empty() {
            CleanupResult::success()
        } else {
            error!(
                "Cleanup incomplete, residual remote state: {}",
                failed_items.join(", ")
            );
            CleanupResult {
                fully_succeeded: false,
                failed_items,
            }
        }
    }

    async fn teardown_with_retry(
        &self,
        connection: &Connection,
        deployment: &mut Deployment,
    ) -> Result<(), String> {
        let label = deployment.label();
        let max_attempts = self.policy.max_attempts;
        let slot = Mutex::new(deployment);
        // Cleanup runs after the session token fired, so it gets its own
        let uncancellable = CancelToken::new();

        let result = {
            let deployer = &self.deployer;
            let label = label.as_str();
            let slot = &slot;
            retry_with_backoff(
                self.policy,
                &uncancellable,
                move |attempt| async move {
                    let mut deployment = slot.lock().await;
                    let result = deployer.teardown(connection, &mut **deployment).await;
                    if let Err(e) = &result {
                        warn!(
                            "Teardown of {} failed (attempt {}/{}): {}",
                            label, attempt, max_attempts, e
                        );
                    }
                    result
                },
                |_| true,
            )
            .await
        };

        result.map_err(|e| {
            error!("Giving up on teardown of {}: {}", label, last_error(e));
            label.clone()
        })
    }

    async fn disconnect_with_retry(&self, connection: &mut Connection) -> Result<(), String> {
        let address = connection.target().address.clone();
        let max_attempts = self.policy.max_attempts;
        let slot = Mutex::new(connection);
        let uncancellable = CancelToken::new();

        let result = {
            let connections = &self.connections;
            let address = address.as_str();
            let slot = &slot;
            retry_with_backoff(
                self.policy,
                &uncancellable,
                move |attempt| async move {
                    let mut connection = slot.lock().await;
                    let result = connections.disconnect(&mut **connection).await;
                    if let Err(e) = &result {
                        warn!(
                            "Closing channel to {} failed (attempt {}/{}): {}",
                            address, attempt, max_attempts, e
                        );
                    }
                    result
                },
                |_| true,
            )
            .await
        };

        result.map_err(|e| {
            error!("Giving up on closing channel to {}: {}", address, last_error(e));
            format!("channel to {}", address)
        })
    }
}

fn last_error(error: RetryError<RemoteError>) -> String {
    match error {
        RetryError::Exhausted { error, .. } | RetryError::Permanent(error) => error.to_string(),
        RetryError::Cancelled => "cancelled".to_string(),
    }
}
