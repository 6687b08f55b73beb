//! Authenticated administrative channels to targets

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout, Instant};
use tracing::{debug, info, instrument, warn};

use crate::cancel::CancelToken;
use crate::config::ConnectionSettings;
use crate::credential::Credential;
use crate::errors::{AcquisitionError, RemoteError};
use crate::remote::{RemoteChannel, RemoteExecutor};
use crate::retry::{retry_with_backoff, RetryError, RetryPolicy};
use crate::target::Target;

/// Open administrative channel; holds no credential
#[derive(Debug)]
pub struct Connection {
    channel: RemoteChannel,
    opened_at: DateTime<Utc>,
    closed: bool,
}

impl Connection {
    pub fn channel(&self) -> &RemoteChannel {
        &self.channel
    }

    pub fn target(&self) -> &Target {
        &self.channel.target
    }

    pub fn opened_at(&self) -> DateTime<Utc> {
        self.opened_at
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

pub struct ConnectionManager {
    executor: Arc<dyn RemoteExecutor>,
    policy: RetryPolicy,
}

impl ConnectionManager {
    pub fn new(executor: Arc<dyn RemoteExecutor>, settings: &ConnectionSettings) -> Self {
        Self {
            executor,
            policy: settings.retry_policy(),
        }
    }

    pub fn executor(&self) -> &Arc<dyn RemoteExecutor> {
        &self.executor
    }

    /// Open a channel to `target`
    ///
    /// Transient network failures are retried with backoff; a rejected
    /// credential fails immediately. `budget` bounds all attempts together.
    /// The credential is consumed and dropped before this returns.
    #[instrument(skip(self, credential, cancel), fields(target = %target.address))]
    pub async fn connect(
        &self,
        target: &Target,
        credential: Credential,
        budget: Duration,
        cancel: &CancelToken,
    ) -> Result<Connection, AcquisitionError> {
        let started = Instant::now();

        let outcome = {
            let credential = &credential;
            let executor = &self.executor;

            let attempts = retry_with_backoff(
                self.policy,
                cancel,
                |attempt| async move {
                    debug!("Connection attempt {} to {}", attempt, target.address);
                    executor.open_channel(target, credential).await
                },
                RemoteError::is_transient,
            );

            // An open that completes in the same wake as the cancel still
            // yields its channel, so it can be closed below
            tokio::select! {
                biased;
                result = timeout(budget, attempts) => match result {
                    Ok(Ok(channel)) => Ok(channel),
                    Ok(Err(RetryError::Permanent(e))) => {
                        Err(e.into_connect_error(&target.address, started.elapsed()))
                    }
                    Ok(Err(RetryError::Exhausted { error, attempts })) => {
                        warn!("Giving up on {} after {} attempts", target.address, attempts);
                        Err(error.into_connect_error(&target.address, started.elapsed()))
                    }
                    Ok(Err(RetryError::Cancelled)) => Err(AcquisitionError::UserCancelled),
                    Err(_) => Err(AcquisitionError::timeout(
                        format!("connect to {}", target.address),
                        started.elapsed(),
                    )),
                },
                _ = cancel.cancelled() => Err(AcquisitionError::UserCancelled),
            }
        };

        drop(credential);

        let channel = outcome?;
        if cancel.is_requested() {
            debug!("Cancelled while connecting, closing channel to {}", target.address);
            if let Err(e) = self.executor.close_channel(&channel).await {
                warn!("Failed to close channel to {}: {}", target.address, e);
            }
            return Err(AcquisitionError::UserCancelled);
        }
        info!("Channel to {} established", target);

        Ok(Connection {
            channel,
            opened_at: Utc::now(),
            closed: false,
        })
    }

    /// Close the channel; a no-op on a connection that is already closed
    pub async fn disconnect(&self, connection: &mut Connection) -> Result<(), RemoteError> {
        if connection.closed {
            return Ok(());
        }

        self.executor.close_channel(&connection.channel).await?;
        connection.closed = true;
        debug!("Channel to {} closed", connection.channel.target.address);
        Ok(())
    }

    pub async fn is_alive(&self, connection: &Connection) -> bool {
        if connection.closed {
            return false;
        }
        self.executor.ping(&connection.channel).await.is_ok()
    }
}
