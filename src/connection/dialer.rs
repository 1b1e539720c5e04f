use crate::channel::NotnetsChannel;
use crate::config::Config;
use crate::connection::{Connection, ConnectionResult, QueuePair, Role, ShmAddr};
use crate::errors::ConnectionError;
use crate::shm::ShmProvider;
use log::{debug, info};
use std::sync::Arc;
use std::time::Duration;

/// Exponential retry delays: `initial`, doubled on every step, capped at `max`.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Option<Duration>,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Backoff {
        Backoff {
            initial,
            max,
            current: None,
        }
    }
}

impl Iterator for Backoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Self::Item> {
        let delay = match self.current {
            None => self.initial,
            Some(previous) => previous.saturating_mul(2),
        }
        .min(self.max);
        self.current = Some(delay);
        Some(delay)
    }
}

/// Opens client connections, waiting for servers that are not listening yet.
#[derive(Debug, Clone, new)]
pub struct Dialer {
    config: Arc<Config>,
    provider: Arc<dyn ShmProvider>,
}

impl Dialer {
    /// Opens a channel from `local` to the server listening at `remote`.
    pub async fn dial<L: Into<ShmAddr>, R: Into<ShmAddr>>(
        &self,
        local: L,
        remote: R,
    ) -> ConnectionResult<NotnetsChannel> {
        let connection = self.connect(local.into(), remote.into()).await?;
        Ok(NotnetsChannel::new(connection, &self.config))
    }

    /// Opens a queue pair, retrying with [`Backoff`] while the server is absent.
    ///
    /// With no `dial_attempts` configured this never gives up.
    pub async fn connect(&self, local: ShmAddr, remote: ShmAddr) -> ConnectionResult<Connection> {
        let chunk_size = *self.config.chunk_size();
        if chunk_size == 0 {
            return Err(ConnectionError::Error("Chunk size must not be 0".to_string()));
        }
        info!("Client: opening new channel {} -> {}", local, remote);
        let mut backoff = Backoff::new(
            *self.config.backoff_initial(),
            *self.config.backoff_max(),
        );
        let mut attempts = 1;
        let queues = loop {
            if let Some(queues) =
                self.provider
                    .client_open(local.as_str(), remote.as_str(), chunk_size)
            {
                break queues;
            }
            if let Some(max_attempts) = *self.config.dial_attempts() {
                if attempts >= max_attempts {
                    return Err(ConnectionError::DialTimeout {
                        local: local.to_string(),
                        remote: remote.to_string(),
                        attempts,
                    });
                }
            }
            let delay = backoff.next().unwrap_or(*self.config.backoff_max());
            info!(
                "Client: opening channel to {} failed, retrying in {:?}",
                remote, delay
            );
            tokio::time::sleep(delay).await;
            attempts += 1;
        };
        let queues = QueuePair::new(queues);
        let queue_info = queues.info();
        debug!(
            "Client: new channel {} (request {:#x}, response {:#x})",
            queue_info.client_id(),
            queue_info.request_shmaddr(),
            queue_info.response_shmaddr()
        );
        Ok(Connection::new(
            Role::Client,
            queues,
            local,
            remote,
            self.provider.clone(),
        ))
    }
}
