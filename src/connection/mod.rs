use crate::errors::ConnectionError;
use crate::shm::{QueueContext, QueuePairInfo, ShmProvider};
use bytes::{Bytes, BytesMut};
use log::{debug, error, trace};
use parking_lot::Mutex as SyncMutex;
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tokio::task;

pub mod dialer;

pub type ConnectionResult<T> = Result<T, ConnectionError>;

/// Name of the only network this transport speaks.
pub const NETWORK: &str = "notnets";

/// Address of a shared-memory endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, new)]
pub struct ShmAddr(String);

impl ShmAddr {
    pub fn network(&self) -> &'static str {
        NETWORK
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ShmAddr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ShmAddr {
    fn from(addr: &str) -> Self {
        ShmAddr(addr.to_string())
    }
}

impl From<String> for ShmAddr {
    fn from(addr: String) -> Self {
        ShmAddr(addr)
    }
}

/// Which end of the queue pair a connection drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

/// Queue pair exclusively owned by one [`Connection`].
#[derive(Debug)]
pub struct QueuePair {
    context: Arc<dyn QueueContext>,
}

impl QueuePair {
    pub(crate) fn new(context: Box<dyn QueueContext>) -> QueuePair {
        QueuePair {
            context: Arc::from(context),
        }
    }

    pub fn info(&self) -> QueuePairInfo {
        self.context.info()
    }

    fn context(&self) -> Arc<dyn QueueContext> {
        self.context.clone()
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct Deadlines {
    deadline: Option<Instant>,
    read: Option<Instant>,
    write: Option<Instant>,
}

/// Byte stream over one queue pair.
///
/// One read and one write may run at the same time; concurrent reads (or
/// writes) wait for each other. Deadlines are recorded but never enforced
/// against the queue runtime.
#[derive(Debug)]
pub struct Connection {
    role: Role,
    connected: bool,
    closed: bool,
    queues: QueuePair,
    local_addr: ShmAddr,
    remote_addr: ShmAddr,
    provider: Arc<dyn ShmProvider>,
    read_lock: Mutex<()>,
    write_lock: Mutex<()>,
    deadlines: SyncMutex<Deadlines>,
}

impl Connection {
    pub(crate) fn new(
        role: Role,
        queues: QueuePair,
        local_addr: ShmAddr,
        remote_addr: ShmAddr,
        provider: Arc<dyn ShmProvider>,
    ) -> Connection {
        Connection {
            role,
            connected: true,
            closed: false,
            queues,
            local_addr,
            remote_addr,
            provider,
            read_lock: Mutex::new(()),
            write_lock: Mutex::new(()),
            deadlines: SyncMutex::new(Deadlines::default()),
        }
    }

    /// Reads the next chunk (or as much of it as fits in `buf`).
    pub async fn read(&self, buf: &mut [u8]) -> ConnectionResult<usize> {
        let _guard = self.read_lock.lock().await;
        let queues = self.queues.context();
        let role = self.role;
        let len = buf.len();
        let chunk = task::spawn_blocking(move || {
            let mut chunk = BytesMut::zeroed(len);
            let read = match role {
                Role::Client => queues.client_receive_buf(&mut chunk),
                Role::Server => queues.server_receive_buf(&mut chunk),
            }?;
            chunk.truncate(read);
            Ok::<Bytes, std::io::Error>(chunk.freeze())
        })
        .await??;
        buf[..chunk.len()].copy_from_slice(&chunk);
        trace!("Read {} bytes from {}", chunk.len(), self.remote_addr);
        Ok(chunk.len())
    }

    /// Pushes `buf` through the queue pair, request side for clients and response side for servers.
    pub async fn write(&self, buf: &[u8]) -> ConnectionResult<usize> {
        let _guard = self.write_lock.lock().await;
        let queues = self.queues.context();
        let role = self.role;
        let bytes = Bytes::copy_from_slice(buf);
        let written = task::spawn_blocking(move || match role {
            Role::Client => queues.client_send_rpc(&bytes),
            Role::Server => queues.server_send_rpc(&bytes),
        })
        .await??;
        trace!("Wrote {} bytes to {}", written, self.remote_addr);
        Ok(written)
    }

    /// Releases the queue pair.
    ///
    /// Only the client end asks the runtime to tear the pair down, server ends just drop their handle.
    pub fn close(mut self) -> ConnectionResult<()> {
        self.release()
    }

    fn release(&mut self) -> ConnectionResult<()> {
        self.closed = true;
        self.connected = false;
        match self.role {
            Role::Client => {
                debug!("Closing queue pair {} -> {}", self.local_addr, self.remote_addr);
                Ok(self
                    .provider
                    .client_close(self.local_addr.as_str(), self.remote_addr.as_str())?)
            }
            Role::Server => {
                debug!("Releasing queue pair of {}", self.remote_addr);
                Ok(())
            }
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn is_client(&self) -> bool {
        self.role == Role::Client
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn local_addr(&self) -> &ShmAddr {
        &self.local_addr
    }

    pub fn remote_addr(&self) -> &ShmAddr {
        &self.remote_addr
    }

    pub fn queue_pair_info(&self) -> QueuePairInfo {
        self.queues.info()
    }

    pub fn set_deadline(&self, deadline: Option<Instant>) {
        self.deadlines.lock().deadline = deadline;
    }

    pub fn set_read_deadline(&self, deadline: Option<Instant>) {
        self.deadlines.lock().read = deadline;
    }

    pub fn set_write_deadline(&self, deadline: Option<Instant>) {
        self.deadlines.lock().write = deadline;
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadlines.lock().deadline
    }

    pub fn read_deadline(&self) -> Option<Instant> {
        self.deadlines.lock().read
    }

    pub fn write_deadline(&self) -> Option<Instant> {
        self.deadlines.lock().write
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        if let Err(err) = self.release() {
            error!("Failed to close connection to {}: {}", self.remote_addr, err);
        }
    }
}
