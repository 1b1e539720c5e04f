//! Process-local queue pairs.
//!
//! Every direction of a pair is an unbounded channel of chunks. A send is split
//! into chunks of at most `chunk_size` bytes; a receive copies out of the next
//! chunk, keeping whatever did not fit for the following receive.

use crate::shm::{QueueContext, QueuePairInfo, ServerHandle, ShmProvider};
use bytes::{Buf, Bytes};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io;
use std::io::ErrorKind;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::sync::mpsc;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

type PairKey = (String, String);

static GLOBAL: OnceLock<MemoryProvider> = OnceLock::new();

/// In-process implementation of [`ShmProvider`].
///
/// Clones share the same registry of listening servers and open pairs.
#[derive(Debug, Default, Clone)]
pub struct MemoryProvider {
    registry: Arc<Registry>,
}

#[derive(Debug, Default)]
struct Registry {
    servers: Mutex<HashMap<String, UnboundedSender<Arc<MemoryQueues>>>>,
    pairs: Mutex<HashMap<PairKey, Arc<MemoryQueues>>>,
    next_client_id: AtomicI32,
}

impl MemoryProvider {
    pub fn new() -> MemoryProvider {
        MemoryProvider::default()
    }

    /// Process-wide provider.
    pub fn global() -> MemoryProvider {
        GLOBAL.get_or_init(MemoryProvider::new).clone()
    }

    /// Number of queue pairs currently open.
    pub fn open_pairs(&self) -> usize {
        self.registry.pairs.lock().len()
    }
}

impl ShmProvider for MemoryProvider {
    fn client_open(
        &self,
        local: &str,
        remote: &str,
        chunk_size: usize,
    ) -> Option<Box<dyn QueueContext>> {
        let servers = self.registry.servers.lock();
        let pending = servers.get(remote)?;
        let client_id = self.registry.next_client_id.fetch_add(1, Ordering::Relaxed);
        let queues = Arc::new(MemoryQueues::new(client_id, chunk_size.max(1)));
        let key = (local.to_string(), remote.to_string());
        let mut pairs = self.registry.pairs.lock();
        if let Some(stale) = pairs.remove(&key) {
            warn!("Replacing open queue pair {} -> {}", local, remote);
            stale.close();
        }
        if pending.send(queues.clone()).is_err() {
            debug!("Server {} stopped accepting", remote);
            return None;
        }
        pairs.insert(key, queues.clone());
        debug!("Opened queue pair {} for {} -> {}", client_id, local, remote);
        Some(Box::new(MemoryQueueContext(queues)))
    }

    fn client_close(&self, local: &str, remote: &str) -> io::Result<()> {
        let key = (local.to_string(), remote.to_string());
        match self.registry.pairs.lock().remove(&key) {
            Some(queues) => {
                queues.close();
                Ok(())
            }
            None => Err(io::Error::new(
                ErrorKind::NotFound,
                format!("No queue pair {} -> {}", local, remote),
            )),
        }
    }

    fn register_server(&self, local: &str) -> io::Result<Box<dyn ServerHandle>> {
        let mut servers = self.registry.servers.lock();
        if servers.contains_key(local) {
            return Err(io::Error::new(
                ErrorKind::AddrInUse,
                format!("Server already registered at {}", local),
            ));
        }
        let (sender, receiver) = mpsc::unbounded_channel();
        servers.insert(local.to_string(), sender);
        Ok(Box::new(MemoryServerHandle {
            addr: local.to_string(),
            registry: self.registry.clone(),
            pending: Mutex::new(receiver),
        }))
    }
}

#[derive(Debug)]
struct MemoryServerHandle {
    addr: String,
    registry: Arc<Registry>,
    pending: Mutex<UnboundedReceiver<Arc<MemoryQueues>>>,
}

impl ServerHandle for MemoryServerHandle {
    fn accept(&self) -> Option<Box<dyn QueueContext>> {
        let queues = self.pending.lock().try_recv().ok()?;
        Some(Box::new(MemoryQueueContext(queues)))
    }

    fn manage_pool(&self) {
        self.registry
            .pairs
            .lock()
            .retain(|(_, remote), queues| remote != &self.addr || !queues.is_closed());
    }

    fn shutdown(&self) {
        let mut servers = self.registry.servers.lock();
        servers.remove(&self.addr);
        self.registry.pairs.lock().retain(|(_, remote), queues| {
            if remote == &self.addr {
                queues.close();
                return false;
            }
            true
        });
    }
}

#[derive(Debug)]
struct MemoryQueueContext(Arc<MemoryQueues>);

impl QueueContext for MemoryQueueContext {
    fn info(&self) -> QueuePairInfo {
        self.0.info()
    }

    fn client_send_rpc(&self, buf: &[u8]) -> io::Result<usize> {
        self.0.request.send(buf)
    }

    fn client_receive_buf(&self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.response.receive(buf)
    }

    fn server_send_rpc(&self, buf: &[u8]) -> io::Result<usize> {
        self.0.response.send(buf)
    }

    fn server_receive_buf(&self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.request.receive(buf)
    }
}

#[derive(Debug)]
struct MemoryQueues {
    client_id: i32,
    request: Chunks,
    response: Chunks,
}

impl MemoryQueues {
    fn new(client_id: i32, chunk_size: usize) -> MemoryQueues {
        MemoryQueues {
            client_id,
            request: Chunks::new(chunk_size),
            response: Chunks::new(chunk_size),
        }
    }

    fn info(&self) -> QueuePairInfo {
        QueuePairInfo::new(
            self.client_id,
            &self.request as *const Chunks as usize,
            &self.response as *const Chunks as usize,
            0,
        )
    }

    fn close(&self) {
        self.request.close();
        self.response.close();
    }

    fn is_closed(&self) -> bool {
        self.request.is_closed()
    }
}

#[derive(Debug)]
struct Chunks {
    chunk_size: usize,
    sender: Mutex<Option<UnboundedSender<Bytes>>>,
    receiving: Mutex<Receiving>,
}

#[derive(Debug)]
struct Receiving {
    receiver: UnboundedReceiver<Bytes>,
    remainder: Option<Bytes>,
}

impl Chunks {
    fn new(chunk_size: usize) -> Chunks {
        let (sender, receiver) = mpsc::unbounded_channel();
        Chunks {
            chunk_size,
            sender: Mutex::new(Some(sender)),
            receiving: Mutex::new(Receiving {
                receiver,
                remainder: None,
            }),
        }
    }

    fn send(&self, buf: &[u8]) -> io::Result<usize> {
        let sender = self.sender.lock();
        let sender = sender.as_ref().ok_or_else(closed_error)?;
        if buf.is_empty() {
            sender.send(Bytes::new()).map_err(|_| closed_error())?;
        }
        for chunk in buf.chunks(self.chunk_size) {
            sender
                .send(Bytes::copy_from_slice(chunk))
                .map_err(|_| closed_error())?;
        }
        Ok(buf.len())
    }

    /// Blocks the calling thread until a chunk is available or the pair is closed.
    fn receive(&self, buf: &mut [u8]) -> io::Result<usize> {
        let mut receiving = self.receiving.lock();
        let mut chunk = match receiving.remainder.take() {
            Some(remainder) => remainder,
            None => receiving.receiver.blocking_recv().ok_or_else(|| {
                io::Error::new(ErrorKind::UnexpectedEof, "queue pair closed")
            })?,
        };
        let len = buf.len().min(chunk.len());
        buf[..len].copy_from_slice(&chunk[..len]);
        chunk.advance(len);
        if !chunk.is_empty() {
            receiving.remainder = Some(chunk);
        }
        Ok(len)
    }

    fn close(&self) {
        self.sender.lock().take();
    }

    fn is_closed(&self) -> bool {
        self.sender.lock().is_none()
    }
}

fn closed_error() -> io::Error {
    io::Error::new(ErrorKind::BrokenPipe, "queue pair closed")
}
