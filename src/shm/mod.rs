//! Boundary to the shared-memory queue runtime.
//!
//! The runtime hands out queue pairs: two fixed-chunk byte channels (request and
//! response) shared by exactly one client and one server. Everything in this
//! module is the contract the rest of the crate relies on; [`memory`] provides a
//! process-local implementation of it.

use std::fmt::Debug;
use std::io;

pub mod memory;

/// Raw description of a queue pair as reported by the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, CopyGetters, new)]
#[get_copy = "pub"]
pub struct QueuePairInfo {
    client_id: i32,
    request_shmaddr: usize,
    response_shmaddr: usize,
    offset: i32,
}

/// Handle to an open queue pair.
///
/// All calls may block until the peer makes progress. Receives copy at most
/// `buf.len()` bytes of the next chunk and return how many were copied.
pub trait QueueContext: Debug + Send + Sync {
    fn info(&self) -> QueuePairInfo;

    fn client_send_rpc(&self, buf: &[u8]) -> io::Result<usize>;

    fn client_receive_buf(&self, buf: &mut [u8]) -> io::Result<usize>;

    fn server_send_rpc(&self, buf: &[u8]) -> io::Result<usize>;

    fn server_receive_buf(&self, buf: &mut [u8]) -> io::Result<usize>;
}

/// Listening endpoint registered with the runtime.
pub trait ServerHandle: Debug + Send + Sync {
    /// Returns a freshly attached client queue pair, or `None` when no client is waiting.
    fn accept(&self) -> Option<Box<dyn QueueContext>>;

    /// Runs one round of the runtime's queue pool maintenance.
    fn manage_pool(&self);

    /// Releases the endpoint. Queue pairs attached to it stop delivering data.
    fn shutdown(&self);
}

/// Entry points of the shared-memory runtime.
pub trait ShmProvider: Debug + Send + Sync + 'static {
    /// Opens a queue pair between `local` and the server listening at `remote`.
    ///
    /// `None` means the server is not listening yet.
    fn client_open(
        &self,
        local: &str,
        remote: &str,
        chunk_size: usize,
    ) -> Option<Box<dyn QueueContext>>;

    fn client_close(&self, local: &str, remote: &str) -> io::Result<()>;

    fn register_server(&self, local: &str) -> io::Result<Box<dyn ServerHandle>>;
}
