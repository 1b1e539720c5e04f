//! Unary RPC over shared-memory queue pairs.
//!
//! ## Overview
//!
//! A client and a server exchange calls through a queue pair: two fixed-chunk
//! byte channels, one carrying requests and one carrying responses. Calls are
//! framed as HTTP/1.1-like envelopes (start line, headers, blank line, payload),
//! metadata travels as headers (`-bin` keys base64 encoded) and trailers as
//! `x-grpc-trailer-` prefixed headers.
//!
//! * [x] Unary calls through the [`UnaryChannel`] trait,
//! * [x] Dialing with exponential backoff until the server shows up,
//! * [x] Metadata, trailers, per-call credentials and deadline propagation,
//! * [x] gRPC-style status codes,
//! * [x] Payloads: raw bytes, JSON (`json` feature), Protocol Buffers (`protobuf` feature),
//! * [x] Server with sync and async handlers,
//! * [x] Channel pooling for parallel calls,
//! * [ ] Streaming calls,
//! * [ ] Binding to the native shared-memory runtime (plug it in through [`shm::ShmProvider`]).
//!
//! By default a message ends with the first read shorter than the chunk size.
//! A message whose length is an exact multiple of the chunk size therefore looks
//! unfinished to its reader. [`Framing::LengthPrefixed`] avoids that at the cost
//! of wire compatibility with peers using the default framing.
//!
//! ## Examples
//!
//! ```
//! use notnets_rs::handler::{HandlerResult, IncomingRequest, Reply, RequestHandler};
//! use notnets_rs::messages::RawMessage;
//! use notnets_rs::shm::memory::MemoryProvider;
//! use notnets_rs::{
//!     CallContext, CallOptions, Config, Dialer, NResult, NotnetsServer, ServerContext,
//!     UnaryChannel,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> NResult<()> {
//!     let provider = Arc::new(MemoryProvider::new());
//!
//!     // Server
//!     let server = Arc::new(NotnetsServer::new(Config::default()));
//!     server.register("/Echo/Say", Handler {}).await?;
//!     let context = ServerContext::register(provider.clone(), "srv-echo")?;
//!     let serving = tokio::spawn({
//!         let server = server.clone();
//!         async move { server.serve(context).await }
//!     });
//!
//!     // Client
//!     let dialer = Dialer::new(Arc::new(Config::default()), provider);
//!     let channel = dialer.dial("client", "srv-echo").await?;
//!     let request = RawMessage::from(b"hello".to_vec());
//!     let response: RawMessage = channel
//!         .invoke(&CallContext::new(), "/Echo/Say", &request, &mut CallOptions::new())
//!         .await?;
//!     channel.close()?;
//!
//!     // Server shutdown
//!     server.shutdown();
//!     serving.await.expect("server task panicked")?;
//!
//!     assert_eq!(b"hello", response.body().as_ref());
//!     Ok(())
//! }
//!
//! #[derive(Debug)]
//! struct Handler {}
//! impl RequestHandler for Handler {
//!     type REQ = RawMessage;
//!     type RES = RawMessage;
//!     fn handle(&mut self, request: IncomingRequest<RawMessage>) -> HandlerResult<Reply<RawMessage>> {
//!         Ok(Reply::new(request.into_message()))
//!     }
//! }
//! ```

#[macro_use]
extern crate getset;
#[macro_use]
extern crate num_derive;
#[macro_use]
extern crate derive_builder;
#[macro_use]
extern crate derive_new;
#[macro_use]
extern crate bitflags;
#[macro_use]
extern crate log;

pub(crate) mod channel;
pub(crate) mod config;
pub(crate) mod context;
pub(crate) mod defragmentation;
pub(crate) mod fragmentation;
pub(crate) mod options;
pub(crate) mod pool;
pub(crate) mod server;

/// Queue pair connections and the client dialer.
pub mod connection;
/// Notnets errors.
pub mod errors;
/// Request and response envelopes.
pub mod frames;
/// Handlers registered in [`NotnetsServer`](crate::NotnetsServer).
pub mod handler;
/// Payloads sent through [`UnaryChannel::invoke`](crate::UnaryChannel::invoke) and handled by [`RequestHandler`](crate::handler::RequestHandler) ([`RequestHandlerAsync`](crate::handler::RequestHandlerAsync)).
pub mod messages;
/// Call metadata and its header form.
pub mod metadata;
/// Boundary to the shared-memory queue runtime.
pub mod shm;
/// Call status codes.
pub mod status;

pub use self::channel::NResult;
pub use self::channel::{NotnetsChannel, UnaryChannel};
pub use self::connection::dialer::{Backoff, Dialer};
pub use self::connection::{Connection, ShmAddr};
pub use self::context::CallContext;
pub use self::defragmentation::Framing;
pub use self::options::{CallOptions, Capture, PerRpcCredentials};
pub use self::pool::ChannelPool;
pub use self::server::{IncomingCall, NotnetsServer, ServerConnection, ServerContext};
pub use config::Config;
pub use config::ConfigBuilder;

use std::sync::Arc;

/// Dials `remote` from `local` through the process-wide [`MemoryProvider`](shm::memory::MemoryProvider).
///
/// Waits for the server as long as it takes.
pub async fn dial<L: Into<ShmAddr>, R: Into<ShmAddr>>(
    local: L,
    remote: R,
    chunk_size: usize,
) -> NResult<NotnetsChannel> {
    let config = Arc::new(Config::with_chunk_size(chunk_size));
    let dialer = Dialer::new(config, Arc::new(shm::memory::MemoryProvider::global()));
    Ok(dialer.dial(local, remote).await?)
}
