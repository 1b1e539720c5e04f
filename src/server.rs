use crate::channel::NResult;
use crate::config::Config;
use crate::connection::{Connection, ConnectionResult, QueuePair, Role, ShmAddr};
use crate::defragmentation::{Defragmenter, Framing};
use crate::errors::{CodecError, ConnectionError, NotnetsError};
use crate::fragmentation::Fragmenter;
use crate::frames::headers::{HeaderKey, Headers, TRAILER_PREFIX};
use crate::frames::{RequestEnvelope, ResponseEnvelope};
use crate::handler::{
    PayloadHandler, PayloadReply, PayloadRequest, Reply, RequestHandler, RequestHandlerAdapter,
    RequestHandlerAsync, RequestHandlerAsyncAdapter,
};
use crate::messages::Message;
use crate::metadata::{self, Metadata};
use crate::shm::{ServerHandle, ShmProvider};
use crate::status::{Code, Status};
use bytes::Bytes;
use futures::StreamExt;
use log::{debug, error, info, trace, warn};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio_stream::wrappers::IntervalStream;
use tokio_util::sync::CancellationToken;

type HandlerRef = Arc<Mutex<Box<dyn PayloadHandler>>>;
type SharedHandlers = Arc<RwLock<HashMap<String, HandlerRef>>>;

/// Listening endpoint registered with the queue runtime.
#[derive(Debug)]
pub struct ServerContext {
    addr: ShmAddr,
    provider: Arc<dyn ShmProvider>,
    handle: Box<dyn ServerHandle>,
    shut_down: bool,
}

impl ServerContext {
    /// Binds `addr`. Fails when another server already listens there.
    pub fn register<A: Into<ShmAddr>>(
        provider: Arc<dyn ShmProvider>,
        addr: A,
    ) -> ConnectionResult<ServerContext> {
        let addr = addr.into();
        let handle = provider.register_server(addr.as_str())?;
        info!("Server: listening on {}", addr);
        Ok(ServerContext {
            addr,
            provider,
            handle,
            shut_down: false,
        })
    }

    /// Server end of a newly attached queue pair, `None` when no client is waiting.
    pub fn accept(&self) -> Option<Connection> {
        let queues = QueuePair::new(self.handle.accept()?);
        let info = queues.info();
        let remote = ShmAddr::new(format!("{}#{}", self.addr, info.client_id()));
        debug!(
            "Server: accepted queue pair {} (request {:#x}, response {:#x})",
            info.client_id(),
            info.request_shmaddr(),
            info.response_shmaddr()
        );
        Some(Connection::new(
            Role::Server,
            queues,
            self.addr.clone(),
            remote,
            self.provider.clone(),
        ))
    }

    pub fn manage_pool(&self) {
        self.handle.manage_pool()
    }

    pub fn local_addr(&self) -> &ShmAddr {
        &self.addr
    }

    /// Releases the endpoint; attached queue pairs stop delivering data.
    pub fn shutdown(mut self) {
        self.release()
    }

    fn release(&mut self) {
        self.shut_down = true;
        info!("Server: releasing {}", self.addr);
        self.handle.shutdown()
    }
}

impl Drop for ServerContext {
    fn drop(&mut self) {
        if !self.shut_down {
            self.release()
        }
    }
}

/// Request read off a server connection, payload still encoded.
#[derive(Debug, Getters, CopyGetters)]
pub struct IncomingCall {
    #[get = "pub"]
    method: String,
    #[get = "pub"]
    metadata: Metadata,
    #[get_copy = "pub"]
    timeout: Option<Duration>,
    #[get = "pub"]
    content_type: Option<String>,
    #[get = "pub"]
    payload: Bytes,
}

impl IncomingCall {
    fn into_payload_request(self) -> PayloadRequest {
        PayloadRequest::new(
            self.method,
            self.metadata,
            self.timeout,
            self.content_type,
            self.payload,
        )
    }
}

/// Server end of one queue pair, speaking the same envelopes as [`NotnetsChannel`](crate::NotnetsChannel).
#[derive(Debug)]
pub struct ServerConnection {
    connection: Connection,
    chunk_size: usize,
    framing: Framing,
    max_message_size: usize,
}

impl ServerConnection {
    pub fn new(connection: Connection, config: &Config) -> ServerConnection {
        ServerConnection {
            connection,
            chunk_size: *config.chunk_size(),
            framing: *config.framing(),
            max_message_size: *config.max_message_size(),
        }
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Reads and parses the next request. `None` once the client closed its queue pair.
    pub async fn next_call(&self) -> NResult<Option<IncomingCall>> {
        let request = match Defragmenter::new(
            &self.connection,
            self.chunk_size,
            self.framing,
            self.max_message_size,
        )
        .read_message()
        .await
        {
            Ok(request) => request,
            Err(ConnectionError::IoError(err))
                if matches!(err.kind(), ErrorKind::UnexpectedEof | ErrorKind::BrokenPipe) =>
            {
                debug!("Server: {} disconnected", self.connection.remote_addr());
                return Ok(None);
            }
            Err(err) => return Err(err.into()),
        };
        let envelope = RequestEnvelope::parse(request)?;
        trace!("Server: request envelope {:?}", envelope);
        let (method, mut headers, payload) = envelope.into_parts();
        let timeout = headers
            .get(HeaderKey::Timeout.as_ref())
            .and_then(metadata::decode_timeout);
        headers.remove(HeaderKey::Timeout.as_ref());
        let content_type = headers
            .get(HeaderKey::ContentType.as_ref())
            .map(str::to_string);
        headers.remove(HeaderKey::ContentType.as_ref());
        let metadata = metadata::from_headers(&headers)?;
        Ok(Some(IncomingCall {
            method,
            metadata,
            timeout,
            content_type,
            payload,
        }))
    }

    /// Sends `reply` with an OK status.
    pub async fn reply<RES: Message>(&self, reply: Reply<RES>) -> NResult<()> {
        let reply = reply.encode().map_err(NotnetsError::Status)?;
        self.send_reply(reply).await
    }

    /// Sends a response carrying only `status`.
    pub async fn reply_status(&self, status: &Status) -> NResult<()> {
        self.send(status_response(200, status)).await
    }

    async fn send_reply(&self, reply: PayloadReply) -> NResult<()> {
        let response = match reply_response(&reply) {
            Ok(response) => response,
            Err(err) => {
                warn!("Server: invalid reply metadata: {}", err);
                status_response(200, &err.to_status())
            }
        };
        self.send(response).await
    }

    async fn send(&self, response: ResponseEnvelope) -> NResult<()> {
        trace!("Server: response envelope {:?}", response);
        Fragmenter::new(
            &self.connection,
            self.chunk_size,
            self.framing,
            self.max_message_size,
        )
        .write_message(response.render()?)
        .await?;
        Ok(())
    }

    pub fn close(self) -> NResult<()> {
        Ok(self.connection.close()?)
    }
}

fn reply_response(reply: &PayloadReply) -> NResult<ResponseEnvelope> {
    let mut headers = Headers::new();
    headers.set(
        HeaderKey::ContentType.as_ref(),
        reply.content_type().as_ref(),
    );
    metadata::to_headers(reply.headers(), "", &mut headers)?;
    metadata::to_headers(reply.trailers(), TRAILER_PREFIX, &mut headers)?;
    put_status(&mut headers, &Status::ok());
    Ok(ResponseEnvelope::ok(headers, reply.payload().clone()))
}

fn status_response(http_status: u16, status: &Status) -> ResponseEnvelope {
    let mut headers = Headers::new();
    put_status(&mut headers, status);
    ResponseEnvelope::new(http_status, headers, Bytes::new())
}

fn put_status(headers: &mut Headers, status: &Status) {
    headers.set(
        format!("{}{}", TRAILER_PREFIX, HeaderKey::Status),
        status.code().to_header(),
    );
    if !status.message().is_empty() {
        let message = status.message().replace(|c: char| c == '\r' || c == '\n', " ");
        headers.set(format!("{}{}", TRAILER_PREFIX, HeaderKey::Message), message);
    }
}

/// Unary call server dispatching requests to handlers registered by method path.
#[derive(Debug)]
pub struct NotnetsServer {
    config: Arc<Config>,
    handlers: SharedHandlers,
    shutdown: CancellationToken,
}

impl NotnetsServer {
    pub fn new(config: Config) -> NotnetsServer {
        NotnetsServer {
            config: Arc::new(config),
            handlers: Arc::new(RwLock::new(HashMap::new())),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Registers request handler under `method` (`/Service/Method`).
    pub async fn register<STR: AsRef<str>, HANDLER>(
        &self,
        method: STR,
        request_handler: HANDLER,
    ) -> NResult<()>
    where
        HANDLER: RequestHandler + 'static,
    {
        let handler_adapter = RequestHandlerAdapter::new(request_handler);
        self.register_handler(method, Arc::new(Mutex::new(Box::new(handler_adapter))))
            .await
    }

    /// Registers async request handler under `method` (`/Service/Method`).
    pub async fn register_async<STR: AsRef<str>, HANDLER>(
        &self,
        method: STR,
        request_handler: HANDLER,
    ) -> NResult<()>
    where
        HANDLER: RequestHandlerAsync + 'static,
    {
        let handler_adapter = RequestHandlerAsyncAdapter::new(request_handler);
        self.register_handler(method, Arc::new(Mutex::new(Box::new(handler_adapter))))
            .await
    }

    /// Unregister request handler.
    pub async fn unregister<STR: AsRef<str>>(&self, method: STR) -> NResult<()> {
        let mut handlers = self.handlers.write().await;
        match handlers.remove(&method_path(method.as_ref())) {
            Some(_) => Ok(()),
            None => Err(NotnetsError::Error(format!(
                "Handler '{}' is missing.",
                method.as_ref()
            ))),
        }
    }

    async fn register_handler<STR: AsRef<str>>(
        &self,
        method: STR,
        request_handler: HandlerRef,
    ) -> NResult<()> {
        let method = method_path(method.as_ref());
        let mut handlers = self.handlers.write().await;
        if handlers.contains_key(&method) {
            return Err(NotnetsError::Error(format!(
                "Handler already registered for '{}'",
                method
            )));
        }
        debug!("Server: registering handler for {}", method);
        handlers.insert(method, request_handler);
        Ok(())
    }

    /// Accepts clients attaching to `context` until [`shutdown`](Self::shutdown), then releases it.
    ///
    /// Every accepted queue pair is served by its own task. Idle polls run the
    /// runtime's pool maintenance.
    pub async fn serve(&self, context: ServerContext) -> NResult<()> {
        info!("Server: serving on {}", context.local_addr());
        let shutdown = self.shutdown.clone();
        let ticks = IntervalStream::new(tokio::time::interval(
            *self.config.accept_poll_interval(),
        ))
        .take_until(shutdown.cancelled());
        tokio::pin!(ticks);
        while ticks.next().await.is_some() {
            let mut accepted = false;
            while let Some(connection) = context.accept() {
                accepted = true;
                let connection = ServerConnection::new(connection, &self.config);
                let handlers = self.handlers.clone();
                tokio::spawn(async move {
                    let remote = connection.connection().remote_addr().clone();
                    if let Err(err) = Self::handle_connection(handlers, connection).await {
                        error!("Server: connection {} failed: {}", remote, err);
                    }
                });
            }
            if !accepted {
                context.manage_pool();
            }
        }
        context.shutdown();
        Ok(())
    }

    /// Stops a running [`serve`](Self::serve).
    pub fn shutdown(&self) {
        self.shutdown.cancel()
    }

    async fn handle_connection(
        handlers: SharedHandlers,
        connection: ServerConnection,
    ) -> NResult<()> {
        loop {
            let call = match connection.next_call().await {
                Ok(Some(call)) => call,
                Ok(None) => return Ok(()),
                Err(NotnetsError::CodecError(err)) => {
                    warn!("Server: malformed request: {}", err);
                    let status = Status::internal(format!("Malformed request: {}", err));
                    connection.send(status_response(400, &status)).await?;
                    continue;
                }
                Err(NotnetsError::ConnectionError(ConnectionError::FrameError(
                    err @ CodecError::MessageTooLarge { .. },
                ))) => {
                    warn!("Server: rejected request: {}", err);
                    let status = Status::new(Code::ResourceExhausted, err.to_string());
                    connection.reply_status(&status).await?;
                    continue;
                }
                Err(err) => return Err(err),
            };
            let sent = match Self::dispatch(&handlers, call).await {
                Ok(reply) => connection.send_reply(reply).await,
                Err(status) => connection.reply_status(&status).await,
            };
            match sent {
                Err(NotnetsError::ConnectionError(ConnectionError::FrameError(
                    err @ CodecError::MessageTooLarge { .. },
                ))) => {
                    warn!("Server: reply dropped: {}", err);
                    let status = Status::new(Code::ResourceExhausted, err.to_string());
                    connection.reply_status(&status).await?;
                }
                sent => sent?,
            }
        }
    }

    async fn dispatch(
        handlers: &SharedHandlers,
        call: IncomingCall,
    ) -> Result<PayloadReply, Status> {
        let handler = match handlers.read().await.get(call.method()) {
            Some(handler) => handler.clone(),
            None => {
                debug!("Server: no handler for {}", call.method());
                return Err(Status::unimplemented(format!(
                    "Unknown method '{}'",
                    call.method()
                )));
            }
        };
        let timeout = call.timeout();
        let method = call.method().clone();
        let mut handler = handler.lock().await;
        let response = handler.handle(call.into_payload_request());
        match timeout {
            Some(timeout) => tokio::time::timeout(timeout, response)
                .await
                .unwrap_or_else(|_| {
                    Err(Status::new(
                        Code::DeadlineExceeded,
                        format!("Handler for '{}' ran past the deadline", method),
                    ))
                }),
            None => response.await,
        }
    }
}

fn method_path(method: &str) -> String {
    format!("/{}", method.trim_start_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shm::memory::MemoryProvider;

    #[test]
    fn register_twice() {
        let provider: Arc<dyn ShmProvider> = Arc::new(MemoryProvider::new());
        let context = ServerContext::register(provider.clone(), "server-test").unwrap();
        assert!(ServerContext::register(provider.clone(), "server-test").is_err());
        context.shutdown();
        assert!(ServerContext::register(provider, "server-test").is_ok());
    }

    #[test]
    fn status_goes_into_trailers() {
        let status = Status::new(Code::NotFound, "no\r\nhotel".to_string());
        let response = status_response(200, &status);
        let headers = response.headers();
        assert_eq!(Some("5"), headers.get("x-grpc-trailer-grpc-status"));
        assert_eq!(Some("no  hotel"), headers.get("x-grpc-trailer-grpc-message"));
    }

    #[test]
    fn method_paths_get_leading_slash() {
        assert_eq!("/Service/Method", method_path("Service/Method"));
        assert_eq!("/Service/Method", method_path("/Service/Method"));
    }
}
