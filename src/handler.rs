use crate::channel::check_content_type;
use crate::messages::{ContentType, Message};
use crate::metadata::Metadata;
use crate::status::Status;
use bytes::Bytes;
use futures::{future, Future};
use std::fmt::Debug;
use std::pin::Pin;
use std::time::Duration;

pub type HandlerResult<T> = Result<T, Status>;

/// Decoded request handed to a handler.
#[derive(Debug, Getters, CopyGetters, new)]
pub struct IncomingRequest<REQ: Message> {
    #[get = "pub"]
    method: String,
    /// Metadata sent by the client, credentials included.
    #[get = "pub"]
    metadata: Metadata,
    /// Time the client is willing to wait, when it set a deadline.
    #[get_copy = "pub"]
    timeout: Option<Duration>,
    #[get = "pub"]
    message: REQ,
}

impl<REQ: Message> IncomingRequest<REQ> {
    pub fn into_message(self) -> REQ {
        self.message
    }
}

/// Handler response: message plus metadata sent back as headers and trailers.
#[derive(Debug, Getters)]
#[get = "pub"]
pub struct Reply<RES: Message> {
    message: RES,
    headers: Metadata,
    trailers: Metadata,
}

impl<RES: Message> Reply<RES> {
    pub fn new(message: RES) -> Reply<RES> {
        Reply {
            message,
            headers: Metadata::new(),
            trailers: Metadata::new(),
        }
    }

    pub fn with_header<K: AsRef<str>, V: Into<Bytes>>(mut self, key: K, value: V) -> Self {
        self.headers.insert(key, value);
        self
    }

    pub fn with_trailer<K: AsRef<str>, V: Into<Bytes>>(mut self, key: K, value: V) -> Self {
        self.trailers.insert(key, value);
        self
    }

    pub(crate) fn encode(self) -> HandlerResult<PayloadReply> {
        let payload = self
            .message
            .encode()
            .map_err(|err| Status::internal(format!("Failed to encode response: {}", err)))?;
        Ok(PayloadReply::new(
            RES::content_type(),
            payload,
            self.headers,
            self.trailers,
        ))
    }
}

/// Trait for handling requests asynchronously.
///
/// Handler can be registered under a method path by calling [`NotnetsServer::register_async`](crate::NotnetsServer::register_async).
pub trait RequestHandlerAsync: Debug + Sync + Send {
    type REQ: Message;
    type RES: Message;
    fn handle(
        &mut self,
        request: IncomingRequest<Self::REQ>,
    ) -> Pin<Box<dyn Future<Output = HandlerResult<Reply<Self::RES>>> + Send + '_>>;
}

/// Trait for handling requests.
///
/// Handler can be registered under a method path by calling [`NotnetsServer::register`](crate::NotnetsServer::register).
pub trait RequestHandler: Debug + Sync + Send {
    type REQ: Message;
    type RES: Message;
    fn handle(&mut self, request: IncomingRequest<Self::REQ>) -> HandlerResult<Reply<Self::RES>>;
}

/// Request before payload decoding.
#[derive(Debug, new)]
pub(crate) struct PayloadRequest {
    method: String,
    metadata: Metadata,
    timeout: Option<Duration>,
    content_type: Option<String>,
    payload: Bytes,
}

impl PayloadRequest {
    fn decode<REQ: Message>(self) -> HandlerResult<IncomingRequest<REQ>> {
        check_content_type::<REQ>(self.content_type.as_deref())
            .map_err(|err| Status::internal(err.to_string()))?;
        let message = REQ::decode(self.payload)
            .map_err(|err| Status::internal(format!("Failed to decode request: {}", err)))?;
        Ok(IncomingRequest::new(
            self.method,
            self.metadata,
            self.timeout,
            message,
        ))
    }
}

/// Response after payload encoding.
#[derive(Debug, Getters, new)]
#[get = "pub(crate)"]
pub(crate) struct PayloadReply {
    content_type: ContentType,
    payload: Bytes,
    headers: Metadata,
    trailers: Metadata,
}

pub(crate) type PayloadResponse = HandlerResult<PayloadReply>;

pub(crate) trait PayloadHandler: Debug + Send + Sync {
    fn handle(
        &mut self,
        request: PayloadRequest,
    ) -> Pin<Box<dyn Future<Output = PayloadResponse> + Send + '_>>;
}

#[derive(Debug, new)]
pub(crate) struct RequestHandlerAsyncAdapter<HANDLER: RequestHandlerAsync>(HANDLER);

impl<HANDLER: RequestHandlerAsync> PayloadHandler for RequestHandlerAsyncAdapter<HANDLER> {
    fn handle(
        &mut self,
        request: PayloadRequest,
    ) -> Pin<Box<dyn Future<Output = PayloadResponse> + Send + '_>> {
        Box::pin(async move {
            let request = request.decode::<HANDLER::REQ>()?;
            self.0.handle(request).await?.encode()
        })
    }
}

#[derive(Debug, new)]
pub(crate) struct RequestHandlerAdapter<HANDLER: RequestHandler>(HANDLER);

impl<HANDLER: RequestHandler> RequestHandlerAdapter<HANDLER> {
    fn handle_sync(&mut self, request: PayloadRequest) -> PayloadResponse {
        let request = request.decode::<HANDLER::REQ>()?;
        self.0.handle(request)?.encode()
    }
}

impl<HANDLER: RequestHandler> PayloadHandler for RequestHandlerAdapter<HANDLER> {
    fn handle(
        &mut self,
        request: PayloadRequest,
    ) -> Pin<Box<dyn Future<Output = PayloadResponse> + Send + '_>> {
        Box::pin(future::ready(self.handle_sync(request)))
    }
}
