use crate::config::Config;
use crate::connection::Connection;
use crate::context::CallContext;
use crate::defragmentation::{Defragmenter, Framing};
use crate::errors::{CodecError, ConnectionError, NotnetsError};
use crate::fragmentation::Fragmenter;
use crate::frames::headers::{HeaderKey, Headers};
use crate::frames::{RequestEnvelope, ResponseEnvelope};
use crate::messages::Message;
use crate::metadata::{self, Metadata};
use crate::options::CallOptions;
use crate::status::{Code, Status};
use async_trait::async_trait;
use bytes::Bytes;
use log::{debug, trace, warn};
use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;

pub type NResult<T> = Result<T, NotnetsError>;

/// Unary call capability, independent of the transport carrying it.
#[async_trait]
pub trait UnaryChannel: Debug + Send + Sync {
    /// Calls `method` (`/Service/Method`) with `request` and waits for the response.
    async fn invoke<REQ: Message, RES: Message>(
        &self,
        context: &CallContext,
        method: &str,
        request: &REQ,
        options: &mut CallOptions,
    ) -> NResult<RES>;
}

/// Client end of one queue pair.
///
/// The envelope carries no request id, so round trips on one channel are
/// serialized: concurrent `invoke`s wait for each other. Use a
/// [`ChannelPool`](crate::pool::ChannelPool) for parallel calls.
#[derive(Debug)]
pub struct NotnetsChannel {
    connection: Connection,
    chunk_size: usize,
    framing: Framing,
    max_message_size: usize,
    call_lock: Mutex<()>,
    broken: AtomicBool,
}

impl NotnetsChannel {
    pub(crate) fn new(connection: Connection, config: &Config) -> NotnetsChannel {
        NotnetsChannel {
            connection,
            chunk_size: *config.chunk_size(),
            framing: *config.framing(),
            max_message_size: *config.max_message_size(),
            call_lock: Mutex::new(()),
            broken: AtomicBool::new(false),
        }
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Whether a failed read or write left the queue pair in an unknown state.
    pub fn is_broken(&self) -> bool {
        self.broken.load(Ordering::Relaxed)
    }

    /// Closes the underlying queue pair.
    pub fn close(self) -> NResult<()> {
        Ok(self.connection.close()?)
    }

    async fn round_trip(&self, request: Bytes) -> NResult<Bytes> {
        let _call = self.call_lock.lock().await;
        self.check_broken()?;
        // Dropped mid-call, the response (or part of it) stays queued.
        let mut guard = BreakOnDrop {
            broken: &self.broken,
            armed: true,
        };
        let response = self.write_then_read(request).await;
        match &response {
            Ok(_) => guard.armed = false,
            Err(err) => warn!("Channel to {} broke: {}", self.connection.remote_addr(), err),
        }
        response
    }

    fn check_broken(&self) -> NResult<()> {
        if self.is_broken() {
            return Err(ConnectionError::Error(format!(
                "Channel to {} is broken",
                self.connection.remote_addr()
            ))
            .into());
        }
        Ok(())
    }

    async fn write_then_read(&self, request: Bytes) -> NResult<Bytes> {
        Fragmenter::new(
            &self.connection,
            self.chunk_size,
            self.framing,
            self.max_message_size,
        )
        .write_message(request)
        .await?;
        let response = Defragmenter::new(
            &self.connection,
            self.chunk_size,
            self.framing,
            self.max_message_size,
        )
        .read_message()
        .await?;
        Ok(response)
    }

    fn request_headers<REQ: Message>(
        context: &CallContext,
        outgoing: &Metadata,
    ) -> NResult<Headers> {
        let mut headers = Headers::new();
        metadata::to_headers(outgoing, "", &mut headers)?;
        if let Some(remaining) = context.remaining() {
            headers.set(
                HeaderKey::Timeout.as_ref(),
                metadata::encode_timeout(remaining),
            );
        }
        headers.set(HeaderKey::ContentType.as_ref(), REQ::content_type().as_ref());
        Ok(headers)
    }
}

#[async_trait]
impl UnaryChannel for NotnetsChannel {
    async fn invoke<REQ: Message, RES: Message>(
        &self,
        context: &CallContext,
        method: &str,
        request: &REQ,
        options: &mut CallOptions,
    ) -> NResult<RES> {
        context.check()?;
        self.check_broken()?;
        let remote = self.connection.remote_addr();
        debug!("Invoking {} on {}", method, remote);

        let uri = format!("shm://{}/{}", remote, method.trim_start_matches('/'));
        let mut outgoing = context.metadata().clone();
        outgoing.merge(options.credentials_metadata(&uri).await?);
        let headers = Self::request_headers::<REQ>(context, &outgoing)?;
        let payload = request.encode()?;
        let envelope = RequestEnvelope::for_call(method, remote.as_str(), headers, payload);
        trace!("Request envelope: {:?}", envelope);

        context.check()?;
        let response = self.round_trip(envelope.render()?).await?;

        let response = ResponseEnvelope::parse(response)?;
        trace!("Response envelope: {:?}", response);
        let (http_status, mut headers, payload) = response.into_parts();
        let trailers = metadata::split_trailers(&mut headers);
        let content_type = headers
            .get(HeaderKey::ContentType.as_ref())
            .map(str::to_string);
        let mut headers = metadata::from_headers(&headers)?;
        let mut trailers = metadata::from_headers(&trailers)?;
        let status = response_status(http_status, &mut headers, &mut trailers);
        options.capture_response(headers, trailers);

        if !status.is_ok() {
            debug!("Call {} failed: {}", method, status);
            return Err(NotnetsError::Status(status));
        }
        check_content_type::<RES>(content_type.as_deref())?;
        Ok(RES::decode(payload)?)
    }
}

/// Marks the channel broken unless disarmed before it drops.
struct BreakOnDrop<'a> {
    broken: &'a AtomicBool,
    armed: bool,
}

impl Drop for BreakOnDrop<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.broken.store(true, Ordering::Relaxed);
        }
    }
}

/// Takes the call status out of the response metadata.
///
/// Trailers win over headers; without either the HTTP status decides.
fn response_status(http_status: u16, headers: &mut Metadata, trailers: &mut Metadata) -> Status {
    let code = take_text(trailers, HeaderKey::Status)
        .or_else(|| take_text(headers, HeaderKey::Status));
    let message = take_text(trailers, HeaderKey::Message)
        .or_else(|| take_text(headers, HeaderKey::Message))
        .unwrap_or_default();
    match code {
        Some(code) => Status::new(Code::from_header(&code), message),
        None if http_status == 200 => Status::ok(),
        None => Status::new(
            Code::from_http(http_status),
            format!("Unexpected HTTP status {}", http_status),
        ),
    }
}

fn take_text(metadata: &mut Metadata, key: HeaderKey) -> Option<String> {
    metadata
        .remove(key.as_ref())
        .and_then(|values| values.into_iter().next())
        .map(|value| String::from_utf8_lossy(&value).into_owned())
}

pub(crate) fn check_content_type<M: Message>(
    content_type: Option<&str>,
) -> Result<(), CodecError> {
    let expected = M::content_type();
    match content_type {
        Some(content_type) if content_type.eq_ignore_ascii_case(expected.as_ref()) => Ok(()),
        other => Err(CodecError::Error(format!(
            "Unexpected content type {:?}, expected '{}'",
            other, expected
        ))),
    }
}
