use crate::errors::NotnetsError;
use crate::metadata::Metadata;
use crate::NResult;
use async_trait::async_trait;
use std::fmt::Debug;
use std::sync::Arc;

bitflags! {
    /// Response metadata copied back into [`CallOptions`] after a call.
    #[derive(Default)]
    pub struct Capture: u8 {
        const HEADERS = 0x01;
        const TRAILERS = 0x02;
    }
}

/// Credentials attaching metadata to every call, e.g. bearer tokens.
#[async_trait]
pub trait PerRpcCredentials: Debug + Send + Sync {
    /// Metadata for a call to `uri` (`shm://<server>/<Service>/<Method>`).
    async fn request_metadata(&self, uri: &str) -> NResult<Metadata>;

    /// Whether these credentials may only travel over a secure transport.
    ///
    /// Shared memory never leaves the host, so it counts as secure.
    fn require_transport_security(&self) -> bool {
        false
    }
}

/// Options of a single call: credentials in, captured response metadata out.
#[derive(Debug, Default, Clone)]
pub struct CallOptions {
    credentials: Vec<Arc<dyn PerRpcCredentials>>,
    capture: Capture,
    headers: Metadata,
    trailers: Metadata,
}

impl CallOptions {
    pub fn new() -> CallOptions {
        CallOptions::default()
    }

    pub fn with_credentials<C: PerRpcCredentials + 'static>(mut self, credentials: C) -> Self {
        self.credentials.push(Arc::new(credentials));
        self
    }

    pub fn with_capture(mut self, capture: Capture) -> Self {
        self.capture |= capture;
        self
    }

    pub fn capture(&self) -> Capture {
        self.capture
    }

    /// Response headers, if [`Capture::HEADERS`] was requested.
    pub fn headers(&self) -> &Metadata {
        &self.headers
    }

    /// Response trailers, if [`Capture::TRAILERS`] was requested.
    pub fn trailers(&self) -> &Metadata {
        &self.trailers
    }

    pub(crate) async fn credentials_metadata(&self, uri: &str) -> NResult<Metadata> {
        let mut metadata = Metadata::new();
        for credentials in &self.credentials {
            let attached = credentials.request_metadata(uri).await.map_err(|err| match err {
                NotnetsError::CredentialsError(_) => err,
                other => NotnetsError::CredentialsError(other.to_string()),
            })?;
            metadata.merge(attached);
        }
        Ok(metadata)
    }

    pub(crate) fn capture_response(&mut self, headers: Metadata, trailers: Metadata) {
        if self.capture.contains(Capture::HEADERS) {
            self.headers = headers;
        }
        if self.capture.contains(Capture::TRAILERS) {
            self.trailers = trailers;
        }
    }
}
