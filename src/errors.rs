use crate::status::{Code, Status};
use bb8::RunError;
use std::fmt::{Display, Formatter};
use std::str::Utf8Error;
use thiserror::Error;
use tokio::task::JoinError;

#[derive(Error, Debug, PartialEq)]
pub enum NotnetsError {
    /// Represents general error.
    #[error("Notnets error: {0}")]
    Error(String),

    #[error(transparent)]
    CodecError(#[from] CodecError),

    #[error(transparent)]
    ConnectionError(#[from] ConnectionError),

    #[error(transparent)]
    ConnectionPoolError(#[from] RunError<ConnectionError>),

    /// Non-OK status returned by the peer.
    #[error("{0}")]
    Status(Status),

    /// Calling context got canceled before the call could complete.
    #[error("Call canceled")]
    Canceled,

    /// Calling context deadline passed before the call could complete.
    #[error("Call deadline exceeded")]
    DeadlineExceeded,

    #[error("Credentials error: {0}")]
    CredentialsError(String),
}

impl NotnetsError {
    /// Status reported to the peer (server side) or to the caller for this error.
    pub fn to_status(&self) -> Status {
        match self {
            NotnetsError::Status(status) => status.clone(),
            NotnetsError::Canceled => Status::new(Code::Canceled, self.to_string()),
            NotnetsError::DeadlineExceeded => {
                Status::new(Code::DeadlineExceeded, self.to_string())
            }
            NotnetsError::CredentialsError(_) => {
                Status::new(Code::Unauthenticated, self.to_string())
            }
            NotnetsError::CodecError(_) => Status::new(Code::Internal, self.to_string()),
            NotnetsError::ConnectionError(_) | NotnetsError::ConnectionPoolError(_) => {
                Status::new(Code::Unavailable, self.to_string())
            }
            NotnetsError::Error(_) => Status::new(Code::Unknown, self.to_string()),
        }
    }
}

/// Envelope, metadata and payload encoding error.
#[derive(Error, Debug, PartialEq)]
pub enum CodecError {
    #[error("Codec error: {0}")]
    Error(String),

    /// Represents all cases of `std::io::Error`.
    #[error(transparent)]
    IoError(#[from] IoError),

    #[error(transparent)]
    StrDecodingError(#[from] Utf8Error),

    /// Binary metadata value was not valid base64.
    #[error(transparent)]
    Base64Error(#[from] base64::DecodeError),

    /// Accumulated bytes do not form a valid request or response.
    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(String),

    #[error("Invalid header value for '{0}'")]
    InvalidHeaderValue(String),

    #[error("Message of {size} bytes exceeds limit of {limit} bytes")]
    MessageTooLarge { size: usize, limit: usize },

    #[error("Payload encoding failed: {0}")]
    EncodingError(String),

    #[error("Payload decoding failed: {0}")]
    DecodingError(String),
}

/// Shared-memory connection error.
#[derive(Error, Debug, PartialEq)]
pub enum ConnectionError {
    /// Represents general error.
    #[error("Connection error: {0}")]
    Error(String),

    /// Represents all cases of `std::io::Error`.
    #[error(transparent)]
    IoError(#[from] IoError),

    /// Framing related error.
    #[error(transparent)]
    FrameError(#[from] CodecError),

    #[error("Failed to open queue pair {local} -> {remote} after {attempts} attempts")]
    DialTimeout {
        local: String,
        remote: String,
        attempts: u32,
    },
}

#[derive(Error, Debug)]
pub struct IoError(std::io::Error);

impl IoError {
    pub fn kind(&self) -> std::io::ErrorKind {
        self.0.kind()
    }
}

impl PartialEq for IoError {
    fn eq(&self, _other: &Self) -> bool {
        false
    }
}

impl Display for IoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl From<std::io::Error> for CodecError {
    fn from(err: std::io::Error) -> Self {
        CodecError::IoError(IoError(err))
    }
}

impl From<std::io::Error> for ConnectionError {
    fn from(err: std::io::Error) -> Self {
        ConnectionError::IoError(IoError(err))
    }
}

impl From<JoinError> for ConnectionError {
    fn from(err: JoinError) -> Self {
        ConnectionError::Error(format!("Queue task failed: {}", err))
    }
}

impl From<String> for NotnetsError {
    fn from(err: String) -> Self {
        NotnetsError::Error(err)
    }
}

impl From<String> for ConnectionError {
    fn from(err: String) -> Self {
        ConnectionError::Error(err)
    }
}

impl From<String> for CodecError {
    fn from(err: String) -> Self {
        CodecError::Error(err)
    }
}

impl From<Status> for NotnetsError {
    fn from(status: Status) -> Self {
        NotnetsError::Status(status)
    }
}
