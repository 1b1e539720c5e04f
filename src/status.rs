use std::fmt::{Display, Formatter};
use strum_macros::{AsRefStr, EnumString};

/// Call status codes, numbered the same way as gRPC.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, FromPrimitive, ToPrimitive, EnumString, AsRefStr,
)]
pub enum Code {
    #[strum(serialize = "OK")]
    Ok = 0,
    #[strum(serialize = "CANCELED")]
    Canceled = 1,
    #[strum(serialize = "UNKNOWN")]
    Unknown = 2,
    #[strum(serialize = "INVALID_ARGUMENT")]
    InvalidArgument = 3,
    #[strum(serialize = "DEADLINE_EXCEEDED")]
    DeadlineExceeded = 4,
    #[strum(serialize = "NOT_FOUND")]
    NotFound = 5,
    #[strum(serialize = "ALREADY_EXISTS")]
    AlreadyExists = 6,
    #[strum(serialize = "PERMISSION_DENIED")]
    PermissionDenied = 7,
    #[strum(serialize = "RESOURCE_EXHAUSTED")]
    ResourceExhausted = 8,
    #[strum(serialize = "FAILED_PRECONDITION")]
    FailedPrecondition = 9,
    #[strum(serialize = "ABORTED")]
    Aborted = 10,
    #[strum(serialize = "OUT_OF_RANGE")]
    OutOfRange = 11,
    #[strum(serialize = "UNIMPLEMENTED")]
    Unimplemented = 12,
    #[strum(serialize = "INTERNAL")]
    Internal = 13,
    #[strum(serialize = "UNAVAILABLE")]
    Unavailable = 14,
    #[strum(serialize = "DATA_LOSS")]
    DataLoss = 15,
    #[strum(serialize = "UNAUTHENTICATED")]
    Unauthenticated = 16,
}

impl Code {
    /// Parses the numeric form carried in the `grpc-status` trailer.
    pub fn from_header(value: &str) -> Code {
        atoi::atoi::<u32>(value.trim().as_bytes())
            .and_then(num_traits::FromPrimitive::from_u32)
            .unwrap_or(Code::Unknown)
    }

    pub fn to_header(self) -> String {
        num_traits::ToPrimitive::to_u32(&self)
            .unwrap_or(Code::Unknown as u32)
            .to_string()
    }

    /// Code for a response start line that carries no status trailer.
    pub fn from_http(status: u16) -> Code {
        match status {
            200 => Code::Ok,
            400 => Code::Internal,
            401 => Code::Unauthenticated,
            403 => Code::PermissionDenied,
            404 => Code::Unimplemented,
            429 | 502 | 503 | 504 => Code::Unavailable,
            _ => Code::Unknown,
        }
    }
}

/// Outcome of a call: a code plus a human readable message.
#[derive(Debug, Clone, PartialEq, Eq, Getters, CopyGetters, new)]
pub struct Status {
    #[get_copy = "pub"]
    code: Code,
    #[get = "pub"]
    message: String,
}

impl Status {
    pub fn ok() -> Status {
        Status::new(Code::Ok, String::new())
    }

    pub fn is_ok(&self) -> bool {
        self.code == Code::Ok
    }

    pub fn unimplemented<S: Into<String>>(message: S) -> Status {
        Status::new(Code::Unimplemented, message.into())
    }

    pub fn internal<S: Into<String>>(message: S) -> Status {
        Status::new(Code::Internal, message.into())
    }

    pub fn invalid_argument<S: Into<String>>(message: S) -> Status {
        Status::new(Code::InvalidArgument, message.into())
    }
}

impl Display for Status {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Status {}: {}", self.code.as_ref(), self.message)
    }
}

impl std::error::Error for Status {}
