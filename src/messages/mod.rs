use crate::frames::CodecResult;
use bytes::Bytes;
use std::fmt::Debug;
use strum_macros::{AsRefStr, Display, EnumString};

#[cfg(feature = "json")]
pub mod json;
#[cfg(feature = "protobuf")]
pub mod proto;
pub mod raw;

#[cfg(feature = "json")]
pub use json::JsonMessage;
#[cfg(feature = "protobuf")]
pub use proto::ProtoMessage;
pub use raw::RawMessage;

/// Payload encodings, named by the `content-type` header they travel under.
#[derive(Display, AsRefStr, EnumString, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentType {
    #[strum(serialize = "application/x-protobuf")]
    Protobuf,
    #[strum(serialize = "application/json")]
    Json,
    #[strum(serialize = "application/octet-stream")]
    Raw,
}

/// Payload carried by a unary call.
///
/// The content type is written into every envelope; the receiving side refuses
/// a payload declared with a different one.
pub trait Message: Debug + Sized + Send + Sync {
    fn content_type() -> ContentType;

    fn encode(&self) -> CodecResult<Bytes>;

    fn decode(payload: Bytes) -> CodecResult<Self>;
}
