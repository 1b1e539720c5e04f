use crate::errors::CodecError;
use crate::frames::CodecResult;
use crate::messages::{ContentType, Message};
use bytes::Bytes;
use std::fmt::Debug;

/// Protocol Buffers payload wrapping any `prost` message.
#[derive(Debug, Clone, Default, PartialEq, new)]
pub struct ProtoMessage<T: prost::Message + Default> {
    inner: T,
}

impl<T: prost::Message + Default> ProtoMessage<T> {
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    pub fn into_inner(self) -> T {
        self.inner
    }
}

impl<T: prost::Message + Default> From<T> for ProtoMessage<T> {
    fn from(inner: T) -> Self {
        ProtoMessage::new(inner)
    }
}

impl<T: prost::Message + Default + Sync> Message for ProtoMessage<T> {
    fn content_type() -> ContentType {
        ContentType::Protobuf
    }

    fn encode(&self) -> CodecResult<Bytes> {
        Ok(self.inner.encode_to_vec().into())
    }

    fn decode(payload: Bytes) -> CodecResult<Self> {
        let inner =
            T::decode(payload).map_err(|err| CodecError::DecodingError(err.to_string()))?;
        Ok(ProtoMessage::new(inner))
    }
}
