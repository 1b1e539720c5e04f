use crate::frames::CodecResult;
use crate::messages::{ContentType, Message};
use bytes::Bytes;
use std::fmt::{Display, Formatter};

/// `RawMessage` passes payload bytes through untouched.
///
/// Use it for custom encodings, or when the payload was already serialized elsewhere.
#[derive(Default, Debug, Clone, PartialEq, Eq, Getters, new)]
pub struct RawMessage {
    #[get = "pub"]
    body: Bytes,
}

impl RawMessage {
    pub fn into_body(self) -> Bytes {
        self.body
    }
}

impl Display for RawMessage {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Body: '{:?}'", self.body)
    }
}

impl From<Bytes> for RawMessage {
    fn from(body: Bytes) -> Self {
        RawMessage::new(body)
    }
}

impl From<Vec<u8>> for RawMessage {
    fn from(body: Vec<u8>) -> Self {
        RawMessage::new(body.into())
    }
}

impl From<&'static [u8]> for RawMessage {
    fn from(body: &'static [u8]) -> Self {
        RawMessage::new(Bytes::from_static(body))
    }
}

impl Message for RawMessage {
    fn content_type() -> ContentType {
        ContentType::Raw
    }

    fn encode(&self) -> CodecResult<Bytes> {
        Ok(self.body.clone())
    }

    fn decode(payload: Bytes) -> CodecResult<Self> {
        Ok(RawMessage::new(payload))
    }
}
