use crate::errors::CodecError;
use crate::frames::CodecResult;
use crate::messages::{ContentType, Message};
use bytes::Bytes;
use serde_json::Value;
use std::fmt::{Display, Formatter};

/// JSON document payload.
#[derive(Default, Debug, Clone, PartialEq, Getters, new)]
pub struct JsonMessage {
    #[get = "pub"]
    body: Value,
}

impl JsonMessage {
    pub fn into_body(self) -> Value {
        self.body
    }
}

impl Display for JsonMessage {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Body: '{}'", self.body)
    }
}

impl From<Value> for JsonMessage {
    fn from(body: Value) -> Self {
        JsonMessage::new(body)
    }
}

impl Message for JsonMessage {
    fn content_type() -> ContentType {
        ContentType::Json
    }

    fn encode(&self) -> CodecResult<Bytes> {
        let payload = serde_json::to_vec(&self.body)
            .map_err(|err| CodecError::EncodingError(err.to_string()))?;
        Ok(payload.into())
    }

    fn decode(payload: Bytes) -> CodecResult<Self> {
        if payload.is_empty() {
            return Ok(JsonMessage::new(Value::Null));
        }
        Ok(JsonMessage::new(serde_json::from_slice(&payload)?))
    }
}

impl From<serde_json::Error> for CodecError {
    fn from(err: serde_json::Error) -> Self {
        CodecError::DecodingError(err.to_string())
    }
}
