use crate::connection::{Connection, ConnectionResult};
use crate::defragmentation::{Framing, LENGTH_PREFIX_SIZE};
use crate::errors::CodecError;
use bytes::{BufMut, Bytes, BytesMut};
use log::{trace, warn};

/// Writes one whole message, prefixed with its length when the framing asks for it.
#[derive(Debug, new)]
pub struct Fragmenter<'a> {
    connection: &'a Connection,
    chunk_size: usize,
    framing: Framing,
    max_message_size: usize,
}

impl Fragmenter<'_> {
    pub async fn write_message(&self, message: Bytes) -> ConnectionResult<usize> {
        if message.len() > self.max_message_size {
            return Err(CodecError::MessageTooLarge {
                size: message.len(),
                limit: self.max_message_size,
            }
            .into());
        }
        let frame = match self.framing {
            Framing::ShortRead => {
                if self.chunk_size > 0
                    && !message.is_empty()
                    && message.len() % self.chunk_size == 0
                {
                    warn!(
                        "Message of {} bytes fills whole chunks of {} bytes, peer may wait for more",
                        message.len(),
                        self.chunk_size
                    );
                }
                message
            }
            Framing::LengthPrefixed => {
                let mut frame = BytesMut::with_capacity(LENGTH_PREFIX_SIZE + message.len());
                frame.put_u32(length_prefix(message.len())?);
                frame.put_slice(&message);
                frame.freeze()
            }
        };
        trace!("Sending message of {} bytes", frame.len());
        self.connection.write(&frame).await
    }
}

fn length_prefix(len: usize) -> Result<u32, CodecError> {
    u32::try_from(len).map_err(|_| CodecError::MessageTooLarge {
        size: len,
        limit: u32::MAX as usize,
    })
}
