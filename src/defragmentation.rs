use crate::connection::{Connection, ConnectionResult};
use crate::errors::CodecError;
use bytes::{Buf, Bytes, BytesMut};
use log::trace;

/// Size of the length field written in front of [`Framing::LengthPrefixed`] messages.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// How message ends are detected on the read side.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// A read returning fewer than `chunk_size` bytes ends the message.
    ///
    /// A message whose length is an exact multiple of the chunk size cannot be told
    /// apart from an unfinished one: the reader keeps waiting for another chunk.
    #[default]
    ShortRead,
    /// Every message starts with its length as a big-endian `u32`.
    LengthPrefixed,
}

/// Reassembles one message out of fixed-size chunk reads.
#[derive(Debug, new)]
pub struct Defragmenter<'a> {
    connection: &'a Connection,
    chunk_size: usize,
    framing: Framing,
    max_message_size: usize,
}

impl Defragmenter<'_> {
    pub async fn read_message(&self) -> ConnectionResult<Bytes> {
        match self.framing {
            Framing::ShortRead => self.read_until_short_read().await,
            Framing::LengthPrefixed => self.read_length_prefixed().await,
        }
    }

    /// An oversized message is still read to its end, so the next one starts on a fresh chunk.
    async fn read_until_short_read(&self) -> ConnectionResult<Bytes> {
        let mut chunk = BytesMut::zeroed(self.chunk_size);
        let mut message = BytesMut::new();
        let mut oversized = None;
        loop {
            let read = self.connection.read(&mut chunk).await?;
            match oversized.as_mut() {
                Some(size) => *size += read,
                None => {
                    message.extend_from_slice(&chunk[..read]);
                    if message.len() > self.max_message_size {
                        oversized = Some(message.len());
                        message.clear();
                    }
                }
            }
            if read < self.chunk_size {
                if let Some(size) = oversized {
                    return Err(self.too_large(size).into());
                }
                trace!("Received message of {} bytes", message.len());
                return Ok(message.freeze());
            }
        }
    }

    async fn read_length_prefixed(&self) -> ConnectionResult<Bytes> {
        let mut chunk = BytesMut::zeroed(self.chunk_size);
        let mut message = BytesMut::new();
        let mut expected = None;
        loop {
            let read = self.connection.read(&mut chunk).await?;
            message.extend_from_slice(&chunk[..read]);
            if expected.is_none() && message.len() >= LENGTH_PREFIX_SIZE {
                let length = message.get_u32() as usize;
                if length > self.max_message_size {
                    self.skip(length.saturating_sub(message.len()), &mut chunk)
                        .await?;
                    return Err(self.too_large(length).into());
                }
                expected = Some(length);
            }
            match expected {
                Some(length) if message.len() >= length => {
                    message.truncate(length);
                    trace!("Received message of {} bytes", length);
                    return Ok(message.freeze());
                }
                _ => continue,
            }
        }
    }

    async fn skip(&self, mut remaining: usize, chunk: &mut BytesMut) -> ConnectionResult<()> {
        while remaining > 0 {
            let read = self.connection.read(chunk).await?;
            remaining = remaining.saturating_sub(read);
        }
        Ok(())
    }

    fn too_large(&self, size: usize) -> CodecError {
        CodecError::MessageTooLarge {
            size,
            limit: self.max_message_size,
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{QueuePair, Role};
    use crate::fragmentation::Fragmenter;
    use crate::shm::memory::MemoryProvider;
    use crate::shm::{ServerHandle, ShmProvider};
    use std::sync::Arc;
    use std::time::Duration;
    use test_case::test_case;
    use tokio_test::assert_ok;

    const SERVER: &str = "defragmentation-test-server";
    const CLIENT: &str = "defragmentation-test-client";
    const CHUNK_SIZE: usize = 8;
    const LIMIT: usize = 1024;

    fn connect() -> (Connection, Connection, Box<dyn ServerHandle>) {
        let provider: Arc<dyn ShmProvider> = Arc::new(MemoryProvider::new());
        let server = provider.register_server(SERVER).unwrap();
        let client_queues = provider.client_open(CLIENT, SERVER, CHUNK_SIZE).unwrap();
        let server_queues = server.accept().unwrap();
        let client = Connection::new(
            Role::Client,
            QueuePair::new(client_queues),
            CLIENT.into(),
            SERVER.into(),
            provider.clone(),
        );
        let server_side = Connection::new(
            Role::Server,
            QueuePair::new(server_queues),
            SERVER.into(),
            CLIENT.into(),
            provider,
        );
        (client, server_side, server)
    }

    #[test_case(1;  "single byte")]
    #[test_case(7;  "just under one chunk")]
    #[test_case(9;  "just over one chunk")]
    #[test_case(29; "several chunks")]
    #[tokio::test]
    async fn short_read_reassembles(length: usize) {
        let (client, server_side, _server) = connect();
        let message: Bytes = (0..length).map(|i| i as u8).collect();
        let fragmenter = Fragmenter::new(&client, CHUNK_SIZE, Framing::ShortRead, LIMIT);
        assert_ok!(fragmenter.write_message(message.clone()).await);

        let defragmenter = Defragmenter::new(&server_side, CHUNK_SIZE, Framing::ShortRead, LIMIT);
        let received = assert_ok!(defragmenter.read_message().await);
        assert_eq!(message, received);
        assert_ok!(client.close());
    }

    #[test_case(0;  "empty")]
    #[test_case(4;  "prefix fills half a chunk")]
    #[test_case(8;  "one chunk")]
    #[test_case(12; "prefixed message fills two chunks")]
    #[test_case(64; "exact multiple")]
    #[tokio::test]
    async fn length_prefix_reassembles(length: usize) {
        let (client, server_side, _server) = connect();
        let message: Bytes = (0..length).map(|i| i as u8).collect();
        let fragmenter = Fragmenter::new(&client, CHUNK_SIZE, Framing::LengthPrefixed, LIMIT);
        assert_ok!(fragmenter.write_message(message.clone()).await);

        let defragmenter =
            Defragmenter::new(&server_side, CHUNK_SIZE, Framing::LengthPrefixed, LIMIT);
        let received = assert_ok!(defragmenter.read_message().await);
        assert_eq!(message, received);
        assert_ok!(client.close());
    }

    /// Known boundary case of short-read framing: a message of exactly N chunks
    /// looks unfinished, so the reader waits for a chunk that never comes.
    #[tokio::test]
    async fn short_read_waits_on_exact_multiple() {
        let (client, server_side, _server) = connect();
        let message = Bytes::from(vec![7u8; CHUNK_SIZE * 2]);
        assert_ok!(client.write(&message).await);

        let defragmenter = Defragmenter::new(&server_side, CHUNK_SIZE, Framing::ShortRead, LIMIT);
        let pending =
            tokio::time::timeout(Duration::from_millis(100), defragmenter.read_message()).await;
        assert!(pending.is_err(), "read finished on an exact multiple");

        // Unblocks the reader still parked inside the queue.
        assert_ok!(client.close());
    }

    #[test_case(Framing::ShortRead,      20; "short read")]
    #[test_case(Framing::LengthPrefixed, 20; "length prefixed")]
    #[tokio::test]
    async fn oversized_message_is_skipped(framing: Framing, size: usize) {
        let (client, server_side, _server) = connect();
        let fragmenter = Fragmenter::new(&client, CHUNK_SIZE, framing, LIMIT);
        assert_ok!(fragmenter.write_message(Bytes::from(vec![1u8; size])).await);
        assert_ok!(fragmenter.write_message(Bytes::from_static(b"next")).await);

        let defragmenter = Defragmenter::new(&server_side, CHUNK_SIZE, framing, 10);
        let err = defragmenter.read_message().await.unwrap_err();
        assert_eq!(
            crate::errors::ConnectionError::FrameError(CodecError::MessageTooLarge {
                size: 20,
                limit: 10
            }),
            err
        );
        let next = assert_ok!(defragmenter.read_message().await);
        assert_eq!(Bytes::from_static(b"next"), next);
        assert_ok!(client.close());
    }

    #[tokio::test]
    async fn read_error_aborts() {
        let (client, server_side, _server) = connect();
        assert_ok!(client.write(&[1u8; CHUNK_SIZE]).await);
        assert_ok!(client.close());

        let defragmenter = Defragmenter::new(&server_side, CHUNK_SIZE, Framing::ShortRead, LIMIT);
        assert!(defragmenter.read_message().await.is_err());
    }
}
