use crate::defragmentation::Framing;
use core::default::Default;
use core::option::Option::Some;
use core::time::Duration;

/// Size of a single queue chunk unless configured otherwise.
pub const DEFAULT_CHUNK_SIZE: usize = 2048;
/// Largest message accepted while reassembling chunks.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 4 * 1024 * 1024;

/// Notnets channel and server config
#[derive(Debug, Clone, Builder, Getters)]
#[builder(default)]
#[get = "pub"]
pub struct Config {
    /// Buffer size used for every queue read and write.
    pub(crate) chunk_size: usize,
    pub(crate) max_message_size: usize,
    pub(crate) framing: Framing,
    /// First dial retry delay, doubled after every failed attempt.
    pub(crate) backoff_initial: Duration,
    pub(crate) backoff_max: Duration,
    /// `None` keeps dialing until the server shows up.
    pub(crate) dial_attempts: Option<u32>,
    pub(crate) accept_poll_interval: Duration,
    pub(crate) max_connections: u32,
    pub(crate) lifetime: Option<Duration>,
    pub(crate) test_connection: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            framing: Framing::ShortRead,
            backoff_initial: Duration::from_secs(3),
            backoff_max: Duration::from_secs(25),
            dial_attempts: None,
            accept_poll_interval: Duration::from_millis(5),
            max_connections: 4,
            lifetime: Some(Duration::from_secs(60)),
            test_connection: false,
        }
    }
}

impl Config {
    pub fn with_chunk_size(chunk_size: usize) -> Config {
        Config {
            chunk_size,
            ..Config::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_falls_back_to_defaults() {
        let config = ConfigBuilder::default()
            .chunk_size(64)
            .dial_attempts(Some(3))
            .build()
            .unwrap();
        assert_eq!(64, *config.chunk_size());
        assert_eq!(Some(3), *config.dial_attempts());
        assert_eq!(Duration::from_secs(3), *config.backoff_initial());
        assert_eq!(Duration::from_secs(25), *config.backoff_max());
        assert_eq!(Framing::ShortRead, *config.framing());
    }
}
