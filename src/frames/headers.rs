use std::fmt::Debug;
use strum_macros::{AsRefStr, Display, EnumString};

/// Header names with a meaning to the transport itself.
#[derive(Display, AsRefStr, EnumString, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HeaderKey {
    #[strum(serialize = "content-type")]
    ContentType,
    #[strum(serialize = "content-length")]
    ContentLength,
    #[strum(serialize = "host")]
    Host,
    #[strum(serialize = "grpc-timeout")]
    Timeout,
    #[strum(serialize = "grpc-status")]
    Status,
    #[strum(serialize = "grpc-message")]
    Message,
}

/// Header names never copied from metadata.
pub const RESERVED_HEADERS: [&str; 9] = [
    "accept-encoding",
    "connection",
    "content-type",
    "content-length",
    "keep-alive",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Marks headers that carry trailers.
pub const TRAILER_PREFIX: &str = "x-grpc-trailer-";

/// Marks metadata keys whose values are arbitrary bytes.
pub const BINARY_SUFFIX: &str = "-bin";

pub fn is_reserved(name: &str) -> bool {
    RESERVED_HEADERS
        .iter()
        .any(|reserved| reserved.eq_ignore_ascii_case(name))
}

/// Ordered, multi-valued header block. Names compare case-insensitively.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Headers {
        Headers::default()
    }

    /// Appends a value, keeping any already present under `name`.
    pub fn add<N: Into<String>, V: Into<String>>(&mut self, name: N, value: V) {
        self.entries.push((name.into(), value.into()));
    }

    /// Replaces all values of `name` with `value`.
    pub fn set<N: Into<String>, V: Into<String>>(&mut self, name: N, value: V) {
        let name = name.into();
        self.remove(&name);
        self.entries.push((name, value.into()));
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.entries
            .iter()
            .filter(move |(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Removes and returns the first value of `name`, keeping later ones.
    pub fn take(&mut self, name: &str) -> Option<String> {
        let index = self
            .entries
            .iter()
            .position(|(key, _)| key.eq_ignore_ascii_case(name))?;
        Some(self.entries.remove(index).1)
    }

    pub fn remove(&mut self, name: &str) {
        self.entries.retain(|(key, _)| !key.eq_ignore_ascii_case(name));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<N: Into<String>, V: Into<String>> FromIterator<(N, V)> for Headers {
    fn from_iter<T: IntoIterator<Item = (N, V)>>(iter: T) -> Self {
        let mut headers = Headers::new();
        for (name, value) in iter {
            headers.add(name, value);
        }
        headers
    }
}
