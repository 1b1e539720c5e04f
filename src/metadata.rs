//! Call metadata and its textual header form.
//!
//! Keys are lower-cased. Values of keys ending in `-bin` are arbitrary bytes and
//! travel base64 encoded (URL-safe alphabet); every other value must be a valid
//! single-line string. Trailers share the header block, marked with
//! [`TRAILER_PREFIX`].

use crate::errors::CodecError;
use crate::frames::headers::{is_reserved, Headers, BINARY_SUFFIX, TRAILER_PREFIX};
use crate::frames::CodecResult;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::time::Duration;

const BINARY_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_encode_padding(true)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Multi-valued, case-insensitive call metadata.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Metadata {
    entries: BTreeMap<String, Vec<Bytes>>,
}

impl Metadata {
    pub fn new() -> Metadata {
        Metadata::default()
    }

    /// Appends `value` under `key`, after any values already present.
    pub fn insert<K: AsRef<str>, V: Into<Bytes>>(&mut self, key: K, value: V) {
        self.entries
            .entry(key.as_ref().to_ascii_lowercase())
            .or_default()
            .push(value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Bytes> {
        self.get_all(key).first()
    }

    /// First value of `key` as a string, if it is valid UTF-8.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key)
            .and_then(|value| std::str::from_utf8(value).ok())
    }

    pub fn get_all(&self, key: &str) -> &[Bytes] {
        self.entries
            .get(&key.to_ascii_lowercase())
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn remove(&mut self, key: &str) -> Option<Vec<Bytes>> {
        self.entries.remove(&key.to_ascii_lowercase())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(&key.to_ascii_lowercase())
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Every `(key, value)` pair, repeated keys in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Bytes)> {
        self.entries
            .iter()
            .flat_map(|(key, values)| values.iter().map(move |value| (key.as_str(), value)))
    }

    /// Number of distinct keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Appends all values of `other`.
    pub fn merge(&mut self, other: Metadata) {
        for (key, values) in other.entries {
            self.entries.entry(key).or_default().extend(values);
        }
    }
}

impl<K: AsRef<str>, V: Into<Bytes>> FromIterator<(K, V)> for Metadata {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut metadata = Metadata::new();
        for (key, value) in iter {
            metadata.insert(key, value);
        }
        metadata
    }
}

pub fn is_binary_key(key: &str) -> bool {
    key.len() > BINARY_SUFFIX.len() && key.to_ascii_lowercase().ends_with(BINARY_SUFFIX)
}

/// Appends `metadata` to `headers`, each name prefixed with `prefix`.
///
/// Reserved names are skipped.
pub fn to_headers(metadata: &Metadata, prefix: &str, headers: &mut Headers) -> CodecResult<()> {
    for (key, value) in metadata.iter() {
        if is_reserved(key) {
            debug!("Skipping reserved metadata key '{}'", key);
            continue;
        }
        let value = if is_binary_key(key) {
            BINARY_ENGINE.encode(value)
        } else {
            text_value(key, value)?
        };
        headers.add(format!("{}{}", prefix, key), value);
    }
    Ok(())
}

/// Converts every header into metadata, decoding binary values.
pub fn from_headers(headers: &Headers) -> CodecResult<Metadata> {
    let mut metadata = Metadata::new();
    for (name, value) in headers.iter() {
        let key = name.to_ascii_lowercase();
        let value = if is_binary_key(&key) {
            Bytes::from(BINARY_ENGINE.decode(value)?)
        } else {
            Bytes::copy_from_slice(value.as_bytes())
        };
        metadata.insert(key, value);
    }
    Ok(metadata)
}

/// Moves trailer-prefixed headers out of `headers`, returning them with the prefix stripped.
pub fn split_trailers(headers: &mut Headers) -> Headers {
    let (trailers, rest): (Vec<_>, Vec<_>) = headers
        .iter()
        .map(|(name, value)| (name.to_string(), value.to_string()))
        .partition(|(name, _)| trailer_key(name).is_some());
    *headers = rest.into_iter().collect();
    trailers
        .into_iter()
        .filter_map(|(name, value)| trailer_key(&name).map(|key| (key.to_string(), value)))
        .collect()
}

fn trailer_key(name: &str) -> Option<&str> {
    if name.len() <= TRAILER_PREFIX.len() || !name.is_char_boundary(TRAILER_PREFIX.len()) {
        return None;
    }
    let (prefix, key) = name.split_at(TRAILER_PREFIX.len());
    if prefix.eq_ignore_ascii_case(TRAILER_PREFIX) {
        Some(key)
    } else {
        None
    }
}

/// Renders a remaining call time as a timeout header value, in whole milliseconds (at least 1).
pub fn encode_timeout(remaining: Duration) -> String {
    format!("{}m", remaining.as_millis().max(1))
}

/// Parses a timeout header value (`<digits><unit>`, unit one of `H M S m u n`).
pub fn decode_timeout(value: &str) -> Option<Duration> {
    let value = value.trim();
    let unit = value.chars().last()?;
    let amount = atoi::atoi::<u64>(value[..value.len() - unit.len_utf8()].as_bytes())?;
    match unit {
        'H' => Some(Duration::from_secs(amount.saturating_mul(3600))),
        'M' => Some(Duration::from_secs(amount.saturating_mul(60))),
        'S' => Some(Duration::from_secs(amount)),
        'm' => Some(Duration::from_millis(amount)),
        'u' => Some(Duration::from_micros(amount)),
        'n' => Some(Duration::from_nanos(amount)),
        _ => None,
    }
}

fn text_value(key: &str, value: &Bytes) -> CodecResult<String> {
    let value = std::str::from_utf8(value)
        .map_err(|_| CodecError::InvalidHeaderValue(key.to_string()))?;
    if value.contains(|c: char| c == '\r' || c == '\n') {
        return Err(CodecError::InvalidHeaderValue(key.to_string()));
    }
    Ok(value.to_string())
}
