//! Textual request/response envelopes.
//!
//! The layout follows HTTP/1.1: start line, `Name: value` header lines, a blank
//! line and the payload. `Content-Length` is always written, so a parser can tell a
//! truncated payload from a complete one.

use crate::errors::CodecError;
use crate::frames::headers::{HeaderKey, Headers};
use bytes::{BufMut, Bytes, BytesMut};

pub mod headers;

pub type CodecResult<T> = Result<T, CodecError>;

pub const PROTOCOL_VERSION: &str = "HTTP/1.1";
pub const REQUEST_VERB: &str = "POST";

const CRLF: &str = "\r\n";
const HEAD_END: &[u8] = b"\r\n\r\n";

/// Outbound call: method path, headers and encoded payload.
#[derive(Debug, Clone, PartialEq, Eq, Getters, new)]
#[get = "pub"]
pub struct RequestEnvelope {
    method: String,
    host: String,
    headers: Headers,
    payload: Bytes,
}

impl RequestEnvelope {
    /// Builds a request for `service_method` (`Service/Method`, leading slash optional).
    pub fn for_call<H: Into<String>>(
        service_method: &str,
        host: H,
        headers: Headers,
        payload: Bytes,
    ) -> RequestEnvelope {
        let method = format!("/{}", service_method.trim_start_matches('/'));
        RequestEnvelope::new(method, host.into(), headers, payload)
    }

    pub fn render(&self) -> CodecResult<Bytes> {
        let start_line = format!("{} {} {}", REQUEST_VERB, self.method, PROTOCOL_VERSION);
        let mut dst = BytesMut::with_capacity(256 + self.payload.len());
        put_line(&mut dst, &start_line);
        put_header(&mut dst, HeaderKey::Host.as_ref(), &self.host)?;
        put_head_and_payload(&mut dst, &self.headers, &self.payload)?;
        Ok(dst.freeze())
    }

    pub fn parse(src: Bytes) -> CodecResult<RequestEnvelope> {
        let (start_line, mut headers, payload) = split_message(src)?;
        let mut parts = start_line.splitn(3, ' ');
        let (_verb, method, version) = match (parts.next(), parts.next(), parts.next()) {
            (Some(verb), Some(method), Some(version)) => (verb, method, version),
            _ => return Err(malformed(format!("bad request line '{}'", start_line))),
        };
        check_version(version)?;
        if !method.starts_with('/') {
            return Err(malformed(format!("bad method path '{}'", method)));
        }
        let host = headers.take(HeaderKey::Host.as_ref()).unwrap_or_default();
        Ok(RequestEnvelope::new(method.to_string(), host, headers, payload))
    }

    pub fn into_parts(self) -> (String, Headers, Bytes) {
        (self.method, self.headers, self.payload)
    }
}

/// Reply to a call: status line, headers (trailers included) and encoded payload.
#[derive(Debug, Clone, PartialEq, Eq, Getters, new)]
#[get = "pub"]
pub struct ResponseEnvelope {
    status: u16,
    headers: Headers,
    payload: Bytes,
}

impl ResponseEnvelope {
    pub fn ok(headers: Headers, payload: Bytes) -> ResponseEnvelope {
        ResponseEnvelope::new(200, headers, payload)
    }

    pub fn render(&self) -> CodecResult<Bytes> {
        let start_line = format!(
            "{} {} {}",
            PROTOCOL_VERSION,
            self.status,
            reason_phrase(self.status)
        );
        let mut dst = BytesMut::with_capacity(256 + self.payload.len());
        put_line(&mut dst, &start_line);
        put_head_and_payload(&mut dst, &self.headers, &self.payload)?;
        Ok(dst.freeze())
    }

    pub fn parse(src: Bytes) -> CodecResult<ResponseEnvelope> {
        let (start_line, headers, payload) = split_message(src)?;
        let mut parts = start_line.splitn(3, ' ');
        let (version, status) = match (parts.next(), parts.next()) {
            (Some(version), Some(status)) => (version, status),
            _ => return Err(malformed(format!("bad status line '{}'", start_line))),
        };
        check_version(version)?;
        let status = atoi::atoi::<u16>(status.as_bytes())
            .ok_or_else(|| malformed(format!("bad status code '{}'", status)))?;
        Ok(ResponseEnvelope::new(status, headers, payload))
    }

    pub fn into_parts(self) -> (u16, Headers, Bytes) {
        (self.status, self.headers, self.payload)
    }
}

pub fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "Unknown",
    }
}

fn put_line(dst: &mut BytesMut, line: &str) {
    dst.put_slice(line.as_bytes());
    dst.put_slice(CRLF.as_bytes());
}

fn put_header(dst: &mut BytesMut, name: &str, value: &str) -> CodecResult<()> {
    if name.is_empty() || name.contains(|c: char| c == ':' || c.is_ascii_whitespace()) {
        return Err(CodecError::InvalidHeaderValue(name.to_string()));
    }
    if value.contains(|c: char| c == '\r' || c == '\n') {
        return Err(CodecError::InvalidHeaderValue(name.to_string()));
    }
    dst.put_slice(name.as_bytes());
    dst.put_slice(b": ");
    put_line(dst, value);
    Ok(())
}

fn put_head_and_payload(
    dst: &mut BytesMut,
    headers: &Headers,
    payload: &Bytes,
) -> CodecResult<()> {
    for (name, value) in headers.iter() {
        if name.eq_ignore_ascii_case(HeaderKey::ContentLength.as_ref()) {
            continue;
        }
        put_header(dst, name, value)?;
    }
    put_header(
        dst,
        HeaderKey::ContentLength.as_ref(),
        &payload.len().to_string(),
    )?;
    dst.put_slice(CRLF.as_bytes());
    dst.put_slice(payload);
    Ok(())
}

/// Splits a message into start line, headers (without `Content-Length`) and payload.
fn split_message(src: Bytes) -> CodecResult<(String, Headers, Bytes)> {
    let head_len = src
        .windows(HEAD_END.len())
        .position(|window| window == HEAD_END)
        .ok_or_else(|| malformed("missing end of header block".to_string()))?;
    let head = std::str::from_utf8(&src[..head_len])?;
    let mut lines = head.split(CRLF);
    let start_line = lines.next().unwrap_or_default().to_string();
    let mut headers = Headers::new();
    let mut content_length = None;
    for line in lines {
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| malformed(format!("bad header line '{}'", line)))?;
        let (name, value) = (name.trim(), value.trim());
        if name.eq_ignore_ascii_case(HeaderKey::ContentLength.as_ref()) {
            content_length = Some(
                atoi::atoi::<usize>(value.as_bytes())
                    .ok_or_else(|| malformed(format!("bad content length '{}'", value)))?,
            );
            continue;
        }
        headers.add(name, value);
    }
    let mut payload = src.slice(head_len + HEAD_END.len()..);
    if let Some(content_length) = content_length {
        if payload.len() < content_length {
            return Err(malformed(format!(
                "truncated payload: expected {} bytes, got {}",
                content_length,
                payload.len()
            )));
        }
        payload.truncate(content_length);
    }
    Ok((start_line, headers, payload))
}

fn check_version(version: &str) -> CodecResult<()> {
    if version.starts_with("HTTP/") {
        Ok(())
    } else {
        Err(malformed(format!("unsupported protocol '{}'", version)))
    }
}

fn malformed(reason: String) -> CodecError {
    CodecError::MalformedEnvelope(reason)
}
