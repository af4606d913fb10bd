//! The structured representation of a STOMP frame and its wire encoding.

use bytes::{BufMut, BytesMut};

use crate::error::{Result, StompError};
use crate::protocol::{self, StompVersion};

/// A STOMP frame: command, ordered headers and an opaque body.
///
/// Header order matters on the wire. Repeated header names are preserved;
/// the first occurrence is the authoritative value for lookups. A frame
/// compares equal to another exactly when all three fields do.
///
/// The frame with an empty command, no headers and no body is the
/// distinguished heart-beat frame, which encodes as a single line feed
/// (nothing at all on 1.0).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Frame {
    pub command: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Frame {
    pub fn new(command: impl Into<String>) -> Self {
        Frame {
            command: command.into(),
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    /// The heart-beat frame.
    pub fn heart_beat() -> Self {
        Frame::default()
    }

    pub fn is_heart_beat(&self) -> bool {
        self.command.is_empty()
    }

    /// Append a header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Append a header when `value` is present.
    pub fn opt_header(self, name: impl Into<String>, value: Option<impl Into<String>>) -> Self {
        match value {
            Some(value) => self.header(name, value),
            None => self,
        }
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// First occurrence of `name`, if any.
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// The declared `content-length`, if present and well formed.
    pub fn content_length(&self) -> Result<Option<usize>> {
        match self.get_header(protocol::header::CONTENT_LENGTH) {
            None => Ok(None),
            Some(value) => value.parse().map(Some).map_err(|_| {
                StompError::MalformedFrame(format!("invalid content-length: {value:?}"))
            }),
        }
    }

    /// Encode the frame into `buffer` in the wire format of `version`.
    ///
    /// A declared `content-length` must match the body; when the body
    /// contains a NUL byte and no length is declared, an accurate one is
    /// appended so the receiver can frame the body correctly.
    pub fn serialize(&self, version: StompVersion, buffer: &mut BytesMut) -> Result<()> {
        if self.is_heart_beat() {
            if version.has_escapes() {
                buffer.put_u8(protocol::LINE_DELIMITER);
            }
            return Ok(());
        }

        match self.content_length()? {
            Some(declared) if declared != self.body.len() => {
                return Err(StompError::MalformedFrame(format!(
                    "content-length {declared} does not match body length {}",
                    self.body.len()
                )));
            }
            _ => {}
        }

        let required = self.command.len()
            + self.body.len()
            + self
                .headers
                .iter()
                .fold(0, |acc, (k, v)| acc + k.len() + v.len() + 2)
            + 32;
        buffer.reserve(required);

        buffer.put_slice(self.command.as_bytes());
        buffer.put_u8(protocol::LINE_DELIMITER);

        let escape = !protocol::escapes_exempt(&self.command);
        for (name, value) in &self.headers {
            put_header(version, escape, name, value, buffer);
        }
        if self.body.contains(&protocol::FRAME_DELIMITER)
            && self.get_header(protocol::header::CONTENT_LENGTH).is_none()
        {
            put_header(
                version,
                escape,
                protocol::header::CONTENT_LENGTH,
                &self.body.len().to_string(),
                buffer,
            );
        }

        buffer.put_u8(protocol::LINE_DELIMITER);
        buffer.put_slice(&self.body);
        buffer.put_u8(protocol::FRAME_DELIMITER);
        Ok(())
    }
}

fn put_header(version: StompVersion, escape: bool, name: &str, value: &str, buffer: &mut BytesMut) {
    let (name, value) = if escape {
        (
            protocol::encode_header_text(version, name),
            protocol::encode_header_text(version, value),
        )
    } else {
        (name.into(), value.into())
    };
    buffer.put_slice(name.as_bytes());
    buffer.put_u8(b':');
    buffer.put_slice(value.as_bytes());
    buffer.put_u8(protocol::LINE_DELIMITER);
}
