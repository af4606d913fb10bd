//! Incremental decoding of byte streams into [`Frame`]s.
//!
//! The grammar lives in [`parse_frame`], which works on a [`Partial`] input
//! and reports `Incomplete` until a whole frame is available. [`FrameParser`]
//! wraps it into a resumable state machine that accepts chunks of arbitrary
//! size, surfaces heart-beats, and applies per-version header unescaping.

use bytes::{Buf, BytesMut};
use winnow::{
    ModalResult, Parser, Partial,
    ascii::{alpha1, line_ending, till_line_ending},
    combinator::{repeat, separated_pair, terminated, trace},
    error::StrContext::Label,
    error::{ContextError, ErrMode},
    stream::Offset,
    token::{literal, take, take_till, take_until},
};

use crate::error::{Result, StompError};
use crate::frame::Frame;
use crate::protocol::{self, StompVersion};

/// A frame as it sits in the input buffer, before header unescaping.
pub(crate) struct RawFrame<'a> {
    pub command: &'a [u8],
    pub headers: Vec<(&'a [u8], &'a [u8])>,
    pub body: &'a [u8],
}

/// Extract the declared `content-length` from raw headers.
///
/// `Err` means the header is present but not a decimal number, which
/// poisons the whole frame since the body cannot be delimited.
fn content_length(headers: &[(&[u8], &[u8])]) -> std::result::Result<Option<usize>, ()> {
    for (name, value) in headers {
        if *name == protocol::header::CONTENT_LENGTH.as_bytes() {
            return std::str::from_utf8(value)
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Some)
                .ok_or(());
        }
    }
    Ok(None)
}

/// Parse one complete frame from the input.
///
/// Returns `Incomplete` when more bytes are needed. The caller is expected
/// to have consumed any leading heart-beat line endings already.
pub(crate) fn parse_frame<'a>(input: &mut Partial<&'a [u8]>) -> ModalResult<RawFrame<'a>> {
    let (command, headers): (_, Vec<_>) = trace(
        "parse_frame",
        (
            terminated(alpha1, line_ending),
            terminated(repeat(0.., parse_header), line_ending),
        ),
    )
    .context(Label("Command/Headers"))
    .parse_next(input)?;

    let body: &[u8] = match content_length(&headers) {
        Ok(None) => take_until(0.., "\x00")
            .context(Label("Body (null terminated)"))
            .parse_next(input)?,
        Ok(Some(length)) => take(length)
            .context(Label("Body (fixed size)"))
            .parse_next(input)?,
        Err(()) => return Err(ErrMode::Cut(ContextError::new())),
    };

    literal("\x00")
        .context(Label("NullTermination"))
        .parse_next(input)?;

    Ok(RawFrame {
        command,
        headers,
        body,
    })
}

/// Parse a single `name:value` header line.
fn parse_header<'a>(input: &mut Partial<&'a [u8]>) -> ModalResult<(&'a [u8], &'a [u8])> {
    trace(
        "parse_header",
        separated_pair(
            take_till(1.., [':', '\r', '\n']),
            literal(":"),
            terminated(till_line_ending, line_ending),
        ),
    )
    .context(Label("Header"))
    .parse_next(input)
}

/// A resumable byte-stream to frame decoder.
///
/// Feed it input with [`push`](FrameParser::push) and drain decoded frames
/// with [`next`](FrameParser::next). The parser buffers at most one
/// in-progress frame; callers concerned about hostile peers should bound
/// the bytes they feed in.
///
/// A bare line feed between frames is the wire heart-beat: on 1.1 and 1.2
/// it is surfaced as [`Frame::heart_beat`], on 1.0 it is consumed as
/// inter-frame whitespace.
///
/// Errors are not recoverable for the current frame. Once `next` has
/// failed, call [`reset`](FrameParser::reset) before feeding more input
/// (and expect to tear the connection down, since framing is lost).
#[derive(Debug)]
pub struct FrameParser {
    buffer: BytesMut,
    version: StompVersion,
}

impl FrameParser {
    pub fn new(version: StompVersion) -> Self {
        FrameParser {
            buffer: BytesMut::new(),
            version,
        }
    }

    pub fn version(&self) -> StompVersion {
        self.version
    }

    /// Switch the unescaping rules, typically right after version
    /// negotiation. Buffered bytes are kept.
    pub fn set_version(&mut self, version: StompVersion) {
        self.version = version;
    }

    /// Append a chunk of input.
    pub fn push(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Whether any buffered input remains.
    pub fn can_read(&self) -> bool {
        !self.buffer.is_empty()
    }

    /// Drop all buffered input.
    pub fn reset(&mut self) {
        self.buffer.clear();
    }

    /// Decode the next frame, if a complete one is buffered.
    pub fn next(&mut self) -> Result<Option<Frame>> {
        loop {
            match self.buffer.first() {
                None => return Ok(None),
                Some(&b'\n') => {
                    self.buffer.advance(1);
                    if self.version.has_escapes() {
                        return Ok(Some(Frame::heart_beat()));
                    }
                }
                Some(&b'\r') => {
                    if self.buffer.len() < 2 {
                        return Ok(None);
                    }
                    if self.buffer[1] != b'\n' {
                        return Err(StompError::MalformedFrame(
                            "stray carriage return between frames".into(),
                        ));
                    }
                    self.buffer.advance(2);
                    if self.version.has_escapes() {
                        return Ok(Some(Frame::heart_beat()));
                    }
                }
                Some(_) => break,
            }
        }

        let start = Partial::new(self.buffer.as_ref());
        let mut input = Partial::new(self.buffer.as_ref());
        match parse_frame(&mut input) {
            Ok(raw) => {
                let consumed = input.offset_from(&start);
                let frame = decode_frame(self.version, raw)?;
                self.buffer.advance(consumed);
                Ok(Some(frame))
            }
            Err(ErrMode::Incomplete(_)) => Ok(None),
            Err(err) => Err(StompError::MalformedFrame(format!("{err:?}"))),
        }
    }
}

/// Turn a raw frame into an owned [`Frame`], applying header unescaping.
fn decode_frame(version: StompVersion, raw: RawFrame<'_>) -> Result<Frame> {
    let command = std::str::from_utf8(raw.command)
        .map_err(|_| StompError::MalformedFrame("command is not valid utf-8".into()))?
        .to_string();
    let unescape = !protocol::escapes_exempt(&command);
    let mut headers = Vec::with_capacity(raw.headers.len());
    for (name, value) in raw.headers {
        headers.push((
            header_text(version, unescape, name)?,
            header_text(version, unescape, value)?,
        ));
    }
    Ok(Frame {
        command,
        headers,
        body: raw.body.to_vec(),
    })
}

fn header_text(version: StompVersion, unescape: bool, raw: &[u8]) -> Result<String> {
    let text = std::str::from_utf8(raw)
        .map_err(|_| StompError::MalformedFrame("header is not valid utf-8".into()))?;
    if unescape {
        Ok(protocol::decode_header_text(version, text)?.into_owned())
    } else {
        Ok(text.to_string())
    }
}
