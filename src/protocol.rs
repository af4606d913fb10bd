//! Protocol-level vocabulary shared by the codec, the command layer and the
//! session: version tokens, frame commands, standard headers, delimiter
//! bytes, the `heart-beat` header and per-version header escaping.

use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

use crate::error::{Result, StompError};

/// Line delimiter inside a frame (end of the command line and of each
/// header line).
pub const LINE_DELIMITER: u8 = b'\n';

/// Frame delimiter (end of the body).
pub const FRAME_DELIMITER: u8 = 0x00;

/// Frame commands sent by the client.
pub mod command {
    pub const CONNECT: &str = "CONNECT";
    pub const STOMP: &str = "STOMP";
    pub const SEND: &str = "SEND";
    pub const SUBSCRIBE: &str = "SUBSCRIBE";
    pub const UNSUBSCRIBE: &str = "UNSUBSCRIBE";
    pub const ACK: &str = "ACK";
    pub const NACK: &str = "NACK";
    pub const BEGIN: &str = "BEGIN";
    pub const COMMIT: &str = "COMMIT";
    pub const ABORT: &str = "ABORT";
    pub const DISCONNECT: &str = "DISCONNECT";

    pub const CONNECTED: &str = "CONNECTED";
    pub const MESSAGE: &str = "MESSAGE";
    pub const RECEIPT: &str = "RECEIPT";
    pub const ERROR: &str = "ERROR";
}

/// Standard header names.
pub mod header {
    pub const ACCEPT_VERSION: &str = "accept-version";
    pub const ACK: &str = "ack";
    pub const CONTENT_LENGTH: &str = "content-length";
    pub const DESTINATION: &str = "destination";
    pub const HEART_BEAT: &str = "heart-beat";
    pub const HOST: &str = "host";
    pub const ID: &str = "id";
    pub const LOGIN: &str = "login";
    pub const MESSAGE: &str = "message";
    pub const MESSAGE_ID: &str = "message-id";
    pub const PASSCODE: &str = "passcode";
    pub const RECEIPT: &str = "receipt";
    pub const RECEIPT_ID: &str = "receipt-id";
    pub const SERVER: &str = "server";
    pub const SESSION: &str = "session";
    pub const SUBSCRIPTION: &str = "subscription";
    pub const TRANSACTION: &str = "transaction";
    pub const VERSION: &str = "version";
}

/// A STOMP protocol version.
///
/// Versions are totally ordered, so `1.1 < 1.2` holds and the highest
/// common version of a negotiation can be picked with `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum StompVersion {
    V1_0,
    V1_1,
    #[default]
    V1_2,
}

impl StompVersion {
    /// The wire token of this version.
    pub fn as_str(self) -> &'static str {
        match self {
            StompVersion::V1_0 => "1.0",
            StompVersion::V1_1 => "1.1",
            StompVersion::V1_2 => "1.2",
        }
    }

    /// All versions up to and including `self`, oldest first.
    pub fn supported(self) -> &'static [StompVersion] {
        match self {
            StompVersion::V1_0 => &[StompVersion::V1_0],
            StompVersion::V1_1 => &[StompVersion::V1_0, StompVersion::V1_1],
            StompVersion::V1_2 => {
                &[StompVersion::V1_0, StompVersion::V1_1, StompVersion::V1_2]
            }
        }
    }

    /// The `accept-version` header value offering every version up to and
    /// including `self`.
    pub fn accept_header(self) -> String {
        let tokens: Vec<&str> = self.supported().iter().map(|v| v.as_str()).collect();
        tokens.join(",")
    }

    /// Whether this version uses header escaping and heart-beats (1.1+).
    pub fn has_escapes(self) -> bool {
        self != StompVersion::V1_0
    }
}

impl fmt::Display for StompVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StompVersion {
    type Err = StompError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "1.0" => Ok(StompVersion::V1_0),
            "1.1" => Ok(StompVersion::V1_1),
            "1.2" => Ok(StompVersion::V1_2),
            other => Err(StompError::Protocol(format!(
                "unsupported STOMP version: {other:?}"
            ))),
        }
    }
}

/// A `heart-beat` interval pair in milliseconds.
///
/// For a client, `send_ms` is the smallest interval at which it can emit
/// heart-beats and `recv_ms` the interval at which it would like to receive
/// them. Zero means "cannot / does not want" for that direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HeartBeat {
    pub send_ms: u64,
    pub recv_ms: u64,
}

impl HeartBeat {
    /// Both directions disabled.
    pub const DISABLED: HeartBeat = HeartBeat {
        send_ms: 0,
        recv_ms: 0,
    };

    pub fn new(send_ms: u64, recv_ms: u64) -> Self {
        HeartBeat { send_ms, recv_ms }
    }

    /// Negotiate the effective intervals from the client's request and the
    /// server's `CONNECTED` reply.
    ///
    /// Per direction, the result is the maximum of what one side can
    /// provide and what the other side wants, and zero (disabled) as soon
    /// as either side opted out.
    pub fn negotiate(client: HeartBeat, server: HeartBeat) -> HeartBeat {
        fn direction(can_send: u64, wants: u64) -> u64 {
            if can_send == 0 || wants == 0 {
                0
            } else {
                can_send.max(wants)
            }
        }
        HeartBeat {
            send_ms: direction(client.send_ms, server.recv_ms),
            recv_ms: direction(client.recv_ms, server.send_ms),
        }
    }
}

impl fmt::Display for HeartBeat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.send_ms, self.recv_ms)
    }
}

impl FromStr for HeartBeat {
    type Err = StompError;

    fn from_str(s: &str) -> Result<Self> {
        let bad = || StompError::Protocol(format!("invalid heart-beat header: {s:?}"));
        let (send, recv) = s.split_once(',').ok_or_else(bad)?;
        Ok(HeartBeat {
            send_ms: send.trim().parse().map_err(|_| bad())?,
            recv_ms: recv.trim().parse().map_err(|_| bad())?,
        })
    }
}

/// Whether a frame command is exempt from header escaping.
///
/// The connection handshake frames predate the escape rules and stay
/// unescaped in every version for backwards compatibility.
pub fn escapes_exempt(command: &str) -> bool {
    matches!(
        command,
        command::CONNECT | command::STOMP | command::CONNECTED
    )
}

/// Escape a header name or value for the wire.
///
/// 1.0 has no escape rules. 1.1 escapes backslash, line feed and colon.
/// 1.2 additionally escapes carriage return.
pub fn encode_header_text(version: StompVersion, text: &str) -> Cow<'_, str> {
    if !version.has_escapes() || !text.bytes().any(|b| matches!(b, b'\\' | b'\n' | b':' | b'\r')) {
        return Cow::Borrowed(text);
    }
    let mut out = String::with_capacity(text.len() + 4);
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            ':' => out.push_str("\\c"),
            '\r' if version == StompVersion::V1_2 => out.push_str("\\r"),
            c => out.push(c),
        }
    }
    Cow::Owned(out)
}

/// Undo [`encode_header_text`].
///
/// Any backslash that does not start a sequence legal for `version` is a
/// framing error, including a trailing lone backslash and `\r` on 1.1.
pub fn decode_header_text(version: StompVersion, raw: &str) -> Result<Cow<'_, str>> {
    if !version.has_escapes() || !raw.contains('\\') {
        return Ok(Cow::Borrowed(raw));
    }
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('c') => out.push(':'),
            Some('\\') => out.push('\\'),
            Some('r') if version == StompVersion::V1_2 => out.push('\r'),
            other => {
                return Err(StompError::MalformedFrame(format!(
                    "invalid escape sequence {:?} in header",
                    other.map(|c| format!("\\{c}")).unwrap_or_else(|| "\\".into())
                )));
            }
        }
    }
    Ok(Cow::Owned(out))
}
