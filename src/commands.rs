//! The stateless command layer.
//!
//! [`ToServer`] covers every client frame; [`ToServer::to_frame`] validates
//! the variant against the negotiated protocol version and produces the
//! wire [`Frame`]. [`FromServer`] is the inverse for server frames:
//! [`FromServer::from_frame`] checks the required headers and returns the
//! semantically meaningful fields.

use std::fmt;
use std::str::FromStr;

use custom_debug_derive::Debug as CustomDebug;

use crate::error::{Result, StompError};
use crate::frame::Frame;
use crate::protocol::{command, header, HeartBeat, StompVersion};

/// Acknowledgment modes for subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AckMode {
    /// The server considers a message acknowledged as soon as it is sent.
    #[default]
    Auto,
    /// ACK is cumulative: it covers every message delivered so far on the
    /// subscription.
    Client,
    /// ACK covers only the message it names.
    ClientIndividual,
}

impl AckMode {
    pub fn as_str(self) -> &'static str {
        match self {
            AckMode::Auto => "auto",
            AckMode::Client => "client",
            AckMode::ClientIndividual => "client-individual",
        }
    }
}

impl fmt::Display for AckMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AckMode {
    type Err = StompError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "auto" => Ok(AckMode::Auto),
            "client" => Ok(AckMode::Client),
            "client-individual" => Ok(AckMode::ClientIndividual),
            other => Err(StompError::Protocol(format!("invalid ack mode: {other:?}"))),
        }
    }
}

/// A STOMP command sent by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToServer {
    /// Open a session. The first frame on every connection.
    Connect {
        /// Virtual host, mandatory from 1.1 on.
        host: Option<String>,
        login: Option<String>,
        passcode: Option<String>,
        /// The client's offered heart-beat intervals.
        heart_beat: HeartBeat,
    },

    /// Deliver a message to a destination.
    Send {
        destination: String,
        transaction: Option<String>,
        /// Additional application headers, emitted verbatim after the
        /// standard ones.
        headers: Vec<(String, String)>,
        body: Vec<u8>,
        receipt: Option<String>,
    },

    /// Register interest in a destination.
    Subscribe {
        destination: String,
        /// Client-assigned subscription identifier, mandatory from 1.1 on.
        id: Option<String>,
        ack: AckMode,
        headers: Vec<(String, String)>,
        receipt: Option<String>,
    },

    /// Drop a subscription, by id (1.1+) or by destination (1.0 only).
    Unsubscribe {
        id: Option<String>,
        destination: Option<String>,
        receipt: Option<String>,
    },

    /// Acknowledge a message. `id` is the `ack` header of the MESSAGE on
    /// 1.2 and its `message-id` on earlier versions.
    Ack {
        id: String,
        /// The subscription the message arrived on, mandatory on 1.1.
        subscription: Option<String>,
        transaction: Option<String>,
        receipt: Option<String>,
    },

    /// Reject a message. Not part of STOMP 1.0.
    Nack {
        id: String,
        subscription: Option<String>,
        transaction: Option<String>,
        receipt: Option<String>,
    },

    /// Open a transaction.
    Begin {
        transaction: String,
        receipt: Option<String>,
    },

    /// Apply a transaction.
    Commit {
        transaction: String,
        receipt: Option<String>,
    },

    /// Roll a transaction back.
    Abort {
        transaction: String,
        receipt: Option<String>,
    },

    /// End the session. No frame may follow it.
    Disconnect { receipt: Option<String> },
}

impl ToServer {
    /// Build the wire frame for `version`, validating the headers this
    /// version requires or forbids. Nothing is emitted on failure.
    pub fn to_frame(&self, version: StompVersion) -> Result<Frame> {
        use ToServer::*;

        let frame = match self {
            Connect {
                host,
                login,
                passcode,
                heart_beat,
            } => {
                if version.has_escapes() {
                    let host = host.as_deref().ok_or_else(|| {
                        StompError::Protocol(
                            "CONNECT requires a host from STOMP 1.1 on".into(),
                        )
                    })?;
                    Frame::new(command::CONNECT)
                        .header(header::ACCEPT_VERSION, version.accept_header())
                        .header(header::HOST, host)
                        .opt_header(header::LOGIN, login.clone())
                        .opt_header(header::PASSCODE, passcode.clone())
                        .header(header::HEART_BEAT, heart_beat.to_string())
                } else {
                    Frame::new(command::CONNECT)
                        .opt_header(header::LOGIN, login.clone())
                        .opt_header(header::PASSCODE, passcode.clone())
                }
            }

            Send {
                destination,
                transaction,
                headers,
                body,
                receipt,
            } => {
                let mut frame =
                    Frame::new(command::SEND).header(header::DESTINATION, destination.clone());
                if !body.is_empty() {
                    frame = frame.header(header::CONTENT_LENGTH, body.len().to_string());
                }
                frame = frame
                    .opt_header(header::TRANSACTION, transaction.clone())
                    .opt_header(header::RECEIPT, receipt.clone());
                for (name, value) in headers {
                    frame = frame.header(name.clone(), value.clone());
                }
                frame.with_body(body.clone())
            }

            Subscribe {
                destination,
                id,
                ack,
                headers,
                receipt,
            } => {
                if version.has_escapes() && id.is_none() {
                    return Err(StompError::Protocol(
                        "SUBSCRIBE requires an id from STOMP 1.1 on".into(),
                    ));
                }
                let mut frame = Frame::new(command::SUBSCRIBE)
                    .opt_header(header::ID, id.clone())
                    .header(header::DESTINATION, destination.clone())
                    .header(header::ACK, ack.as_str())
                    .opt_header(header::RECEIPT, receipt.clone());
                for (name, value) in headers {
                    frame = frame.header(name.clone(), value.clone());
                }
                frame
            }

            Unsubscribe {
                id,
                destination,
                receipt,
            } => {
                if version.has_escapes() && id.is_none() {
                    return Err(StompError::Protocol(
                        "UNSUBSCRIBE requires an id from STOMP 1.1 on".into(),
                    ));
                }
                let frame = Frame::new(command::UNSUBSCRIBE);
                let frame = match (id, destination) {
                    (Some(id), _) => frame.header(header::ID, id.clone()),
                    (None, Some(destination)) => {
                        frame.header(header::DESTINATION, destination.clone())
                    }
                    (None, None) => {
                        return Err(StompError::Protocol(
                            "UNSUBSCRIBE requires an id or a destination".into(),
                        ));
                    }
                };
                frame.opt_header(header::RECEIPT, receipt.clone())
            }

            Ack {
                id,
                subscription,
                transaction,
                receipt,
            } => acknowledgment(command::ACK, version, id, subscription)?
                .opt_header(header::TRANSACTION, transaction.clone())
                .opt_header(header::RECEIPT, receipt.clone()),

            Nack {
                id,
                subscription,
                transaction,
                receipt,
            } => {
                if !version.has_escapes() {
                    return Err(StompError::Protocol(
                        "NACK is not part of STOMP 1.0".into(),
                    ));
                }
                acknowledgment(command::NACK, version, id, subscription)?
                    .opt_header(header::TRANSACTION, transaction.clone())
                    .opt_header(header::RECEIPT, receipt.clone())
            }

            Begin {
                transaction,
                receipt,
            } => Frame::new(command::BEGIN)
                .header(header::TRANSACTION, transaction.clone())
                .opt_header(header::RECEIPT, receipt.clone()),

            Commit {
                transaction,
                receipt,
            } => Frame::new(command::COMMIT)
                .header(header::TRANSACTION, transaction.clone())
                .opt_header(header::RECEIPT, receipt.clone()),

            Abort {
                transaction,
                receipt,
            } => Frame::new(command::ABORT)
                .header(header::TRANSACTION, transaction.clone())
                .opt_header(header::RECEIPT, receipt.clone()),

            Disconnect { receipt } => {
                Frame::new(command::DISCONNECT).opt_header(header::RECEIPT, receipt.clone())
            }
        };
        Ok(frame)
    }

    /// The receipt id this command asks for, if any.
    pub fn receipt(&self) -> Option<&str> {
        use ToServer::*;
        match self {
            Connect { .. } => None,
            Send { receipt, .. }
            | Subscribe { receipt, .. }
            | Unsubscribe { receipt, .. }
            | Ack { receipt, .. }
            | Nack { receipt, .. }
            | Begin { receipt, .. }
            | Commit { receipt, .. }
            | Abort { receipt, .. }
            | Disconnect { receipt } => receipt.as_deref(),
        }
    }
}

/// The header mapping shared by ACK and NACK.
///
/// 1.2 references the MESSAGE's `ack` header as `id`; 1.1 references
/// `message-id` plus the subscription; 1.0 references `message-id` alone.
fn acknowledgment(
    name: &str,
    version: StompVersion,
    id: &str,
    subscription: &Option<String>,
) -> Result<Frame> {
    let frame = Frame::new(name);
    Ok(match version {
        StompVersion::V1_2 => frame.header(header::ID, id),
        StompVersion::V1_1 => {
            let subscription = subscription.as_deref().ok_or_else(|| {
                StompError::Protocol(format!("{name} requires a subscription on STOMP 1.1"))
            })?;
            frame
                .header(header::MESSAGE_ID, id)
                .header(header::SUBSCRIPTION, subscription)
        }
        StompVersion::V1_0 => frame.header(header::MESSAGE_ID, id),
    })
}

/// Helper for pretty-printing body bytes in debug output.
fn pretty_bytes(b: &Vec<u8>, f: &mut fmt::Formatter) -> fmt::Result {
    write!(f, "{}", String::from_utf8_lossy(b))
}

/// A STOMP command received from the server, reduced to its meaningful
/// fields.
#[derive(CustomDebug, Clone, PartialEq, Eq)]
pub enum FromServer {
    /// The reply to CONNECT; carries the negotiation results.
    Connected {
        version: StompVersion,
        session: Option<String>,
        server: Option<String>,
        heart_beat: HeartBeat,
    },

    /// A message delivered on a subscription.
    Message {
        destination: String,
        message_id: String,
        /// The subscription the message belongs to; always present from
        /// 1.1 on.
        subscription: Option<String>,
        /// The value to acknowledge the message with on 1.2.
        ack: Option<String>,
        /// Every header of the frame, in wire order.
        headers: Vec<(String, String)>,
        #[debug(with = "pretty_bytes")]
        body: Vec<u8>,
    },

    /// Confirmation that a client frame carrying `receipt` was processed.
    Receipt { receipt_id: String },

    /// The server is reporting a failure and will close the connection.
    Error {
        message: Option<String>,
        #[debug(with = "pretty_bytes")]
        body: Vec<u8>,
    },
}

impl FromServer {
    /// Interpret a server frame, enforcing the headers `version` requires.
    pub fn from_frame(frame: &Frame, version: StompVersion) -> Result<FromServer> {
        match frame.command.as_str() {
            command::CONNECTED => {
                let version = match frame.get_header(header::VERSION) {
                    Some(token) => token.parse()?,
                    None => StompVersion::V1_0,
                };
                let heart_beat = match frame.get_header(header::HEART_BEAT) {
                    Some(value) => value.parse()?,
                    None => HeartBeat::DISABLED,
                };
                Ok(FromServer::Connected {
                    version,
                    session: fetch_header(frame, header::SESSION),
                    server: fetch_header(frame, header::SERVER),
                    heart_beat,
                })
            }

            command::MESSAGE => {
                let subscription = fetch_header(frame, header::SUBSCRIPTION);
                if version.has_escapes() && subscription.is_none() {
                    return Err(StompError::Protocol(
                        "MESSAGE without a subscription header".into(),
                    ));
                }
                Ok(FromServer::Message {
                    destination: expect_header(frame, header::DESTINATION)?,
                    message_id: expect_header(frame, header::MESSAGE_ID)?,
                    subscription,
                    ack: fetch_header(frame, header::ACK),
                    headers: frame.headers.clone(),
                    body: frame.body.clone(),
                })
            }

            command::RECEIPT => Ok(FromServer::Receipt {
                receipt_id: expect_header(frame, header::RECEIPT_ID)?,
            }),

            command::ERROR => Ok(FromServer::Error {
                message: fetch_header(frame, header::MESSAGE),
                body: frame.body.clone(),
            }),

            other => Err(StompError::Protocol(format!(
                "unexpected server command: {other:?}"
            ))),
        }
    }
}

fn fetch_header(frame: &Frame, name: &str) -> Option<String> {
    frame.get_header(name).map(str::to_string)
}

fn expect_header(frame: &Frame, name: &str) -> Result<String> {
    fetch_header(frame, name).ok_or_else(|| {
        StompError::Protocol(format!("{} frame without a {name} header", frame.command))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_requires_host_from_1_1_on() {
        let connect = ToServer::Connect {
            host: None,
            login: None,
            passcode: None,
            heart_beat: HeartBeat::DISABLED,
        };
        assert!(connect.to_frame(StompVersion::V1_2).is_err());
        // 1.0 has no such requirement and no negotiation headers at all
        let frame = connect.to_frame(StompVersion::V1_0).unwrap();
        assert!(frame.get_header(header::ACCEPT_VERSION).is_none());
        assert!(frame.get_header(header::HOST).is_none());
    }

    #[test]
    fn connect_offers_all_supported_versions() {
        let connect = ToServer::Connect {
            host: Some("broker".into()),
            login: Some("user".into()),
            passcode: Some("secret".into()),
            heart_beat: HeartBeat::new(1000, 500),
        };
        let frame = connect.to_frame(StompVersion::V1_2).unwrap();
        assert_eq!(frame.command, "CONNECT");
        assert_eq!(frame.get_header(header::ACCEPT_VERSION), Some("1.0,1.1,1.2"));
        assert_eq!(frame.get_header(header::HOST), Some("broker"));
        assert_eq!(frame.get_header(header::HEART_BEAT), Some("1000,500"));
    }

    #[test]
    fn send_declares_the_body_length() {
        let send = ToServer::Send {
            destination: "/queue/a".into(),
            transaction: None,
            headers: vec![("priority".into(), "5".into())],
            body: b"hello".to_vec(),
            receipt: None,
        };
        let frame = send.to_frame(StompVersion::V1_2).unwrap();
        assert_eq!(frame.get_header(header::CONTENT_LENGTH), Some("5"));
        assert_eq!(frame.get_header("priority"), Some("5"));
        assert_eq!(frame.body, b"hello");
    }

    #[test]
    fn send_with_empty_body_has_no_content_length() {
        let send = ToServer::Send {
            destination: "/queue/a".into(),
            transaction: None,
            headers: Vec::new(),
            body: Vec::new(),
            receipt: None,
        };
        let frame = send.to_frame(StompVersion::V1_2).unwrap();
        assert!(frame.get_header(header::CONTENT_LENGTH).is_none());
    }

    #[test]
    fn subscribe_requires_an_id_from_1_1_on() {
        let subscribe = ToServer::Subscribe {
            destination: "/queue/a".into(),
            id: None,
            ack: AckMode::Auto,
            headers: Vec::new(),
            receipt: None,
        };
        assert!(subscribe.to_frame(StompVersion::V1_1).is_err());
        assert!(subscribe.to_frame(StompVersion::V1_0).is_ok());
    }

    #[test]
    fn nack_is_rejected_on_1_0() {
        let nack = ToServer::Nack {
            id: "m-1".into(),
            subscription: Some("s-1".into()),
            transaction: None,
            receipt: None,
        };
        assert!(nack.to_frame(StompVersion::V1_0).is_err());
        assert!(nack.to_frame(StompVersion::V1_2).is_ok());
    }

    #[test]
    fn ack_header_mapping_follows_the_version() {
        let ack = ToServer::Ack {
            id: "m-1".into(),
            subscription: Some("s-1".into()),
            transaction: None,
            receipt: None,
        };

        let frame = ack.to_frame(StompVersion::V1_2).unwrap();
        assert_eq!(frame.get_header(header::ID), Some("m-1"));
        assert!(frame.get_header(header::MESSAGE_ID).is_none());

        let frame = ack.to_frame(StompVersion::V1_1).unwrap();
        assert_eq!(frame.get_header(header::MESSAGE_ID), Some("m-1"));
        assert_eq!(frame.get_header(header::SUBSCRIPTION), Some("s-1"));

        let frame = ack.to_frame(StompVersion::V1_0).unwrap();
        assert_eq!(frame.get_header(header::MESSAGE_ID), Some("m-1"));
        assert!(frame.get_header(header::SUBSCRIPTION).is_none());
    }

    #[test]
    fn ack_on_1_1_requires_the_subscription() {
        let ack = ToServer::Ack {
            id: "m-1".into(),
            subscription: None,
            transaction: None,
            receipt: None,
        };
        assert!(ack.to_frame(StompVersion::V1_1).is_err());
        assert!(ack.to_frame(StompVersion::V1_2).is_ok());
    }

    #[test]
    fn connected_defaults_to_1_0_when_version_is_absent() {
        let frame = Frame::new("CONNECTED");
        match FromServer::from_frame(&frame, StompVersion::V1_2).unwrap() {
            FromServer::Connected {
                version,
                heart_beat,
                ..
            } => {
                assert_eq!(version, StompVersion::V1_0);
                assert_eq!(heart_beat, HeartBeat::DISABLED);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn message_requires_its_identifying_headers() {
        let frame = Frame::new("MESSAGE")
            .header("destination", "/queue/a")
            .header("subscription", "s-1");
        // missing message-id
        assert!(FromServer::from_frame(&frame, StompVersion::V1_2).is_err());

        let frame = Frame::new("MESSAGE")
            .header("destination", "/queue/a")
            .header("message-id", "m-1");
        // missing subscription is only legal on 1.0
        assert!(FromServer::from_frame(&frame, StompVersion::V1_2).is_err());
        assert!(FromServer::from_frame(&frame, StompVersion::V1_0).is_ok());
    }

    #[test]
    fn unknown_server_command_is_a_protocol_error() {
        let frame = Frame::new("SURPRISE");
        assert!(matches!(
            FromServer::from_frame(&frame, StompVersion::V1_2),
            Err(StompError::Protocol(_))
        ));
    }

    #[test]
    fn ack_mode_round_trips_through_strings() {
        for mode in [AckMode::Auto, AckMode::Client, AckMode::ClientIndividual] {
            assert_eq!(mode.as_str().parse::<AckMode>().unwrap(), mode);
        }
        assert!("bogus".parse::<AckMode>().is_err());
    }
}
