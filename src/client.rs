//! A thin tokio transport adapter over the protocol core.
//!
//! The adapter owns the socket and the timers; everything protocol-shaped
//! lives in [`Session`], [`FrameParser`] and [`FailoverTransport`].
//! [`connect`] dials one address and runs the CONNECT/CONNECTED handshake;
//! [`connect_failover`] walks a failover schedule until an attempt
//! succeeds. TLS is left to the caller, as is driving heart-beats and
//! dispatching inbound frames.

use bytes::{Buf, BytesMut};
use futures::prelude::*;
use futures::sink::SinkExt;
use tokio::net::TcpStream;
use tokio_util::codec::{Decoder, Encoder, Framed};
use tracing::{debug, warn};

use crate::error::{Result, StompError};
use crate::failover::FailoverTransport;
use crate::frame::Frame;
use crate::parser::FrameParser;
use crate::protocol::{command, HeartBeat, StompVersion};
use crate::session::Session;

pub type ClientTransport = Framed<TcpStream, ClientCodec>;

/// Frame-level codec for `tokio_util::codec::Framed`.
///
/// Decoding surfaces every frame, heart-beats included, so the driving
/// task can feed the session's heart-beat clock.
pub struct ClientCodec {
    parser: FrameParser,
    version: StompVersion,
}

impl ClientCodec {
    pub fn new(version: StompVersion) -> Self {
        ClientCodec {
            parser: FrameParser::new(version),
            version,
        }
    }

    /// Switch both directions to the negotiated version.
    pub fn set_version(&mut self, version: StompVersion) {
        self.version = version;
        self.parser.set_version(version);
    }
}

impl Decoder for ClientCodec {
    type Item = Frame;
    type Error = StompError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        if !src.is_empty() {
            self.parser.push(src);
            src.advance(src.len());
        }
        self.parser.next()
    }
}

impl Encoder<Frame> for ClientCodec {
    type Error = StompError;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<()> {
        item.serialize(self.version, dst)
    }
}

/// Connect to a STOMP server over TCP and run the connection handshake.
///
/// On success the returned session is in the connected state and the
/// transport speaks the negotiated version. `virtualhost` is usually the
/// same name the socket was established against.
pub async fn connect(
    server: impl tokio::net::ToSocketAddrs,
    virtualhost: impl Into<String>,
    login: Option<String>,
    passcode: Option<String>,
    heart_beat: HeartBeat,
) -> Result<(ClientTransport, Session)> {
    let tcp = TcpStream::connect(server).await?;
    let mut transport = ClientCodec::new(StompVersion::default()).framed(tcp);
    let mut session = Session::new(StompVersion::default());

    let frame = session.connect(login, passcode, Some(virtualhost.into()), heart_beat)?;
    transport.send(frame).await?;

    loop {
        let frame = match transport.next().await {
            Some(frame) => frame?,
            None => {
                session.disconnected();
                return Err(StompError::ConnectionLost(
                    "server closed the connection during the handshake".into(),
                ));
            }
        };
        if frame.is_heart_beat() {
            continue;
        }
        if frame.command == command::ERROR {
            let error = session.error(&frame)?;
            return Err(StompError::Protocol(format!(
                "server rejected the connection: {error:?}"
            )));
        }
        session.connected(&frame)?;
        transport.codec_mut().set_version(session.version());
        debug!(version = %session.version(), server = ?session.server(), "connected");
        return Ok((transport, session));
    }
}

/// Connect through a failover schedule, sleeping the scheduled delay
/// before each attempt.
///
/// Gives up with [`StompError::NoMoreBrokers`] once the schedule is
/// exhausted.
pub async fn connect_failover(
    uri: &str,
    virtualhost: &str,
    login: Option<String>,
    passcode: Option<String>,
    heart_beat: HeartBeat,
) -> Result<(ClientTransport, Session)> {
    let mut brokers = FailoverTransport::new(uri)?;
    while let Some((broker, delay)) = brokers.next() {
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        debug!(broker = %broker, "connecting");
        match connect(
            (broker.host.as_str(), broker.port),
            virtualhost,
            login.clone(),
            passcode.clone(),
            heart_beat,
        )
        .await
        {
            Ok(connection) => {
                brokers.connected();
                return Ok(connection);
            }
            Err(error) => warn!(broker = %broker, %error, "connect attempt failed"),
        }
    }
    Err(StompError::NoMoreBrokers)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codec_round_trips_a_frame() {
        let mut codec = ClientCodec::new(StompVersion::V1_2);
        let frame = Frame::new("SEND")
            .header("destination", "/queue/a")
            .header("content-length", "5")
            .with_body(*b"hello");

        let mut wire = BytesMut::new();
        codec.encode(frame.clone(), &mut wire).unwrap();
        let decoded = codec.decode(&mut wire).unwrap().unwrap();
        assert_eq!(decoded, frame);
        assert!(wire.is_empty());
    }

    #[test]
    fn codec_reports_incomplete_input_as_none() {
        let mut codec = ClientCodec::new(StompVersion::V1_2);
        let mut wire = BytesMut::from(&b"MESSAGE\ndest"[..]);
        assert!(codec.decode(&mut wire).unwrap().is_none());
    }
}
