//! The in-memory session state machine.
//!
//! A [`Session`] tracks everything a STOMP connection needs besides the
//! socket: the lifecycle state, the negotiated version and heart-beat, the
//! active subscriptions (kept across reconnects for replay), the open
//! transactions and the outstanding receipts.
//!
//! The session performs no I/O and sets no timers. Client operations
//! return the [`Frame`] to write; server frames are interpreted by the
//! `connected` / `message` / `receipt` / `error` handlers; timestamps for
//! the heart-beat schedule come from the caller's clock, in milliseconds.
//! A session is owned by one transport at a time, and every method runs
//! synchronously to completion.

use crate::commands::{AckMode, FromServer, ToServer};
use crate::error::{Result, StompError};
use crate::frame::Frame;
use crate::protocol::{header, HeartBeat, StompVersion};

/// Connection lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

/// Default tolerance applied to the negotiated receive interval before the
/// peer is considered gone.
pub const DEFAULT_HEART_BEAT_SLACK: f64 = 2.0;

/// Options for [`Session::subscribe`].
#[derive(Debug, Clone, Default)]
pub struct SubscribeOptions {
    /// Client-assigned subscription identifier. Mandatory from 1.1 on; on
    /// 1.0 the destination doubles as the identifier when absent.
    pub id: Option<String>,
    pub ack: AckMode,
    /// Additional headers, stored with the subscription and re-sent on
    /// replay.
    pub headers: Vec<(String, String)>,
    pub receipt: Option<String>,
}

/// A preserved subscription yielded by [`Session::replay`], carrying
/// everything needed to subscribe again with an identical token.
#[derive(Debug)]
pub struct ReplayEntry<C> {
    pub token: String,
    pub destination: String,
    pub id: Option<String>,
    pub ack: AckMode,
    pub headers: Vec<(String, String)>,
    pub context: C,
}

#[derive(Debug)]
struct SubscriptionRecord<C> {
    token: String,
    destination: String,
    id: Option<String>,
    ack: AckMode,
    headers: Vec<(String, String)>,
    context: C,
}

/// The session state machine.
///
/// `C` is an opaque per-subscription context (typically a handler handle).
/// The session stores it, hands it back on [`message`](Session::message)
/// and [`replay`](Session::replay), and never looks inside.
#[derive(Debug)]
pub struct Session<C = ()> {
    version: StompVersion,
    check: bool,
    state: SessionState,
    negotiated: Option<StompVersion>,
    id: Option<String>,
    server: Option<String>,
    client_heart_beat: HeartBeat,
    heart_beat: HeartBeat,
    slack: f64,
    last_sent_ms: u64,
    last_received_ms: u64,
    subscriptions: Vec<SubscriptionRecord<C>>,
    replay_queue: Vec<SubscriptionRecord<C>>,
    transactions: Vec<String>,
    receipts: Vec<(String, String)>,
    disconnect_receipt: Option<String>,
}

impl<C> Session<C> {
    /// A session speaking at most `version`, with state checks enabled.
    pub fn new(version: StompVersion) -> Self {
        Self::with_check(version, true)
    }

    /// A session that skips the lifecycle checks. Useful for tooling that
    /// replays captured traffic out of order; regular clients want
    /// [`new`](Session::new).
    pub fn unchecked(version: StompVersion) -> Self {
        Self::with_check(version, false)
    }

    fn with_check(version: StompVersion, check: bool) -> Self {
        Session {
            version,
            check,
            state: SessionState::Disconnected,
            negotiated: None,
            id: None,
            server: None,
            client_heart_beat: HeartBeat::DISABLED,
            heart_beat: HeartBeat::DISABLED,
            slack: DEFAULT_HEART_BEAT_SLACK,
            last_sent_ms: 0,
            last_received_ms: 0,
            subscriptions: Vec::new(),
            replay_queue: Vec::new(),
            transactions: Vec::new(),
            receipts: Vec::new(),
            disconnect_receipt: None,
        }
    }

    // ---- lifecycle ----------------------------------------------------

    /// Build the CONNECT frame and enter `Connecting`.
    pub fn connect(
        &mut self,
        login: Option<String>,
        passcode: Option<String>,
        host: Option<String>,
        heart_beat: HeartBeat,
    ) -> Result<Frame> {
        self.expect_state(&[SessionState::Disconnected], "connect")?;
        let frame = ToServer::Connect {
            host,
            login,
            passcode,
            heart_beat,
        }
        .to_frame(self.version)?;
        self.client_heart_beat = heart_beat;
        self.state = SessionState::Connecting;
        Ok(frame)
    }

    /// Digest the server's CONNECTED frame: negotiate the version and the
    /// heart-beat intervals, record the session identity, enter
    /// `Connected`.
    ///
    /// Callers normally follow up with [`beat_sent`](Session::beat_sent)
    /// and [`beat_received`](Session::beat_received) so the heart-beat
    /// clock starts at the handshake.
    pub fn connected(&mut self, frame: &Frame) -> Result<()> {
        self.expect_state(&[SessionState::Connecting], "CONNECTED")?;
        let FromServer::Connected {
            version,
            session,
            server,
            heart_beat,
        } = FromServer::from_frame(frame, self.version)?
        else {
            return Err(StompError::Protocol(format!(
                "expected CONNECTED, got {}",
                frame.command
            )));
        };
        if !self.version.supported().contains(&version) {
            return Err(StompError::Protocol(format!(
                "server negotiated unsupported version {version}"
            )));
        }
        self.negotiated = Some(version);
        self.heart_beat = HeartBeat::negotiate(self.client_heart_beat, heart_beat);
        self.id = session;
        self.server = server;
        self.state = SessionState::Connected;
        Ok(())
    }

    /// Build the DISCONNECT frame. With a receipt the session waits in
    /// `Disconnecting` for the matching RECEIPT; without one there is
    /// nothing to wait for and the disconnect completes immediately.
    pub fn disconnect(&mut self, receipt: Option<String>) -> Result<Frame> {
        self.expect_state(&[SessionState::Connected], "disconnect")?;
        self.ensure_receipt_free(receipt.as_deref())?;
        let command = ToServer::Disconnect {
            receipt: receipt.clone(),
        };
        let frame = command.to_frame(self.version())?;
        self.record_receipt(&command, &frame);
        match receipt {
            Some(id) => {
                self.disconnect_receipt = Some(id);
                self.state = SessionState::Disconnecting;
            }
            None => self.complete_disconnect(),
        }
        Ok(frame)
    }

    /// The transport has closed. Subscriptions are preserved for
    /// [`replay`](Session::replay); transactions, outstanding receipts and
    /// the negotiation results are gone with the connection.
    pub fn disconnected(&mut self) {
        if self.state != SessionState::Disconnected {
            self.complete_disconnect();
        }
    }

    /// Forget all session state, including subscriptions preserved for
    /// replay. Only a disconnected session may be flushed; afterwards it
    /// is as good as new.
    pub fn flush(&mut self) -> Result<()> {
        self.expect_state(&[SessionState::Disconnected], "flush")?;
        self.subscriptions.clear();
        self.replay_queue.clear();
        self.transactions.clear();
        self.receipts.clear();
        Ok(())
    }

    fn complete_disconnect(&mut self) {
        self.replay_queue.append(&mut self.subscriptions);
        self.transactions.clear();
        self.receipts.clear();
        self.disconnect_receipt = None;
        self.negotiated = None;
        self.id = None;
        self.server = None;
        self.heart_beat = HeartBeat::DISABLED;
        self.last_sent_ms = 0;
        self.last_received_ms = 0;
        self.state = SessionState::Disconnected;
    }

    // ---- client commands ----------------------------------------------

    /// Build a SEND frame. A named transaction must be active.
    pub fn send(
        &mut self,
        destination: impl Into<String>,
        body: Vec<u8>,
        headers: Vec<(String, String)>,
        transaction: Option<String>,
        receipt: Option<String>,
    ) -> Result<Frame> {
        self.expect_state(&[SessionState::Connected], "send")?;
        self.check_transaction(transaction.as_deref())?;
        self.ensure_receipt_free(receipt.as_deref())?;
        let command = ToServer::Send {
            destination: destination.into(),
            transaction,
            headers,
            body,
            receipt,
        };
        let frame = command.to_frame(self.version())?;
        self.record_receipt(&command, &frame);
        Ok(frame)
    }

    /// Build a SUBSCRIBE frame and register the subscription.
    ///
    /// The returned token identifies the subscription for
    /// [`unsubscribe`](Session::unsubscribe) and correlates incoming
    /// MESSAGE frames. Tokens are stable across reconnects.
    pub fn subscribe(
        &mut self,
        destination: impl Into<String>,
        options: SubscribeOptions,
        context: C,
    ) -> Result<(Frame, String)> {
        self.expect_state(&[SessionState::Connected], "subscribe")?;
        self.ensure_receipt_free(options.receipt.as_deref())?;
        let destination = destination.into();
        let command = ToServer::Subscribe {
            destination: destination.clone(),
            id: options.id.clone(),
            ack: options.ack,
            headers: options.headers.clone(),
            receipt: options.receipt,
        };
        let frame = command.to_frame(self.version())?;
        let token = options.id.clone().unwrap_or_else(|| destination.clone());
        if self.subscriptions.iter().any(|r| r.token == token) {
            return Err(StompError::Protocol(format!(
                "subscription already exists: {token:?}"
            )));
        }
        self.record_receipt(&command, &frame);
        self.subscriptions.push(SubscriptionRecord {
            token: token.clone(),
            destination,
            id: options.id,
            ack: options.ack,
            headers: options.headers,
            context,
        });
        Ok((frame, token))
    }

    /// Build an UNSUBSCRIBE frame and drop the subscription.
    pub fn unsubscribe(&mut self, token: &str, receipt: Option<String>) -> Result<Frame> {
        self.expect_state(&[SessionState::Connected], "unsubscribe")?;
        self.ensure_receipt_free(receipt.as_deref())?;
        let position = self
            .subscriptions
            .iter()
            .position(|r| r.token == token)
            .ok_or_else(|| StompError::Protocol(format!("unknown subscription: {token:?}")))?;
        let record = &self.subscriptions[position];
        let command = ToServer::Unsubscribe {
            id: record.id.clone(),
            destination: record
                .id
                .is_none()
                .then(|| record.destination.clone()),
            receipt,
        };
        let frame = command.to_frame(self.version())?;
        self.record_receipt(&command, &frame);
        self.subscriptions.remove(position);
        Ok(frame)
    }

    /// Build an ACK frame for a received MESSAGE, referencing whatever
    /// header the negotiated version uses.
    pub fn ack(
        &mut self,
        message: &Frame,
        transaction: Option<String>,
        receipt: Option<String>,
    ) -> Result<Frame> {
        self.acknowledge(true, message, transaction, receipt)
    }

    /// Build a NACK frame for a received MESSAGE.
    pub fn nack(
        &mut self,
        message: &Frame,
        transaction: Option<String>,
        receipt: Option<String>,
    ) -> Result<Frame> {
        self.acknowledge(false, message, transaction, receipt)
    }

    fn acknowledge(
        &mut self,
        positive: bool,
        message: &Frame,
        transaction: Option<String>,
        receipt: Option<String>,
    ) -> Result<Frame> {
        let what = if positive { "ack" } else { "nack" };
        self.expect_state(&[SessionState::Connected], what)?;
        self.check_transaction(transaction.as_deref())?;
        self.ensure_receipt_free(receipt.as_deref())?;

        let version = self.version();
        let message_header = |name: &str| -> Result<String> {
            message
                .get_header(name)
                .map(str::to_string)
                .ok_or_else(|| {
                    StompError::Protocol(format!("cannot {what} a MESSAGE without a {name} header"))
                })
        };
        let (id, subscription) = match version {
            StompVersion::V1_2 => (message_header(header::ACK)?, None),
            StompVersion::V1_1 => (
                message_header(header::MESSAGE_ID)?,
                Some(message_header(header::SUBSCRIPTION)?),
            ),
            StompVersion::V1_0 => (message_header(header::MESSAGE_ID)?, None),
        };
        let command = if positive {
            ToServer::Ack {
                id,
                subscription,
                transaction,
                receipt,
            }
        } else {
            ToServer::Nack {
                id,
                subscription,
                transaction,
                receipt,
            }
        };
        let frame = command.to_frame(version)?;
        self.record_receipt(&command, &frame);
        Ok(frame)
    }

    /// Open a transaction. Identifiers must be unique among the active
    /// transactions of the session.
    pub fn begin(
        &mut self,
        transaction: impl Into<String>,
        receipt: Option<String>,
    ) -> Result<Frame> {
        self.expect_state(&[SessionState::Connected], "begin")?;
        let transaction = transaction.into();
        if self.transactions.contains(&transaction) {
            return Err(StompError::Protocol(format!(
                "transaction already active: {transaction:?}"
            )));
        }
        self.ensure_receipt_free(receipt.as_deref())?;
        let command = ToServer::Begin {
            transaction: transaction.clone(),
            receipt,
        };
        let frame = command.to_frame(self.version())?;
        self.record_receipt(&command, &frame);
        self.transactions.push(transaction);
        Ok(frame)
    }

    /// Commit an active transaction.
    pub fn commit(&mut self, transaction: &str, receipt: Option<String>) -> Result<Frame> {
        self.finish_transaction(true, transaction, receipt)
    }

    /// Abort an active transaction.
    pub fn abort(&mut self, transaction: &str, receipt: Option<String>) -> Result<Frame> {
        self.finish_transaction(false, transaction, receipt)
    }

    fn finish_transaction(
        &mut self,
        commit: bool,
        transaction: &str,
        receipt: Option<String>,
    ) -> Result<Frame> {
        let what = if commit { "commit" } else { "abort" };
        self.expect_state(&[SessionState::Connected], what)?;
        let position = self
            .transactions
            .iter()
            .position(|t| t == transaction)
            .ok_or_else(|| {
                StompError::Protocol(format!("unknown transaction: {transaction:?}"))
            })?;
        self.ensure_receipt_free(receipt.as_deref())?;
        let command = if commit {
            ToServer::Commit {
                transaction: transaction.to_string(),
                receipt,
            }
        } else {
            ToServer::Abort {
                transaction: transaction.to_string(),
                receipt,
            }
        };
        let frame = command.to_frame(self.version())?;
        self.record_receipt(&command, &frame);
        self.transactions.remove(position);
        Ok(frame)
    }

    // ---- server frames ------------------------------------------------

    /// Resolve a MESSAGE frame to the subscription it belongs to,
    /// returning the token and the context supplied at subscribe time.
    pub fn message(&self, frame: &Frame) -> Result<(&str, &C)> {
        self.expect_state(&[SessionState::Connected], "MESSAGE")?;
        let FromServer::Message {
            destination,
            subscription,
            ..
        } = FromServer::from_frame(frame, self.version())?
        else {
            return Err(StompError::Protocol(format!(
                "expected MESSAGE, got {}",
                frame.command
            )));
        };
        let record = match &subscription {
            Some(token) => self.subscriptions.iter().find(|r| &r.token == token),
            None => self
                .subscriptions
                .iter()
                .find(|r| r.destination == destination),
        }
        .ok_or_else(|| {
            StompError::Protocol(format!(
                "MESSAGE for unknown subscription on {destination:?}"
            ))
        })?;
        Ok((record.token.as_str(), &record.context))
    }

    /// Resolve a RECEIPT frame against the outstanding receipts. A receipt
    /// matching a pending disconnect completes it.
    pub fn receipt(&mut self, frame: &Frame) -> Result<String> {
        self.expect_state(
            &[SessionState::Connected, SessionState::Disconnecting],
            "RECEIPT",
        )?;
        let FromServer::Receipt { receipt_id } = FromServer::from_frame(frame, self.version())?
        else {
            return Err(StompError::Protocol(format!(
                "expected RECEIPT, got {}",
                frame.command
            )));
        };
        let position = self
            .receipts
            .iter()
            .position(|(id, _)| *id == receipt_id)
            .ok_or_else(|| {
                StompError::Protocol(format!("unexpected receipt: {receipt_id:?}"))
            })?;
        self.receipts.remove(position);
        if self.disconnect_receipt.as_deref() == Some(receipt_id.as_str()) {
            self.complete_disconnect();
        }
        Ok(receipt_id)
    }

    /// Digest an ERROR frame. During the handshake it aborts the attempt
    /// and the session falls back to `Disconnected`.
    pub fn error(&mut self, frame: &Frame) -> Result<FromServer> {
        self.expect_state(
            &[
                SessionState::Connecting,
                SessionState::Connected,
                SessionState::Disconnecting,
            ],
            "ERROR",
        )?;
        let parsed = FromServer::from_frame(frame, self.version())?;
        if !matches!(parsed, FromServer::Error { .. }) {
            return Err(StompError::Protocol(format!(
                "expected ERROR, got {}",
                frame.command
            )));
        }
        if self.state == SessionState::Connecting {
            self.complete_disconnect();
        }
        Ok(parsed)
    }

    // ---- replay -------------------------------------------------------

    /// Hand out the subscriptions preserved across the last disconnect, in
    /// original insertion order, so the caller can subscribe again after
    /// reconnecting. The entries are moved out, not copied.
    pub fn replay(&mut self) -> impl Iterator<Item = ReplayEntry<C>> + '_ {
        self.replay_queue.drain(..).map(|record| ReplayEntry {
            token: record.token,
            destination: record.destination,
            id: record.id,
            ack: record.ack,
            headers: record.headers,
            context: record.context,
        })
    }

    // ---- heart-beats --------------------------------------------------

    /// The negotiated heart-beat intervals; disabled until connected.
    pub fn heart_beat(&self) -> HeartBeat {
        self.heart_beat
    }

    /// Record that bytes were written at `now_ms`.
    pub fn beat_sent(&mut self, now_ms: u64) {
        self.last_sent_ms = now_ms;
    }

    /// Record that bytes arrived at `now_ms`.
    pub fn beat_received(&mut self, now_ms: u64) {
        self.last_received_ms = now_ms;
    }

    pub fn last_sent(&self) -> u64 {
        self.last_sent_ms
    }

    pub fn last_received(&self) -> u64 {
        self.last_received_ms
    }

    /// Whether an idle heart-beat should be written now.
    pub fn send_due(&self, now_ms: u64) -> bool {
        self.heart_beat.send_ms != 0
            && now_ms.saturating_sub(self.last_sent_ms) >= self.heart_beat.send_ms
    }

    /// Whether the peer has been silent past the negotiated receive
    /// interval times the slack factor.
    pub fn peer_timed_out(&self, now_ms: u64) -> bool {
        self.heart_beat.recv_ms != 0
            && now_ms.saturating_sub(self.last_received_ms) as f64
                > self.heart_beat.recv_ms as f64 * self.slack
    }

    /// Adjust the receive tolerance. The default is
    /// [`DEFAULT_HEART_BEAT_SLACK`].
    pub fn set_slack(&mut self, slack: f64) {
        self.slack = slack;
    }

    /// The heart-beat frame, available once sending heart-beats was
    /// negotiated.
    pub fn send_heart_beat(&self) -> Result<Frame> {
        self.expect_state(&[SessionState::Connected], "send_heart_beat")?;
        if self.heart_beat.send_ms == 0 {
            return Err(StompError::Protocol(
                "heart-beats were not negotiated for sending".into(),
            ));
        }
        Ok(Frame::heart_beat())
    }

    // ---- accessors ----------------------------------------------------

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// The negotiated version once connected, the configured ceiling
    /// before.
    pub fn version(&self) -> StompVersion {
        self.negotiated.unwrap_or(self.version)
    }

    /// The server-assigned session identifier, if any.
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// The server identity advertised on CONNECTED, if any.
    pub fn server(&self) -> Option<&str> {
        self.server.as_deref()
    }

    /// Outstanding receipt ids, oldest first.
    pub fn outstanding_receipts(&self) -> impl Iterator<Item = &str> {
        self.receipts.iter().map(|(id, _)| id.as_str())
    }

    pub fn has_receipt(&self, id: &str) -> bool {
        self.receipts.iter().any(|(r, _)| r == id)
    }

    pub fn active_transactions(&self) -> impl Iterator<Item = &str> {
        self.transactions.iter().map(String::as_str)
    }

    /// Tokens of the active subscriptions, in insertion order.
    pub fn subscription_tokens(&self) -> impl Iterator<Item = &str> {
        self.subscriptions.iter().map(|r| r.token.as_str())
    }

    // ---- internals ----------------------------------------------------

    fn expect_state(&self, allowed: &[SessionState], what: &str) -> Result<()> {
        if self.check && !allowed.contains(&self.state) {
            return Err(StompError::Protocol(format!(
                "{what} is not allowed in the {:?} state",
                self.state
            )));
        }
        Ok(())
    }

    fn check_transaction(&self, transaction: Option<&str>) -> Result<()> {
        match transaction {
            Some(tx) if !self.transactions.iter().any(|t| t == tx) => Err(
                StompError::Protocol(format!("unknown transaction: {tx:?}")),
            ),
            _ => Ok(()),
        }
    }

    fn ensure_receipt_free(&self, receipt: Option<&str>) -> Result<()> {
        match receipt {
            Some(id) if self.has_receipt(id) => Err(StompError::Protocol(format!(
                "receipt already outstanding: {id:?}"
            ))),
            _ => Ok(()),
        }
    }

    fn record_receipt(&mut self, command: &ToServer, frame: &Frame) {
        if let Some(id) = command.receipt() {
            self.receipts.push((id.to_string(), frame.command.clone()));
        }
    }
}
