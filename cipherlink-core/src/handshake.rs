// SPDX-License-Identifier: MIT
//
// CipherLink: Encrypted Point-to-Point Serial Link
// Copyright (c) 2025 CipherLink Contributors

//! Public key exchange over an unframed serial line
//!
//! Each role runs its own state machine until both sides hold the other's public key:
//!
//! ```text
//! Client                                Server
//!   |                                      |  Listen
//!   |------ 'C' [e_c][n_c] --------------->|  WaitForKey
//!   |<----- 'A' [e_s][n_s] ----------------|  WaitForAck
//!   |------ 'A' -------------------------->|
//!   |  DataExchange                        |  DataExchange
//! ```
//!
//! The line has no resynchronization marker, so every timeout or unexpected tag sends the
//! role back to its initial state and any partially received key is dropped. The client
//! re-sends its connect request on every attempt.
//!
//! The transitions themselves are pure functions ([`ServerState::step`],
//! [`ClientState::step`]); [`Handshake`] drives them against a real port and clock.

use crate::io::{Clock, Serial};
use crate::keygen::{KeyPair, PeerKey};
use crate::metrics::LinkMetrics;
use crate::poll::PollPolicy;
use crate::protocol::{self, Frame, Role, ACK, CONNECT, KEY_LEN};
use crate::{Error, Result};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, trace, warn};

/// Input to a handshake state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// One tag byte arrived
    Byte(u8),
    /// Eight key bytes arrived
    Key(PeerKey),
    /// Nothing (or not enough) arrived before the deadline
    Timeout,
}

/// Frame a transition asks the driver to send
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    /// `'C'` followed by our public key
    ConnectWithKey,
    /// `'A'` followed by our public key
    AckWithKey,
    /// A bare `'A'`
    Ack,
}

impl Reply {
    /// Materialize the frame with our own public key
    pub fn frame(self, own: PeerKey) -> Frame {
        match self {
            Self::ConnectWithKey => Frame::ConnectWithKey(own),
            Self::AckWithKey => Frame::AckWithKey(own),
            Self::Ack => Frame::Ack,
        }
    }
}

/// What a non-terminal state is waiting for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Await {
    Tag,
    Key,
}

impl Await {
    /// Bytes that must be available before the state can advance
    pub fn byte_count(self) -> usize {
        match self {
            Self::Tag => 1,
            Self::Key => KEY_LEN,
        }
    }
}

/// Server-side handshake states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// Waiting for a connect request
    Listen,
    /// Connect seen, waiting for the client's key. `first_attempt` is cleared once our own
    /// key has gone out, so a repeated connect does not trigger a second copy.
    WaitForKey { first_attempt: bool },
    /// Key exchanged, waiting for the client's final acknowledge
    WaitForAck { peer: PeerKey },
    /// Terminal
    DataExchange(PeerKey),
}

impl ServerState {
    pub fn awaiting(&self) -> Option<Await> {
        match self {
            Self::Listen | Self::WaitForAck { .. } => Some(Await::Tag),
            Self::WaitForKey { .. } => Some(Await::Key),
            Self::DataExchange(_) => None,
        }
    }

    pub fn step(self, event: Event) -> (Self, Option<Reply>) {
        match (self, event) {
            (Self::Listen, Event::Byte(CONNECT)) => (Self::WaitForKey { first_attempt: true }, None),
            (Self::Listen, _) => (Self::Listen, None),

            (Self::WaitForKey { first_attempt }, Event::Key(peer)) if peer.can_carry_bytes() => (
                Self::WaitForAck { peer },
                first_attempt.then_some(Reply::AckWithKey),
            ),
            (Self::WaitForKey { .. }, _) => (Self::Listen, None),

            (Self::WaitForAck { peer }, Event::Byte(ACK)) => (Self::DataExchange(peer), None),
            (Self::WaitForAck { .. }, Event::Byte(CONNECT)) => {
                (Self::WaitForKey { first_attempt: false }, None)
            }
            (Self::WaitForAck { .. }, _) => (Self::Listen, None),

            (done @ Self::DataExchange(_), _) => (done, None),
        }
    }
}

/// Client-side handshake states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// Connect request sent; `ack_seen` once the server's `'A'` arrived and its key is due
    WaitForAck { ack_seen: bool },
    /// Terminal
    DataExchange(PeerKey),
}

impl ClientState {
    pub fn awaiting(&self) -> Option<Await> {
        match self {
            Self::WaitForAck { ack_seen: false } => Some(Await::Tag),
            Self::WaitForAck { ack_seen: true } => Some(Await::Key),
            Self::DataExchange(_) => None,
        }
    }

    /// Frame sent on entering the state, before waiting
    pub fn on_entry(&self) -> Option<Reply> {
        match self {
            Self::WaitForAck { ack_seen: false } => Some(Reply::ConnectWithKey),
            _ => None,
        }
    }

    pub fn step(self, event: Event) -> (Self, Option<Reply>) {
        match (self, event) {
            (Self::WaitForAck { ack_seen: false }, Event::Byte(ACK)) => {
                (Self::WaitForAck { ack_seen: true }, None)
            }
            (Self::WaitForAck { ack_seen: true }, Event::Key(peer)) if peer.can_carry_bytes() => {
                (Self::DataExchange(peer), Some(Reply::Ack))
            }
            (Self::WaitForAck { .. }, _) => (Self::WaitForAck { ack_seen: false }, None),

            (done @ Self::DataExchange(_), _) => (done, None),
        }
    }
}

/// Handshake state of either role
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    Server(ServerState),
    Client(ClientState),
}

impl HandshakeState {
    pub fn initial(role: Role) -> Self {
        match role {
            Role::Server => Self::Server(ServerState::Listen),
            Role::Client => Self::Client(ClientState::WaitForAck { ack_seen: false }),
        }
    }

    pub fn role(&self) -> Role {
        match self {
            Self::Server(_) => Role::Server,
            Self::Client(_) => Role::Client,
        }
    }

    pub fn awaiting(&self) -> Option<Await> {
        match self {
            Self::Server(s) => s.awaiting(),
            Self::Client(c) => c.awaiting(),
        }
    }

    pub fn on_entry(&self) -> Option<Reply> {
        match self {
            Self::Server(_) => None,
            Self::Client(c) => c.on_entry(),
        }
    }

    pub fn step(self, event: Event) -> (Self, Option<Reply>) {
        match self {
            Self::Server(s) => {
                let (next, reply) = s.step(event);
                (Self::Server(next), reply)
            }
            Self::Client(c) => {
                let (next, reply) = c.step(event);
                (Self::Client(next), reply)
            }
        }
    }

    /// The peer's key once data exchange is reached
    pub fn peer_key(&self) -> Option<PeerKey> {
        match self {
            Self::Server(ServerState::DataExchange(k)) | Self::Client(ClientState::DataExchange(k)) => {
                Some(*k)
            }
            _ => None,
        }
    }

    pub fn is_initial(&self) -> bool {
        *self == Self::initial(self.role())
    }

    /// Whether moving from `self` to `next` abandons an attempt
    ///
    /// The client starts a new attempt, re-sending its key, every time it lands in its
    /// initial state. An idle server looping in `Listen` is not retrying.
    fn is_restart(&self, next: &Self) -> bool {
        next.is_initial() && (self.role() == Role::Client || !self.is_initial())
    }
}

impl fmt::Display for HandshakeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Server(ServerState::Listen) => write!(f, "Listen"),
            Self::Server(ServerState::WaitForKey { .. }) => write!(f, "WaitForKey"),
            Self::Server(ServerState::WaitForAck { .. }) | Self::Client(ClientState::WaitForAck { .. }) => {
                write!(f, "WaitForAck")
            }
            Self::Server(ServerState::DataExchange(_)) | Self::Client(ClientState::DataExchange(_)) => {
                write!(f, "DataExchange")
            }
        }
    }
}

/// Drives a role's state machine over a serial line
pub struct Handshake<'a, T: ?Sized, C: ?Sized> {
    transport: &'a mut T,
    clock: &'a mut C,
    own: PeerKey,
    state: HandshakeState,
    policy: PollPolicy,
    max_attempts: Option<u32>,
    attempts: u32,
    metrics: LinkMetrics,
}

impl<'a, T, C> Handshake<'a, T, C>
where
    T: Serial + ?Sized,
    C: Clock + ?Sized,
{
    pub fn new(role: Role, own: &KeyPair, transport: &'a mut T, clock: &'a mut C) -> Self {
        Self {
            transport,
            clock,
            own: own.public_key(),
            state: HandshakeState::initial(role),
            policy: PollPolicy::default(),
            max_attempts: None,
            attempts: 0,
            metrics: LinkMetrics::new(),
        }
    }

    pub fn with_policy(mut self, policy: PollPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Give up after this many restarts. `0` retries forever.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = (max_attempts > 0).then_some(max_attempts);
        self
    }

    pub fn with_metrics(mut self, metrics: LinkMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// Restarts so far
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Run one wait-and-transition cycle
    ///
    /// Returns the peer's key once data exchange is reached.
    pub fn step(&mut self) -> Result<Option<PeerKey>> {
        let Some(awaiting) = self.state.awaiting() else {
            return Ok(self.state.peer_key());
        };

        if let Some(reply) = self.state.on_entry() {
            self.send(reply)?;
        }

        let event = self.next_event(awaiting)?;
        let (next, reply) = self.state.step(event);

        if let Some(reply) = reply {
            self.send(reply)?;
        }

        self.observe(event, &next)?;
        self.state = next;

        Ok(self.state.peer_key())
    }

    /// Run until data exchange, failure, or `stop` is raised
    pub fn run(&mut self, stop: &AtomicBool) -> Result<PeerKey> {
        info!(role = %self.state.role(), own = %self.own, "starting handshake");
        loop {
            if stop.load(Ordering::Relaxed) {
                return Err(Error::Cancelled);
            }
            if let Some(peer) = self.step()? {
                return Ok(peer);
            }
        }
    }

    fn next_event(&mut self, awaiting: Await) -> Result<Event> {
        if !self
            .policy
            .wait_for(&mut *self.transport, &mut *self.clock, awaiting.byte_count())?
        {
            return Ok(Event::Timeout);
        }

        Ok(match awaiting {
            Await::Tag => Event::Byte(self.transport.read_byte()?),
            Await::Key => Event::Key(protocol::read_key(&mut *self.transport)?),
        })
    }

    fn send(&mut self, reply: Reply) -> Result<()> {
        let frame = reply.frame(self.own);
        trace!(frame = %hex::encode(frame.encode()), "sending handshake frame");
        frame.write_to(&mut *self.transport)?;
        Ok(())
    }

    fn observe(&mut self, event: Event, next: &HandshakeState) -> Result<()> {
        let role = self.state.role();

        match event {
            Event::Timeout => self.metrics.record_handshake_timeout(),
            Event::Byte(b) if next.is_initial() => {
                self.metrics.record_handshake_rejected();
                debug!(%role, byte = b, state = %self.state, "discarding unexpected byte");
            }
            Event::Key(peer) if !peer.can_carry_bytes() => {
                self.metrics.record_handshake_rejected();
                warn!(%role, %peer, "peer key modulus too small, ignoring");
            }
            _ => {}
        }

        if self.state.is_restart(next) {
            self.attempts += 1;
            self.metrics.record_handshake_restart();
            if self.state.is_initial() && role == Role::Client && event == Event::Timeout {
                debug!(%role, attempt = self.attempts, "no answer, re-sending connect request");
            } else {
                warn!(%role, from = %self.state, ?event, attempt = self.attempts, "handshake restarted");
            }

            if let Some(max) = self.max_attempts {
                if self.attempts >= max {
                    return Err(Error::HandshakeFailed {
                        attempts: self.attempts,
                    });
                }
            }
        } else if self.state != *next {
            debug!(%role, from = %self.state, to = %next, "handshake transition");
        }

        if let Some(peer) = next.peer_key() {
            self.metrics.record_handshake_complete();
            info!(%role, %peer, attempts = self.attempts, "handshake complete");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::SystemClock;
    use crate::sim::{pipe, ManualClock, MemorySerial};
    use std::sync::Arc;

    const CLIENT_KEY: PeerKey = PeerKey {
        public_exponent: 11,
        modulus: 84823,
    };
    const SERVER_KEY: PeerKey = PeerKey {
        public_exponent: 7,
        modulus: 95477,
    };

    fn key_bytes(key: PeerKey) -> Vec<u8> {
        protocol::encode_key(&key).to_vec()
    }

    #[test]
    fn test_server_transition_table() {
        use ServerState::*;
        let peer = CLIENT_KEY;
        let table = [
            (Listen, Event::Byte(b'C'), WaitForKey { first_attempt: true }, None),
            (Listen, Event::Byte(b'A'), Listen, None),
            (Listen, Event::Byte(b'x'), Listen, None),
            (Listen, Event::Timeout, Listen, None),
            (
                WaitForKey { first_attempt: true },
                Event::Key(peer),
                WaitForAck { peer },
                Some(Reply::AckWithKey),
            ),
            (WaitForKey { first_attempt: false }, Event::Key(peer), WaitForAck { peer }, None),
            (WaitForKey { first_attempt: true }, Event::Timeout, Listen, None),
            (WaitForKey { first_attempt: true }, Event::Key(PeerKey::new(3, 0)), Listen, None),
            (WaitForAck { peer }, Event::Byte(b'A'), DataExchange(peer), None),
            (WaitForAck { peer }, Event::Byte(b'C'), WaitForKey { first_attempt: false }, None),
            (WaitForAck { peer }, Event::Byte(b'?'), Listen, None),
            (WaitForAck { peer }, Event::Timeout, Listen, None),
            (DataExchange(peer), Event::Timeout, DataExchange(peer), None),
        ];

        for (from, event, to, reply) in table {
            assert_eq!(from.step(event), (to, reply), "{:?} on {:?}", from, event);
        }
    }

    #[test]
    fn test_client_transition_table() {
        use ClientState::*;
        let peer = SERVER_KEY;
        let table = [
            (WaitForAck { ack_seen: false }, Event::Byte(b'A'), WaitForAck { ack_seen: true }, None),
            (WaitForAck { ack_seen: false }, Event::Byte(b'C'), WaitForAck { ack_seen: false }, None),
            (WaitForAck { ack_seen: false }, Event::Timeout, WaitForAck { ack_seen: false }, None),
            (WaitForAck { ack_seen: true }, Event::Key(peer), DataExchange(peer), Some(Reply::Ack)),
            (WaitForAck { ack_seen: true }, Event::Timeout, WaitForAck { ack_seen: false }, None),
            (
                WaitForAck { ack_seen: true },
                Event::Key(PeerKey::new(7, 200)),
                WaitForAck { ack_seen: false },
                None,
            ),
            (DataExchange(peer), Event::Byte(b'A'), DataExchange(peer), None),
        ];

        for (from, event, to, reply) in table {
            assert_eq!(from.step(event), (to, reply), "{:?} on {:?}", from, event);
        }

        assert_eq!(WaitForAck { ack_seen: false }.on_entry(), Some(Reply::ConnectWithKey));
        assert_eq!(WaitForAck { ack_seen: true }.on_entry(), None);
    }

    #[test]
    fn test_server_scenario() {
        let own = KeyPair::PRESET_SERVER;
        let mut port = MemorySerial::with_input(b"C");
        let mut clock = ManualClock::new();
        let mut hs = Handshake::new(Role::Server, &own, &mut port, &mut clock);

        assert_eq!(hs.step().unwrap(), None);
        assert_eq!(hs.state(), HandshakeState::Server(ServerState::WaitForKey { first_attempt: true }));

        hs.transport.feed(&key_bytes(CLIENT_KEY));
        assert_eq!(hs.step().unwrap(), None);
        assert_eq!(hs.state(), HandshakeState::Server(ServerState::WaitForAck { peer: CLIENT_KEY }));
        let mut expected = vec![b'A'];
        expected.extend(key_bytes(SERVER_KEY));
        assert_eq!(hs.transport.take_output(), expected);

        hs.transport.feed(b"A");
        assert_eq!(hs.step().unwrap(), Some(CLIENT_KEY));
        assert_eq!(hs.state(), HandshakeState::Server(ServerState::DataExchange(CLIENT_KEY)));
        assert!(hs.transport.outbound.is_empty());
    }

    #[test]
    fn test_client_scenario() {
        let own = KeyPair::PRESET_CLIENT;
        let mut input = vec![b'A'];
        input.extend(key_bytes(SERVER_KEY));
        let mut port = MemorySerial::with_input(&input);
        let mut clock = ManualClock::new();
        let mut hs = Handshake::new(Role::Client, &own, &mut port, &mut clock);

        assert_eq!(hs.step().unwrap(), None);
        let mut expected = vec![b'C'];
        expected.extend(key_bytes(CLIENT_KEY));
        assert_eq!(hs.transport.take_output(), expected);

        assert_eq!(hs.step().unwrap(), Some(SERVER_KEY));
        assert_eq!(hs.transport.take_output(), b"A".to_vec());
        assert_eq!(hs.state().peer_key(), Some(SERVER_KEY));
    }

    #[test]
    fn test_client_resends_on_every_attempt() {
        let own = KeyPair::PRESET_CLIENT;
        let mut port = MemorySerial::new();
        let mut clock = ManualClock::new();
        let mut hs = Handshake::new(Role::Client, &own, &mut port, &mut clock);

        hs.step().unwrap();
        hs.step().unwrap();
        assert_eq!(hs.attempts(), 2);
        assert_eq!(hs.transport.outbound.len(), 2 * 9);
        assert_eq!(hs.transport.outbound[9], b'C');
        assert_eq!(hs.clock.now_ms(), 2000);
    }

    #[test]
    fn test_wait_for_key_timeout_returns_to_listen() {
        let own = KeyPair::PRESET_SERVER;
        let mut port = MemorySerial::with_input(b"C");
        let mut clock = ManualClock::new();
        let mut hs = Handshake::new(Role::Server, &own, &mut port, &mut clock);

        hs.step().unwrap();
        hs.transport.feed(&[11, 0, 0]);
        assert_eq!(hs.step().unwrap(), None);
        assert_eq!(hs.state(), HandshakeState::Server(ServerState::Listen));
        assert!(hs.clock.now_ms() >= 1000);
        assert!(hs.transport.outbound.is_empty());
        assert_eq!(hs.attempts(), 1);
    }

    #[test]
    fn test_server_repeated_connect_does_not_resend_key() {
        let own = KeyPair::PRESET_SERVER;
        let mut input = vec![b'C'];
        input.extend(key_bytes(CLIENT_KEY));
        input.push(b'C');
        input.extend(key_bytes(CLIENT_KEY));
        input.push(b'A');
        let mut port = MemorySerial::with_input(&input);
        let mut clock = ManualClock::new();
        let stop = AtomicBool::new(false);

        let peer = Handshake::new(Role::Server, &own, &mut port, &mut clock)
            .run(&stop)
            .unwrap();
        assert_eq!(peer, CLIENT_KEY);
        assert_eq!(port.outbound.len(), 9);
    }

    #[test]
    fn test_server_skips_line_noise() {
        let own = KeyPair::PRESET_SERVER;
        let mut input = b"\x00zq".to_vec();
        input.push(b'C');
        input.extend(key_bytes(CLIENT_KEY));
        input.push(b'A');
        let mut port = MemorySerial::with_input(&input);
        let mut clock = ManualClock::new();
        let metrics = LinkMetrics::new();

        let peer = Handshake::new(Role::Server, &own, &mut port, &mut clock)
            .with_metrics(metrics.clone())
            .run(&AtomicBool::new(false))
            .unwrap();
        assert_eq!(peer, CLIENT_KEY);
        assert_eq!(metrics.handshake_rejected(), 3);
        assert_eq!(metrics.handshakes_completed(), 1);
    }

    #[test]
    fn test_attempt_cap() {
        let own = KeyPair::PRESET_CLIENT;
        let mut port = MemorySerial::new();
        let mut clock = ManualClock::new();
        let err = Handshake::new(Role::Client, &own, &mut port, &mut clock)
            .with_max_attempts(3)
            .run(&AtomicBool::new(false))
            .unwrap_err();
        assert!(matches!(err, Error::HandshakeFailed { attempts: 3 }));
        assert_eq!(port.outbound.len(), 3 * 9);
    }

    #[test]
    fn test_stop_cancels() {
        let own = KeyPair::PRESET_SERVER;
        let mut port = MemorySerial::new();
        let mut clock = ManualClock::new();
        let err = Handshake::new(Role::Server, &own, &mut port, &mut clock)
            .run(&AtomicBool::new(true))
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }

    #[test]
    fn test_peers_complete_over_pipe() {
        let (server_end, client_end) = pipe();
        let stop = Arc::new(AtomicBool::new(false));

        let server = {
            let stop = Arc::clone(&stop);
            std::thread::spawn(move || {
                let mut port = server_end;
                let mut clock = SystemClock::new();
                Handshake::new(Role::Server, &KeyPair::PRESET_SERVER, &mut port, &mut clock)
                    .with_max_attempts(20)
                    .run(&stop)
            })
        };
        let client = {
            let stop = Arc::clone(&stop);
            std::thread::spawn(move || {
                let mut port = client_end;
                let mut clock = SystemClock::new();
                Handshake::new(Role::Client, &KeyPair::PRESET_CLIENT, &mut port, &mut clock)
                    .with_max_attempts(20)
                    .run(&stop)
            })
        };

        assert_eq!(server.join().unwrap().unwrap(), CLIENT_KEY);
        assert_eq!(client.join().unwrap().unwrap(), SERVER_KEY);
    }
}
