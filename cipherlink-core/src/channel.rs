//! Encrypted character stream between the local console and the peer
//!
//! Every keystroke is encrypted with the peer's public key and sent as one little-endian
//! `u32`. Every 4-byte unit from the peer is decrypted with our private key and printed.
//! A carriage return expands to CR LF, each half sent separately.

use crate::io::{Clock, Serial};
use crate::keygen::{KeyPair, PeerKey};
use crate::metrics::LinkMetrics;
use crate::protocol::{self, CIPHER_LEN};
use crate::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, trace};

const CR: u8 = b'\r';
const LF: u8 = b'\n';

/// Data-exchange loop over an established key pair
pub struct SecureChannel<'a, T: ?Sized, K: ?Sized, C: ?Sized> {
    own: KeyPair,
    peer: PeerKey,
    transport: &'a mut T,
    console: &'a mut K,
    clock: &'a mut C,
    poll_interval_ms: u32,
    metrics: LinkMetrics,
}

impl<'a, T, K, C> SecureChannel<'a, T, K, C>
where
    T: Serial + ?Sized,
    K: Serial + ?Sized,
    C: Clock + ?Sized,
{
    pub fn new(
        own: &KeyPair,
        peer: PeerKey,
        transport: &'a mut T,
        console: &'a mut K,
        clock: &'a mut C,
    ) -> Self {
        Self {
            own: *own,
            peer,
            transport,
            console,
            clock,
            poll_interval_ms: crate::DEFAULT_POLL_INTERVAL_MS,
            metrics: LinkMetrics::new(),
        }
    }

    /// Idle sleep between iterations with no work
    pub fn with_poll_interval_ms(mut self, poll_interval_ms: u32) -> Self {
        self.poll_interval_ms = poll_interval_ms;
        self
    }

    pub fn with_metrics(mut self, metrics: LinkMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn peer(&self) -> PeerKey {
        self.peer
    }

    /// Discard everything already queued on the transport
    ///
    /// Late handshake retransmissions would otherwise be read as ciphertext.
    pub fn drain_transport(&mut self) -> Result<usize> {
        let mut dropped = 0;
        while self.transport.available()? > 0 {
            self.transport.read_byte()?;
            dropped += 1;
        }
        if dropped > 0 {
            debug!(dropped, "drained stale bytes before data exchange");
        }
        Ok(dropped)
    }

    /// Run both directions once. Returns whether anything was moved.
    pub fn poll_once(&mut self) -> Result<bool> {
        let mut worked = false;

        if self.transport.available()? >= CIPHER_LEN {
            let cipher = protocol::read_u32_le(&mut *self.transport)?;
            let byte = self.own.decrypt(cipher);
            trace!(cipher, byte, "received");
            self.console.write_byte(byte)?;
            self.console.flush()?;
            self.metrics.record_char_received(CIPHER_LEN);
            worked = true;
        }

        if self.console.available()? > 0 {
            let byte = self.console.read_byte()?;
            if byte == CR {
                self.echo_and_send(CR)?;
                self.echo_and_send(LF)?;
            } else {
                self.echo_and_send(byte)?;
            }
            self.console.flush()?;
            self.transport.flush()?;
            worked = true;
        }

        Ok(worked)
    }

    /// Drain stale input, then shuttle characters until `stop` is raised
    pub fn run(&mut self, stop: &AtomicBool) -> Result<()> {
        self.drain_transport()?;
        info!(peer = %self.peer, "secure channel open");

        while !stop.load(Ordering::Relaxed) {
            if !self.poll_once()? {
                self.clock.sleep_ms(self.poll_interval_ms.max(1));
            }
        }

        info!(
            sent = self.metrics.chars_sent(),
            received = self.metrics.chars_received(),
            "secure channel closed"
        );
        Ok(())
    }

    fn echo_and_send(&mut self, byte: u8) -> Result<()> {
        self.console.write_byte(byte)?;
        let cipher = self.peer.encrypt(byte);
        trace!(byte, cipher, "sending");
        protocol::write_u32_le(&mut *self.transport, cipher)?;
        self.metrics.record_char_sent(CIPHER_LEN);
        Ok(())
    }
}
