//! In-memory collaborators
//!
//! Deterministic stand-ins for the serial line, console, entropy and clock. The handshake
//! and channel tests run entirely on these; [`pipe`] also lets two peers talk across
//! threads without a real transport.

use crate::io::{Clock, EntropySource, Serial};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::VecDeque;
use std::io;
use std::sync::Arc;

/// Scripted port: reads drain `inbound`, writes append to `outbound`
#[derive(Debug, Default, Clone)]
pub struct MemorySerial {
    pub inbound: VecDeque<u8>,
    pub outbound: Vec<u8>,
}

impl MemorySerial {
    pub fn new() -> Self {
        Self::default()
    }

    /// Port whose inbound queue is preloaded with `bytes`
    pub fn with_input(bytes: &[u8]) -> Self {
        Self {
            inbound: bytes.iter().copied().collect(),
            outbound: Vec::new(),
        }
    }

    /// Queue more bytes for reading
    pub fn feed(&mut self, bytes: &[u8]) {
        self.inbound.extend(bytes);
    }

    /// Take everything written so far
    pub fn take_output(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.outbound)
    }
}

impl Serial for MemorySerial {
    fn available(&mut self) -> io::Result<usize> {
        Ok(self.inbound.len())
    }

    fn read_byte(&mut self) -> io::Result<u8> {
        self.inbound
            .pop_front()
            .ok_or_else(|| io::Error::new(io::ErrorKind::WouldBlock, "no byte available"))
    }

    fn write_byte(&mut self, byte: u8) -> io::Result<()> {
        self.outbound.push(byte);
        Ok(())
    }
}

type Queue = Arc<Mutex<VecDeque<u8>>>;

/// One end of an in-memory full-duplex byte pipe
#[derive(Debug, Clone)]
pub struct PipeEnd {
    rx: Queue,
    tx: Queue,
}

/// Create a connected pair of pipe ends. Bytes written to one are readable from the other.
pub fn pipe() -> (PipeEnd, PipeEnd) {
    let a: Queue = Arc::default();
    let b: Queue = Arc::default();
    (
        PipeEnd {
            rx: Arc::clone(&a),
            tx: Arc::clone(&b),
        },
        PipeEnd { rx: b, tx: a },
    )
}

impl Serial for PipeEnd {
    fn available(&mut self) -> io::Result<usize> {
        Ok(self.rx.lock().len())
    }

    fn read_byte(&mut self) -> io::Result<u8> {
        self.rx
            .lock()
            .pop_front()
            .ok_or_else(|| io::Error::new(io::ErrorKind::WouldBlock, "no byte available"))
    }

    fn write_byte(&mut self, byte: u8) -> io::Result<()> {
        self.tx.lock().push_back(byte);
        Ok(())
    }

    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.tx.lock().extend(bytes);
        Ok(())
    }
}

/// Simulated clock: time only moves when someone sleeps
#[derive(Debug, Default, Clone)]
pub struct ManualClock {
    now: u64,
    slept: u64,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move time forward without counting it as sleep
    pub fn advance(&mut self, ms: u64) {
        self.now += ms;
    }

    /// Total milliseconds spent in `sleep_ms`
    pub fn slept_ms(&self) -> u64 {
        self.slept
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now
    }

    fn sleep_ms(&mut self, ms: u32) {
        self.now += u64::from(ms);
        self.slept += u64::from(ms);
    }
}

/// Replays a fixed bit sequence, cycling when exhausted
#[derive(Debug, Clone)]
pub struct ScriptedEntropy {
    bits: Vec<bool>,
    pos: usize,
}

impl ScriptedEntropy {
    pub fn new(bits: Vec<bool>) -> Self {
        assert!(!bits.is_empty(), "entropy script must not be empty");
        Self { bits, pos: 0 }
    }

    /// Bits that make successive `random_bits(width)` calls return `words` in order
    pub fn from_words(words: &[u32], width: u32) -> Self {
        let bits = words
            .iter()
            .flat_map(|&w| (0..width).map(move |i| (w >> i) & 1 == 1))
            .collect();
        Self::new(bits)
    }

    /// Bits consumed so far
    pub fn consumed(&self) -> usize {
        self.pos
    }
}

impl EntropySource for ScriptedEntropy {
    fn next_bit(&mut self) -> bool {
        let bit = self.bits[self.pos % self.bits.len()];
        self.pos += 1;
        bit
    }
}

/// Reproducible pseudo-random bits
#[derive(Debug, Clone)]
pub struct SeededEntropy(StdRng);

impl SeededEntropy {
    pub fn new(seed: u64) -> Self {
        Self(StdRng::seed_from_u64(seed))
    }
}

impl EntropySource for SeededEntropy {
    fn next_bit(&mut self) -> bool {
        self.0.gen()
    }
}
