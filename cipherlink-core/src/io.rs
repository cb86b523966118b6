//! Collaborator interfaces
//!
//! The link core never touches hardware directly. It talks to the outside world through
//! three narrow traits: a [`Serial`] byte port (used both for the link to the peer and for
//! the local console), an [`EntropySource`] of single random bits, and a [`Clock`].

use rand::Rng;
use std::io;
use std::time::{Duration, Instant};

/// Byte-oriented, non-framing port
///
/// Mirrors the shape of a UART driver: query how many bytes are buffered, pop one, push
/// one. Implementations must never block in [`Serial::available`].
pub trait Serial {
    /// Number of bytes that can be read without blocking
    fn available(&mut self) -> io::Result<usize>;

    /// Pop one byte. Callers only invoke this after `available()` reported data.
    fn read_byte(&mut self) -> io::Result<u8>;

    /// Push one byte
    fn write_byte(&mut self, byte: u8) -> io::Result<()>;

    /// Push a run of bytes in order
    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        for &byte in bytes {
            self.write_byte(byte)?;
        }
        Ok(())
    }

    /// Flush anything the implementation buffers internally
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<S: Serial + ?Sized> Serial for &mut S {
    fn available(&mut self) -> io::Result<usize> {
        (**self).available()
    }

    fn read_byte(&mut self) -> io::Result<u8> {
        (**self).read_byte()
    }

    fn write_byte(&mut self, byte: u8) -> io::Result<()> {
        (**self).write_byte(byte)
    }

    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        (**self).write_all(bytes)
    }

    fn flush(&mut self) -> io::Result<()> {
        (**self).flush()
    }
}

/// Source of single random bits
pub trait EntropySource {
    fn next_bit(&mut self) -> bool;
}

impl<E: EntropySource + ?Sized> EntropySource for &mut E {
    fn next_bit(&mut self) -> bool {
        (**self).next_bit()
    }
}

/// Monotonic millisecond clock with a sleep primitive
pub trait Clock {
    fn now_ms(&self) -> u64;
    fn sleep_ms(&mut self, ms: u32);
}

impl<C: Clock + ?Sized> Clock for &mut C {
    fn now_ms(&self) -> u64 {
        (**self).now_ms()
    }

    fn sleep_ms(&mut self, ms: u32) {
        (**self).sleep_ms(ms)
    }
}

/// Wall clock backed by [`Instant`]
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }

    fn sleep_ms(&mut self, ms: u32) {
        std::thread::sleep(Duration::from_millis(u64::from(ms)));
    }
}

/// Entropy drawn from the thread-local CSPRNG
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadRngEntropy;

impl EntropySource for ThreadRngEntropy {
    fn next_bit(&mut self) -> bool {
        rand::thread_rng().gen()
    }
}
