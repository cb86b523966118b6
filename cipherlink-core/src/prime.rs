//! Prime sampling from a bit-level entropy source

use crate::io::{Clock, EntropySource};
use crate::{Error, Result};
use tracing::trace;

/// Largest prime bit width whose range `[2^k, 2^(k+1))` still fits in `u32`
pub const MAX_PRIME_BITS: u32 = 30;

/// Draws random numbers and primes from an [`EntropySource`]
///
/// Each bit is followed by a short settle delay on the injected [`Clock`], giving a
/// physical noise source time to drift between samples.
pub struct PrimeSource<E, C> {
    entropy: E,
    clock: C,
    settle_ms: u32,
}

impl<E: EntropySource, C: Clock> PrimeSource<E, C> {
    pub fn new(entropy: E, clock: C) -> Self {
        Self {
            entropy,
            clock,
            settle_ms: crate::DEFAULT_ENTROPY_SETTLE_MS,
        }
    }

    /// Override the delay between entropy samples
    pub fn with_settle_ms(mut self, settle_ms: u32) -> Self {
        self.settle_ms = settle_ms;
        self
    }

    /// Compose a `k`-bit value, sampled bit `i` landing at position `i`
    pub fn random_bits(&mut self, k: u32) -> Result<u32> {
        if k > u32::BITS {
            return Err(Error::Validation(format!(
                "cannot sample {} bits into a 32-bit value",
                k
            )));
        }

        let mut value = 0u32;
        for i in 0..k {
            if self.entropy.next_bit() {
                value |= 1 << i;
            }
            if self.settle_ms > 0 {
                self.clock.sleep_ms(self.settle_ms);
            }
        }
        Ok(value)
    }

    /// Find a prime in `[2^k, 2^(k+1))`
    ///
    /// Starts from a random point in the range and scans upward, wrapping back to `2^k`.
    /// Every candidate is tried at most once, so a range without primes is reported as
    /// an error instead of looping forever.
    pub fn prime_in_range(&mut self, k: u32) -> Result<u32> {
        if k == 0 || k > MAX_PRIME_BITS {
            return Err(Error::Validation(format!(
                "prime bit width must be between 1 and {}, got {}",
                MAX_PRIME_BITS, k
            )));
        }

        let low = 1u32 << k;
        let high = low << 1;
        let mut candidate = self.random_bits(k)? + low;

        for _ in 0..low {
            if is_prime(candidate) {
                trace!(k, prime = candidate, "found prime");
                return Ok(candidate);
            }
            candidate += 1;
            if candidate >= high {
                candidate = low;
            }
        }

        Err(Error::KeyGeneration(format!(
            "no prime in [{}, {})",
            low, high
        )))
    }

    /// Release the entropy source and clock
    pub fn into_inner(self) -> (E, C) {
        (self.entropy, self.clock)
    }
}

/// Smallest `d` with `d * d > n`, capped at `2^16`
fn upper_sqrt(n: u32) -> u32 {
    let mut d = f64::from(n).sqrt() as u32;
    while u64::from(d) * u64::from(d) <= u64::from(n) {
        d += 1;
    }
    d.min(1 << 16)
}

/// Trial-division primality test. Values below 2 are not prime.
pub fn is_prime(n: u32) -> bool {
    if n < 2 {
        return false;
    }
    (2..upper_sqrt(n)).all(|d| n % d != 0)
}
