//! Key pair derivation
//!
//! A key pair is built from two primes drawn from disjoint bit ranges, so the factors are
//! always distinct and their product always stays below `2^31`.

use crate::arith::{gcd, mod_inverse, normalize, pow_mod};
use crate::io::{Clock, EntropySource};
use crate::prime::PrimeSource;
use crate::protocol::Role;
use crate::{Error, Result, LARGE_PRIME_BITS, PUBLIC_EXPONENT_BITS, SMALL_PRIME_BITS};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info};

/// Upper bound (exclusive) on any modulus this crate produces or accepts
pub const MODULUS_LIMIT: u32 = 1 << 31;

/// Public half of a remote peer's key, learned during the handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerKey {
    pub public_exponent: u32,
    pub modulus: u32,
}

impl PeerKey {
    pub fn new(public_exponent: u32, modulus: u32) -> Self {
        Self {
            public_exponent,
            modulus,
        }
    }

    /// True when every byte value is strictly below the modulus, so any
    /// character survives the round trip
    pub fn can_carry_bytes(&self) -> bool {
        self.modulus > u32::from(u8::MAX)
    }

    /// Encrypt one character toward this peer
    ///
    /// # Panics
    ///
    /// Panics if the modulus is zero. Keys accepted by the handshake never are.
    pub fn encrypt(&self, byte: u8) -> u32 {
        pow_mod(u32::from(byte), self.public_exponent, self.modulus)
    }
}

impl fmt::Display for PeerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(e={}, n={})", self.public_exponent, self.modulus)
    }
}

/// A peer's own key material. Only the public half ever leaves the process.
#[derive(Clone, Copy, PartialEq, Eq, Serialize)]
pub struct KeyPair {
    public_exponent: u32,
    private_exponent: u32,
    modulus: u32,
}

impl KeyPair {
    /// Fixed server key (primes 307 and 311)
    pub const PRESET_SERVER: KeyPair = KeyPair {
        public_exponent: 7,
        private_exponent: 27103,
        modulus: 95477,
    };

    /// Fixed client key (primes 271 and 313)
    pub const PRESET_CLIENT: KeyPair = KeyPair {
        public_exponent: 11,
        private_exponent: 38291,
        modulus: 84823,
    };

    /// Assemble a key pair from raw parts
    pub fn new(public_exponent: u32, private_exponent: u32, modulus: u32) -> Result<Self> {
        if modulus <= u32::from(u8::MAX) || modulus >= MODULUS_LIMIT {
            return Err(Error::Validation(format!(
                "modulus {} must lie in (255, 2^31)",
                modulus
            )));
        }
        Ok(Self {
            public_exponent,
            private_exponent,
            modulus,
        })
    }

    /// Derive a key pair from two distinct primes and a public exponent coprime to the
    /// totient
    pub fn from_primes(p: u32, q: u32, public_exponent: u32) -> Result<Self> {
        if p < 2 || q < 2 {
            return Err(Error::Validation(format!(
                "factors {} and {} must both be at least 2",
                p, q
            )));
        }
        let modulus = p
            .checked_mul(q)
            .filter(|&n| n < MODULUS_LIMIT)
            .ok_or_else(|| Error::Validation(format!("{} * {} does not fit below 2^31", p, q)))?;
        let totient = (p - 1) * (q - 1);
        let inverse = mod_inverse(public_exponent, totient).ok_or_else(|| {
            Error::Validation(format!(
                "public exponent {} is not coprime to totient {}",
                public_exponent, totient
            ))
        })?;
        Self::new(public_exponent, normalize(inverse, totient), modulus)
    }

    /// Fixed key for a role, for links where both ends are provisioned ahead of time
    pub fn preset(role: Role) -> Self {
        match role {
            Role::Server => Self::PRESET_SERVER,
            Role::Client => Self::PRESET_CLIENT,
        }
    }

    pub fn public_exponent(&self) -> u32 {
        self.public_exponent
    }

    pub fn private_exponent(&self) -> u32 {
        self.private_exponent
    }

    pub fn modulus(&self) -> u32 {
        self.modulus
    }

    /// Public half, as sent to the peer
    pub fn public_key(&self) -> PeerKey {
        PeerKey::new(self.public_exponent, self.modulus)
    }

    /// Decrypt one received integer, keeping the low byte
    pub fn decrypt(&self, cipher: u32) -> u8 {
        pow_mod(cipher, self.private_exponent, self.modulus) as u8
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_exponent", &self.public_exponent)
            .field("private_exponent", &"<redacted>")
            .field("modulus", &self.modulus)
            .finish()
    }
}

/// Every intermediate of one key generation run
#[derive(Debug, Clone, Copy, Serialize)]
pub struct KeyDerivation {
    pub p: u32,
    pub q: u32,
    pub totient: u32,
    /// Raw extended-Euclid coefficient, before normalization
    pub inverse: i64,
    pub key_pair: KeyPair,
}

/// Generates key pairs from an entropy-backed [`PrimeSource`]
pub struct KeyPairGenerator<E, C> {
    primes: PrimeSource<E, C>,
}

impl<E: EntropySource, C: Clock> KeyPairGenerator<E, C> {
    pub fn new(primes: PrimeSource<E, C>) -> Self {
        Self { primes }
    }

    /// Generate a fresh key pair
    pub fn generate(&mut self) -> Result<KeyPair> {
        self.derive().map(|d| d.key_pair)
    }

    /// Generate a fresh key pair, keeping the intermediates
    pub fn derive(&mut self) -> Result<KeyDerivation> {
        let p = self.primes.prime_in_range(SMALL_PRIME_BITS)?;
        let q = self.primes.prime_in_range(LARGE_PRIME_BITS)?;
        let totient = (p - 1) * (q - 1);
        debug!(p, q, totient, "selected primes");

        let public_exponent = self.public_exponent(totient)?;
        let inverse = mod_inverse(public_exponent, totient).ok_or_else(|| {
            Error::KeyGeneration(format!(
                "exponent {} has no inverse modulo {}",
                public_exponent, totient
            ))
        })?;
        let key_pair = KeyPair::new(public_exponent, normalize(inverse, totient), p * q)?;

        info!(
            public_exponent,
            modulus = key_pair.modulus(),
            "generated key pair"
        );

        Ok(KeyDerivation {
            p,
            q,
            totient,
            inverse,
            key_pair,
        })
    }

    /// Search upward from a random 15-bit value for an exponent coprime to `totient`
    ///
    /// Overflow past `2^15` wraps to `2^14`. Exponents 0 and 1 are skipped: 1 would
    /// leave every character unchanged.
    fn public_exponent(&mut self, totient: u32) -> Result<u32> {
        let high = 1u32 << PUBLIC_EXPONENT_BITS;
        let low = high >> 1;
        let mut candidate = self.primes.random_bits(PUBLIC_EXPONENT_BITS)?;

        for _ in 0..high {
            if candidate >= 2 && candidate < totient && gcd(candidate, totient) == 1 {
                return Ok(candidate);
            }
            candidate += 1;
            if candidate >= high {
                candidate = low;
            }
        }

        Err(Error::KeyGeneration(format!(
            "no exponent below 2^{} is coprime to {}",
            PUBLIC_EXPONENT_BITS, totient
        )))
    }

    /// Release the prime source
    pub fn into_inner(self) -> PrimeSource<E, C> {
        self.primes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prime::is_prime;
    use crate::sim::{ManualClock, ScriptedEntropy, SeededEntropy};

    fn generator(seed: u64) -> KeyPairGenerator<SeededEntropy, ManualClock> {
        KeyPairGenerator::new(PrimeSource::new(SeededEntropy::new(seed), ManualClock::new()))
    }

    #[test]
    fn test_generated_keys_satisfy_invariants() {
        for seed in 0..16 {
            let d = generator(seed).derive().unwrap();
            let key = d.key_pair;

            assert!(is_prime(d.p) && is_prime(d.q));
            assert!((1 << 14..1 << 15).contains(&d.p));
            assert!((1 << 15..1 << 16).contains(&d.q));
            assert_eq!(key.modulus(), d.p * d.q);
            assert!(key.modulus() < MODULUS_LIMIT);
            assert_eq!(d.totient, (d.p - 1) * (d.q - 1));
            assert_eq!(gcd(key.public_exponent(), d.totient), 1);
            assert!(key.private_exponent() < key.modulus());
            let product = u64::from(key.public_exponent()) * u64::from(key.private_exponent());
            assert_eq!(product % u64::from(d.totient), 1);
        }
    }

    #[test]
    fn test_generated_keys_round_trip_every_byte() {
        for seed in 0..8 {
            let key = generator(seed).generate().unwrap();
            let public = key.public_key();
            for byte in 0..=u8::MAX {
                assert_eq!(key.decrypt(public.encrypt(byte)), byte, "seed {} byte {}", seed, byte);
            }
        }
    }

    #[test]
    fn test_generated_keys_round_trip_sampled_values() {
        let key = generator(99).generate().unwrap();
        let n = key.modulus();
        for x in (0..n).step_by(9973) {
            let c = pow_mod(x, key.public_exponent(), n);
            assert_eq!(pow_mod(c, key.private_exponent(), n), x);
        }
    }

    #[test]
    fn test_negative_inverse_is_normalized_modulo_totient() {
        // e = 19, phi = 306 * 310: the raw coefficient is negative
        let raw = mod_inverse(19, 94860).unwrap();
        assert_eq!(raw, -39941);
        let key = KeyPair::from_primes(307, 311, 19).unwrap();
        assert_eq!(key.private_exponent(), 54919);
        assert_eq!(u64::from(key.private_exponent()) * 19 % 94860, 1);
        for byte in 0..=u8::MAX {
            assert_eq!(key.decrypt(key.public_key().encrypt(byte)), byte);
        }
    }

    #[test]
    fn test_presets_match_their_primes() {
        assert_eq!(KeyPair::from_primes(307, 311, 7).unwrap(), KeyPair::PRESET_SERVER);
        assert_eq!(KeyPair::from_primes(271, 313, 11).unwrap(), KeyPair::PRESET_CLIENT);
        assert_eq!(KeyPair::preset(Role::Client).public_key(), PeerKey::new(11, 84823));
    }

    #[test]
    fn test_public_exponent_skips_degenerate_values() {
        // p draw 0 (14 bits), q draw 0 (15 bits), exponent draw 1 (15 bits)
        let mut bits = vec![false; 14 + 15];
        bits.push(true);
        bits.extend([false; 14]);
        let entropy = ScriptedEntropy::new(bits);
        let mut gen = KeyPairGenerator::new(PrimeSource::new(entropy, ManualClock::new()));
        let key = gen.generate().unwrap();
        // 16411 * 32771: 2, 3, 5 and 6 all share a factor with the totient
        assert_eq!(key.modulus(), 16411 * 32771);
        assert_eq!(key.public_exponent(), 7);
    }

    #[test]
    fn test_from_primes_rejects_non_coprime_exponent() {
        assert!(KeyPair::from_primes(307, 311, 2).is_err());
    }

    #[test]
    fn test_from_primes_rejects_degenerate_factors() {
        for (p, q) in [(0, 311), (1, 311), (307, 0), (307, 1)] {
            assert!(
                matches!(KeyPair::from_primes(p, q, 7), Err(Error::Validation(_))),
                "{} * {}",
                p,
                q
            );
        }
    }

    #[test]
    fn test_exponent_search_gives_up_after_every_candidate() {
        // No candidate is both >= 2 and below a totient of 2
        let mut gen = generator(7);
        let err = gen.public_exponent(2).unwrap_err();
        assert!(matches!(err, Error::KeyGeneration(_)));

        // one 15-bit draw, then no further sampling during the scan
        let (_, clock) = gen.into_inner().into_inner();
        assert_eq!(clock.slept_ms(), 15 * 5);
    }

    #[test]
    fn test_debug_redacts_private_exponent() {
        let rendered = format!("{:?}", KeyPair::PRESET_SERVER);
        assert!(rendered.contains("redacted"));
        assert!(!rendered.contains("27103"));
    }

    #[test]
    fn test_peer_key_capacity() {
        assert!(PeerKey::new(7, 95477).can_carry_bytes());
        assert!(!PeerKey::new(7, 255).can_carry_bytes());
        assert!(!PeerKey::new(7, 0).can_carry_bytes());
    }
}
