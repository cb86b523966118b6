//! Modular arithmetic over 32-bit unsigned integers
//!
//! Products are built by double-and-add, so no intermediate value ever leaves `u32`.
//! A native `u64` multiply would be simpler on hosts with cheap 64-bit arithmetic;
//! this form keeps the same contract on targets that lack it.

/// `(a + b) mod m` for `a, b < m`, without overflowing `u32`.
#[inline]
fn add_mod(a: u32, b: u32, m: u32) -> u32 {
    if a >= m - b {
        a - (m - b)
    } else {
        a + b
    }
}

/// Compute `(a * b) mod m` without forming the full product.
///
/// Walks the bits of `b` from least to most significant, doubling `a mod m` at
/// every step and accumulating it whenever the current bit is set.
///
/// # Panics
///
/// Panics if `m == 0`.
pub fn mul_mod(a: u32, b: u32, m: u32) -> u32 {
    assert!(m > 0, "modulus must be non-zero");

    let mut result = 0;
    let mut doubled = a % m;
    let mut rest = b;

    while rest > 0 {
        if rest & 1 == 1 {
            result = add_mod(result, doubled, m);
        }
        doubled = add_mod(doubled, doubled, m);
        rest >>= 1;
    }

    result
}

/// Compute `(base ^ exp) mod m` by square-and-multiply.
///
/// Every multiplication goes through [`mul_mod`]. `pow_mod(x, 0, m)` is `1 mod m`.
///
/// ```
/// use cipherlink_core::arith::pow_mod;
/// assert_eq!(pow_mod(2, 5, 13), 6);
/// ```
///
/// # Panics
///
/// Panics if `m == 0`.
pub fn pow_mod(base: u32, exp: u32, m: u32) -> u32 {
    assert!(m > 0, "modulus must be non-zero");

    let mut result = 1 % m;
    let mut square = base % m;
    let mut rest = exp;

    while rest > 0 {
        if rest & 1 == 1 {
            result = mul_mod(result, square, m);
        }
        square = mul_mod(square, square, m);
        rest >>= 1;
    }

    result
}

/// Greatest common divisor by Euclid's algorithm.
pub fn gcd(mut a: u32, mut b: u32) -> u32 {
    while b > 0 {
        (a, b) = (b, a % b);
    }
    a
}

/// Modular inverse of `e` modulo `phi` by the extended Euclidean algorithm.
///
/// Returns a coefficient `i` with `e * i ≡ 1 (mod phi)`. The sign of `i` is not
/// constrained; use [`normalize`] to bring it into range. Returns `None` when
/// `e` and `phi` are not coprime.
pub fn mod_inverse(e: u32, phi: u32) -> Option<i64> {
    let (mut r0, mut r1) = (i64::from(e), i64::from(phi));
    let (mut s0, mut s1) = (1i64, 0i64);

    while r1 > 0 {
        let q = r0 / r1;
        (r0, r1) = (r1, r0 - q * r1);
        (s0, s1) = (s1, s0 - q * s1);
    }

    (r0 == 1).then_some(s0)
}

/// Reduce a signed value into `[0, m)`.
///
/// Negative inputs are lifted by the smallest multiple of `m` that makes them
/// non-negative; non-negative inputs reduce as plain `x mod m`.
///
/// # Panics
///
/// Panics if `m == 0`.
pub fn normalize(x: i64, m: u32) -> u32 {
    assert!(m > 0, "modulus must be non-zero");
    // rem_euclid is always in [0, m), which fits in u32
    x.rem_euclid(i64::from(m)) as u32
}
