// SPDX-License-Identifier: MIT
//
// CipherLink: Encrypted Point-to-Point Serial Link
// Copyright (c) 2025 CipherLink Contributors

//! CipherLink Core Library
//!
//! This crate provides the building blocks of an encrypted character link between two
//! half-duplex peers sharing a byte-oriented serial line. One peer acts as server, the
//! other as client; both generate an RSA-style key pair at startup, exchange public keys
//! through a retrying handshake, and then encrypt every typed character individually.
//!
//! # Architecture
//!
//! The library is organized into modules representing core concerns:
//! - `arith`: overflow-safe modular multiplication, exponentiation and inversion
//! - `prime`: entropy-driven prime sampling
//! - `keygen`: key pair derivation from two primes
//! - `protocol`: wire tags and little-endian integer codec
//! - `handshake`: per-role key exchange state machines and their driver
//! - `channel`: the interactive encrypt/decrypt loop
//! - `io`: collaborator traits (serial line, console, entropy, clock)
//! - `sim`: in-memory collaborators for deterministic tests
//! - `poll`: bounded waiting on a serial line
//! - `retry`: exponential backoff for establishing the underlying byte link
//! - `config`: configuration management with validation
//! - `metrics`: link counters
//! - `error`: unified error types
//!
//! # Design Principles
//!
//! 1. **Explicit state**: key material is passed by value, never stored globally
//! 2. **Pure transitions**: handshake logic is a total `(state, event)` mapping
//! 3. **Injected time**: every wait goes through a [`io::Clock`], so tests run in simulated time
//! 4. **Bounded searches**: key generation fails instead of looping forever

pub mod arith;
pub mod channel;
pub mod config;
pub mod error;
pub mod handshake;
pub mod io;
pub mod keygen;
pub mod metrics;
pub mod poll;
pub mod prime;
pub mod protocol;
pub mod retry;
pub mod sim;

pub use error::{Error, Result};
pub use keygen::{KeyPair, PeerKey};
pub use protocol::Role;

/// Library version for protocol compatibility
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Bit width of the smaller prime factor
pub const SMALL_PRIME_BITS: u32 = 14;

/// Bit width of the larger prime factor
pub const LARGE_PRIME_BITS: u32 = 15;

/// Bit width of public exponent candidates
pub const PUBLIC_EXPONENT_BITS: u32 = 15;

/// Default per-state handshake timeout (1 s)
pub const DEFAULT_HANDSHAKE_TIMEOUT_MS: u64 = 1000;

/// Default polling granularity (1 ms)
pub const DEFAULT_POLL_INTERVAL_MS: u32 = 1;

/// Default settle delay between entropy samples (5 ms)
pub const DEFAULT_ENTROPY_SETTLE_MS: u32 = 5;
