// SPDX-License-Identifier: MIT
//
// CipherLink: Encrypted Point-to-Point Serial Link
// Copyright (c) 2025 CipherLink Contributors

//! Wire format for the key exchange and the encrypted character stream
//!
//! The serial line carries no framing. A handshake frame is a single tag byte, optionally
//! followed by 8 key bytes:
//!
//! ```text
//! 'C'                         connect request
//! 'A'                         acknowledge
//! 'C' | 'A' [e: u32 LE][n: u32 LE]   tag followed by a public key
//! ```
//!
//! Once both sides reach data exchange, every character travels as one little-endian
//! `u32` ciphertext.

use crate::io::Serial;
use crate::keygen::PeerKey;
use crate::{Error, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use std::str::FromStr;

/// Connect request tag
pub const CONNECT: u8 = b'C';

/// Acknowledge tag
pub const ACK: u8 = b'A';

/// Encoded size of a public key on the wire
pub const KEY_LEN: usize = 8;

/// Encoded size of one ciphertext unit
pub const CIPHER_LEN: usize = 4;

/// Which end of the link this process plays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Server,
    Client,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Server => "server",
            Self::Client => "client",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = Error;

    /// Parse from string (case-insensitive)
    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "server" => Ok(Self::Server),
            "client" => Ok(Self::Client),
            other => Err(Error::Validation(format!(
                "unknown role '{}', expected 'server' or 'client'",
                other
            ))),
        }
    }
}

/// Outbound handshake frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frame {
    /// Bare acknowledge
    Ack,
    /// Connect request carrying the sender's public key
    ConnectWithKey(PeerKey),
    /// Acknowledge carrying the sender's public key
    AckWithKey(PeerKey),
}

impl Frame {
    pub fn tag(&self) -> u8 {
        match self {
            Self::Ack | Self::AckWithKey(_) => ACK,
            Self::ConnectWithKey(_) => CONNECT,
        }
    }

    /// Serialize to wire bytes
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(1 + KEY_LEN);
        buf.put_u8(self.tag());
        if let Self::ConnectWithKey(key) | Self::AckWithKey(key) = self {
            buf.put_slice(&encode_key(key));
        }
        buf.freeze()
    }

    /// Write the frame to a serial line
    pub fn write_to<S: Serial + ?Sized>(&self, port: &mut S) -> io::Result<()> {
        port.write_all(&self.encode())?;
        port.flush()
    }
}

/// Encode a public key as exponent then modulus, both little-endian
pub fn encode_key(key: &PeerKey) -> [u8; KEY_LEN] {
    let mut out = [0u8; KEY_LEN];
    out[..4].copy_from_slice(&key.public_exponent.to_le_bytes());
    out[4..].copy_from_slice(&key.modulus.to_le_bytes());
    out
}

/// Decode 8 key bytes
pub fn decode_key(mut bytes: &[u8]) -> Result<PeerKey> {
    if bytes.len() != KEY_LEN {
        return Err(Error::Validation(format!(
            "key needs {} bytes, got {}",
            KEY_LEN,
            bytes.len()
        )));
    }
    let public_exponent = bytes.get_u32_le();
    let modulus = bytes.get_u32_le();
    Ok(PeerKey::new(public_exponent, modulus))
}

/// Read one little-endian `u32`. The caller must have checked that 4 bytes are available.
pub fn read_u32_le<S: Serial + ?Sized>(port: &mut S) -> io::Result<u32> {
    let mut raw = [0u8; 4];
    for byte in raw.iter_mut() {
        *byte = port.read_byte()?;
    }
    Ok(u32::from_le_bytes(raw))
}

/// Write one little-endian `u32`
pub fn write_u32_le<S: Serial + ?Sized>(port: &mut S, value: u32) -> io::Result<()> {
    port.write_all(&value.to_le_bytes())
}

/// Read a public key. The caller must have checked that 8 bytes are available.
pub fn read_key<S: Serial + ?Sized>(port: &mut S) -> Result<PeerKey> {
    let mut raw = [0u8; KEY_LEN];
    for byte in raw.iter_mut() {
        *byte = port.read_byte()?;
    }
    decode_key(&raw)
}
