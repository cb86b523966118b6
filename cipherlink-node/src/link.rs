//! Blocking link lifecycle: key pair, handshake, secure channel

use crate::console::StdConsole;
use crate::transport::TcpSerial;
use cipherlink_core::channel::SecureChannel;
use cipherlink_core::config::LinkConfig;
use cipherlink_core::handshake::Handshake;
use cipherlink_core::io::{SystemClock, ThreadRngEntropy};
use cipherlink_core::keygen::KeyPairGenerator;
use cipherlink_core::metrics::LinkMetrics;
use cipherlink_core::prime::PrimeSource;
use cipherlink_core::{KeyPair, Result, Role};
use std::net::TcpStream;
use std::sync::atomic::AtomicBool;
use tracing::info;

/// Own key pair, from the configured source
pub fn own_key_pair(config: &LinkConfig, role: Role) -> Result<KeyPair> {
    if let Some(preset) = config.preset_key(role) {
        info!(%role, public = %preset.public_key(), "using preset key pair");
        return Ok(preset);
    }
    generate_key_pair(config.entropy_settle_ms)
}

/// Fresh key pair from OS entropy
pub fn generate_key_pair(settle_ms: u32) -> Result<KeyPair> {
    let primes = PrimeSource::new(ThreadRngEntropy, SystemClock::new()).with_settle_ms(settle_ms);
    KeyPairGenerator::new(primes).generate()
}

/// Run one link to completion on the calling thread
///
/// Returns when `stop` is raised or the link fails.
pub fn run(
    config: &LinkConfig,
    role: Role,
    stream: TcpStream,
    stop: &AtomicBool,
    metrics: &LinkMetrics,
) -> Result<()> {
    let keys = own_key_pair(config, role)?;
    let mut transport = TcpSerial::new(stream)?;
    let mut clock = SystemClock::new();

    let peer = Handshake::new(role, &keys, &mut transport, &mut clock)
        .with_policy(config.poll_policy())
        .with_max_attempts(config.handshake_max_attempts)
        .with_metrics(metrics.clone())
        .run(stop)?;

    let mut console = StdConsole::spawn()?;
    console.announce(&format!("CipherLink {} ({})", cipherlink_core::VERSION, role))?;

    SecureChannel::new(&keys, peer, &mut transport, &mut console, &mut clock)
        .with_poll_interval_ms(config.poll_interval_ms)
        .with_metrics(metrics.clone())
        .run(stop)
}
