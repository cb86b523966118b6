//! Configuration management for the link

use crate::keygen::KeyPair;
use crate::poll::PollPolicy;
use crate::protocol::Role;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Environment variable prefix
pub const ENV_PREFIX: &str = "CIPHERLINK_";

/// Where a peer's own key pair comes from
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum KeySource {
    /// Fresh primes from the entropy source at every start
    #[default]
    Generated,
    /// Fixed per-role keys shared by both ends ahead of time
    Preset,
}

/// Link configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LinkConfig {
    /// Which end of the link to play; the command line may supply it instead
    #[serde(default)]
    pub role: Option<Role>,

    /// Accept one peer on this TCP address
    #[serde(default)]
    pub listen_address: Option<String>,

    /// Dial the peer at this TCP address
    #[serde(default)]
    pub connect_address: Option<String>,

    /// Per-state handshake timeout in milliseconds
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,

    /// Poll granularity in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u32,

    /// Delay between entropy bit samples in milliseconds
    #[serde(default = "default_entropy_settle_ms")]
    pub entropy_settle_ms: u32,

    /// Handshake restarts before giving up (0 = never)
    #[serde(default)]
    pub handshake_max_attempts: u32,

    /// Generated or preset keys
    #[serde(default)]
    pub key_source: KeySource,

    /// TCP dial attempts
    #[serde(default = "default_connect_retries")]
    pub connect_retries: u32,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            role: None,
            listen_address: None,
            connect_address: None,
            handshake_timeout_ms: default_handshake_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            entropy_settle_ms: default_entropy_settle_ms(),
            handshake_max_attempts: 0,
            key_source: KeySource::default(),
            connect_retries: default_connect_retries(),
        }
    }
}

impl LinkConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let config: Self = envy::prefixed(ENV_PREFIX).from_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from explicit key/value pairs, named as in the environment
    pub fn from_pairs<I>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let config: Self = envy::prefixed(ENV_PREFIX).from_iter(pairs)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        match (&self.listen_address, &self.connect_address) {
            (Some(_), Some(_)) => {
                return Err(Error::Config(
                    "Set only one of CIPHERLINK_LISTEN_ADDRESS and CIPHERLINK_CONNECT_ADDRESS"
                        .to_string(),
                ))
            }
            (None, None) => {
                return Err(Error::Config(
                    "Must provide CIPHERLINK_LISTEN_ADDRESS or CIPHERLINK_CONNECT_ADDRESS"
                        .to_string(),
                ))
            }
            _ => {}
        }

        for addr in [&self.listen_address, &self.connect_address].into_iter().flatten() {
            if addr.trim().is_empty() {
                return Err(Error::Config("link address cannot be empty".to_string()));
            }
        }

        if self.handshake_timeout_ms == 0 {
            return Err(Error::Config("handshake_timeout_ms must be > 0".to_string()));
        }

        if self.poll_interval_ms == 0 {
            return Err(Error::Config("poll_interval_ms must be > 0".to_string()));
        }

        if u64::from(self.poll_interval_ms) > self.handshake_timeout_ms {
            return Err(Error::Config(
                "poll_interval_ms must not exceed handshake_timeout_ms".to_string(),
            ));
        }

        if self.connect_retries == 0 {
            return Err(Error::Config("connect_retries must be > 0".to_string()));
        }

        Ok(())
    }

    /// Role from the command line if given, else from configuration
    pub fn resolve_role(&self, cli: Option<Role>) -> Result<Role> {
        cli.or(self.role).ok_or_else(|| {
            Error::Config("No role given: pass --role or set CIPHERLINK_ROLE".to_string())
        })
    }

    pub fn poll_policy(&self) -> PollPolicy {
        PollPolicy::new(self.handshake_timeout_ms, self.poll_interval_ms)
    }

    /// Preset key for `role`, or `None` when keys are generated
    pub fn preset_key(&self, role: Role) -> Option<KeyPair> {
        match self.key_source {
            KeySource::Preset => Some(KeyPair::preset(role)),
            KeySource::Generated => None,
        }
    }
}

// Default value functions
fn default_handshake_timeout_ms() -> u64 {
    crate::DEFAULT_HANDSHAKE_TIMEOUT_MS
}

fn default_poll_interval_ms() -> u32 {
    crate::DEFAULT_POLL_INTERVAL_MS
}

fn default_entropy_settle_ms() -> u32 {
    crate::DEFAULT_ENTROPY_SETTLE_MS
}

fn default_connect_retries() -> u32 {
    10
}
