//! Relay configuration
//!
//! Loaded from built-in defaults, an optional `huddle.toml` (path taken from
//! `HUDDLE_CONFIG` when set) and `HUDDLE_*` environment variables, in that
//! order of precedence.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use huddle_media::AudioFormat;
use serde::{Deserialize, Serialize};

use crate::error::{Result, ServerError};

/// Default config file name
pub const DEFAULT_CONFIG_FILE: &str = "huddle.toml";

/// Shortest mixing period the ticker accepts
pub const MIN_TICK_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Interface all three sockets bind to
    pub bind_host: String,
    /// Control port; video and audio use the next two ports. 0 = ephemeral
    pub base_port: u16,
    pub max_endpoints: usize,
    pub sample_rate: u32,
    pub channels: u16,
    pub block_samples: u32,
    /// Mixing tick override; derived from the block size when unset
    pub mix_interval_ms: Option<u64>,
    pub liveness_timeout_secs: u64,
    pub liveness_check_interval_ms: u64,
    /// Datagrams buffered per destination before fan-out drops
    pub outbound_queue_capacity: usize,
    /// Period of the relay statistics log line; 0 disables it
    pub stats_interval_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_host: "0.0.0.0".to_string(),
            base_port: 5000,
            max_endpoints: 16,
            sample_rate: huddle_media::DEFAULT_SAMPLE_RATE,
            channels: huddle_media::DEFAULT_CHANNELS,
            block_samples: huddle_media::DEFAULT_BLOCK_SAMPLES,
            mix_interval_ms: None,
            liveness_timeout_secs: 10,
            liveness_check_interval_ms: 1000,
            outbound_queue_capacity: 64,
            stats_interval_secs: 30,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let path =
            std::env::var("HUDDLE_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
        Self::load_from(&path)
    }

    /// Load with `path` as the (optional) config file
    pub fn load_from(path: &str) -> Result<Self> {
        let config: Config = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(config::Environment::with_prefix("HUDDLE").try_parsing(true))
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Config for loopback tests: ephemeral ports on 127.0.0.1
    pub fn local() -> Self {
        Self {
            bind_host: "127.0.0.1".to_string(),
            base_port: 0,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.bind_ip()?;

        if self.base_port > u16::MAX - 2 {
            return Err(ServerError::InvalidConfig(format!(
                "base_port {} leaves no room for the media ports",
                self.base_port
            )));
        }
        if self.max_endpoints == 0 {
            return Err(ServerError::InvalidConfig(
                "max_endpoints must be at least 1".into(),
            ));
        }
        if self.mix_interval_ms == Some(0) {
            return Err(ServerError::InvalidConfig(
                "mix_interval_ms must be positive".into(),
            ));
        }
        if self.liveness_timeout_secs == 0 || self.liveness_check_interval_ms == 0 {
            return Err(ServerError::InvalidConfig(
                "liveness timeout and check interval must be positive".into(),
            ));
        }
        if self.outbound_queue_capacity == 0 {
            return Err(ServerError::InvalidConfig(
                "outbound_queue_capacity must be at least 1".into(),
            ));
        }

        let tick = self.tick_interval()?;
        if tick < MIN_TICK_INTERVAL {
            return Err(ServerError::InvalidConfig(format!(
                "mixing interval {:?} is shorter than {:?}; use larger audio blocks",
                tick, MIN_TICK_INTERVAL
            )));
        }
        Ok(())
    }

    pub fn bind_ip(&self) -> Result<IpAddr> {
        self.bind_host.parse().map_err(|_| {
            ServerError::InvalidConfig(format!("bind_host {:?} is not an IP address", self.bind_host))
        })
    }

    fn port_at(&self, offset: u16) -> u16 {
        if self.base_port == 0 {
            0
        } else {
            self.base_port + offset
        }
    }

    pub fn control_addr(&self) -> Result<SocketAddr> {
        Ok(SocketAddr::new(self.bind_ip()?, self.port_at(0)))
    }

    pub fn video_addr(&self) -> Result<SocketAddr> {
        Ok(SocketAddr::new(self.bind_ip()?, self.port_at(1)))
    }

    pub fn audio_addr(&self) -> Result<SocketAddr> {
        Ok(SocketAddr::new(self.bind_ip()?, self.port_at(2)))
    }

    pub fn audio_format(&self) -> Result<AudioFormat> {
        Ok(AudioFormat::new(
            self.sample_rate,
            self.channels,
            self.block_samples,
        )?)
    }

    /// Mixing period: the override, or one block's duration
    pub fn tick_interval(&self) -> Result<Duration> {
        match self.mix_interval_ms {
            Some(ms) => Ok(Duration::from_millis(ms)),
            None => Ok(self.audio_format()?.block_duration()),
        }
    }

    pub fn liveness_timeout(&self) -> Duration {
        Duration::from_secs(self.liveness_timeout_secs)
    }

    pub fn liveness_check_interval(&self) -> Duration {
        Duration::from_millis(self.liveness_check_interval_ms)
    }

    pub fn stats_interval(&self) -> Option<Duration> {
        (self.stats_interval_secs > 0).then(|| Duration::from_secs(self.stats_interval_secs))
    }
}
