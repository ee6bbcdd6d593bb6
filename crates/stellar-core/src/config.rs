//! Configuration loading and typed config structures for the Stellar
//! installation.
//!
//! The canonical configuration lives in `stellar-config.yaml` next to the
//! server binary. Every field has a default matching the tuned values of
//! the installation, so an empty (or missing) file is a valid configuration.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },

    /// The configuration parsed but holds unusable values.
    #[error("invalid configuration: {reason}")]
    Invalid {
        /// Explanation of what is wrong with the configuration.
        reason: String,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level configuration.
///
/// Mirrors the structure of `stellar-config.yaml`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct StellarConfig {
    /// Network and channel sizing for the sync server.
    #[serde(default)]
    pub server: ServerSection,

    /// Server-owned timer durations and the snap threshold.
    #[serde(default)]
    pub timing: TimingConfig,

    /// Client-side gesture classifier tuning.
    #[serde(default)]
    pub gesture: GestureConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl StellarConfig {
    /// Load configuration from a YAML file at the given path.
    ///
    /// Environment variables override YAML values for the listen address:
    /// - `PORT` overrides `server.port`
    /// - `STELLAR_HOST` overrides `server.host`
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read,
    /// [`ConfigError::Yaml`] if the content is not valid YAML, or
    /// [`ConfigError::Invalid`] if validation fails.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse configuration from a YAML string, apply environment
    /// overrides, and validate.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML, or
    /// [`ConfigError::Invalid`] if validation fails.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let mut config: Self = if yaml.trim().is_empty() {
            Self::default()
        } else {
            serde_yml::from_str(yaml)?
        };
        config.server.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints that serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] describing the first violation.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.timing.validate()?;
        self.gesture.validate()?;
        // Device and server tallies must agree on when to wrap and reset.
        if self.gesture.snap_threshold != self.timing.snap_threshold {
            return Err(invalid(
                "gesture.snap_threshold must equal timing.snap_threshold",
            ));
        }
        if self.gesture.snap_reset_window_ms != self.timing.snap_reset_window_ms {
            return Err(invalid(
                "gesture.snap_reset_window_ms must equal timing.snap_reset_window_ms",
            ));
        }
        Ok(())
    }
}

/// Sync server configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ServerSection {
    /// Host address to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// TCP port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Capacity of the outgoing broadcast channel. A device that falls
    /// further behind than this is resynchronised with the full state.
    #[serde(default = "default_broadcast_capacity")]
    pub broadcast_capacity: usize,

    /// Capacity of the store's inbound command queue.
    #[serde(default = "default_command_capacity")]
    pub command_capacity: usize,
}

impl ServerSection {
    /// Override the listen address with environment variables when set.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("STELLAR_HOST") {
            self.host = val;
        }
        if let Some(port) = std::env::var("PORT").ok().and_then(|v| v.parse().ok()) {
            self.port = port;
        }
    }
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            broadcast_capacity: default_broadcast_capacity(),
            command_capacity: default_command_capacity(),
        }
    }
}

/// Durations of the server-owned timers.
///
/// The countdown, launch, and buffer spans add up to the choreography
/// duration after which the server returns everything to the initial
/// state.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TimingConfig {
    /// How long a pulse stays active after the last fist.
    #[serde(default = "default_pulse_duration_ms")]
    pub pulse_duration_ms: u64,

    /// Snaps further apart than this start a new tally.
    #[serde(default = "default_snap_reset_window_ms")]
    pub snap_reset_window_ms: u64,

    /// Tally at which the countdown starts.
    #[serde(default = "default_snap_threshold")]
    pub snap_threshold: u8,

    /// Visible 3-2-1 countdown.
    #[serde(default = "default_countdown_ms")]
    pub countdown_ms: u64,

    /// Launch animation after the countdown reaches zero.
    #[serde(default = "default_launch_ms")]
    pub launch_ms: u64,

    /// Slack before the automatic reset.
    #[serde(default = "default_buffer_ms")]
    pub buffer_ms: u64,
}

impl TimingConfig {
    /// Pulse window as a [`Duration`].
    pub const fn pulse_duration(&self) -> Duration {
        Duration::from_millis(self.pulse_duration_ms)
    }

    /// Rolling snap window as a [`Duration`].
    pub const fn snap_reset_window(&self) -> Duration {
        Duration::from_millis(self.snap_reset_window_ms)
    }

    /// Total span from countdown start to automatic reset.
    pub const fn choreography(&self) -> Duration {
        Duration::from_millis(
            self.countdown_ms
                .saturating_add(self.launch_ms)
                .saturating_add(self.buffer_ms),
        )
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.snap_threshold == 0 {
            return Err(invalid("timing.snap_threshold must be at least 1"));
        }
        if self.pulse_duration_ms == 0 {
            return Err(invalid("timing.pulse_duration_ms must be non-zero"));
        }
        if self.snap_reset_window_ms == 0 {
            return Err(invalid("timing.snap_reset_window_ms must be non-zero"));
        }
        if self.choreography().is_zero() {
            return Err(invalid("timing choreography must be non-zero"));
        }
        Ok(())
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            pulse_duration_ms: default_pulse_duration_ms(),
            snap_reset_window_ms: default_snap_reset_window_ms(),
            snap_threshold: default_snap_threshold(),
            countdown_ms: default_countdown_ms(),
            launch_ms: default_launch_ms(),
            buffer_ms: default_buffer_ms(),
        }
    }
}

/// Client-side classifier tuning.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GestureConfig {
    /// Thumb-index distance below which an open hand closes.
    #[serde(default = "default_close_threshold")]
    pub close_threshold: f64,

    /// Thumb-index distance above which a closed hand reopens (snap).
    #[serde(default = "default_open_threshold")]
    pub open_threshold: f64,

    /// Minimum spacing between two accepted snaps.
    #[serde(default = "default_snap_debounce_ms")]
    pub snap_debounce_ms: u64,

    /// Local tally resets when snaps are further apart than this.
    #[serde(default = "default_snap_reset_window_ms")]
    pub snap_reset_window_ms: u64,

    /// Minimum spacing between two accepted fists.
    #[serde(default = "default_gesture_debounce_ms")]
    pub gesture_debounce_ms: u64,

    /// Smallest midpoint displacement treated as motion.
    #[serde(default = "default_move_noise_floor")]
    pub move_noise_floor: f64,

    /// Scale from normalised image units to scene units.
    #[serde(default = "default_move_sensitivity")]
    pub move_sensitivity: f64,

    /// Local tally at which the device wraps back to zero.
    #[serde(default = "default_snap_threshold")]
    pub snap_threshold: u8,
}

impl GestureConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if !(self.close_threshold > 0.0 && self.open_threshold > self.close_threshold) {
            return Err(invalid(
                "gesture thresholds must satisfy 0 < close_threshold < open_threshold",
            ));
        }
        if !(self.move_noise_floor >= 0.0 && self.move_sensitivity.is_finite()) {
            return Err(invalid("gesture motion parameters must be finite and non-negative"));
        }
        if self.snap_threshold == 0 {
            return Err(invalid("gesture.snap_threshold must be at least 1"));
        }
        let durations = [
            ("snap_debounce_ms", self.snap_debounce_ms),
            ("snap_reset_window_ms", self.snap_reset_window_ms),
            ("gesture_debounce_ms", self.gesture_debounce_ms),
        ];
        if let Some((name, _)) = durations.iter().find(|(_, ms)| *ms == 0) {
            return Err(ConfigError::Invalid {
                reason: format!("gesture.{name} must be non-zero"),
            });
        }
        Ok(())
    }
}

impl Default for GestureConfig {
    fn default() -> Self {
        Self {
            close_threshold: default_close_threshold(),
            open_threshold: default_open_threshold(),
            snap_debounce_ms: default_snap_debounce_ms(),
            snap_reset_window_ms: default_snap_reset_window_ms(),
            gesture_debounce_ms: default_gesture_debounce_ms(),
            move_noise_floor: default_move_noise_floor(),
            move_sensitivity: default_move_sensitivity(),
            snap_threshold: default_snap_threshold(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error). `RUST_LOG` wins when set.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit newline-delimited JSON instead of human-readable lines.
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn invalid(reason: &str) -> ConfigError {
    ConfigError::Invalid {
        reason: reason.to_owned(),
    }
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

fn default_host() -> String {
    String::from("0.0.0.0")
}

const fn default_port() -> u16 {
    3001
}

const fn default_broadcast_capacity() -> usize {
    256
}

const fn default_command_capacity() -> usize {
    1024
}

const fn default_pulse_duration_ms() -> u64 {
    2000
}

const fn default_snap_reset_window_ms() -> u64 {
    3000
}

const fn default_snap_threshold() -> u8 {
    4
}

const fn default_countdown_ms() -> u64 {
    3000
}

const fn default_launch_ms() -> u64 {
    2500
}

const fn default_buffer_ms() -> u64 {
    500
}

const fn default_close_threshold() -> f64 {
    0.08
}

const fn default_open_threshold() -> f64 {
    0.12
}

const fn default_snap_debounce_ms() -> u64 {
    300
}

const fn default_gesture_debounce_ms() -> u64 {
    500
}

const fn default_move_noise_floor() -> f64 {
    0.001
}

const fn default_move_sensitivity() -> f64 {
    150.0
}

fn default_log_level() -> String {
    String::from("info")
}
