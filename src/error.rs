//! Error taxonomy for the core (sec. 7).
//!
//! Only the Configuration class is fatal and therefore surfaces as `Result::Err`
//! from construction / `start_session`. Protocol, Capacity, Transient I/O and
//! Timebase errors are logged and absorbed at the point of detection; Lifecycle
//! errors (double start, stop-before-start) are no-ops with a warning.

use std::fmt;

/// Fatal misconfiguration, raised only at construction or `start_session`.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// `delta` (grid step) was not strictly positive.
    NonPositiveDelta(f64),
    /// Signal CSV export enabled with an empty channel list.
    EmptyChannelList,
    /// Two configured channels collided on the same `device:channel` key.
    DuplicateChannel(String),
    /// Failed to create an output directory.
    DirectoryCreate { path: String, reason: String },
    /// Both `lookahead_sec` and `lookahead_steps` were supplied.
    AmbiguousLookahead,
    /// The event keymap had no entries (no default event to anchor on).
    EmptyEventKeymap,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::NonPositiveDelta(d) => write!(f, "grid step delta must be > 0, got {d}"),
            ConfigError::EmptyChannelList => {
                write!(f, "signal CSV export enabled with an empty channel list")
            }
            ConfigError::DuplicateChannel(key) => {
                write!(f, "duplicate device:channel key '{key}'")
            }
            ConfigError::DirectoryCreate { path, reason } => {
                write!(f, "failed to create output directory '{path}': {reason}")
            }
            ConfigError::AmbiguousLookahead => {
                write!(f, "both lookahead_sec and lookahead_steps were supplied")
            }
            ConfigError::EmptyEventKeymap => write!(f, "event keymap has no entries"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Rejected trigger call (`set_event` / `trigger_spike`), non-fatal.
#[derive(Debug, Clone, PartialEq)]
pub enum TriggerError {
    /// `source` was empty.
    EmptySource,
    /// `label` is not a value present in the operator-provided keymap.
    UnknownLabel(String),
}

impl fmt::Display for TriggerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriggerError::EmptySource => write!(f, "trigger source must not be empty"),
            TriggerError::UnknownLabel(label) => write!(f, "unknown label '{label}'"),
        }
    }
}

impl std::error::Error for TriggerError {}
