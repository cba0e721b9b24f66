//! Configuration surface consumed by the core (sec. 6).
//!
//! These are plain structs, not a file-backed loader — loading configuration
//! from disk is an external collaborator's job, out of scope here. `serde`
//! derives let callers round-trip these through whatever settings format
//! they use without this crate caring.

use serde::{Deserialize, Serialize};

/// Ordered label list; the first entry is the default (sticky) event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventKeymap {
    /// `(key, label)` pairs in operator-configured order. `key` is the
    /// trigger shortcut (e.g. keyboard key); `label` is the sticky value.
    pub entries: Vec<(String, String)>,
}

impl EventKeymap {
    pub fn new(entries: Vec<(String, String)>) -> Self {
        Self { entries }
    }

    /// First label in the keymap; the session's initial sticky value.
    pub fn default_event(&self) -> Option<&str> {
        self.entries.first().map(|(_, label)| label.as_str())
    }

    pub fn contains_label(&self, label: &str) -> bool {
        self.entries.iter().any(|(_, l)| l == label)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Non-sticky spike keymap; same shape as `EventKeymap` but has no default.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SpikeKeymap {
    pub entries: Vec<(String, String)>,
}

impl SpikeKeymap {
    pub fn contains_label(&self, label: &str) -> bool {
        self.entries.iter().any(|(_, l)| l == label)
    }
}

/// Lookahead specified either in steps or seconds; seconds converts via
/// `ceil(lookahead_sec * fs_max)` once `fs_max` is known.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum Lookahead {
    Steps(u64),
    Seconds(f64),
}

impl Default for Lookahead {
    fn default() -> Self {
        Lookahead::Steps(3)
    }
}

impl Lookahead {
    /// Resolves to a step count; `Seconds` converts via
    /// `ceil(lookahead_sec * fs_max)`.
    pub fn resolve_steps(&self, fs_max: f64) -> u64 {
        match *self {
            Lookahead::Steps(n) => n,
            Lookahead::Seconds(sec) => (sec * fs_max).ceil().max(0.0) as u64,
        }
    }
}

/// Export sink configuration (sec. 4.E, 6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportConfig {
    /// Ordered `device:channel` list; the synced CSV header's schema contract.
    pub channels: Vec<String>,
    pub lookahead: Lookahead,
    pub flush_period_sec: f64,
    /// 0 = derive automatically from `fs_max` and `flush_period_sec`.
    pub flush_rows: usize,
    /// 0 = disabled.
    pub idle_watermark_sec: f64,
    pub print_k: bool,
    pub csv_signal_enable: bool,
    pub csv_marker_enable: bool,
    pub synced_dir: String,
    pub markers_dir: String,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            channels: Vec::new(),
            lookahead: Lookahead::default(),
            flush_period_sec: 0.25,
            flush_rows: 0,
            idle_watermark_sec: 0.0,
            print_k: false,
            csv_signal_enable: true,
            csv_marker_enable: true,
            synced_dir: "data/synced".to_string(),
            markers_dir: "data/markers".to_string(),
        }
    }
}

/// Live-plot decimation configuration (sec. 4.D, 6).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
pub struct PlotConfig {
    /// Target decimated rate in Hz; `0.0` disables decimation (pass-through).
    pub plot_decimate_hz: f64,
}

impl PlotConfig {
    /// `plot_dt` in seconds, or `None` when decimation is disabled.
    pub fn plot_dt(&self) -> Option<f64> {
        if self.plot_decimate_hz > 0.0 {
            Some(1.0 / self.plot_decimate_hz)
        } else {
            None
        }
    }
}

/// Producer intake queue configuration (sec. 4.B, 6).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
pub struct IntakeConfig {
    /// `0` = unbounded; `> 0` = bounded with drop-oldest on overflow.
    pub max_queue: usize,
}
