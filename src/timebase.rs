//! Component A: per-device timebase reconciliation (sec. 4.A).
//!
//! Two variants: `DeviceTimebase` turns a wrapping raw tick counter into
//! monotone elapsed device-seconds; `StreamTimebase` generates a
//! deterministic 1/fs tick train for sources whose own wall-clock stamps
//! are jittery.

use dashmap::DashMap;
use log::{debug, warn};
use parking_lot::Mutex;

/// Nominal Shimmer-family tick rate.
pub const TICK_RATE_HZ: f64 = 32768.0;
/// 16-bit counter modulus.
pub const COUNTER_MOD: u64 = 1 << 16;

#[derive(Debug, Clone, Copy, Default)]
struct TickState {
    start: Option<u64>,
    last: Option<u64>,
    offset: u64,
}

/// Per-device key → rollover-aware tick-to-seconds converter.
///
/// State is keyed by device name in a `DashMap` rather than any
/// back-referencing structure; each key's record is protected by that
/// shard's own lock.
pub struct DeviceTimebase {
    state: DashMap<String, TickState>,
    tick_rate_hz: f64,
    counter_mod: u64,
}

impl Default for DeviceTimebase {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceTimebase {
    pub fn new() -> Self {
        Self::with_rate(TICK_RATE_HZ, COUNTER_MOD)
    }

    pub fn with_rate(tick_rate_hz: f64, counter_mod: u64) -> Self {
        Self {
            state: DashMap::new(),
            tick_rate_hz,
            counter_mod,
        }
    }

    /// Maps a raw device tick to elapsed device-seconds since that key's
    /// anchor, absorbing rollovers. Never fails: an unexpectedly-missing
    /// `last` re-anchors with a warning rather than panicking.
    pub fn device_time_s(&self, raw_tick: u64, key: &str) -> f64 {
        let mut entry = self.state.entry(key.to_string()).or_default();

        if entry.start.is_none() {
            entry.start = Some(raw_tick);
            entry.last = Some(raw_tick);
            entry.offset = 0;
            debug!("timebase: anchored device '{key}' at tick {raw_tick}");
        } else {
            match entry.last {
                Some(last) if raw_tick < last => {
                    entry.offset += self.counter_mod;
                    debug!("timebase: device '{key}' counter wrapped at tick {raw_tick}");
                }
                Some(_) => {}
                None => {
                    warn!("timebase: device '{key}' missing 'last' unexpectedly; re-anchoring");
                    entry.start = Some(raw_tick);
                    entry.offset = 0;
                }
            }
        }
        entry.last = Some(raw_tick);

        let start = entry.start.unwrap_or(raw_tick);
        (entry.offset + raw_tick.saturating_sub(start)) as f64 / self.tick_rate_hz
    }
}

/// Deterministic 1/fs tick generator for streaming-framework sources whose
/// own wall-clock stamps jitter. Anchors on the first seen stamp, then emits
/// `prev + 1/fs`; soft-realigns if the observed stamp advances by more than
/// `soft_gap_sec`.
pub struct StreamTimebase {
    fs: f64,
    dt: f64,
    soft_gap_sec: f64,
    inner: Mutex<StreamState>,
}

struct StreamState {
    anchored: bool,
    t_curr: f64,
    last_wall: f64,
}

impl StreamTimebase {
    pub fn new(fs_hz: f64) -> Self {
        let fs = if fs_hz > 0.0 { fs_hz } else { 250.0 };
        Self {
            fs,
            dt: 1.0 / fs,
            soft_gap_sec: 0.250,
            inner: Mutex::new(StreamState {
                anchored: false,
                t_curr: 0.0,
                last_wall: 0.0,
            }),
        }
    }

    pub fn fs(&self) -> f64 {
        self.fs
    }

    pub fn dt(&self) -> f64 {
        self.dt
    }

    /// Clears the anchor so the next `next_tick` re-anchors from scratch.
    pub fn reset(&self) {
        let mut s = self.inner.lock();
        s.anchored = false;
        s.t_curr = 0.0;
        s.last_wall = 0.0;
    }

    /// Anchors on a known first stamp (e.g. the inlet's first sample time).
    pub fn prime_from_first_stamp(&self, first_stamp: f64) {
        let mut s = self.inner.lock();
        s.t_curr = first_stamp;
        s.last_wall = first_stamp;
        s.anchored = true;
    }

    /// Returns the next deterministic tick; soft-realigns on a long gap in
    /// the observed wall-clock stamp.
    pub fn next_tick(&self, observed_wall: Option<f64>) -> f64 {
        let mut s = self.inner.lock();

        if !s.anchored {
            let base = observed_wall.unwrap_or(0.0);
            s.t_curr = base;
            s.last_wall = base;
            s.anchored = true;
        }

        if let Some(wall) = observed_wall {
            if wall - s.last_wall >= self.soft_gap_sec {
                s.t_curr = wall;
            }
            s.last_wall = wall;
        }

        let out = s.t_curr;
        s.t_curr = out + self.dt;
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rollover_is_absorbed_monotone() {
        let tb = DeviceTimebase::new();
        let a = tb.device_time_s(65530, "sh_GSR+_5E5C");
        let b = tb.device_time_s(65535, "sh_GSR+_5E5C");
        let c = tb.device_time_s(3, "sh_GSR+_5E5C");
        let d = tb.device_time_s(10, "sh_GSR+_5E5C");
        assert!(a <= b && b <= c && c <= d, "must stay monotone non-decreasing through a wrap");
        assert_eq!(a, 0.0);
    }

    #[test]
    fn distinct_keys_anchor_independently() {
        let tb = DeviceTimebase::new();
        let a1 = tb.device_time_s(100, "dev_a");
        let b1 = tb.device_time_s(500, "dev_b");
        assert_eq!(a1, 0.0);
        assert_eq!(b1, 0.0);
    }

    #[test]
    fn stream_timebase_emits_uniform_steps() {
        let tb = StreamTimebase::new(250.0);
        let t0 = tb.next_tick(Some(10.0));
        let t1 = tb.next_tick(Some(10.003));
        assert_eq!(t0, 10.0);
        assert!((t1 - (t0 + tb.dt())).abs() < 1e-12);
    }

    #[test]
    fn stream_timebase_soft_realigns_on_long_gap() {
        let tb = StreamTimebase::new(250.0);
        let _ = tb.next_tick(Some(0.0));
        let t = tb.next_tick(Some(5.0));
        assert_eq!(t, 5.0, "large gap should realign to the observed stamp");
    }
}
