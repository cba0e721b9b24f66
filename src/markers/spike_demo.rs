//! Randomized spike marker generator (sec. 6.2), same file family as
//! `event_demo`. Disabled by default.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::warn;

use crate::config::SpikeKeymap;
use crate::synchronizer::Synchronizer;

#[derive(Debug, Clone, Copy)]
pub struct SpikeDemoConfig {
    pub enabled: bool,
    pub min_interval_sec: f64,
    pub max_interval_sec: f64,
}

impl Default for SpikeDemoConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            min_interval_sec: 10.0,
            max_interval_sec: 30.0,
        }
    }
}

/// Drives `Synchronizer::trigger_spike` at random intervals, cycling labels.
pub struct SpikeDemoGenerator {
    config: SpikeDemoConfig,
    keymap: SpikeKeymap,
    running: Arc<AtomicBool>,
}

impl SpikeDemoGenerator {
    pub fn new(config: SpikeDemoConfig, keymap: SpikeKeymap) -> Self {
        Self {
            config,
            keymap,
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }

    pub fn run(&self, sync: &Arc<Synchronizer>) {
        if !self.config.enabled {
            return;
        }
        if self.keymap.entries.is_empty() {
            warn!("spike_demo: empty keymap, nothing to emit");
            return;
        }

        let labels: Vec<&str> = self
            .keymap
            .entries
            .iter()
            .map(|(_, label)| label.as_str())
            .collect();
        let mut idx = 0usize;

        while self.running.load(Ordering::Acquire) {
            let wait_sec =
                rand::random_range(self.config.min_interval_sec..=self.config.max_interval_sec);
            thread::sleep(Duration::from_secs_f64(wait_sec));
            if !self.running.load(Ordering::Acquire) {
                break;
            }
            let label = labels[idx % labels.len()];
            idx += 1;
            if let Err(e) = sync.trigger_spike(label, "spike_demo") {
                warn!("spike_demo: trigger_spike failed: {e}");
            }
        }
    }
}
