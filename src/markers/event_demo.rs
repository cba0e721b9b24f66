//! Randomized event marker generator (sec. 6.2): cycles through the
//! configured keymap at a randomized cadence. Disabled by default.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::warn;

use crate::config::EventKeymap;
use crate::synchronizer::Synchronizer;

/// Cadence bounds between successive `set_event` calls.
#[derive(Debug, Clone, Copy)]
pub struct EventDemoConfig {
    pub enabled: bool,
    pub min_interval_sec: f64,
    pub max_interval_sec: f64,
}

impl Default for EventDemoConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            min_interval_sec: 3.0,
            max_interval_sec: 8.0,
        }
    }
}

/// Drives `Synchronizer::set_event` at random intervals, cycling labels.
pub struct EventDemoGenerator {
    config: EventDemoConfig,
    keymap: EventKeymap,
    running: Arc<AtomicBool>,
}

impl EventDemoGenerator {
    pub fn new(config: EventDemoConfig, keymap: EventKeymap) -> Self {
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
        if self.keymap.is_empty() {
            warn!("event_demo: empty keymap, nothing to cycle");
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
            if let Err(e) = sync.set_event(label, "event_demo") {
                warn!("event_demo: set_event failed: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{IntakeConfig, PlotConfig};

    #[test]
    fn disabled_generator_returns_immediately() {
        let sync = Synchronizer::new(
            EventKeymap::new(vec![("0".into(), "REST".into())]),
            PlotConfig::default(),
            IntakeConfig::default(),
        )
        .unwrap();
        sync.start_session(0.01).unwrap();
        let gen = EventDemoGenerator::new(
            EventDemoConfig::default(),
            EventKeymap::new(vec![("0".into(), "REST".into())]),
        );
        gen.run(&sync);
        sync.stop_session();
    }
}
