//! Demo sine-wave producer (sec. 6.1). Emits two modulated channels at a
//! configurable nominal rate: amplitude/frequency sweep modeled on a
//! classic sine-wave-thread generator, paced by a periodic-release loop
//! (`SpinSleeper`, deadline check, `running` flag).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::info;
use spin_sleep::{SpinSleeper, SpinStrategy};

use crate::synchronizer::Synchronizer;

/// Sweep configuration for the demo generator's two channels.
#[derive(Debug, Clone, Copy)]
pub struct DemoParams {
    pub signal_freq_hz: f64,
    pub amp_rate_scale: f64,
    pub base_amp: f64,
    pub amp_min_mult: f64,
    pub amp_max_mult: f64,
    pub enable_ch1: bool,
    pub enable_ch2: bool,
}

impl Default for DemoParams {
    fn default() -> Self {
        Self {
            signal_freq_hz: 2.0,
            amp_rate_scale: 1.0,
            base_amp: 1.0,
            amp_min_mult: 0.5,
            amp_max_mult: 3.0,
            enable_ch1: true,
            enable_ch2: true,
        }
    }
}

/// Periodic emitter: one sample per tick at `emission_freq_hz`, paced by a
/// `SpinSleeper` deadline loop.
pub struct DemoGenerator {
    device_name: String,
    emission_freq_hz: f64,
    params: DemoParams,
    running: Arc<AtomicBool>,
}

impl DemoGenerator {
    pub fn new(device_name: impl Into<String>, emission_freq_hz: f64, params: DemoParams) -> Self {
        Self {
            device_name: device_name.into(),
            emission_freq_hz,
            params,
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }

    /// Runs until `stop_handle()` is cleared. Intended to be spawned on its
    /// own thread by the caller.
    pub fn run(&self, sync: &Arc<Synchronizer>) {
        if self.emission_freq_hz <= 0.0 {
            log::warn!("demo '{}': non-positive rate, nothing to emit", self.device_name);
            return;
        }
        if !(self.params.enable_ch1 || self.params.enable_ch2) {
            info!("demo '{}': no channels enabled, skipping", self.device_name);
            return;
        }

        let period = Duration::from_secs_f64(1.0 / self.emission_freq_hz);
        let sleeper = SpinSleeper::new(100_000).with_spin_strategy(SpinStrategy::YieldThread);
        let start = Instant::now();
        let mut next_emit = start + period;
        let mut sample_idx: u64 = 0;

        let amp_min = self.params.base_amp * self.params.amp_min_mult;
        let amp_max = (self.params.base_amp * self.params.amp_max_mult).max(amp_min + 1.0);
        let amp_range = amp_max - amp_min;
        let mut amp = self.params.base_amp.clamp(amp_min, amp_max);
        let rate_ratio = self.params.signal_freq_hz / self.emission_freq_hz.max(1.0);
        let amp_step = (0.1 * rate_ratio * self.params.amp_rate_scale * amp_range.max(1e-6))
            .clamp(0.0, amp_range);
        let mut amp_dir = if amp_range > 0.0 && amp_step > 0.0 { 1.0 } else { 0.0 };

        let mut phase_ch2 = 0.0f64;

        info!(
            "demo '{}': emitting @ {:.3} Hz (signal {:.3} Hz)",
            self.device_name, self.emission_freq_hz, self.params.signal_freq_hz
        );

        while self.running.load(Ordering::Acquire) {
            let now = Instant::now();
            if now < next_emit {
                sleeper.sleep(next_emit - now);
                continue;
            }

            let elapsed = sample_idx as f64 / self.emission_freq_hz;
            let device_ts = start.elapsed().as_secs_f64().max(elapsed);

            let mut pairs = Vec::with_capacity(2);
            if self.params.enable_ch1 {
                let ch1 = amp * (2.0 * std::f64::consts::PI * self.params.signal_freq_hz * elapsed).sin();
                pairs.push(("ch_1".to_string(), Some(ch1)));
            }
            if self.params.enable_ch2 {
                phase_ch2 += 2.0 * std::f64::consts::PI * self.params.signal_freq_hz * (1.0 / self.emission_freq_hz);
                phase_ch2 %= 2.0 * std::f64::consts::PI;
                pairs.push(("ch_2".to_string(), Some(phase_ch2.sin())));
            }

            if !pairs.is_empty() {
                sync.enqueue_packet(device_ts, self.device_name.clone(), pairs);
            }

            sample_idx += 1;
            next_emit += period;
            if amp_step > 0.0 && amp_dir != 0.0 {
                amp += amp_dir * amp_step;
                if amp >= amp_max {
                    amp = amp_max;
                    amp_dir = -1.0;
                } else if amp <= amp_min {
                    amp = amp_min;
                    amp_dir = 1.0;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EventKeymap, IntakeConfig, PlotConfig};

    #[test]
    fn disabled_channels_skip_without_panicking() {
        let sync = Synchronizer::new(
            EventKeymap::new(vec![("0".into(), "REST".into())]),
            PlotConfig::default(),
            IntakeConfig::default(),
        )
        .unwrap();
        sync.start_session(0.01).unwrap();
        let gen = DemoGenerator::new(
            "demo",
            50.0,
            DemoParams {
                enable_ch1: false,
                enable_ch2: false,
                ..Default::default()
            },
        );
        gen.run(&sync);
        sync.stop_session();
    }
}
