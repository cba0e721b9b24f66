//! Deterministic streaming-framework source (sec. 6.1): real sample arrival
//! is jittery, so device time is generated at a uniform `1/fs` instead of
//! trusting each inlet timestamp. `StreamInlet` is a thin stand-in for the
//! real network inlet (an LSL-style `StreamInlet`); only the timebase/anchor
//! logic is implemented here.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, warn};

use crate::synchronizer::Synchronizer;
use crate::timebase::StreamTimebase;

/// One pulled sample: per-channel values plus the inlet's own (possibly
/// jittery) wall-clock stamp.
pub struct InletSample {
    pub wall_stamp: f64,
    pub values: Vec<(String, Option<f64>)>,
}

/// Protocol boundary for a streaming-framework inlet. A real implementation
/// would wrap a network client; not provided here (out of scope).
pub trait StreamInlet: Send {
    /// Blocks briefly for the next sample, or returns `None` on timeout.
    fn pull_sample(&mut self) -> Option<InletSample>;
}

/// Drains a `StreamInlet`, replacing its jittery stamps with a uniform
/// `1/fs` timebase before handing packets to the synchronizer.
pub struct StreamSource<I: StreamInlet> {
    device_name: String,
    inlet: I,
    timebase: StreamTimebase,
    running: Arc<AtomicBool>,
}

impl<I: StreamInlet> StreamSource<I> {
    pub fn new(device_name: impl Into<String>, inlet: I, fs_hz: f64) -> Self {
        Self {
            device_name: device_name.into(),
            inlet,
            timebase: StreamTimebase::new(fs_hz),
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }

    /// Pulls samples until stopped or the inlet is exhausted, forwarding
    /// each with a deterministic device_ts.
    pub fn run(&mut self, sync: &Arc<Synchronizer>) {
        debug!(
            "stream_source '{}': starting at {:.3} Hz",
            self.device_name,
            self.timebase.fs()
        );
        while self.running.load(Ordering::Acquire) {
            match self.inlet.pull_sample() {
                Some(sample) => {
                    let device_ts = self.timebase.next_tick(Some(sample.wall_stamp));
                    sync.enqueue_packet(device_ts, self.device_name.clone(), sample.values);
                }
                None => {
                    warn!("stream_source '{}': inlet exhausted", self.device_name);
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EventKeymap, IntakeConfig, PlotConfig};

    struct FixedInlet {
        remaining: Vec<InletSample>,
    }

    impl StreamInlet for FixedInlet {
        fn pull_sample(&mut self) -> Option<InletSample> {
            self.remaining.pop()
        }
    }

    #[test]
    fn emits_uniform_ticks_regardless_of_jittery_stamps() {
        let sync = Synchronizer::new(
            EventKeymap::new(vec![("0".into(), "REST".into())]),
            PlotConfig::default(),
            IntakeConfig::default(),
        )
        .unwrap();
        sync.start_session(0.01).unwrap();

        let inlet = FixedInlet {
            remaining: vec![
                InletSample {
                    wall_stamp: 10.021,
                    values: vec![("eeg1".into(), Some(3.0))],
                },
                InletSample {
                    wall_stamp: 10.011,
                    values: vec![("eeg1".into(), Some(2.0))],
                },
                InletSample {
                    wall_stamp: 10.0,
                    values: vec![("eeg1".into(), Some(1.0))],
                },
            ],
        };
        let mut source = StreamSource::new("unicorn", inlet, 250.0);
        source.run(&sync);
        sync.stop_session();
    }
}
