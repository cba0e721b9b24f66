//! Component D: the synchronizer (sec. 4.D).
//!
//! Owns session lifecycle, the consumer task, per-device anchors, the
//! sticky event, sink registrations, and the trigger APIs: a blocking-poll
//! consumer loop (recv-with-timeout / disconnect-exit) driving the
//! anchor-then-quantize-then-fan-out sequencing.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use log::{debug, warn};
use parking_lot::Mutex;

use crate::config::{EventKeymap, IntakeConfig, PlotConfig};
use crate::error::{ConfigError, TriggerError};
use crate::intake::{IntakeMsg, IntakeQueue};
use crate::payload::Payload;
use crate::quantizer;

/// Backward-jump tolerance before a device anchor is treated as reset.
const ANCHOR_EPSILON_SEC: f64 = 1e-6;
/// How long the consumer blocks on intake before re-checking the stop flag.
const CONSUMER_POLL: Duration = Duration::from_millis(200);
/// Bounded join wait on `stop_session`.
const JOIN_DEADLINE: Duration = Duration::from_secs(2);

/// A sink consuming the synchronizer's tagged payload stream (sec. 6, 9).
/// No inheritance — sinks match on the `Payload` union directly.
pub trait Sink: Send + Sync {
    fn push(&self, payload: Payload);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SinkKind {
    FullRate,
    Plot,
}

struct SinkEntry {
    kind: SinkKind,
    sink: Arc<dyn Sink>,
}

/// Per-device anchor (sec. 3): maps the producer's `device_ts` (already
/// rollover-corrected device-seconds, see `timebase::DeviceTimebase`) onto
/// host-relative time.
#[derive(Debug, Clone, Copy)]
struct DeviceAnchor {
    dev_ts0: f64,
    host_t0: f64,
    epoch: u64,
    scale: f64,
    last_device_ts: f64,
}

impl DeviceAnchor {
    fn anchor(device_ts: f64, host_now: f64) -> Self {
        Self {
            dev_ts0: device_ts,
            host_t0: host_now,
            epoch: 0,
            scale: 1.0,
            last_device_ts: device_ts,
        }
    }

    fn map(&self, device_ts: f64) -> f64 {
        (self.scale * (device_ts - self.dev_ts0) + self.host_t0).max(0.0)
    }
}

struct StickyState {
    current_event: String,
    default_event: String,
}

struct SessionState {
    delta: f64,
    precision: u32,
    session_t0: Instant,
    intake: IntakeQueue,
    consumer: Mutex<Option<JoinHandle<()>>>,
    running: Arc<AtomicBool>,
}

/// The synchronizer (component D). Construct once, `start_session` /
/// `stop_session` any number of times.
pub struct Synchronizer {
    keymap: EventKeymap,
    plot_config: PlotConfig,
    intake_config: IntakeConfig,
    anchors: DashMap<String, DeviceAnchor>,
    decimation: DashMap<String, i64>,
    sticky: Mutex<StickyState>,
    sinks: Mutex<Vec<SinkEntry>>,
    session: Mutex<Option<SessionState>>,
}

impl Synchronizer {
    pub fn new(
        keymap: EventKeymap,
        plot_config: PlotConfig,
        intake_config: IntakeConfig,
    ) -> Result<Arc<Self>, ConfigError> {
        if keymap.is_empty() {
            return Err(ConfigError::EmptyEventKeymap);
        }
        let default_event = keymap.default_event().unwrap().to_string();
        Ok(Arc::new(Self {
            keymap,
            plot_config,
            intake_config,
            anchors: DashMap::new(),
            decimation: DashMap::new(),
            sticky: Mutex::new(StickyState {
                current_event: default_event.clone(),
                default_event,
            }),
            sinks: Mutex::new(Vec::new()),
            session: Mutex::new(None),
        }))
    }

    pub fn register_full_rate_sink(&self, sink: Arc<dyn Sink>) {
        self.sinks.lock().push(SinkEntry {
            kind: SinkKind::FullRate,
            sink,
        });
    }

    pub fn register_plot_sink(&self, sink: Arc<dyn Sink>) {
        self.sinks.lock().push(SinkEntry {
            kind: SinkKind::Plot,
            sink,
        });
    }

    /// Starts the session: validates `delta`, captures `session_t0`,
    /// resolves decimal precision, clears anchors, starts the consumer.
    /// Refuses to start twice (a lifecycle no-op with a warning, not fatal).
    pub fn start_session(self: &Arc<Self>, delta: f64) -> Result<(), ConfigError> {
        if delta <= 0.0 {
            return Err(ConfigError::NonPositiveDelta(delta));
        }

        let mut session = self.session.lock();
        if session.is_some() {
            warn!("start_session called while a session is already running; ignoring");
            return Ok(());
        }

        self.anchors.clear();
        self.decimation.clear();

        let precision = quantizer::decimal_precision(delta);
        let intake = IntakeQueue::new(self.intake_config.max_queue);
        let running = Arc::new(AtomicBool::new(true));
        let rx = intake.receiver();
        // Captured once and shared with the consumer thread: samples (quantized
        // in `handle_packet`) and triggers (quantized in `quantize_now`) must
        // share one epoch, or their k's drift apart by the thread spawn latency.
        let session_t0 = Instant::now();

        let this = self.clone_for_consumer();
        let consumer_running = running.clone();
        let handle = thread::spawn(move || {
            this.run_consumer(rx, consumer_running, delta, precision, session_t0);
        });

        *session = Some(SessionState {
            delta,
            precision,
            session_t0,
            intake,
            consumer: Mutex::new(Some(handle)),
            running,
        });

        debug!("synchronizer: session started, delta={delta}, precision={precision}");
        Ok(())
    }

    /// Signals stop, pushes the sentinel, joins with a bounded wait, then
    /// clears anchors/sinks/decimation state. A stop-before-start call is a
    /// no-op with a warning.
    pub fn stop_session(&self) {
        let mut session = self.session.lock();
        let Some(state) = session.take() else {
            warn!("stop_session called with no active session; ignoring");
            return;
        };

        state.running.store(false, Ordering::SeqCst);
        state.intake.enqueue_sentinel();

        let handle = state.consumer.lock().take();
        if let Some(handle) = handle {
            let joined = thread::spawn(move || handle.join());
            // Bounded 2s wait; on expiry the handle is abandoned per spec.
            let deadline = Instant::now() + JOIN_DEADLINE;
            loop {
                if joined.is_finished() {
                    let _ = joined.join();
                    break;
                }
                if Instant::now() >= deadline {
                    warn!("synchronizer: consumer join exceeded {JOIN_DEADLINE:?}, abandoning");
                    break;
                }
                thread::sleep(Duration::from_millis(10));
            }
        }

        self.anchors.clear();
        self.decimation.clear();
        self.sinks.lock().clear();
        debug!("synchronizer: session stopped");
    }

    /// Producer entry point: enqueue a sample packet for asynchronous
    /// mapping, quantizing, and fan-out.
    pub fn enqueue_packet(
        &self,
        device_ts: f64,
        device_name: impl Into<String>,
        pairs: Vec<(String, Option<f64>)>,
    ) {
        let session = self.session.lock();
        let Some(state) = session.as_ref() else {
            warn!("enqueue_packet called with no active session; dropping");
            return;
        };
        state.intake.enqueue(crate::payload::SamplePacket::new(
            device_ts,
            device_name,
            pairs,
        ));
    }

    /// Toggle rule: pressing the current label reverts to the default
    /// event; pressing a different known label adopts it. Rejects empty
    /// `source` and unknown labels.
    pub fn set_event(&self, label: &str, source: &str) -> Result<String, TriggerError> {
        if source.is_empty() {
            return Err(TriggerError::EmptySource);
        }
        if !self.keymap.contains_label(label) {
            return Err(TriggerError::UnknownLabel(label.to_string()));
        }

        let (k, t_q) = self.quantize_now();
        let current_event_after = {
            let mut sticky = self.sticky.lock();
            if label == sticky.current_event {
                sticky.current_event = sticky.default_event.clone();
            } else {
                sticky.current_event = label.to_string();
            }
            sticky.current_event.clone()
        };

        self.fan_out(Payload::Event {
            k,
            t_q,
            label: label.to_string(),
            source: source.to_string(),
            current_event_after: current_event_after.clone(),
        });
        Ok(current_event_after)
    }

    /// Instantaneous, non-sticky marker. No state mutation.
    pub fn trigger_spike(&self, label: &str, source: &str) -> Result<(), TriggerError> {
        if source.is_empty() {
            return Err(TriggerError::EmptySource);
        }
        let (k, t_q) = self.quantize_now();
        self.fan_out(Payload::Spike {
            k,
            t_q,
            label: label.to_string(),
            source: source.to_string(),
        });
        Ok(())
    }

    fn quantize_now(&self) -> (u64, f64) {
        let session = self.session.lock();
        match session.as_ref() {
            Some(state) => {
                let t = state.session_t0.elapsed().as_secs_f64();
                quantizer::quantize(t, state.delta, state.precision)
            }
            None => (0, 0.0),
        }
    }

    /// A cheap `Arc`-backed view the consumer thread owns independently of
    /// the session lock (the consumer never touches `self.session`).
    fn clone_for_consumer(self: &Arc<Self>) -> Arc<Synchronizer> {
        self.clone()
    }

    fn run_consumer(
        self: Arc<Self>,
        rx: crossbeam::channel::Receiver<IntakeMsg>,
        running: Arc<AtomicBool>,
        delta: f64,
        precision: u32,
        session_t0: Instant,
    ) {
        while running.load(Ordering::Acquire) {
            match rx.recv_timeout(CONSUMER_POLL) {
                Ok(IntakeMsg::Stop) => break,
                Ok(IntakeMsg::Packet(packet)) => {
                    self.handle_packet(packet, session_t0, delta, precision);
                }
                Err(crossbeam::channel::RecvTimeoutError::Timeout) => {}
                Err(crossbeam::channel::RecvTimeoutError::Disconnected) => break,
            }
        }
        debug!("synchronizer: consumer exiting");
    }

    fn handle_packet(
        &self,
        packet: crate::payload::SamplePacket,
        session_t0: Instant,
        delta: f64,
        precision: u32,
    ) {
        if packet.device_name.is_empty() {
            warn!("synchronizer: malformed packet (empty device name); dropping");
            return;
        }

        let host_now = session_t0.elapsed().as_secs_f64();
        let host_ts = self.map_device_time(&packet.device_name, packet.device_ts, host_now);
        let (k, t_q) = quantizer::quantize(host_ts, delta, precision);

        self.fan_out(Payload::Sample {
            k,
            t_q,
            device: packet.device_name,
            pairs: packet.pairs,
        });
    }

    /// Maps a device's raw `device_ts` onto host-relative time, creating an
    /// anchor on first sight and re-anchoring (bumping `epoch`) on a
    /// backward jump larger than `ANCHOR_EPSILON_SEC`.
    fn map_device_time(&self, device_name: &str, device_ts: f64, host_now: f64) -> f64 {
        let mut anchor = self
            .anchors
            .entry(device_name.to_string())
            .or_insert_with(|| DeviceAnchor::anchor(device_ts, host_now));

        if device_ts + ANCHOR_EPSILON_SEC < anchor.last_device_ts {
            let epoch = anchor.epoch + 1;
            warn!(
                "synchronizer: backward clock jump on device '{device_name}' \
                 ({device_ts} < {0}); re-anchoring (epoch {epoch})",
                anchor.last_device_ts
            );
            *anchor = DeviceAnchor {
                epoch,
                ..DeviceAnchor::anchor(device_ts, host_now)
            };
        }

        anchor.last_device_ts = device_ts;
        anchor.map(device_ts)
    }

    /// Fans a payload out to every registered sink. Full-rate sinks get the
    /// payload unchanged; plot sinks get markers unchanged and samples
    /// decimated keep-one-per-bin per `device_channel` series. A sample
    /// whose surviving pair list is empty after decimation is not emitted
    /// to plot sinks at all. Exceptions inside a sink push are swallowed
    /// per sink (best-effort fan-out).
    fn fan_out(&self, payload: Payload) {
        let sinks = self.sinks.lock();
        for entry in sinks.iter() {
            match entry.kind {
                SinkKind::FullRate => entry.sink.push(payload.clone()),
                SinkKind::Plot => {
                    if let Some(decimated) = self.decimate_for_plot(&payload) {
                        entry.sink.push(decimated);
                    }
                }
            }
        }
    }

    fn decimate_for_plot(&self, payload: &Payload) -> Option<Payload> {
        let Payload::Sample {
            k,
            t_q,
            device,
            pairs,
        } = payload
        else {
            return Some(payload.clone());
        };

        let Some(plot_dt) = self.plot_config.plot_dt() else {
            return Some(payload.clone());
        };

        let bin = (t_q / plot_dt).floor() as i64;
        let mut surviving = Vec::with_capacity(pairs.len());
        for (ch, val) in pairs {
            let series_key = format!("{device}_{ch}");
            let mut last_bin = self.decimation.entry(series_key).or_insert(i64::MIN);
            if *last_bin != bin {
                *last_bin = bin;
                surviving.push((ch.clone(), *val));
            }
        }

        if surviving.is_empty() {
            None
        } else {
            Some(Payload::Sample {
                k: *k,
                t_q: *t_q,
                device: device.clone(),
                pairs: surviving,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    struct CollectingSink {
        received: StdMutex<Vec<Payload>>,
    }

    impl CollectingSink {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                received: StdMutex::new(Vec::new()),
            })
        }
        fn drain(&self) -> Vec<Payload> {
            std::mem::take(&mut self.received.lock().unwrap())
        }
    }

    impl Sink for CollectingSink {
        fn push(&self, payload: Payload) {
            self.received.lock().unwrap().push(payload);
        }
    }

    fn keymap() -> EventKeymap {
        EventKeymap::new(vec![
            ("0".into(), "REST".into()),
            ("7".into(), "TASK_7".into()),
        ])
    }

    #[test]
    fn event_toggle_round_trips_to_default() {
        let sync = Synchronizer::new(keymap(), PlotConfig::default(), IntakeConfig::default())
            .unwrap();
        sync.start_session(0.01).unwrap();

        let after = sync.set_event("TASK_7", "keyboard").unwrap();
        assert_eq!(after, "TASK_7");
        let after2 = sync.set_event("TASK_7", "keyboard").unwrap();
        assert_eq!(after2, "REST");

        sync.stop_session();
    }

    #[test]
    fn set_event_rejects_empty_source_and_unknown_label() {
        let sync = Synchronizer::new(keymap(), PlotConfig::default(), IntakeConfig::default())
            .unwrap();
        sync.start_session(0.01).unwrap();
        assert_eq!(
            sync.set_event("TASK_7", ""),
            Err(TriggerError::EmptySource)
        );
        assert!(matches!(
            sync.set_event("NOT_A_LABEL", "kb"),
            Err(TriggerError::UnknownLabel(_))
        ));
        sync.stop_session();
    }

    #[test]
    fn samples_fan_out_to_full_rate_sink() {
        let sync = Synchronizer::new(keymap(), PlotConfig::default(), IntakeConfig::default())
            .unwrap();
        let sink = CollectingSink::new();
        sync.register_full_rate_sink(sink.clone());
        sync.start_session(0.01).unwrap();

        sync.enqueue_packet(100.0, "A", vec![("x".into(), Some(1.0))]);
        std::thread::sleep(Duration::from_millis(50));
        sync.stop_session();

        let received = sink.drain();
        assert_eq!(received.len(), 1);
        assert!(matches!(received[0], Payload::Sample { .. }));
    }

    #[test]
    fn plot_sink_decimates_duplicate_bins_to_nothing() {
        let sync = Synchronizer::new(
            keymap(),
            PlotConfig {
                plot_decimate_hz: 1.0,
            },
            IntakeConfig::default(),
        )
        .unwrap();
        let plot = CollectingSink::new();
        sync.register_plot_sink(plot.clone());
        sync.start_session(0.01).unwrap();

        sync.enqueue_packet(0.0, "A", vec![("x".into(), Some(1.0))]);
        sync.enqueue_packet(0.001, "A", vec![("x".into(), Some(2.0))]);
        std::thread::sleep(Duration::from_millis(80));
        sync.stop_session();

        let received = plot.drain();
        assert_eq!(received.len(), 1, "second sample lands in same 1Hz bin, suppressed");
    }

    #[test]
    fn double_start_is_a_noop_not_fatal() {
        let sync = Synchronizer::new(keymap(), PlotConfig::default(), IntakeConfig::default())
            .unwrap();
        sync.start_session(0.01).unwrap();
        assert!(sync.start_session(0.01).is_ok());
        sync.stop_session();
    }

    #[test]
    fn nonpositive_delta_is_fatal_config_error() {
        let sync = Synchronizer::new(keymap(), PlotConfig::default(), IntakeConfig::default())
            .unwrap();
        assert_eq!(
            sync.start_session(0.0),
            Err(ConfigError::NonPositiveDelta(0.0))
        );
    }
}
