//! Component E: CSV export sink (sec. 4.E).
//!
//! Consumes the synchronizer's tagged payload stream and writes a wide
//! synced CSV (one row per `k`, one column per `device:channel`) plus a
//! markers sidecar CSV, both lookahead-tolerant and sticky-event-aware.
//! A background thread owns both `csv::Writer`s, draining a channel and
//! flushing on whichever of two independent triggers comes first — a
//! row-count backstop or `flush_period_sec` of wall-clock — plus the idle
//! watermark and shutdown; row assembly, the commit watermark, sticky
//! propagation, and the flush policy follow the row-buffer contract this
//! component is specified against.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use csv::Writer;
use log::{debug, error, warn};
use parking_lot::Mutex;

use crate::config::ExportConfig;
use crate::error::ConfigError;
use crate::payload::Payload;
use crate::quantizer;
use crate::synchronizer::Sink;

/// Consumer poll interval; also the idle-watermark check granularity.
const CONSUMER_POLL: Duration = Duration::from_millis(100);
/// Row-count flush backstop bounds when derived automatically.
const MIN_FLUSH_ROWS: usize = 64;
const MAX_FLUSH_ROWS: usize = 2048;

enum ExportMsg {
    Data(Payload),
    Stop,
}

/// One pending row: `device:channel` → formatted value, filled in as
/// samples for that `k` arrive; never retroactively overwritten by an
/// earlier-arriving duplicate (latest-wins per `(k, channel)`).
type Row = HashMap<String, String>;

struct Buffers {
    channel_set: HashSet<String>,
    /// Rows keyed by `k`, in increasing order; drives the commit watermark.
    rows: BTreeMap<u64, Row>,
    /// `t_q` observed for each `k`, needed to format the time column even
    /// for a `k` that only ever saw marker traffic.
    tq_by_k: HashMap<u64, f64>,
    /// Pending per-k sticky-event changes, applied in ascending-k order
    /// immediately before each row is committed (sec. 4.E sticky propagation).
    event_changes: HashMap<u64, String>,
    /// Per-k instantaneous spike label; not sticky, applies only to that row.
    spike_at_k: HashMap<u64, String>,
    k_seen_max: u64,
    sticky_event: String,
    initial_marker_written: bool,
    rows_since_flush: usize,
    last_row_at: Instant,
    last_flush_at: Instant,
    /// Set once a forced idle flush has run for the current silence; cleared
    /// on the next real packet so idle flushing fires once per active→idle
    /// edge rather than once per `idle_watermark_sec` of sustained silence.
    idle_latched: bool,
    /// `t_q` formatting precision, matching the session's D (sec. 3, 4.C).
    precision: u32,
}

/// Background CSV writer for the synchronizer's tagged payload stream.
pub struct ExportSink {
    tx: Sender<ExportMsg>,
    worker: Mutex<Option<JoinHandle<()>>>,
    running: Arc<AtomicBool>,
}

impl ExportSink {
    /// Validates `config`, creates the output directories, and spawns the
    /// background writer thread. `fs_max` resolves `config.lookahead`
    /// (seconds → steps) and the flush-rows backstop when not given
    /// explicitly. Fails fast on misconfiguration so a bad session never
    /// silently writes a malformed header.
    pub fn new(
        config: ExportConfig,
        default_event: String,
        fs_max: f64,
    ) -> Result<Arc<Self>, ConfigError> {
        if config.csv_signal_enable && config.channels.is_empty() {
            return Err(ConfigError::EmptyChannelList);
        }
        let mut channel_set = HashSet::new();
        for ch in &config.channels {
            if !channel_set.insert(ch.clone()) {
                return Err(ConfigError::DuplicateChannel(ch.clone()));
            }
        }

        if config.csv_signal_enable {
            create_dir(&config.synced_dir)?;
        }
        if config.csv_marker_enable {
            create_dir(&config.markers_dir)?;
        }

        let lookahead_steps = config.lookahead.resolve_steps(fs_max);
        let flush_rows = if config.flush_rows > 0 {
            config.flush_rows
        } else {
            ((fs_max * config.flush_period_sec).round() as usize).clamp(MIN_FLUSH_ROWS, MAX_FLUSH_ROWS)
        };
        // delta = 1/fs_max (sec. 1); D derives from delta the same way the
        // synchronizer's own quantizer does.
        let precision = quantizer::decimal_precision(1.0 / fs_max);

        let (tx, rx) = unbounded();
        let running = Arc::new(AtomicBool::new(true));
        let worker_running = running.clone();

        let handle = thread::spawn(move || {
            run_writer(
                config,
                default_event,
                lookahead_steps,
                flush_rows,
                precision,
                channel_set,
                rx,
                worker_running,
            );
        });

        Ok(Arc::new(Self {
            tx,
            worker: Mutex::new(Some(handle)),
            running,
        }))
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        let _ = self.tx.send(ExportMsg::Stop);
        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }
    }
}

impl Sink for ExportSink {
    fn push(&self, payload: Payload) {
        if self.tx.send(ExportMsg::Data(payload)).is_err() {
            warn!("export_sink: writer thread gone, dropping payload");
        }
    }
}

fn create_dir(dir: &str) -> Result<(), ConfigError> {
    fs::create_dir_all(dir).map_err(|e| ConfigError::DirectoryCreate {
        path: dir.to_string(),
        reason: e.to_string(),
    })
}

fn session_stamp() -> String {
    chrono::Local::now().format("%Y-%m-%d_%H-%M-%S").to_string()
}

fn run_writer(
    config: ExportConfig,
    default_event: String,
    lookahead_steps: u64,
    flush_rows: usize,
    precision: u32,
    channel_set: HashSet<String>,
    rx: Receiver<ExportMsg>,
    running: Arc<AtomicBool>,
) {
    let stamp = session_stamp();
    let mut synced_writer = if config.csv_signal_enable {
        match Writer::from_path(PathBuf::from(&config.synced_dir).join(format!("synced_{stamp}.csv"))) {
            Ok(w) => Some(w),
            Err(e) => {
                error!("export_sink: failed to open synced CSV: {e}");
                None
            }
        }
    } else {
        None
    };
    let mut markers_writer = if config.csv_marker_enable {
        match Writer::from_path(PathBuf::from(&config.markers_dir).join(format!("markers_{stamp}.csv"))) {
            Ok(w) => Some(w),
            Err(e) => {
                error!("export_sink: failed to open markers CSV: {e}");
                None
            }
        }
    } else {
        None
    };

    if let Some(w) = synced_writer.as_mut() {
        if let Err(e) = write_synced_header(w, &config) {
            error!("export_sink: failed to write synced header: {e}");
        }
    }
    if let Some(w) = markers_writer.as_mut() {
        let mut header = Vec::with_capacity(5);
        if config.print_k {
            header.push("k".to_string());
        }
        header.extend(["t_q", "event", "spike", "source"].map(String::from));
        if let Err(e) = w.write_record(&header) {
            error!("export_sink: failed to write markers header: {e}");
        }
    }

    let mut buffers = Buffers {
        channel_set,
        rows: BTreeMap::new(),
        tq_by_k: HashMap::new(),
        event_changes: HashMap::new(),
        spike_at_k: HashMap::new(),
        k_seen_max: 0,
        sticky_event: default_event,
        initial_marker_written: false,
        rows_since_flush: 0,
        last_row_at: Instant::now(),
        last_flush_at: Instant::now(),
        idle_latched: false,
        precision,
    };

    loop {
        match rx.recv_timeout(CONSUMER_POLL) {
            Ok(ExportMsg::Stop) => break,
            Ok(ExportMsg::Data(payload)) => {
                handle_payload(
                    payload,
                    &config,
                    lookahead_steps,
                    &mut buffers,
                    synced_writer.as_mut(),
                    markers_writer.as_mut(),
                );
                if buffers.rows_since_flush >= flush_rows
                    || buffers.last_flush_at.elapsed().as_secs_f64() >= config.flush_period_sec
                {
                    flush_now(&mut buffers, synced_writer.as_mut(), markers_writer.as_mut());
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                maybe_force_idle_commit(&config, &mut buffers, synced_writer.as_mut(), markers_writer.as_mut());
                if buffers.last_flush_at.elapsed().as_secs_f64() >= config.flush_period_sec {
                    flush_now(&mut buffers, synced_writer.as_mut(), markers_writer.as_mut());
                }
                if !running.load(Ordering::Acquire) {
                    break;
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    drain_remaining(&mut buffers, &config, synced_writer.as_mut(), markers_writer.as_mut());
    flush_now(&mut buffers, synced_writer.as_mut(), markers_writer.as_mut());
    debug!("export_sink: writer thread exiting");
}

fn write_synced_header(w: &mut Writer<std::fs::File>, config: &ExportConfig) -> csv::Result<()> {
    let mut header = Vec::with_capacity(config.channels.len() + 3);
    if config.print_k {
        header.push("k".to_string());
    }
    header.push("t_q".to_string());
    header.extend(config.channels.iter().cloned());
    header.push("spike".to_string());
    header.push("event".to_string());
    w.write_record(&header)
}

fn handle_payload(
    payload: Payload,
    config: &ExportConfig,
    lookahead_steps: u64,
    buffers: &mut Buffers,
    mut synced_writer: Option<&mut Writer<std::fs::File>>,
    mut markers_writer: Option<&mut Writer<std::fs::File>>,
) {
    buffers.last_row_at = Instant::now();
    buffers.idle_latched = false;

    match payload {
        Payload::Sample {
            k, t_q, device, pairs,
        } => {
            // Lookahead safety: a sample whose k is already at or behind the
            // commit watermark arrives too late to affect the output and
            // must not resurrect an already-committed (or about-to-commit) row.
            let watermark = buffers.k_seen_max.saturating_sub(lookahead_steps);
            if k <= watermark {
                debug!("export_sink: dropping late sample at k={k} (watermark={watermark})");
                return;
            }
            buffers.k_seen_max = buffers.k_seen_max.max(k);
            buffers.tq_by_k.entry(k).or_insert(t_q);
            let row = buffers.rows.entry(k).or_default();
            for (ch, val) in pairs {
                let key = format!("{device}:{ch}");
                // The header is the schema contract: silently ignore any
                // pair for a channel not present in it.
                if buffers.channel_set.contains(&key) {
                    row.insert(key, format_value(val));
                }
            }
        }
        Payload::Event {
            k,
            t_q,
            source,
            current_event_after,
            ..
        } => {
            buffers.event_changes.insert(k, current_event_after.clone());
            write_marker_row(
                markers_writer.as_deref_mut(),
                config,
                buffers.precision,
                k,
                t_q,
                &current_event_after,
                "",
                &source,
            );
        }
        Payload::Spike {
            k, t_q, label, source,
        } => {
            buffers.k_seen_max = buffers.k_seen_max.max(k);
            buffers.tq_by_k.entry(k).or_insert(t_q);
            buffers.spike_at_k.insert(k, label.clone());
            write_marker_row(
                markers_writer.as_deref_mut(),
                config,
                buffers.precision,
                k,
                t_q,
                "",
                &label,
                &source,
            );
        }
    }

    commit_ready_rows(
        config,
        lookahead_steps,
        buffers,
        synced_writer.as_deref_mut(),
        markers_writer.as_deref_mut(),
    );
}

fn write_marker_row(
    markers_writer: Option<&mut Writer<std::fs::File>>,
    config: &ExportConfig,
    precision: u32,
    k: u64,
    t_q: f64,
    event: &str,
    spike: &str,
    source: &str,
) {
    let Some(w) = markers_writer else { return };
    let mut record = Vec::with_capacity(5);
    if config.print_k {
        record.push(k.to_string());
    }
    record.push(format!("{:.*}", precision as usize, t_q));
    record.push(event.to_string());
    record.push(spike.to_string());
    record.push(source.to_string());
    if let Err(e) = w.write_record(&record) {
        error!("export_sink: failed to write marker row: {e}");
    }
}

/// Commits every row whose `k <= k_seen_max - lookahead_steps`: later
/// traffic for a committed `k` can still arrive (clock skew across
/// devices) but is no longer waited for.
fn commit_ready_rows(
    config: &ExportConfig,
    lookahead_steps: u64,
    buffers: &mut Buffers,
    mut synced_writer: Option<&mut Writer<std::fs::File>>,
    mut markers_writer: Option<&mut Writer<std::fs::File>>,
) {
    if !config.csv_signal_enable {
        buffers.rows.retain(|&k, _| k + lookahead_steps > buffers.k_seen_max);
        return;
    }

    let watermark = buffers.k_seen_max.saturating_sub(lookahead_steps);
    let ready_keys: Vec<u64> = buffers.rows.range(..=watermark).map(|(&k, _)| k).collect();

    for k in ready_keys {
        let row = buffers.rows.remove(&k).unwrap_or_default();
        commit_one_row(
            config,
            buffers,
            k,
            row,
            synced_writer.as_deref_mut(),
            markers_writer.as_deref_mut(),
        );
    }
}

fn commit_one_row(
    config: &ExportConfig,
    buffers: &mut Buffers,
    k: u64,
    row: Row,
    synced_writer: Option<&mut Writer<std::fs::File>>,
    markers_writer: Option<&mut Writer<std::fs::File>>,
) {
    // Sticky propagation: apply every pending change with key <= k, in
    // ascending order, before the row's event column is read.
    let mut pending: Vec<u64> = buffers
        .event_changes
        .keys()
        .copied()
        .filter(|&ck| ck <= k)
        .collect();
    pending.sort_unstable();
    for ck in pending {
        if let Some(label) = buffers.event_changes.remove(&ck) {
            buffers.sticky_event = label;
        }
    }

    let t_q = buffers.tq_by_k.remove(&k).unwrap_or(0.0);

    if !buffers.initial_marker_written {
        buffers.initial_marker_written = true;
        write_marker_row(
            markers_writer,
            config,
            buffers.precision,
            k,
            t_q,
            &buffers.sticky_event,
            "",
            "sync",
        );
    }

    let Some(w) = synced_writer else { return };
    let spike = buffers.spike_at_k.remove(&k).unwrap_or_default();

    let mut record = Vec::with_capacity(config.channels.len() + 3);
    if config.print_k {
        record.push(k.to_string());
    }
    record.push(format!("{:.*}", buffers.precision as usize, t_q));
    for ch in &config.channels {
        record.push(row.get(ch).cloned().unwrap_or_default());
    }
    record.push(spike);
    record.push(buffers.sticky_event.clone());

    if let Err(e) = w.write_record(&record) {
        error!("export_sink: failed to write synced row for k={k}: {e}");
        return;
    }
    buffers.rows_since_flush += 1;
}

fn flush_now(
    buffers: &mut Buffers,
    synced_writer: Option<&mut Writer<std::fs::File>>,
    markers_writer: Option<&mut Writer<std::fs::File>>,
) {
    if let Some(w) = synced_writer {
        if let Err(e) = w.flush() {
            error!("export_sink: synced flush failed: {e}");
        }
    }
    if let Some(w) = markers_writer {
        if let Err(e) = w.flush() {
            error!("export_sink: markers flush failed: {e}");
        }
    }
    buffers.rows_since_flush = 0;
    buffers.last_flush_at = Instant::now();
}

/// If no packet has arrived for `idle_watermark_sec`, force-commit everything
/// through `k_seen_max` (ignoring the lookahead watermark) and flush, exactly
/// once per active→idle transition: `idle_latched` guards against re-firing
/// on every poll for the remainder of a sustained silence, and is only
/// cleared when `handle_payload` next sees real traffic.
fn maybe_force_idle_commit(
    config: &ExportConfig,
    buffers: &mut Buffers,
    mut synced_writer: Option<&mut Writer<std::fs::File>>,
    mut markers_writer: Option<&mut Writer<std::fs::File>>,
) {
    if config.idle_watermark_sec <= 0.0 {
        return;
    }
    if buffers.idle_latched {
        return;
    }
    if buffers.last_row_at.elapsed().as_secs_f64() < config.idle_watermark_sec {
        return;
    }

    commit_ready_rows(
        config,
        0,
        buffers,
        synced_writer.as_deref_mut(),
        markers_writer.as_deref_mut(),
    );
    flush_now(buffers, synced_writer.as_deref_mut(), markers_writer.as_deref_mut());
    buffers.idle_latched = true;
}

/// Called on shutdown: commits everything still buffered regardless of the
/// lookahead watermark, since no more traffic will ever arrive for it.
fn drain_remaining(
    buffers: &mut Buffers,
    config: &ExportConfig,
    mut synced_writer: Option<&mut Writer<std::fs::File>>,
    mut markers_writer: Option<&mut Writer<std::fs::File>>,
) {
    if !config.csv_signal_enable {
        return;
    }
    commit_ready_rows(
        config,
        0,
        buffers,
        synced_writer.as_deref_mut(),
        markers_writer.as_deref_mut(),
    );
}

fn format_value(val: Option<f64>) -> String {
    match val {
        Some(v) if v.is_finite() => format!("{v:.6}"),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Lookahead;

    fn test_config(dir: &std::path::Path) -> ExportConfig {
        ExportConfig {
            channels: vec!["A:x".to_string(), "A:y".to_string()],
            lookahead: Lookahead::Steps(1),
            flush_period_sec: 0.25,
            flush_rows: 0,
            idle_watermark_sec: 0.0,
            print_k: true,
            csv_signal_enable: true,
            csv_marker_enable: true,
            synced_dir: dir.join("synced").to_string_lossy().to_string(),
            markers_dir: dir.join("markers").to_string_lossy().to_string(),
        }
    }

    #[test]
    fn rejects_empty_channel_list_when_signal_csv_enabled() {
        let dir = std::env::temp_dir().join("biosync_test_empty_channels");
        let mut cfg = test_config(&dir);
        cfg.channels.clear();
        let result = ExportSink::new(cfg, "REST".to_string(), 100.0);
        assert_eq!(result.err(), Some(ConfigError::EmptyChannelList));
    }

    #[test]
    fn rejects_duplicate_channel_keys() {
        let dir = std::env::temp_dir().join("biosync_test_dup_channels");
        let mut cfg = test_config(&dir);
        cfg.channels.push("A:x".to_string());
        let result = ExportSink::new(cfg, "REST".to_string(), 100.0);
        assert!(matches!(result, Err(ConfigError::DuplicateChannel(_))));
    }

    #[test]
    fn derives_flush_rows_within_bounds() {
        assert_eq!(
            ((1.0_f64 * 0.25).round() as usize).clamp(MIN_FLUSH_ROWS, MAX_FLUSH_ROWS),
            MIN_FLUSH_ROWS
        );
        assert_eq!(
            ((100_000.0_f64 * 0.25).round() as usize).clamp(MIN_FLUSH_ROWS, MAX_FLUSH_ROWS),
            MAX_FLUSH_ROWS
        );
    }

    #[test]
    fn commit_watermark_holds_rows_until_lookahead_clears() {
        let dir = std::env::temp_dir().join("biosync_test_watermark");
        let cfg = test_config(&dir);
        let sink = ExportSink::new(cfg, "REST".to_string(), 200.0).unwrap();

        sink.push(Payload::Sample {
            k: 0,
            t_q: 0.0,
            device: "A".to_string(),
            pairs: vec![("x".to_string(), Some(1.0))],
        });
        sink.push(Payload::Sample {
            k: 1,
            t_q: 0.01,
            device: "A".to_string(),
            pairs: vec![("x".to_string(), Some(2.0))],
        });
        std::thread::sleep(Duration::from_millis(50));

        sink.stop();
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn format_value_empty_for_none_and_non_finite() {
        assert_eq!(format_value(None), "");
        assert_eq!(format_value(Some(f64::NAN)), "");
        assert_eq!(format_value(Some(1.5)), "1.500000");
    }

    #[test]
    fn periodic_flush_writes_without_reaching_row_count_threshold() {
        let dir = std::env::temp_dir().join("biosync_test_periodic_flush");
        let mut cfg = test_config(&dir);
        cfg.flush_period_sec = 0.05;
        cfg.flush_rows = 10_000;
        let sink = ExportSink::new(cfg.clone(), "REST".to_string(), 200.0).unwrap();

        sink.push(Payload::Sample {
            k: 0,
            t_q: 0.0,
            device: "A".to_string(),
            pairs: vec![("x".to_string(), Some(1.0)), ("y".to_string(), Some(2.0))],
        });
        sink.push(Payload::Sample {
            k: 1,
            t_q: 0.01,
            device: "A".to_string(),
            pairs: vec![("x".to_string(), Some(3.0))],
        });

        // Long enough for the commit watermark to clear k=0 and for several
        // flush_period_sec ticks to pass, short of ever hitting flush_rows.
        std::thread::sleep(Duration::from_millis(250));

        let entry = std::fs::read_dir(&cfg.synced_dir).unwrap().next().unwrap().unwrap();
        let contents = std::fs::read_to_string(entry.path()).unwrap();
        assert!(
            contents.contains("1.000000"),
            "row for k=0 should already be on disk from the periodic flush, not just the stop() flush: {contents}"
        );

        sink.stop();
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn idle_commit_latches_until_next_payload_clears_it() {
        let cfg = ExportConfig {
            channels: vec!["A:x".to_string()],
            lookahead: Lookahead::Steps(1),
            flush_period_sec: 0.25,
            flush_rows: 0,
            idle_watermark_sec: 0.01,
            print_k: true,
            csv_signal_enable: true,
            csv_marker_enable: false,
            synced_dir: String::new(),
            markers_dir: String::new(),
        };
        let mut buffers = Buffers {
            channel_set: cfg.channels.iter().cloned().collect(),
            rows: BTreeMap::new(),
            tq_by_k: HashMap::new(),
            event_changes: HashMap::new(),
            spike_at_k: HashMap::new(),
            k_seen_max: 0,
            sticky_event: "REST".to_string(),
            initial_marker_written: false,
            rows_since_flush: 0,
            last_row_at: Instant::now() - Duration::from_millis(50),
            last_flush_at: Instant::now(),
            idle_latched: false,
            precision: 6,
        };

        maybe_force_idle_commit(&cfg, &mut buffers, None, None);
        assert!(buffers.idle_latched, "first poll past the watermark should latch");

        let latched_flush_at = buffers.last_flush_at;
        std::thread::sleep(Duration::from_millis(5));
        maybe_force_idle_commit(&cfg, &mut buffers, None, None);
        assert_eq!(
            buffers.last_flush_at, latched_flush_at,
            "a latched idle state must not re-flush on the next poll during the same silence"
        );

        // A real packet (simulated) clears the latch; the next silence latches again.
        buffers.idle_latched = false;
        buffers.last_row_at = Instant::now() - Duration::from_millis(50);
        maybe_force_idle_commit(&cfg, &mut buffers, None, None);
        assert!(buffers.idle_latched, "a fresh active->idle transition should latch again");
    }

    #[test]
    fn t_q_formats_at_derived_precision_not_hardcoded_six() {
        // A high-rate session (small delta) needs more than 6 decimals to
        // keep distinct k's from colliding once t_q is formatted.
        let precision = quantizer::decimal_precision(1.0 / 200_000.0);
        assert!(precision > 6, "expected derived precision above six, got {precision}");
        let rendered = format!("{:.*}", precision as usize, 0.000_012_345_678_f64);
        assert_eq!(rendered.split('.').nth(1).unwrap().len(), precision as usize);
    }
}
