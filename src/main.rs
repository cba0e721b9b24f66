//! # biosync entry point
//!
//! Wires a demo sine-wave producer into the synchronizer, attaches the CSV
//! export sink, and runs until Ctrl-C. Stand-in for the real multi-device
//! acquisition session a production deployment would configure from disk
//! (config loading is out of scope here).
//!
//! ## Shutdown ordering
//! Ctrl-C flips a single `AtomicBool`; producers observe it and stop first,
//! then the synchronizer's session is stopped (draining in-flight packets),
//! then the export sink is stopped last (flushing any buffered rows).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::info;

use biosync::acquisition::demo::{DemoGenerator, DemoParams};
use biosync::config::{EventKeymap, ExportConfig, IntakeConfig, PlotConfig};
use biosync::export_sink::ExportSink;
use biosync::synchronizer::Synchronizer;

const GRID_DELTA_SEC: f64 = 0.01;
const DEFAULT_RUN_SECS: u64 = 30;
const DEMO_RATE_HZ: f64 = 64.0;

fn default_keymap() -> EventKeymap {
    EventKeymap::new(vec![
        ("0".to_string(), "REST".to_string()),
        ("7".to_string(), "TASK_7".to_string()),
        ("8".to_string(), "TASK_8".to_string()),
        ("9".to_string(), "TASK_9".to_string()),
    ])
}

fn main() {
    env_logger::init();
    info!("=== biosync start ===");

    let keymap = default_keymap();
    let export_config = ExportConfig {
        channels: vec![
            "demo_rand:ch_1".to_string(),
            "demo_rand:ch_2".to_string(),
        ],
        ..ExportConfig::default()
    };

    let synchronizer = Synchronizer::new(keymap.clone(), PlotConfig::default(), IntakeConfig::default())
        .expect("valid default configuration");

    let export_sink = ExportSink::new(
        export_config,
        keymap.default_event().unwrap().to_string(),
        DEMO_RATE_HZ,
    )
    .expect("valid export configuration");
    synchronizer.register_full_rate_sink(export_sink.clone());

    synchronizer
        .start_session(GRID_DELTA_SEC)
        .expect("positive grid delta");

    let shutdown = Arc::new(AtomicBool::new(false));
    let producer = Arc::new(DemoGenerator::new("demo_rand", DEMO_RATE_HZ, DemoParams::default()));
    let producer_running = producer.stop_handle();

    let producer_clone = producer.clone();
    let sync_for_producer = synchronizer.clone();
    let producer_handle = thread::spawn(move || {
        producer_clone.run(&sync_for_producer);
    });

    info!("biosync running for {DEFAULT_RUN_SECS}s");

    let mut elapsed = 0u64;
    while elapsed < DEFAULT_RUN_SECS && !shutdown.load(Ordering::Acquire) {
        thread::sleep(Duration::from_secs(1));
        elapsed += 1;
    }

    producer_running.store(false, Ordering::SeqCst);
    let _ = producer_handle.join();

    synchronizer.stop_session();
    export_sink.stop();

    info!("=== biosync finished ===");
}
