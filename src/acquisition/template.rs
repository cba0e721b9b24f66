//! Device-template skeleton (sec. 6.1): a manager that starts/stops an idle
//! worker thread with no emissions. Intended as the copy-paste basis a new
//! device integration would start from.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::debug;

const IDLE_POLL: Duration = Duration::from_millis(100);

/// Starts/stops an idle worker thread. Replace `run` with real device I/O
/// when building a new acquisition driver.
pub struct TemplateDevice {
    device_name: String,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl TemplateDevice {
    pub fn new(device_name: impl Into<String>) -> Self {
        Self {
            device_name: device_name.into(),
            running: Arc::new(AtomicBool::new(false)),
            handle: None,
        }
    }

    pub fn start(&mut self) {
        if self.handle.is_some() {
            return;
        }
        self.running.store(true, Ordering::SeqCst);
        let running = self.running.clone();
        let name = self.device_name.clone();
        self.handle = Some(thread::spawn(move || {
            debug!("template device '{name}': idle worker started");
            while running.load(Ordering::Acquire) {
                thread::sleep(IDLE_POLL);
            }
            debug!("template device '{name}': idle worker stopped");
        }));
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_and_stops_cleanly() {
        let mut dev = TemplateDevice::new("placeholder");
        dev.start();
        thread::sleep(Duration::from_millis(20));
        dev.stop();
        assert!(dev.handle.is_none());
    }
}
