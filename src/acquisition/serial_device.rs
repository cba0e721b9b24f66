//! Serial device shape (sec. 6.1): a rollover-counter producer loop matching
//! the primary 4.A variant. `SerialPort` is a thin trait stand-in for the
//! real serial transport; no real serial I/O is implemented here.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::warn;

use crate::synchronizer::Synchronizer;
use crate::timebase::DeviceTimebase;

/// One decoded frame off the wire: a raw 16-bit tick counter plus decoded
/// channel values.
pub struct SerialFrame {
    pub raw_tick: u64,
    pub values: Vec<(String, Option<f64>)>,
}

/// Protocol boundary for a serial transport. A real implementation would
/// wrap a device handle (e.g. a Bluetooth serial port); not provided here.
pub trait SerialPort: Send {
    /// Blocks briefly for the next frame, or returns `None` on a read
    /// timeout (treated as transient, not fatal).
    fn read_frame(&mut self) -> Option<SerialFrame>;
}

/// Drains a `SerialPort`, reconciling its wrapping tick counter through a
/// shared [`DeviceTimebase`] before handing packets to the synchronizer.
pub struct SerialDevice<P: SerialPort> {
    device_name: String,
    port: P,
    timebase: Arc<DeviceTimebase>,
    running: Arc<AtomicBool>,
}

impl<P: SerialPort> SerialDevice<P> {
    pub fn new(device_name: impl Into<String>, port: P, timebase: Arc<DeviceTimebase>) -> Self {
        Self {
            device_name: device_name.into(),
            port,
            timebase,
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }

    pub fn run(&mut self, sync: &Arc<Synchronizer>) {
        while self.running.load(Ordering::Acquire) {
            match self.port.read_frame() {
                Some(frame) => {
                    let device_ts = self.timebase.device_time_s(frame.raw_tick, &self.device_name);
                    sync.enqueue_packet(device_ts, self.device_name.clone(), frame.values);
                }
                None => {
                    // Read timeout: transient, keep polling rather than exit.
                    warn!("serial_device '{}': read timeout", self.device_name);
                    std::thread::sleep(std::time::Duration::from_millis(5));
                }
            }
        }
    }
}
