//! Component B: producer intake queue (sec. 4.B).
//!
//! Built on a `crossbeam::channel` bounded channel rather than
//! `crossbeam_queue::ArrayQueue` so the synchronizer's consumer gets a
//! blocking `recv_timeout` for free (sec. 4.D/5's "block up to 0.2s").
//! Drop-oldest is then just pop-then-push on `Full`: `try_recv` pops the
//! channel's head (the oldest element, FIFO), then `try_send` retries.

use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam::channel::{bounded, unbounded, Receiver, Sender, TrySendError};
use log::warn;

use crate::payload::SamplePacket;

/// Message on the intake channel: either a packet or the shutdown sentinel.
#[derive(Debug, Clone)]
pub enum IntakeMsg {
    Packet(SamplePacket),
    Stop,
}

/// Multi-producer, single-consumer queue of sample packets (sec. 4.B).
pub struct IntakeQueue {
    tx: Sender<IntakeMsg>,
    rx: Receiver<IntakeMsg>,
    bounded: bool,
    dropped: AtomicU64,
}

impl IntakeQueue {
    /// `max_queue == 0` is unbounded; `> 0` is bounded with drop-oldest.
    pub fn new(max_queue: usize) -> Self {
        let (tx, rx, is_bounded) = if max_queue == 0 {
            let (tx, rx) = unbounded();
            (tx, rx, false)
        } else {
            let (tx, rx) = bounded(max_queue);
            (tx, rx, true)
        };
        Self {
            tx,
            rx,
            bounded: is_bounded,
            dropped: AtomicU64::new(0),
        }
    }

    /// A cloneable producer handle.
    pub fn sender(&self) -> Sender<IntakeMsg> {
        self.tx.clone()
    }

    pub fn receiver(&self) -> Receiver<IntakeMsg> {
        self.rx.clone()
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Enqueues a sample packet, applying drop-oldest on a bounded overflow.
    pub fn enqueue(&self, packet: SamplePacket) {
        Self::enqueue_on(&self.tx, &self.rx, self.bounded, &self.dropped, packet);
    }

    /// Signals the consumer to stop.
    pub fn enqueue_sentinel(&self) {
        let _ = self.tx.send(IntakeMsg::Stop);
    }

    fn enqueue_on(
        tx: &Sender<IntakeMsg>,
        rx: &Receiver<IntakeMsg>,
        bounded: bool,
        dropped: &AtomicU64,
        packet: SamplePacket,
    ) {
        if !bounded {
            let _ = tx.send(IntakeMsg::Packet(packet));
            return;
        }

        match tx.try_send(IntakeMsg::Packet(packet)) {
            Ok(()) => {}
            Err(TrySendError::Full(msg)) => {
                if rx.try_recv().is_ok() {
                    warn!("intake queue full, dropping oldest");
                    if tx.try_send(msg).is_err() {
                        // Raced: another producer refilled the slot first.
                        dropped.fetch_add(1, Ordering::Relaxed);
                    }
                } else {
                    // Consumer drained it first; just drop ours silently.
                    dropped.fetch_add(1, Ordering::Relaxed);
                }
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }
}
