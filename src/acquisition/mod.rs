//! Acquisition drivers (sec. 6.1): thin producer implementations against
//! the synchronizer's intake contract. Real device
//! I/O is out of scope; each module here implements only the protocol shape
//! (periodic release loop, timebase reconciliation) needed to drive the core
//! end-to-end.

pub mod demo;
pub mod serial_device;
pub mod stream_source;
pub mod template;
