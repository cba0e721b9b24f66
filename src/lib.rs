//! Real-time biosignal acquisition, synchronization, and export pipeline.
//!
//! Five core components: [`timebase`] (A), [`intake`] (B), [`quantizer`]
//! (C), [`synchronizer`] (D), [`export_sink`] (E), plus thin acquisition,
//! marker, and plot collaborators that exercise the core end-to-end.

pub mod acquisition;
pub mod config;
pub mod error;
pub mod export_sink;
pub mod intake;
pub mod markers;
pub mod payload;
pub mod plot;
pub mod quantizer;
pub mod synchronizer;
pub mod timebase;
