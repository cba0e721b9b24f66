//! Tagged payload (sec. 3, 9): a closed three-variant union, no inheritance.
//! Sinks match on this directly.

/// A single channel reading; `None` denotes a gap (invalid sample) and must
/// round-trip to an empty CSV cell.
pub type ChannelValue = Option<f64>;

/// Producer → synchronizer sample packet (sec. 3, 6).
#[derive(Debug, Clone)]
pub struct SamplePacket {
    /// Device-local clock reading, in seconds.
    pub device_ts: f64,
    pub device_name: String,
    pub pairs: Vec<(String, ChannelValue)>,
}

impl SamplePacket {
    pub fn new(
        device_ts: f64,
        device_name: impl Into<String>,
        pairs: Vec<(String, ChannelValue)>,
    ) -> Self {
        Self {
            device_ts,
            device_name: device_name.into(),
            pairs,
        }
    }
}

/// Synchronizer → sinks tagged payload (sec. 3). Discriminated by variant,
/// not by a type tag field — sinks consume the union directly.
#[derive(Debug, Clone)]
pub enum Payload {
    Sample {
        k: u64,
        t_q: f64,
        device: String,
        pairs: Vec<(String, ChannelValue)>,
    },
    Event {
        k: u64,
        t_q: f64,
        label: String,
        source: String,
        current_event_after: String,
    },
    Spike {
        k: u64,
        t_q: f64,
        label: String,
        source: String,
    },
}

impl Payload {
    pub fn k(&self) -> u64 {
        match self {
            Payload::Sample { k, .. } => *k,
            Payload::Event { k, .. } => *k,
            Payload::Spike { k, .. } => *k,
        }
    }

    pub fn is_marker(&self) -> bool {
        !matches!(self, Payload::Sample { .. })
    }
}
