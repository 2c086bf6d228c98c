//! Decoded results: frames, notifications, and table filtering
//!
//! The driver reports everything it decodes through the [`ResultsSink`]
//! trait. Recoverable protocol conditions travel as frame flags, never as
//! errors.

use crate::decoder::ControlWord;
use crate::protocol::{FrameShape, OpCode};

/// Captured parity disagreed with the control word's PAR bit.
pub const FLAG_PARITY_BAD: u8 = 1 << 0;

/// The control word failed the static or dynamic sync check; sync is
/// being reacquired after this frame.
pub const FLAG_SYNC_LOST: u8 = 1 << 1;

/// One decoded SoundWire frame.
#[derive(Debug, Clone, Copy)]
pub struct Frame {
    /// Sample of the frame's first clock edge (inclusive)
    pub start_sample: u64,
    /// Sample of the frame's last clock edge (inclusive)
    pub end_sample: u64,
    /// The 48-bit control word from column 0
    pub control_word: ControlWord,
    /// Combination of `FLAG_PARITY_BAD` and `FLAG_SYNC_LOST`
    pub flags: u8,
}

impl Frame {
    pub fn parity_bad(&self) -> bool {
        self.flags & FLAG_PARITY_BAD != 0
    }

    pub fn sync_lost(&self) -> bool {
        self.flags & FLAG_SYNC_LOST != 0
    }
}

/// Downstream consumer of decoded results.
///
/// Cancellation is not part of this interface; the driver polls a
/// [`crate::CancelToken`] instead.
pub trait ResultsSink {
    /// A frame was decoded (including flagged ones).
    fn add_frame(&mut self, frame: Frame);

    /// A run of 4096 decoded ones was observed over the inclusive sample
    /// range. Informational; decoding continues.
    fn bus_reset(&mut self, start_sample: u64, end_sample: u64);

    /// The frame geometry was established or changed at `sample`.
    fn shape_change(&mut self, sample: u64, shape: FrameShape);

    /// Decoding progressed to `sample`. Called at least once per frame.
    fn report_progress(&mut self, _sample: u64) {}
}

/// Sink that collects everything into vectors, for tests and batch use.
#[derive(Debug, Default)]
pub struct VecSink {
    pub frames: Vec<Frame>,
    pub bus_resets: Vec<(u64, u64)>,
    pub shape_changes: Vec<(u64, FrameShape)>,
}

impl VecSink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ResultsSink for VecSink {
    fn add_frame(&mut self, frame: Frame) {
        self.frames.push(frame);
    }

    fn bus_reset(&mut self, start_sample: u64, end_sample: u64) {
        self.bus_resets.push((start_sample, end_sample));
    }

    fn shape_change(&mut self, sample: u64, shape: FrameShape) {
        self.shape_changes.push((sample, shape));
    }
}

/// Table-level filter for repetitive PING frames.
///
/// A bus mostly idles in PING, so tables drown in identical status
/// reports. When enabled, a PING whose bus state matches the previous
/// PING (SSP excluded, see [`ControlWord::is_ping_same_as`]) is dropped
/// from the table; any non-PING frame ends the run. This filters the
/// rendered table only, never the decoded frame stream.
#[derive(Debug, Default)]
pub struct DuplicatePingFilter {
    enabled: bool,
    last_ping: Option<ControlWord>,
}

impl DuplicatePingFilter {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            last_ping: None,
        }
    }

    /// Whether `frame` should appear in the table.
    pub fn should_report(&mut self, frame: &Frame) -> bool {
        if !self.enabled {
            return true;
        }

        // Flagged frames always show, and a flagged PING must not become
        // the comparison baseline.
        if frame.flags != 0 {
            return true;
        }

        if frame.control_word.op_code() != OpCode::Ping {
            self.last_ping = None;
            return true;
        }

        let duplicate = self
            .last_ping
            .as_ref()
            .is_some_and(|last| frame.control_word.is_ping_same_as(last));
        self.last_ping = Some(frame.control_word);
        !duplicate
    }
}
