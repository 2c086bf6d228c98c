//! Streaming MIPI SoundWire decoder for logic-analyzer captures
//!
//! This library reconstructs SoundWire bus traffic from two synchronous
//! digital capture channels (clock and NRZI data), locates frame
//! synchronization, and emits decoded PING/READ/WRITE frames with parity
//! and sync integrity flags.
//!
//! # Architecture
//!
//! - **SampleSource**: forward-only cursor over a capture channel
//!   ([`EdgeStream`] in memory, [`ChannelSource`] over a live channel,
//!   [`CaptureChannel`] over a DSLogic .dsl file)
//! - **BitstreamDecoder**: NRZI decode with a rewindable mark/history layer
//! - **SyncFinder**: static/dynamic sync search over candidate frame shapes
//! - **FrameEmitter**: top-level loop driving frames into a [`ResultsSink`]
//!
//! # Example
//!
//! ```no_run
//! use soundwire::{CancelToken, CaptureFile, DecoderConfig, FrameEmitter, VecSink};
//!
//! let capture = CaptureFile::open("capture.dsl")?;
//! let clock = capture.channel(0)?;
//! let data = capture.channel(1)?;
//!
//! let mut emitter = FrameEmitter::new(clock, data, DecoderConfig::default());
//! let mut sink = VecSink::new();
//! emitter.run(&mut sink, &CancelToken::new())?;
//! # Ok::<(), soundwire::SwError>(())
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;

pub mod capture;
pub mod decoder;
pub mod protocol;
pub mod results;
pub mod source;

// Re-export the protocol data types
pub use protocol::{FrameShape, OpCode, PeripheralStatus};

// Re-export sample sources
pub use source::{BitLevel, ChannelSource, Edge, EdgeStream, SampleSource};

// Re-export the capture file reader
pub use capture::{CaptureChannel, CaptureFile, CaptureHeader};

// Re-export the decoding core
pub use decoder::{
    BitstreamDecoder, ControlWord, DecoderConfig, DynamicSyncGenerator, FrameEmitter, FrameProgress,
    FrameReader, HistoryBuffer, Mark, StaticSyncMatcher, SyncFinder,
};

// Re-export result types
pub use results::{DuplicatePingFilter, Frame, ResultsSink, VecSink};

#[derive(Error, Debug)]
pub enum SwError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Header parsing error: {0}")]
    ParseHeader(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid probe number: {0}")]
    InvalidProbe(usize),

    #[error("Invalid block number: {0}")]
    InvalidBlock(u64),

    #[error("Position out of bounds: {0}")]
    OutOfBounds(u64),

    #[error("End of capture reached")]
    EndOfCapture,

    #[error("Decoding cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, SwError>;

/// Cooperative cancellation flag polled by the decoding loops.
///
/// Clones share the same flag. The frame loop polls once per bit and the
/// sync scanner at least once per search window, so a cancel takes effect
/// without emitting a partial frame.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Safe to call from any thread.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    /// Returns `Err(SwError::Cancelled)` if cancellation was requested.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(SwError::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_token_trips_once_set() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        assert!(token.check().is_ok());

        let clone = token.clone();
        clone.cancel();

        assert!(token.is_cancelled());
        assert!(matches!(token.check(), Err(SwError::Cancelled)));
    }
}
