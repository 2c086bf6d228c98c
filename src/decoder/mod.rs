//! The SoundWire decoding core
//!
//! Layered bottom-up: [`HistoryBuffer`] gives the bitstream decoder a
//! rewindable past, [`BitstreamDecoder`] turns clock/data edges into NRZI
//! bits, [`FrameReader`] and [`ControlWord`] assemble frames,
//! [`SyncFinder`] locates frame boundaries, and [`FrameEmitter`] drives
//! the whole pipeline into a results sink.

pub mod bitstream;
pub mod control_word;
pub mod dynamic_sync;
pub mod emitter;
pub mod frame;
pub mod history;
pub mod sync_finder;

pub use bitstream::{BitstreamDecoder, Mark};
pub use control_word::ControlWord;
pub use dynamic_sync::DynamicSyncGenerator;
pub use emitter::{DecoderConfig, FrameEmitter};
pub use frame::{FrameProgress, FrameReader};
pub use history::HistoryBuffer;
pub use sync_finder::{StaticSyncMatcher, SyncFinder};
