//! Top-level decode loop
//!
//! [`FrameEmitter`] owns the bitstream decoder and drives the whole
//! pipeline: acquire sync, walk frames, check parity and the sync fields,
//! apply shape changes, and push results into a [`ResultsSink`]. Sync loss
//! rewinds to the last committed frame boundary and reacquires.

use tracing::{debug, info, warn};

use crate::protocol::STATIC_SYNC_VALUE;
use crate::results::{FLAG_PARITY_BAD, FLAG_SYNC_LOST, Frame, ResultsSink};
use crate::source::SampleSource;
use crate::{CancelToken, Result, SwError};

use super::bitstream::BitstreamDecoder;
use super::dynamic_sync::DynamicSyncGenerator;
use super::frame::{FrameProgress, FrameReader};
use super::sync_finder::SyncFinder;

/// Decoding options.
#[derive(Debug, Clone, Copy, Default)]
pub struct DecoderConfig {
    /// Known row count, or `None` to search all candidates.
    pub hint_rows: Option<u32>,
    /// Known column count, or `None` to search all candidates.
    pub hint_columns: Option<u32>,
    /// Table-level policy consumed by renderers via
    /// [`crate::DuplicatePingFilter`]; the decoded frame stream itself is
    /// never filtered.
    pub suppress_duplicate_pings: bool,
}

/// Drives decoding of one capture into a results sink.
pub struct FrameEmitter<S: SampleSource> {
    decoder: BitstreamDecoder<S>,
    config: DecoderConfig,
}

impl<S: SampleSource> FrameEmitter<S> {
    pub fn new(clock: S, data: S, config: DecoderConfig) -> Self {
        Self {
            decoder: BitstreamDecoder::new(clock, data),
            config,
        }
    }

    pub fn config(&self) -> &DecoderConfig {
        &self.config
    }

    /// Decode until the capture ends or `cancel` trips. Both end the run
    /// cleanly with `Ok(())` and no partial frame; other errors
    /// propagate. Call once per emitter.
    pub fn run(&mut self, sink: &mut dyn ResultsSink, cancel: &CancelToken) -> Result<()> {
        let result = self.run_inner(sink, cancel);
        // Notifications raised just before the capture ended
        self.flush_bus_resets(sink);

        match result {
            Err(SwError::EndOfCapture) => {
                info!("capture exhausted at sample {}", self.decoder.current_sample_number());
                Ok(())
            }
            Err(SwError::Cancelled) => {
                info!("decode cancelled at sample {}", self.decoder.current_sample_number());
                Ok(())
            }
            other => other,
        }
    }

    fn run_inner(&mut self, sink: &mut dyn ResultsSink, cancel: &CancelToken) -> Result<()> {
        // Advance one bit to establish an initial data line state, then
        // start logging: the sync finder needs to rewind.
        self.decoder.next_bit()?;
        self.decoder.set_collect_history(true);

        let mut reader = FrameReader::new();
        let mut generator = DynamicSyncGenerator::new();
        let mut in_sync = false;
        let mut is_first_frame = true;
        let mut actual_parity_is_odd = false;
        let mut frame_start_sample = 0u64;
        let mut start_mark = self.decoder.mark();

        loop {
            cancel.check()?;

            if !in_sync {
                self.decoder.restore(start_mark);

                let shape = {
                    let mut finder = SyncFinder::new(&mut self.decoder);
                    finder.find_sync(self.config.hint_rows, self.config.hint_columns, cancel)?
                };
                self.flush_bus_resets(sink);

                sink.shape_change(self.decoder.current_sample_number(), shape);
                reader.set_shape(shape);
                in_sync = true;
                is_first_frame = true;

                // A good frame sequence starts here; older history is
                // dead weight.
                self.decoder.discard_history_before_current_position();
                start_mark = self.decoder.mark();
                sink.report_progress(self.decoder.current_sample_number());
                continue;
            }

            let bit = self.decoder.next_bit()?;
            self.flush_bus_resets(sink);
            let sample = self.decoder.current_sample_number();

            match reader.push_bit(bit) {
                FrameProgress::FrameStart => {
                    frame_start_sample = sample;
                }
                FrameProgress::NeedMoreBits => {}
                FrameProgress::CaptureParity => {
                    actual_parity_is_odd = self.decoder.is_parity_odd();
                    self.decoder.reset_parity();
                }
                FrameProgress::FrameComplete => {
                    let word = *reader.control_word();
                    let mut flags = 0u8;

                    if is_first_frame {
                        // No previous parity or sync value exists: the
                        // first frame only seeds the sequence.
                        generator.seed(word.dynamic_sync());
                    } else {
                        if word.par() != actual_parity_is_odd {
                            flags |= FLAG_PARITY_BAD;
                        }
                        let expected = generator.next();
                        if word.static_sync() != STATIC_SYNC_VALUE
                            || word.dynamic_sync() != expected
                        {
                            flags |= FLAG_SYNC_LOST;
                        }
                    }

                    sink.add_frame(Frame {
                        start_sample: frame_start_sample,
                        end_sample: sample,
                        control_word: word,
                        flags,
                    });

                    if flags & FLAG_SYNC_LOST != 0 {
                        warn!(
                            "sync lost at sample {}: control word {:#014x}",
                            sample,
                            word.value()
                        );
                        in_sync = false;
                        sink.report_progress(sample);
                        continue;
                    }

                    if word.is_frame_shape_change() {
                        match word.new_shape() {
                            Some(shape) => {
                                debug!("frame shape change to {} at sample {}", shape, sample);
                                reader.set_shape(shape);
                                sink.shape_change(sample, shape);
                            }
                            None => {
                                // Reserved slot: stay at the current shape
                                warn!(
                                    "invalid frame shape advertised at sample {}, keeping {}",
                                    sample,
                                    reader.shape()
                                );
                                reader.reset();
                            }
                        }
                    } else {
                        reader.reset();
                    }

                    is_first_frame = false;

                    // This frame is committed; its history is only needed
                    // if the next frame loses sync, which rewinds to the
                    // mark below, not before it.
                    self.decoder.discard_history_before_current_position();
                    start_mark = self.decoder.mark();
                }
            }

            sink.report_progress(sample);
        }
    }

    fn flush_bus_resets(&mut self, sink: &mut dyn ResultsSink) {
        while let Some((start, end)) = self.decoder.pop_bus_reset() {
            sink.bus_reset(start, end);
        }
    }
}
