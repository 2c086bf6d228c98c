//! Frame synchronization search
//!
//! Two collaborating phases: [`StaticSyncMatcher`] slides over the decoded
//! bitstream looking for the static sync byte spread across a candidate
//! column stride, and [`SyncFinder`] validates each hit by aligning to the
//! implied frame boundary and replaying a full dynamic sync sequence of
//! frames through a [`FrameReader`].

use tracing::{debug, trace};

use crate::protocol::{
    CTRL_STATIC_SYNC_NUM_ROWS, CTRL_STATIC_SYNC_ROW, FRAME_SHAPE_COLUMNS, FRAME_SHAPE_ROWS,
    FrameShape, MAX_ROWS, STATIC_SYNC_VALUE,
};
use crate::source::SampleSource;
use crate::{CancelToken, Result, SwError};

use super::bitstream::{BitstreamDecoder, Mark};
use super::dynamic_sync::{DynamicSyncGenerator, SEQUENCE_LENGTH_FRAMES};
use super::frame::{FrameProgress, FrameReader};

/// Width of one static-sync search window in bits.
const SEARCH_WINDOW_BITS: u64 = 4096;

/// Row of the last static sync bit.
const LAST_STATIC_SYNC_ROW: u32 = CTRL_STATIC_SYNC_ROW + CTRL_STATIC_SYNC_NUM_ROWS - 1;

/// Sliding matcher for the static sync byte at a fixed column stride.
///
/// The 8 sync bits sit in column 0 of consecutive rows, so in the
/// bitstream they are spaced `columns` bits apart; with at most 16
/// columns the whole pattern spans at most 128 bits. The mask and pattern
/// are generated once from the stride at construction: bit `i` of the
/// sync value lands `i * columns` positions behind the most recent bit.
#[derive(Debug, Clone)]
pub struct StaticSyncMatcher {
    accumulator: u128,
    mask: u128,
    pattern: u128,
}

impl StaticSyncMatcher {
    pub fn new(columns: u32) -> Self {
        debug_assert!(FRAME_SHAPE_COLUMNS.contains(&columns));

        let mut mask = 0u128;
        let mut pattern = 0u128;
        for i in 0..CTRL_STATIC_SYNC_NUM_ROWS {
            let position = i * columns;
            mask |= 1u128 << position;
            if STATIC_SYNC_VALUE >> i & 1 == 1 {
                pattern |= 1u128 << position;
            }
        }

        Self {
            accumulator: 0,
            mask,
            pattern,
        }
    }

    /// Shift in one decoded bit; true when the window now holds the full
    /// static sync pattern, i.e. the bit just pushed is the final sync
    /// bit.
    pub fn push_bit(&mut self, is_one: bool) -> bool {
        self.accumulator = (self.accumulator << 1) | is_one as u128;
        self.accumulator & self.mask == self.pattern
    }
}

/// Locates frame boundaries in the decoded bitstream.
///
/// Borrows the decoder for the duration of the search; history collection
/// must be enabled because validation rewinds. On success the decoder is
/// left positioned at the first bit of the first validated frame.
pub struct SyncFinder<'a, S: SampleSource> {
    decoder: &'a mut BitstreamDecoder<S>,
}

impl<'a, S: SampleSource> SyncFinder<'a, S> {
    pub fn new(decoder: &'a mut BitstreamDecoder<S>) -> Self {
        Self { decoder }
    }

    /// Search for frame sync, trying every candidate shape unless hints
    /// pin a dimension.
    ///
    /// Each column candidate scans one window plus one maximum frame
    /// before the next is tried, so a wrong stride cannot consume the
    /// whole capture and a sync straddling the window end is still seen.
    /// Returns the discovered shape with the decoder at the start of the
    /// first valid frame.
    pub fn find_sync(
        &mut self,
        hint_rows: Option<u32>,
        hint_columns: Option<u32>,
        cancel: &CancelToken,
    ) -> Result<FrameShape> {
        let rows_list: Vec<u32> = match hint_rows {
            Some(rows) => vec![rows],
            // Slot value 0 is a reserved table entry, not a candidate
            None => FRAME_SHAPE_ROWS.iter().copied().filter(|&r| r != 0).collect(),
        };
        let columns_list: Vec<u32> = match hint_columns {
            Some(columns) => vec![columns],
            None => FRAME_SHAPE_COLUMNS.to_vec(),
        };

        loop {
            let search_start = self.decoder.mark();

            for &columns in &columns_list {
                cancel.check()?;

                let mut matcher = StaticSyncMatcher::new(columns);
                let max_search_bits =
                    SEARCH_WINDOW_BITS + FrameShape::new(MAX_ROWS, columns).total_bits();

                for matched_bit_offset in 0..max_search_bits {
                    if matcher.push_bit(self.decoder.next_bit()?) {
                        trace!(
                            "static sync candidate: {} columns, offset {}",
                            columns, matched_bit_offset
                        );
                        if let Some(shape) = self.test_candidate(
                            &rows_list,
                            columns,
                            matched_bit_offset,
                            search_start,
                        )? {
                            debug!(
                                "sync acquired: shape {} at sample {}",
                                shape,
                                self.decoder.current_sample_number()
                            );
                            return Ok(shape);
                        }
                    }
                }

                // No sync at this stride; rewind and try the next
                self.decoder.restore(search_start);
            }

            // No column count matched. Wind on one window and search
            // again; the per-column overlap above covers a sync
            // straddling this boundary.
            self.decoder.skip_bits(SEARCH_WINDOW_BITS)?;
            cancel.check()?;
        }
    }

    /// Align the decoder to the frame boundary implied by a static sync
    /// hit and try to validate a full sequence for each row candidate.
    fn test_candidate(
        &mut self,
        rows_list: &[u32],
        columns: u32,
        matched_bit_offset: u64,
        search_start: Mark,
    ) -> Result<Option<FrameShape>> {
        // The matcher fires immediately after the final static sync bit,
        // which sits this many bits into its frame.
        let last_sync_bit_offset = FrameShape::new(MAX_ROWS, columns)
            .bit_offset(LAST_STATIC_SYNC_ROW, 0);

        let restart = self.decoder.mark();

        for &rows in rows_list {
            let shape = FrameShape::new(rows, columns);

            // A candidate whose validation runs off the end of the
            // capture has simply failed; the capture may still hold a
            // real sync at another alignment before the end.
            match self.validate_aligned(shape, matched_bit_offset, last_sync_bit_offset, search_start)
            {
                Ok(frames_ok) if frames_ok > SEQUENCE_LENGTH_FRAMES - 1 => {
                    return Ok(Some(shape));
                }
                Ok(frames_ok) => trace!(
                    "candidate shape {} rejected after {} frames",
                    shape, frames_ok
                ),
                Err(SwError::EndOfCapture) => {
                    trace!("candidate shape {} ran out of capture", shape)
                }
                Err(e) => return Err(e),
            }

            self.decoder.restore(restart);
        }

        Ok(None)
    }

    /// Position the decoder at the frame boundary implied by the match
    /// and count valid frames there.
    fn validate_aligned(
        &mut self,
        shape: FrameShape,
        matched_bit_offset: u64,
        last_sync_bit_offset: u64,
        search_start: Mark,
    ) -> Result<u32> {
        if matched_bit_offset >= last_sync_bit_offset {
            // Enough bits before the match to contain the frame start:
            // rewind to it.
            self.decoder.restore(search_start);
            self.decoder
                .skip_bits(matched_bit_offset - last_sync_bit_offset)?;
        } else {
            // The matched frame started before the search window; aim at
            // the next frame instead.
            self.decoder
                .skip_bits(shape.total_bits() - last_sync_bit_offset)?;
        }

        self.check_sync(shape)
    }

    /// Count valid frames from the current position, up to a full dynamic
    /// sync sequence. Position-preserving on every return path.
    ///
    /// The first frame cannot be validated (there is no previous parity
    /// or sync state); it seeds the sequence and counts as 1 unless its
    /// dynamic sync is 0, which is unreachable in a live sequence and
    /// fails the check immediately with 0.
    pub fn check_sync(&mut self, shape: FrameShape) -> Result<u32> {
        let start = self.decoder.mark();
        let result = self.run_sequence_check(shape);
        self.decoder.restore(start);
        result
    }

    fn run_sequence_check(&mut self, shape: FrameShape) -> Result<u32> {
        let mut reader = FrameReader::new();
        reader.set_shape(shape);

        // Seed frame: consume it, resetting parity at the capture row so
        // accumulation is valid for the next frame.
        loop {
            match reader.push_bit(self.decoder.next_bit()?) {
                FrameProgress::CaptureParity => self.decoder.reset_parity(),
                FrameProgress::FrameComplete => break,
                _ => {}
            }
        }

        if reader.control_word().dynamic_sync() == 0 {
            return Ok(0);
        }

        let mut generator = DynamicSyncGenerator::new();
        generator.seed(reader.control_word().dynamic_sync());
        let mut frames_ok = 1;

        for _ in 0..SEQUENCE_LENGTH_FRAMES - 1 {
            // A shape change advertised in the previous frame takes
            // effect at this boundary. A reserved slot keeps the shape.
            if reader.control_word().is_frame_shape_change() {
                match reader.control_word().new_shape() {
                    Some(new_shape) => reader.set_shape(new_shape),
                    None => debug!("reserved frame shape advertised during sync check, keeping {}",
                        reader.shape()),
                }
            }

            reader.reset();

            let mut parity_is_odd = false;
            loop {
                match reader.push_bit(self.decoder.next_bit()?) {
                    FrameProgress::CaptureParity => {
                        parity_is_odd = self.decoder.is_parity_odd();
                        self.decoder.reset_parity();
                    }
                    FrameProgress::FrameComplete => break,
                    _ => {}
                }
            }

            let expected = generator.next();
            let word = reader.control_word();
            if word.par() != parity_is_odd
                || word.static_sync() != STATIC_SYNC_VALUE
                || word.dynamic_sync() != expected
            {
                return Ok(frames_ok);
            }
            frames_ok += 1;
        }

        Ok(frames_ok)
    }
}
