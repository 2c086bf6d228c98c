//! NRZI bitstream decoder with a rewindable position
//!
//! Pulls clock edges from one [`SampleSource`], samples the data line at
//! each edge on a second, and yields decoded bits. Sync acquisition has to
//! re-read stretches of the stream, so while history collection is enabled
//! every live edge is logged to a [`HistoryBuffer`] and a [`Mark`] can
//! rewind the decoder to any logged position; bits are then replayed from
//! the log until it catches back up with the live tail.

use std::collections::VecDeque;

use tracing::debug;

use crate::Result;
use crate::protocol::BUS_RESET_ONES_COUNT;
use crate::source::{BitLevel, SampleSource};

use super::history::HistoryBuffer;

/// Sentinel read index meaning "next bit comes from the live source".
///
/// Required when the decoder sits at the live tail so that later appends
/// cannot turn a stale index into a valid one.
const LIVE_TAIL: usize = usize::MAX;

/// Snapshot of a decoder position, restorable with
/// [`BitstreamDecoder::restore`].
///
/// Marks stay valid across further decoding and history appends; they are
/// invalidated only when the history buffer is cleared
/// ([`BitstreamDecoder::discard_history_before_current_position`]).
#[derive(Debug, Clone, Copy)]
pub struct Mark {
    last_level: BitLevel,
    parity_is_odd: bool,
    current_sample: u64,
    next_history_index: usize,
}

/// NRZI decoder over a clock channel and a data channel.
///
/// Not thread-safe; driven by a single consumer. A run of 4096 decoded
/// ones is a bus reset: it is queued as a notification (never an error)
/// for the driver to drain via [`BitstreamDecoder::pop_bus_reset`].
pub struct BitstreamDecoder<S: SampleSource> {
    clock: S,
    data: S,
    current_sample: u64,
    contiguous_ones_count: u32,
    contiguous_ones_start: u64,
    parity_is_odd: bool,
    last_level: BitLevel,
    next_history_index: usize,
    collect_history: bool,
    history: HistoryBuffer,
    bus_resets: VecDeque<(u64, u64)>,
}

impl<S: SampleSource> BitstreamDecoder<S> {
    pub fn new(clock: S, data: S) -> Self {
        Self {
            last_level: data.bit_state(),
            clock,
            data,
            current_sample: 0,
            contiguous_ones_count: 0,
            contiguous_ones_start: 0,
            parity_is_odd: false,
            next_history_index: LIVE_TAIL,
            collect_history: false,
            history: HistoryBuffer::for_sync_search(),
            bus_resets: VecDeque::new(),
        }
    }

    /// Decode the next bit of the stream and advance one clock edge.
    ///
    /// A decoded one is a change of data level between consecutive clock
    /// edges. Parity counts HIGH levels rather than decoded ones because
    /// NRZI decoding would otherwise lose the polarity of the final bit.
    pub fn next_bit(&mut self) -> Result<bool> {
        let level;

        if self.next_history_index < self.history.len() {
            let (history_level, delta, next) = self.history.read(self.next_history_index);
            self.next_history_index = if next == self.history.len() {
                LIVE_TAIL
            } else {
                next
            };
            self.current_sample += delta;
            level = history_level;
        } else {
            self.clock.advance_to_next_edge()?;
            let sample = self.clock.sample_number();
            self.data.advance_to_position(sample)?;
            level = self.data.bit_state();

            if self.collect_history {
                self.history.push(level, sample - self.current_sample);
            }

            self.current_sample = sample;

            // Toggle-run accounting only happens on the live path so a
            // replayed stretch cannot report the same reset twice.
            if level != self.last_level {
                match self.contiguous_ones_count {
                    0 => {
                        self.contiguous_ones_start = sample;
                        self.contiguous_ones_count = 1;
                    }
                    n if n == BUS_RESET_ONES_COUNT - 1 => {
                        debug!(
                            "bus reset: {} toggles over samples [{}, {}]",
                            BUS_RESET_ONES_COUNT, self.contiguous_ones_start, sample
                        );
                        self.bus_resets
                            .push_back((self.contiguous_ones_start, sample));
                        self.contiguous_ones_count = 0;
                    }
                    _ => self.contiguous_ones_count += 1,
                }
            } else {
                self.contiguous_ones_count = 0;
            }
        }

        let decoded = level != self.last_level;
        self.last_level = level;

        if level.is_high() {
            self.parity_is_odd = !self.parity_is_odd;
        }

        Ok(decoded)
    }

    /// Decode and discard `count` bits.
    pub fn skip_bits(&mut self, count: u64) -> Result<()> {
        for _ in 0..count {
            self.next_bit()?;
        }
        Ok(())
    }

    /// Sample number of the most recently decoded clock edge.
    pub fn current_sample_number(&self) -> u64 {
        self.current_sample
    }

    pub fn is_parity_odd(&self) -> bool {
        self.parity_is_odd
    }

    pub fn reset_parity(&mut self) {
        self.parity_is_odd = false;
    }

    /// Oldest undelivered bus-reset notification, as inclusive sample
    /// bounds of the toggle run.
    pub fn pop_bus_reset(&mut self) -> Option<(u64, u64)> {
        self.bus_resets.pop_front()
    }

    /// Start or stop logging live edges to history.
    ///
    /// Enabling first discards any fully-consumed history so the log
    /// restarts at the current position. Disabling keeps everything
    /// already captured, so existing marks stay valid.
    pub fn set_collect_history(&mut self, enable: bool) {
        if enable {
            self.discard_history_before_current_position();
        }
        self.collect_history = enable;
    }

    /// Drop history that precedes the current position.
    ///
    /// Erasing a prefix would be O(n) and would silently invalidate
    /// outstanding marks, so the buffer is only cleared when the read
    /// index has consumed it entirely. A clear invalidates all marks.
    pub fn discard_history_before_current_position(&mut self) {
        if self.history.is_empty() {
            return;
        }

        if self.next_history_index >= self.history.len() {
            debug!("discarding {} history entries", self.history.len());
            self.history.clear();
            self.next_history_index = LIVE_TAIL;
        }
    }

    /// Snapshot the current position and decode state.
    ///
    /// At the live tail the stored index is clamped to the history length:
    /// if more bits are logged after the mark, restoring will correctly
    /// replay from the first bit that followed the snapshot.
    pub fn mark(&self) -> Mark {
        Mark {
            last_level: self.last_level,
            parity_is_odd: self.parity_is_odd,
            current_sample: self.current_sample,
            next_history_index: self.next_history_index.min(self.history.len()),
        }
    }

    /// Rewind to a previously taken mark.
    ///
    /// The mark must have been taken since the last history clear.
    pub fn restore(&mut self, mark: Mark) {
        self.last_level = mark.last_level;
        self.parity_is_odd = mark.parity_is_odd;
        self.current_sample = mark.current_sample;

        // A mark taken at the live tail with no bits logged since still
        // points past the end of history; pin it to the sentinel so later
        // appends cannot make it a valid index.
        self.next_history_index = if mark.next_history_index >= self.history.len() {
            LIVE_TAIL
        } else {
            mark.next_history_index
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::EdgeStream;

    /// Clock with an edge every `step` samples starting at `start`.
    fn clock(start: u64, step: u64, edges: u64) -> EdgeStream {
        EdgeStream::new(BitLevel::Low, (0..edges).map(|i| start + i * step).collect())
    }

    /// Data channel from the level wanted at each successive clock edge.
    fn data_from_levels(start: u64, step: u64, levels: &[bool]) -> EdgeStream {
        let mut transitions = Vec::new();
        let mut level = false;
        for (i, &wanted) in levels.iter().enumerate() {
            if wanted != level {
                transitions.push(start + i as u64 * step);
                level = wanted;
            }
        }
        EdgeStream::new(BitLevel::Low, transitions)
    }

    fn decoder_from_levels(start: u64, step: u64, levels: &[bool]) -> BitstreamDecoder<EdgeStream> {
        BitstreamDecoder::new(
            clock(start, step, levels.len() as u64),
            data_from_levels(start, step, levels),
        )
    }

    #[test]
    fn test_nrzi_basic_decode() {
        // Levels L L L H H L at samples 100..=110: after the priming bit
        // the decoded stream is 0,0,1,0,1.
        let mut decoder = decoder_from_levels(100, 2, &[false, false, false, true, true, false]);

        assert!(!decoder.next_bit().unwrap());
        assert_eq!(decoder.current_sample_number(), 100);

        let mut bits = Vec::new();
        for _ in 0..3 {
            bits.push(decoder.next_bit().unwrap());
        }
        assert_eq!(bits, vec![false, false, true]);
        // One HIGH level seen so far (sample 106)
        assert_eq!(decoder.current_sample_number(), 106);
        assert!(decoder.is_parity_odd());

        assert!(!decoder.next_bit().unwrap());
        assert_eq!(decoder.current_sample_number(), 108);
        assert!(!decoder.is_parity_odd());

        assert!(decoder.next_bit().unwrap());
        assert_eq!(decoder.current_sample_number(), 110);
    }

    #[test]
    fn test_parity_counts_levels_not_ones() {
        // H H H: decoded 1,0,0 but three HIGH levels -> parity odd
        let mut decoder = decoder_from_levels(0, 1, &[true, true, true]);
        assert!(decoder.next_bit().unwrap());
        assert!(!decoder.next_bit().unwrap());
        assert!(!decoder.next_bit().unwrap());
        assert!(decoder.is_parity_odd());

        decoder.reset_parity();
        assert!(!decoder.is_parity_odd());
    }

    fn alternating_levels(count: usize) -> Vec<bool> {
        (0..count).map(|i| i % 2 == 0).collect()
    }

    #[test]
    fn test_bus_reset_after_4096_toggles() {
        let mut decoder = decoder_from_levels(0, 1, &alternating_levels(4096));
        for _ in 0..4096 {
            assert!(decoder.next_bit().unwrap());
        }
        assert_eq!(decoder.pop_bus_reset(), Some((0, 4095)));
        assert_eq!(decoder.pop_bus_reset(), None);
    }

    #[test]
    fn test_no_bus_reset_at_4095_toggles() {
        let mut decoder = decoder_from_levels(0, 1, &alternating_levels(4095));
        for _ in 0..4095 {
            decoder.next_bit().unwrap();
        }
        assert_eq!(decoder.pop_bus_reset(), None);
    }

    #[test]
    fn test_zero_bit_resets_toggle_run() {
        // 4095 toggles, one steady level, then one more toggle: no reset
        let mut levels = alternating_levels(4095);
        let last = *levels.last().unwrap();
        levels.push(last);
        levels.push(!last);

        let mut decoder = decoder_from_levels(0, 1, &levels);
        for _ in 0..levels.len() {
            decoder.next_bit().unwrap();
        }
        assert_eq!(decoder.pop_bus_reset(), None);
    }

    #[test]
    fn test_mark_restore_replays_identically() {
        let levels = [false, true, true, false, true, false, false, true];
        let mut decoder = decoder_from_levels(10, 3, &levels);
        decoder.set_collect_history(true);

        let mark = decoder.mark();
        let mut first_pass = Vec::new();
        for _ in 0..levels.len() {
            let bit = decoder.next_bit().unwrap();
            first_pass.push((bit, decoder.current_sample_number(), decoder.is_parity_odd()));
        }

        decoder.restore(mark);
        for expected in &first_pass {
            let bit = decoder.next_bit().unwrap();
            assert_eq!(
                &(bit, decoder.current_sample_number(), decoder.is_parity_odd()),
                expected
            );
        }
    }

    #[test]
    fn test_mark_at_live_tail_survives_appends() {
        let levels = [false, true, false, true, true, false, true, false];
        let mut decoder = decoder_from_levels(0, 2, &levels);
        decoder.set_collect_history(true);

        decoder.skip_bits(4).unwrap();
        // At the live tail: nothing pending in history
        let mark = decoder.mark();

        let mut live = Vec::new();
        for _ in 0..4 {
            let bit = decoder.next_bit().unwrap();
            live.push((bit, decoder.current_sample_number()));
        }

        // The four bits decoded after the mark replay from history
        decoder.restore(mark);
        for expected in &live {
            let bit = decoder.next_bit().unwrap();
            assert_eq!(&(bit, decoder.current_sample_number()), expected);
        }
    }

    #[test]
    fn test_discard_is_deferred_while_history_pending() {
        let levels = [true, false, true, true, false, false, true, false];
        let mut decoder = decoder_from_levels(0, 1, &levels);
        decoder.set_collect_history(true);

        let mark = decoder.mark();
        decoder.skip_bits(6).unwrap();
        assert_eq!(decoder.history.len(), 6);

        decoder.restore(mark);
        decoder.skip_bits(2).unwrap();

        // Four entries still pending: the clear must be refused
        decoder.discard_history_before_current_position();
        assert_eq!(decoder.history.len(), 6);

        // Consume the rest, then the clear goes through
        decoder.skip_bits(4).unwrap();
        decoder.discard_history_before_current_position();
        assert!(decoder.history.is_empty());
    }

    #[test]
    fn test_enabling_collection_discards_consumed_history() {
        let levels = [true, false, true, false, true, false];
        let mut decoder = decoder_from_levels(0, 1, &levels);
        decoder.set_collect_history(true);
        decoder.skip_bits(3).unwrap();

        decoder.set_collect_history(false);
        assert_eq!(decoder.history.len(), 3);

        decoder.set_collect_history(true);
        assert!(decoder.history.is_empty());

        decoder.skip_bits(2).unwrap();
        assert_eq!(decoder.history.len(), 2);
    }
}
