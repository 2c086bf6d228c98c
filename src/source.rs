//! Sample sources: forward-only cursors over capture channels
//!
//! The decoding core reads two channels (clock and data) through the
//! [`SampleSource`] trait. A source models a logic-analyzer channel cursor:
//! it sits at a sample position, reports the line level there, and can only
//! move forward. Rewinding is layered on top by the bitstream decoder's
//! history buffer, never by the source itself.

use crossbeam_channel::Receiver;

use crate::{Result, SwError};

/// Physical level of a digital line at a sample position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitLevel {
    Low,
    High,
}

impl BitLevel {
    pub fn is_high(self) -> bool {
        matches!(self, BitLevel::High)
    }
}

impl From<bool> for BitLevel {
    fn from(high: bool) -> Self {
        if high { BitLevel::High } else { BitLevel::Low }
    }
}

/// Forward-only cursor over one capture channel.
///
/// Positions are 64-bit sample numbers shared by all channels of a capture.
/// An exhausted source reports [`SwError::EndOfCapture`] from
/// `advance_to_next_edge`; `advance_to_position` never rejects a position
/// past the last edge because the final level extends to the end of the
/// capture.
pub trait SampleSource {
    /// Move the cursor to the next transition on this channel.
    fn advance_to_next_edge(&mut self) -> Result<()>;

    /// Current cursor position in sample units.
    fn sample_number(&self) -> u64;

    /// Move the cursor to an absolute sample position. Callers only move
    /// forward; `sample` is always >= the current position.
    fn advance_to_position(&mut self, sample: u64) -> Result<()>;

    /// Line level at the current cursor position.
    fn bit_state(&self) -> BitLevel;
}

/// Signal transition on a single channel
///
/// Run-length encoded: `level` holds from `sample` until the next edge's
/// `sample`, so a channel is fully described by its initial level and the
/// ordered list of transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edge {
    /// Channel level starting at this sample
    pub level: BitLevel,
    /// Sample number where this level begins
    pub sample: u64,
}

impl Edge {
    pub fn new(level: BitLevel, sample: u64) -> Self {
        Self { level, sample }
    }
}

/// In-memory [`SampleSource`] over a precomputed transition list.
///
/// Used by tests and by anything that synthesizes a channel up front. The
/// transition samples must be strictly increasing.
#[derive(Debug, Clone)]
pub struct EdgeStream {
    initial_level: BitLevel,
    transitions: Vec<u64>,
    position: u64,
    /// Number of transitions at or before `position`.
    consumed: usize,
}

impl EdgeStream {
    pub fn new(initial_level: BitLevel, transitions: Vec<u64>) -> Self {
        debug_assert!(transitions.windows(2).all(|w| w[0] < w[1]));
        Self {
            initial_level,
            transitions,
            position: 0,
            consumed: 0,
        }
    }

    /// Number of transitions remaining ahead of the cursor.
    pub fn remaining_edges(&self) -> usize {
        self.transitions.len() - self.consumed
    }
}

impl SampleSource for EdgeStream {
    fn advance_to_next_edge(&mut self) -> Result<()> {
        if self.consumed < self.transitions.len() {
            self.position = self.transitions[self.consumed];
            self.consumed += 1;
            Ok(())
        } else {
            Err(SwError::EndOfCapture)
        }
    }

    fn sample_number(&self) -> u64 {
        self.position
    }

    fn advance_to_position(&mut self, sample: u64) -> Result<()> {
        debug_assert!(sample >= self.position);
        while self.consumed < self.transitions.len() && self.transitions[self.consumed] <= sample {
            self.consumed += 1;
        }
        self.position = sample;
        Ok(())
    }

    fn bit_state(&self) -> BitLevel {
        if self.consumed % 2 == 0 {
            self.initial_level
        } else {
            match self.initial_level {
                BitLevel::Low => BitLevel::High,
                BitLevel::High => BitLevel::Low,
            }
        }
    }
}

/// [`SampleSource`] fed by a channel of [`Edge`]s from a producer thread.
///
/// The first received edge establishes the initial line state; each later
/// edge is a transition. One edge is buffered ahead of the cursor so that
/// `advance_to_position` can tell whether the current level still holds at
/// the target sample. A disconnected producer reads as end of capture, with
/// the last level extending to infinity.
pub struct ChannelSource {
    rx: Receiver<Edge>,
    level: BitLevel,
    position: u64,
    pending: Option<Edge>,
    exhausted: bool,
}

impl ChannelSource {
    /// Blocks for the first edge to establish the initial line state.
    pub fn new(rx: Receiver<Edge>) -> Result<Self> {
        let first = rx.recv().map_err(|_| SwError::EndOfCapture)?;
        Ok(Self {
            rx,
            level: first.level,
            position: first.sample,
            pending: None,
            exhausted: false,
        })
    }

    fn fill_pending(&mut self) {
        if self.pending.is_none() && !self.exhausted {
            match self.rx.recv() {
                Ok(edge) => self.pending = Some(edge),
                Err(_) => {
                    tracing::debug!("edge channel disconnected at sample {}", self.position);
                    self.exhausted = true;
                }
            }
        }
    }
}

impl SampleSource for ChannelSource {
    fn advance_to_next_edge(&mut self) -> Result<()> {
        self.fill_pending();
        match self.pending.take() {
            Some(edge) => {
                self.level = edge.level;
                self.position = edge.sample;
                Ok(())
            }
            None => Err(SwError::EndOfCapture),
        }
    }

    fn sample_number(&self) -> u64 {
        self.position
    }

    fn advance_to_position(&mut self, sample: u64) -> Result<()> {
        loop {
            self.fill_pending();
            match self.pending {
                Some(edge) if edge.sample <= sample => {
                    self.level = edge.level;
                    self.pending = None;
                }
                _ => break,
            }
        }
        self.position = sample;
        Ok(())
    }

    fn bit_state(&self) -> BitLevel {
        self.level
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::bounded;

    #[test]
    fn test_edge_stream_walks_transitions() {
        let mut stream = EdgeStream::new(BitLevel::Low, vec![10, 20, 35]);
        assert_eq!(stream.sample_number(), 0);
        assert_eq!(stream.bit_state(), BitLevel::Low);

        stream.advance_to_next_edge().unwrap();
        assert_eq!(stream.sample_number(), 10);
        assert_eq!(stream.bit_state(), BitLevel::High);

        stream.advance_to_next_edge().unwrap();
        assert_eq!(stream.sample_number(), 20);
        assert_eq!(stream.bit_state(), BitLevel::Low);

        stream.advance_to_next_edge().unwrap();
        assert_eq!(stream.sample_number(), 35);
        assert_eq!(stream.bit_state(), BitLevel::High);

        assert!(matches!(
            stream.advance_to_next_edge(),
            Err(SwError::EndOfCapture)
        ));
    }

    #[test]
    fn test_edge_stream_absolute_positioning() {
        let mut stream = EdgeStream::new(BitLevel::Low, vec![10, 20, 35]);

        // Before the first transition the initial level holds
        stream.advance_to_position(5).unwrap();
        assert_eq!(stream.bit_state(), BitLevel::Low);

        // Landing exactly on a transition takes the new level
        stream.advance_to_position(20).unwrap();
        assert_eq!(stream.bit_state(), BitLevel::Low);
        assert_eq!(stream.sample_number(), 20);

        // Past the last transition the final level extends forever
        stream.advance_to_position(1000).unwrap();
        assert_eq!(stream.bit_state(), BitLevel::High);
        assert_eq!(stream.remaining_edges(), 0);
    }

    #[test]
    fn test_edge_stream_position_then_edge() {
        let mut stream = EdgeStream::new(BitLevel::High, vec![100, 200]);
        stream.advance_to_position(150).unwrap();
        assert_eq!(stream.bit_state(), BitLevel::Low);

        stream.advance_to_next_edge().unwrap();
        assert_eq!(stream.sample_number(), 200);
        assert_eq!(stream.bit_state(), BitLevel::High);
    }

    #[test]
    fn test_channel_source_initial_state_and_edges() {
        let (tx, rx) = bounded(8);
        tx.send(Edge::new(BitLevel::Low, 0)).unwrap();
        tx.send(Edge::new(BitLevel::High, 10)).unwrap();
        tx.send(Edge::new(BitLevel::Low, 20)).unwrap();
        drop(tx);

        let mut source = ChannelSource::new(rx).unwrap();
        assert_eq!(source.sample_number(), 0);
        assert_eq!(source.bit_state(), BitLevel::Low);

        source.advance_to_next_edge().unwrap();
        assert_eq!(source.sample_number(), 10);
        assert_eq!(source.bit_state(), BitLevel::High);

        source.advance_to_next_edge().unwrap();
        assert_eq!(source.sample_number(), 20);
        assert_eq!(source.bit_state(), BitLevel::Low);

        assert!(matches!(
            source.advance_to_next_edge(),
            Err(SwError::EndOfCapture)
        ));
    }

    #[test]
    fn test_channel_source_positioning_consumes_passed_edges() {
        let (tx, rx) = bounded(8);
        tx.send(Edge::new(BitLevel::Low, 0)).unwrap();
        tx.send(Edge::new(BitLevel::High, 10)).unwrap();
        tx.send(Edge::new(BitLevel::Low, 20)).unwrap();
        tx.send(Edge::new(BitLevel::High, 30)).unwrap();
        drop(tx);

        let mut source = ChannelSource::new(rx).unwrap();
        source.advance_to_position(25).unwrap();
        assert_eq!(source.bit_state(), BitLevel::Low);

        // The buffered edge at 30 is still delivered
        source.advance_to_next_edge().unwrap();
        assert_eq!(source.sample_number(), 30);
        assert_eq!(source.bit_state(), BitLevel::High);
    }

    #[test]
    fn test_channel_source_level_extends_past_disconnect() {
        let (tx, rx) = bounded(8);
        tx.send(Edge::new(BitLevel::High, 5)).unwrap();
        drop(tx);

        let mut source = ChannelSource::new(rx).unwrap();
        source.advance_to_position(500).unwrap();
        assert_eq!(source.bit_state(), BitLevel::High);
        assert_eq!(source.sample_number(), 500);
    }
}
