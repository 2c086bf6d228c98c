//! Per-frame bit walk
//!
//! [`FrameReader`] consumes decoded bits across a rows x columns grid,
//! routing column-0 bits into the control word and reporting the points
//! the driver cares about: the first bit of a frame, the parity capture
//! row, and frame completion.

use crate::protocol::{CTRL_PAR_ROW, CTRL_WORD_LAST_ROW, FrameShape};

use super::control_word::ControlWord;

/// What the most recent pushed bit meant for the frame in progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameProgress {
    /// First bit of a new frame (reported once per frame).
    FrameStart,
    NeedMoreBits,
    /// The bit at the parity boundary was just consumed: the driver must
    /// read and reset the decoder's parity accumulator now. Parity covers
    /// the bus up to and including this row's column-0 bit.
    CaptureParity,
    FrameComplete,
}

/// State machine walking one frame of `rows x columns` bits.
#[derive(Debug)]
pub struct FrameReader {
    control_word: ControlWord,
    state: FrameProgress,
    shape: FrameShape,
    current_row: u32,
    current_column: u32,
}

impl Default for FrameReader {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameReader {
    pub fn new() -> Self {
        Self {
            control_word: ControlWord::new(),
            state: FrameProgress::FrameStart,
            shape: FrameShape::new(0, 0),
            current_row: 0,
            current_column: 0,
        }
    }

    /// Install new frame dimensions. Also resets the walk.
    pub fn set_shape(&mut self, shape: FrameShape) {
        self.reset();
        self.shape = shape;
    }

    pub fn shape(&self) -> FrameShape {
        self.shape
    }

    /// Clear the control word and coordinates for the next frame.
    pub fn reset(&mut self) {
        self.control_word.reset();
        self.current_row = 0;
        self.current_column = 0;
        self.state = FrameProgress::FrameStart;
    }

    pub fn control_word(&self) -> &ControlWord {
        &self.control_word
    }

    /// Consume one decoded bit. After [`FrameProgress::FrameComplete`] any
    /// further push is a no-op until [`FrameReader::reset`].
    pub fn push_bit(&mut self, is_one: bool) -> FrameProgress {
        let mut progress = self.state;

        match self.state {
            FrameProgress::FrameStart => self.state = FrameProgress::NeedMoreBits,
            FrameProgress::FrameComplete => return self.state,
            _ => {}
        }

        if self.current_column == 0 {
            if self.current_row <= CTRL_WORD_LAST_ROW {
                self.control_word.push_bit(is_one);
            }

            // Parity is captured at the first bit of the row before PAR
            if self.current_row == CTRL_PAR_ROW - 1 {
                progress = FrameProgress::CaptureParity;
            }
        }

        self.current_column += 1;
        if self.current_column == self.shape.columns {
            self.current_column = 0;
            self.current_row += 1;
            if self.current_row == self.shape.rows {
                self.state = FrameProgress::FrameComplete;
                progress = FrameProgress::FrameComplete;
            }
        }

        progress
    }
}
