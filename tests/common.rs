//! Shared test support: synthesizes clock/data edge streams carrying
//! well-formed SoundWire frames.
//!
//! The encoder mirrors the bus rules the decoder relies on: NRZI (a one
//! toggles the data level, a zero holds it), parity over HIGH levels
//! captured at the first bit of the row before PAR, and the dynamic sync
//! permutation chaining frame to frame. The PAR bit of each encoded frame
//! is patched to the true running parity, so synthesized streams are
//! self-consistent by construction.

use soundwire::{BitLevel, DynamicSyncGenerator, EdgeStream, FrameShape};

/// Place `value` into the control word rows starting at `first_row`.
pub fn field(first_row: u32, num_rows: u32, value: u64) -> u64 {
    value << (48 - first_row - num_rows)
}

/// A PING word carrying the static sync and a dynamic sync value.
pub fn ping_word(dynamic_sync: u8) -> u64 {
    field(24, 8, 0xb1) | field(41, 4, dynamic_sync as u64)
}

/// A PING word with a peripheral-status payload and optional SSP.
pub fn ping_word_with_status(dynamic_sync: u8, stat0_3: u8, ssp: bool) -> u64 {
    ping_word(dynamic_sync) | field(33, 8, stat0_3 as u64) | field(5, 1, ssp as u64)
}

/// A WRITE word addressing `register` with `data`.
pub fn write_word(dynamic_sync: u8, register: u16, data: u8) -> u64 {
    field(1, 3, 3)
        | field(24, 8, 0xb1)
        | field(8, 16, register as u64)
        | field(33, 8, data as u64)
        | field(41, 4, dynamic_sync as u64)
}

/// Builds the clock and data transition lists bit by bit.
pub struct FrameStreamEncoder {
    step: u64,
    next_sample: u64,
    level: bool,
    parity_odd: bool,
    captured_parity: bool,
    clock_transitions: Vec<u64>,
    data_transitions: Vec<u64>,
}

impl FrameStreamEncoder {
    pub fn new(start_sample: u64, step: u64) -> Self {
        Self {
            step,
            next_sample: start_sample,
            level: false,
            parity_odd: false,
            captured_parity: false,
            clock_transitions: Vec::new(),
            data_transitions: Vec::new(),
        }
    }

    /// Emit one decoded bit as a clock edge plus (for a one) a data
    /// toggle, tracking level parity exactly as the decoder does.
    pub fn push_decoded_bit(&mut self, bit: bool) {
        let sample = self.next_sample;
        self.next_sample += self.step;
        self.clock_transitions.push(sample);
        if bit {
            self.level = !self.level;
            self.data_transitions.push(sample);
        }
        if self.level {
            self.parity_odd = !self.parity_odd;
        }
    }

    /// Encode a full frame, patching the PAR bit to the captured running
    /// parity. Returns the word as actually transmitted.
    pub fn encode_frame(&mut self, shape: FrameShape, word: u64) -> u64 {
        self.encode_frame_with(shape, word, false)
    }

    /// Like `encode_frame` but optionally transmitting an inverted PAR
    /// bit to provoke a parity flag downstream.
    pub fn encode_frame_with(&mut self, shape: FrameShape, word: u64, corrupt_par: bool) -> u64 {
        let par_mask = 1u64 << 2; // row 45 of 48
        let mut word = word;

        for row in 0..shape.rows {
            for column in 0..shape.columns {
                let bit = if column == 0 && row <= 47 {
                    if row == 45 {
                        let par = self.captured_parity != corrupt_par;
                        if par {
                            word |= par_mask;
                        } else {
                            word &= !par_mask;
                        }
                        par
                    } else {
                        word >> (47 - row) & 1 == 1
                    }
                } else {
                    false
                };

                self.push_decoded_bit(bit);

                if column == 0 && row == 44 {
                    self.captured_parity = self.parity_odd;
                    self.parity_odd = false;
                }
            }
        }

        word
    }

    pub fn into_streams(self) -> (EdgeStream, EdgeStream) {
        (
            EdgeStream::new(BitLevel::Low, self.clock_transitions),
            EdgeStream::new(BitLevel::Low, self.data_transitions),
        )
    }
}

/// Encode `count` PING frames whose dynamic sync values chain from
/// `seed`. Returns the transmitted words.
pub fn encode_ping_sequence(
    encoder: &mut FrameStreamEncoder,
    shape: FrameShape,
    seed: u8,
    count: usize,
) -> Vec<u64> {
    let mut generator = DynamicSyncGenerator::new();
    generator.seed(seed);
    let mut dynamic_sync = seed;

    let mut words = Vec::with_capacity(count);
    for _ in 0..count {
        words.push(encoder.encode_frame(shape, ping_word(dynamic_sync)));
        dynamic_sync = generator.next();
    }
    words
}
