//! Dynamic sync PRNG
//!
//! Each frame carries a 4-bit dynamic sync value that steps through a
//! fixed permutation of the 15 nonzero values, letting a receiver detect
//! missed frames. A full sync sequence is one seed frame plus 15 verified
//! successors.

/// Frames in one complete dynamic sync sequence.
pub const SEQUENCE_LENGTH_FRAMES: u32 = 16;

/// Each value indexes its successor. Entry 0 is unreachable: a generator
/// stuck at 0 would never advance, which is why 0 is an invalid seed.
const NEXT_VALUE: [u8; 16] = [0, 2, 4, 6, 9, 11, 13, 15, 1, 3, 5, 7, 8, 10, 12, 14];

#[derive(Debug, Clone)]
pub struct DynamicSyncGenerator {
    value: u8,
}

impl Default for DynamicSyncGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl DynamicSyncGenerator {
    pub fn new() -> Self {
        Self { value: 1 }
    }

    /// Seed the sequence from a received dynamic sync value.
    pub fn seed(&mut self, value: u8) {
        debug_assert!(value < 16);
        self.value = value;
    }

    /// Step the permutation and return the new value.
    pub fn next(&mut self) -> u8 {
        self.value = NEXT_VALUE[self.value as usize];
        self.value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_from_seed_one() {
        let mut generator = DynamicSyncGenerator::new();
        generator.seed(1);
        let sequence: Vec<u8> = (0..15).map(|_| generator.next()).collect();
        assert_eq!(
            sequence,
            vec![2, 4, 9, 3, 6, 13, 10, 5, 11, 7, 15, 14, 12, 8, 1]
        );
    }

    #[test]
    fn test_table_is_a_permutation() {
        let mut seen = [false; 16];
        for &value in &NEXT_VALUE {
            assert!(!seen[value as usize], "duplicate successor {}", value);
            seen[value as usize] = true;
        }
        assert!(seen.iter().all(|&s| s));
    }

    #[test]
    fn test_nonzero_states_form_one_15_cycle() {
        let mut generator = DynamicSyncGenerator::new();
        generator.seed(1);

        let mut visited = [false; 16];
        for _ in 0..15 {
            let value = generator.next();
            assert_ne!(value, 0, "sequence must never reach 0");
            assert!(!visited[value as usize], "revisited {} early", value);
            visited[value as usize] = true;
        }
        // After 15 steps every nonzero state was visited and the walk is
        // back at the seed, so the cycle repeats.
        assert!(visited[1..].iter().all(|&v| v));
        assert_eq!(generator.next(), 2);
        assert_eq!(generator.next(), 4);
    }
}
