//! DSLogic .dsl capture files as sample sources
//!
//! A .dsl capture is a ZIP archive holding a text `header` member plus
//! packed-bit data members named `L-<probe>/<block>` (LSB-first within
//! each byte, all probes sampled on the same clock). [`CaptureFile`]
//! parses the header and hands out [`CaptureChannel`] cursors that
//! implement [`SampleSource`] by walking a probe's bits on demand.
//!
//! Channels share one archive handle and one block cache; blocks are
//! loaded lazily and kept, so the clock and data cursors of a decode pass
//! touch each block once.

use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::{Arc, Mutex};

use tracing::debug;
use zip::ZipArchive;

use crate::source::{BitLevel, SampleSource};
use crate::{Result, SwError};

type BlockCache = Arc<Mutex<HashMap<(usize, u64), Arc<[u8]>>>>;

/// Header information from a .dsl capture
#[derive(Debug, Clone)]
pub struct CaptureHeader {
    /// Total number of probes/channels in the capture
    pub total_probes: usize,
    /// Sample rate as captured (e.g. "500 MHz")
    pub samplerate: String,
    /// Sample rate in Hz
    pub samplerate_hz: f64,
    /// Total number of samples captured
    pub total_samples: u64,
    /// Total number of data blocks per probe
    pub total_blocks: u64,
    /// Samples per block (fixed except for the last block)
    pub samples_per_block: u64,
    /// Probe names indexed by probe number
    pub probe_names: Vec<String>,
}

/// An opened .dsl capture archive.
pub struct CaptureFile {
    archive: Arc<Mutex<ZipArchive<File>>>,
    header: CaptureHeader,
    blocks: BlockCache,
}

impl CaptureFile {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        let mut archive = ZipArchive::new(file)?;
        let header = Self::parse_header(&mut archive)?;

        debug!(
            "capture: {} probes, {} samples at {}, {} blocks of {}",
            header.total_probes,
            header.total_samples,
            header.samplerate,
            header.total_blocks,
            header.samples_per_block
        );

        Ok(Self {
            archive: Arc::new(Mutex::new(archive)),
            header,
            blocks: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    fn parse_header(archive: &mut ZipArchive<File>) -> Result<CaptureHeader> {
        let mut header_file = archive
            .by_name("header")
            .map_err(|e| SwError::ParseHeader(format!("Cannot find header file: {}", e)))?;

        let mut header_content = String::new();
        header_file.read_to_string(&mut header_content)?;
        drop(header_file);

        let mut total_probes: Option<usize> = None;
        let mut samplerate: Option<String> = None;
        let mut total_samples: Option<u64> = None;
        let mut total_blocks: Option<u64> = None;
        let mut probe_names_map: HashMap<usize, String> = HashMap::new();

        for line in header_content.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            if let Some(value) = line.strip_prefix("total probes = ") {
                total_probes = value.parse().ok();
            } else if let Some(value) = line.strip_prefix("samplerate = ") {
                samplerate = Some(value.to_string());
            } else if let Some(value) = line.strip_prefix("total samples = ") {
                total_samples = value.parse().ok();
            } else if let Some(value) = line.strip_prefix("total blocks = ") {
                total_blocks = value.parse().ok();
            } else if line.starts_with("probe")
                && let Some((probe_part, name)) = line.split_once(" = ")
                && let Some(num_str) = probe_part.strip_prefix("probe")
                && let Ok(probe_num) = num_str.parse::<usize>()
            {
                probe_names_map.insert(probe_num, name.to_string());
            }
        }

        let total_probes =
            total_probes.ok_or_else(|| SwError::MissingField("total probes".to_string()))?;
        let samplerate =
            samplerate.ok_or_else(|| SwError::MissingField("samplerate".to_string()))?;
        let total_samples =
            total_samples.ok_or_else(|| SwError::MissingField("total samples".to_string()))?;
        let total_blocks =
            total_blocks.ok_or_else(|| SwError::MissingField("total blocks".to_string()))?;

        let samplerate_hz = Self::parse_sample_rate(&samplerate)
            .ok_or_else(|| SwError::ParseHeader(format!("Invalid sample rate: {}", samplerate)))?;

        // Blocks are fixed-size except the last; size the stride off the
        // first block.
        let samples_per_block = {
            let mut file = archive
                .by_name("L-0/0")
                .map_err(|_| SwError::ParseHeader("Could not read first block".to_string()))?;
            let mut buf = Vec::new();
            file.read_to_end(&mut buf)
                .map_err(|_| SwError::ParseHeader("Could not read first block data".to_string()))?;
            (buf.len() * 8) as u64
        };

        let probe_names = (0..total_probes)
            .map(|i| {
                probe_names_map
                    .get(&i)
                    .cloned()
                    .unwrap_or_else(|| format!("Probe{}", i))
            })
            .collect();

        Ok(CaptureHeader {
            total_probes,
            samplerate,
            samplerate_hz,
            total_samples,
            total_blocks,
            samples_per_block,
            probe_names,
        })
    }

    /// Parse a sample rate string (e.g. "500 MHz") into Hz.
    fn parse_sample_rate(samplerate: &str) -> Option<f64> {
        let mut parts = samplerate.split_whitespace();
        let value: f64 = parts.next()?.parse().ok()?;
        let multiplier = match parts.next()? {
            "GHz" => 1_000_000_000.0,
            "MHz" => 1_000_000.0,
            "KHz" | "kHz" => 1_000.0,
            "Hz" => 1.0,
            _ => return None,
        };
        Some(value * multiplier)
    }

    pub fn header(&self) -> &CaptureHeader {
        &self.header
    }

    /// A cursor over one probe, positioned at sample 0.
    pub fn channel(&self, probe: usize) -> Result<CaptureChannel> {
        if probe >= self.header.total_probes {
            return Err(SwError::InvalidProbe(probe));
        }

        let mut channel = CaptureChannel {
            archive: Arc::clone(&self.archive),
            blocks: Arc::clone(&self.blocks),
            header: self.header.clone(),
            probe,
            position: 0,
            level: BitLevel::Low,
            block: None,
        };

        if channel.header.total_samples > 0 {
            channel.level = channel.bit_at(0)?.into();
        }

        Ok(channel)
    }
}

/// A block held by a channel cursor.
struct LoadedBlock {
    start: u64,
    /// Valid samples in this block (shorter for the final block)
    samples: u64,
    data: Arc<[u8]>,
}

/// Forward-only [`SampleSource`] over one probe of a capture.
pub struct CaptureChannel {
    archive: Arc<Mutex<ZipArchive<File>>>,
    blocks: BlockCache,
    header: CaptureHeader,
    probe: usize,
    position: u64,
    level: BitLevel,
    block: Option<LoadedBlock>,
}

impl CaptureChannel {
    pub fn probe(&self) -> usize {
        self.probe
    }

    /// Extract a bit from packed LSB-first data.
    #[inline]
    fn get_bit(data: &[u8], bit_index: usize) -> bool {
        (data[bit_index / 8] >> (bit_index % 8)) & 1 == 1
    }

    /// Make `self.block` the block containing `position`.
    fn load_block_for(&mut self, position: u64) -> Result<()> {
        let block_num = position / self.header.samples_per_block;
        if block_num >= self.header.total_blocks {
            return Err(SwError::InvalidBlock(block_num));
        }

        let key = (self.probe, block_num);
        let data = {
            let cache = self.blocks.lock().unwrap();
            cache.get(&key).cloned()
        };

        let data = match data {
            Some(data) => data,
            None => {
                let block_name = format!("L-{}/{}", self.probe, block_num);
                let data = {
                    let mut archive = self.archive.lock().unwrap();
                    let mut file = archive
                        .by_name(&block_name)
                        .map_err(|_| SwError::InvalidBlock(block_num))?;
                    let mut buf = Vec::new();
                    file.read_to_end(&mut buf)?;
                    Arc::<[u8]>::from(buf)
                };
                self.blocks.lock().unwrap().insert(key, Arc::clone(&data));
                data
            }
        };

        let start = block_num * self.header.samples_per_block;
        let capacity = (data.len() * 8) as u64;
        self.block = Some(LoadedBlock {
            start,
            samples: capacity.min(self.header.total_samples - start),
            data,
        });
        Ok(())
    }

    fn bit_at(&mut self, position: u64) -> Result<bool> {
        if position >= self.header.total_samples {
            return Err(SwError::OutOfBounds(position));
        }

        let covered = self
            .block
            .as_ref()
            .is_some_and(|b| position >= b.start && position < b.start + b.samples);
        if !covered {
            self.load_block_for(position)?;
        }

        let block = self.block.as_ref().unwrap();
        Ok(Self::get_bit(&block.data, (position - block.start) as usize))
    }
}

impl SampleSource for CaptureChannel {
    fn advance_to_next_edge(&mut self) -> Result<()> {
        let wanted = !self.level.is_high();
        let mut candidate = self.position + 1;

        while candidate < self.header.total_samples {
            let covered = self
                .block
                .as_ref()
                .is_some_and(|b| candidate >= b.start && candidate < b.start + b.samples);
            if !covered {
                self.load_block_for(candidate)?;
            }
            let block = self.block.as_ref().unwrap();
            let local = (candidate - block.start) as usize;
            let block_end = block.start + block.samples;

            // Skip whole bytes that cannot contain the transition
            if local % 8 == 0 && candidate + 8 <= block_end {
                let byte = block.data[local / 8];
                let steady = if self.level.is_high() { 0xff } else { 0x00 };
                if byte == steady {
                    candidate += 8;
                    continue;
                }
            }

            if Self::get_bit(&block.data, local) == wanted {
                self.position = candidate;
                self.level = wanted.into();
                return Ok(());
            }
            candidate += 1;
        }

        Err(SwError::EndOfCapture)
    }

    fn sample_number(&self) -> u64 {
        self.position
    }

    fn advance_to_position(&mut self, sample: u64) -> Result<()> {
        debug_assert!(sample >= self.position);
        self.level = self.bit_at(sample)?.into();
        self.position = sample;
        Ok(())
    }

    fn bit_state(&self) -> BitLevel {
        self.level
    }
}
