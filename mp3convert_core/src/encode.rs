//! Raw PCM to MP3 encoding: read fixed-size blocks of interleaved stereo
//! samples, split them into per-channel buffers, and feed them to the LAME
//! encoder until the input runs dry, then flush.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

use byteorder::{ByteOrder, LittleEndian};
use log::{debug, warn};
use mp3lame_encoder::{Bitrate, Builder, DualPcm, Encoder, FlushNoGap, Quality};
use thiserror::Error;

/// Bytes per interleaved stereo frame of signed 16-bit samples.
const BYTES_PER_FRAME: usize = 4;

/// Interleaved stereo frames read per block.
pub const DEFAULT_BLOCK_FRAMES: NonZeroUsize = match NonZeroUsize::new(8192) {
    Some(frames) => frames,
    None => panic!("default block size must be non-zero"),
};

/// Errors that can occur while encoding raw PCM to MP3.
#[derive(Debug, Error)]
pub enum EncodeError {
    /// The input file could not be opened.
    #[error("failed to open input file {path}: {source}")]
    OpenInput {
        path: PathBuf,
        source: io::Error,
    },

    /// The output file could not be created.
    #[error("cannot open output file {path}: {source}")]
    CreateOutput {
        path: PathBuf,
        source: io::Error,
    },

    /// The encoder rejected its configuration.
    #[error("failed to initialize the encoder: {reason}")]
    EncoderInit { reason: String },

    /// The encoder rejected a block of samples.
    #[error("failed to encode a block of {frames} frames: {reason}")]
    Encode { frames: usize, reason: String },

    /// The encoder failed to drain its internal state.
    #[error("failed to flush the encoder: {reason}")]
    Flush { reason: String },

    /// Reading the input or writing the output failed.
    #[error("stream error: {0}")]
    Io(#[from] io::Error),
}

/// Configuration for one PCM to MP3 run.
#[derive(Clone, Debug)]
pub struct EncodeConfig {
    /// Path of the raw PCM file to read.
    pub input_path: PathBuf,
    /// Path of the MP3 file to create.
    pub output_path: PathBuf,
    /// Sample rate declared for the input, in Hz.
    pub sample_rate: u32,
    /// Target constant bitrate in kbit/s.
    pub bitrate_kbps: u32,
    /// Interleaved frames read per block.
    pub block_frames: NonZeroUsize,
}

impl EncodeConfig {
    /// Construct a configuration with the default rate, bitrate, and block
    /// size.
    pub fn new<P: AsRef<Path>, Q: AsRef<Path>>(input: P, output: Q) -> Self {
        Self {
            input_path: input.as_ref().to_path_buf(),
            output_path: output.as_ref().to_path_buf(),
            sample_rate: 44_100,
            bitrate_kbps: 128,
            block_frames: DEFAULT_BLOCK_FRAMES,
        }
    }

    /// Declare the sample rate of the input.
    pub fn sample_rate(mut self, rate: u32) -> Self {
        self.sample_rate = rate;
        self
    }

    /// Request a target bitrate in kbit/s.
    pub fn bitrate_kbps(mut self, kbps: u32) -> Self {
        self.bitrate_kbps = kbps;
        self
    }

    /// Override the number of frames read per block.
    pub fn block_frames(mut self, frames: NonZeroUsize) -> Self {
        self.block_frames = frames;
        self
    }
}

/// Summary of a completed encode run.
#[derive(Clone, Copy, Debug)]
pub struct EncodeReport {
    /// Interleaved frames read from the input.
    pub frames_read: u64,
    /// Encoded bytes written to the output.
    pub bytes_written: u64,
    /// Blocks handed to the encoder, not counting the flush.
    pub blocks: u64,
}

/// Reads whole blocks of interleaved stereo `i16` samples from a byte
/// stream, converting from little-endian on the way in.
struct PcmReader<R: Read> {
    source: R,
    bytes: Vec<u8>,
    samples: Vec<i16>,
}

impl<R: Read> PcmReader<R> {
    fn new(source: R, block_frames: NonZeroUsize) -> Self {
        Self {
            source,
            bytes: vec![0u8; block_frames.get() * BYTES_PER_FRAME],
            samples: Vec::with_capacity(block_frames.get() * 2),
        }
    }

    /// Read the next block, returning the interleaved samples. An empty
    /// slice means the input is exhausted. A trailing partial frame is
    /// dropped with a warning.
    fn read_block(&mut self) -> io::Result<&[i16]> {
        let mut filled = 0;
        while filled < self.bytes.len() {
            match self.source.read(&mut self.bytes[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            }
        }

        let leftover = filled % BYTES_PER_FRAME;
        if leftover != 0 {
            warn!("dropping {leftover} trailing byte(s) that do not form a whole frame");
            filled -= leftover;
        }

        let frames = filled / BYTES_PER_FRAME;
        self.samples.resize(frames * 2, 0);
        LittleEndian::read_i16_into(&self.bytes[..filled], &mut self.samples);
        Ok(&self.samples)
    }
}

/// Split interleaved stereo samples into the per-channel buffers the
/// encoder consumes. The buffers are cleared and refilled, keeping their
/// allocations across blocks.
fn deinterleave(interleaved: &[i16], left: &mut Vec<i16>, right: &mut Vec<i16>) {
    debug_assert!(interleaved.len() % 2 == 0);
    left.clear();
    right.clear();
    for frame in interleaved.chunks_exact(2) {
        left.push(frame[0]);
        right.push(frame[1]);
    }
}

/// Map a requested bitrate onto the encoder's supported constant-bitrate
/// steps, rounding up.
fn nearest_bitrate(kbps: u32) -> Bitrate {
    match kbps {
        0..=8 => Bitrate::Kbps8,
        9..=16 => Bitrate::Kbps16,
        17..=24 => Bitrate::Kbps24,
        25..=32 => Bitrate::Kbps32,
        33..=40 => Bitrate::Kbps40,
        41..=48 => Bitrate::Kbps48,
        49..=64 => Bitrate::Kbps64,
        65..=80 => Bitrate::Kbps80,
        81..=96 => Bitrate::Kbps96,
        97..=112 => Bitrate::Kbps112,
        113..=128 => Bitrate::Kbps128,
        129..=160 => Bitrate::Kbps160,
        161..=192 => Bitrate::Kbps192,
        193..=224 => Bitrate::Kbps224,
        225..=256 => Bitrate::Kbps256,
        _ => Bitrate::Kbps320,
    }
}

/// LAME encoder wrapping the scratch buffer for one run.
struct LameEncoder {
    encoder: Encoder,
    scratch: Vec<u8>,
}

impl LameEncoder {
    fn new(sample_rate: u32, bitrate_kbps: u32) -> Result<Self, EncodeError> {
        let mut builder = Builder::new().ok_or_else(|| EncodeError::EncoderInit {
            reason: "the backend refused to allocate an encoder".to_owned(),
        })?;
        builder
            .set_num_channels(2)
            .map_err(|err| EncodeError::EncoderInit {
                reason: format!("{err:?}"),
            })?;
        builder
            .set_sample_rate(sample_rate)
            .map_err(|err| EncodeError::EncoderInit {
                reason: format!("{err:?}"),
            })?;
        builder
            .set_brate(nearest_bitrate(bitrate_kbps))
            .map_err(|err| EncodeError::EncoderInit {
                reason: format!("{err:?}"),
            })?;
        builder
            .set_quality(Quality::Best)
            .map_err(|err| EncodeError::EncoderInit {
                reason: format!("{err:?}"),
            })?;
        let encoder = builder.build().map_err(|err| EncodeError::EncoderInit {
            reason: format!("{err:?}"),
        })?;

        Ok(Self {
            encoder,
            scratch: Vec::new(),
        })
    }

    /// Encode one deinterleaved block and return the MP3 bytes it produced.
    fn encode_block(&mut self, left: &[i16], right: &[i16]) -> Result<&[u8], EncodeError> {
        self.scratch.clear();
        self.scratch
            .reserve(mp3lame_encoder::max_required_buffer_size(left.len()));
        let input = DualPcm {
            left,
            right,
        };
        let written = self
            .encoder
            .encode_to_vec(input, &mut self.scratch)
            .map_err(|err| EncodeError::Encode {
                frames: left.len(),
                reason: format!("{err:?}"),
            })?;
        Ok(&self.scratch[..written])
    }

    /// Drain the encoder's internal state and return the final MP3 bytes.
    fn flush(&mut self) -> Result<&[u8], EncodeError> {
        self.scratch.clear();
        self.scratch
            .reserve(mp3lame_encoder::max_required_buffer_size(0));
        let written = self
            .encoder
            .flush_to_vec::<FlushNoGap>(&mut self.scratch)
            .map_err(|err| EncodeError::Flush {
                reason: format!("{err:?}"),
            })?;
        Ok(&self.scratch[..written])
    }
}

/// Run the PCM to MP3 pipeline described by `config`.
///
/// Every resource is released before this returns, on success and on every
/// error path.
pub fn run(config: EncodeConfig) -> Result<EncodeReport, EncodeError> {
    let input = File::open(&config.input_path).map_err(|source| EncodeError::OpenInput {
        path: config.input_path.clone(),
        source,
    })?;
    let output = File::create(&config.output_path).map_err(|source| EncodeError::CreateOutput {
        path: config.output_path.clone(),
        source,
    })?;

    let mut reader = PcmReader::new(BufReader::new(input), config.block_frames);
    let mut encoder = LameEncoder::new(config.sample_rate, config.bitrate_kbps)?;
    let mut writer = BufWriter::new(output);

    let mut left = Vec::with_capacity(config.block_frames.get());
    let mut right = Vec::with_capacity(config.block_frames.get());
    let mut report = EncodeReport {
        frames_read: 0,
        bytes_written: 0,
        blocks: 0,
    };

    loop {
        let block = reader.read_block()?;
        if block.is_empty() {
            let tail = encoder.flush()?;
            writer.write_all(tail)?;
            report.bytes_written += tail.len() as u64;
            break;
        }

        deinterleave(block, &mut left, &mut right);
        report.frames_read += left.len() as u64;
        report.blocks += 1;

        let encoded = encoder.encode_block(&left, &right)?;
        debug!(
            "block {}: {} frames in, {} bytes out",
            report.blocks,
            left.len(),
            encoded.len()
        );
        writer.write_all(encoded)?;
        report.bytes_written += encoded.len() as u64;
    }

    writer.flush()?;
    debug!(
        "encoded {} frames into {} bytes over {} block(s)",
        report.frames_read, report.bytes_written, report.blocks
    );
    Ok(report)
}
