//! MP3 to WAV transcoding: probe and lock the input format, optionally scan
//! a seek index, then pump fixed-size sample chunks from the decoder into
//! the WAV container until the stream ends.

use std::fmt;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use hound::{SampleFormat, WavSpec, WavWriter};
use log::{debug, info, trace, warn};
use symphonia::core::audio::{SampleBuffer, SignalSpec};
use symphonia::core::codecs::{CodecParameters, Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::conv::ConvertibleSample;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::default::{get_codecs, get_probe};
use thiserror::Error;

/// Frames per decoded packet assumed when the codec does not advertise a
/// recommendation (one MPEG-1 Layer III frame).
const DEFAULT_FRAMES_PER_PACKET: u64 = 1152;

/// Errors that can occur while transcoding an MP3 file to WAV.
#[derive(Debug, Error)]
pub enum TranscodeError {
    /// The input file could not be opened.
    #[error("failed to open input file {path}: {source}")]
    OpenInput {
        path: PathBuf,
        source: io::Error,
    },

    /// The input stream could not be probed as a supported format.
    #[error("trouble probing the input stream: {0}")]
    Probe(SymphoniaError),

    /// Error returned when the container does not expose any default track.
    #[error("input stream does not provide a default track")]
    MissingDefaultTrack,

    /// Error returned when the codec of the track cannot be handled.
    #[error("unsupported codec")]
    UnsupportedCodec,

    /// Error returned when the decoder track lacks a sample rate.
    #[error("input stream does not advertise a sample rate")]
    MissingSampleRate,

    /// Error returned when the decoder track lacks a channel layout.
    #[error("input stream does not advertise a channel layout")]
    MissingChannels,

    /// The decoding backend refused to construct a decoder for the track.
    #[error("failed to construct a decoder: {0}")]
    MakeDecoder(SymphoniaError),

    /// The requested output sample encoding is not supported.
    #[error("bad encoding '{requested}': expected s16 or f32")]
    UnsupportedEncoding { requested: String },

    /// The output container file could not be created.
    #[error("cannot open output file {path}: {source}")]
    CreateOutput {
        path: PathBuf,
        source: hound::Error,
    },

    /// The buffer-size override is zero or not a multiple of the sample width.
    #[error("buffer size of {requested} bytes is not a positive multiple of the {width}-byte sample width")]
    InvalidBufferSize { requested: usize, width: usize },

    /// The decoder reported an unrecoverable mid-stream error.
    #[error("decoder error: {0}")]
    Decode(SymphoniaError),

    /// The stream renegotiated its format mid-decode.
    #[error("stream format changed mid-decode")]
    FormatChanged,

    /// The output container could not be finalized.
    #[error("failed to finalize output file: {0}")]
    FinalizeOutput(hound::Error),
}

/// Numeric representation of one decoded audio sample.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SampleEncoding {
    /// Signed 16-bit integer samples, the decoder's native default.
    #[default]
    Signed16,
    /// 32-bit IEEE float samples.
    Float32,
}

impl SampleEncoding {
    /// Parse the CLI spelling of an encoding (`s16` or `f32`).
    pub fn parse(value: &str) -> Result<Self, TranscodeError> {
        match value {
            "s16" => Ok(Self::Signed16),
            "f32" => Ok(Self::Float32),
            other => Err(TranscodeError::UnsupportedEncoding {
                requested: other.to_owned(),
            }),
        }
    }

    /// Width of one sample in bytes.
    pub fn sample_width(self) -> usize {
        match self {
            Self::Signed16 => 2,
            Self::Float32 => 4,
        }
    }

    fn wav_spec(self, sample_rate: u32, channels: u16) -> WavSpec {
        match self {
            Self::Signed16 => WavSpec {
                channels,
                sample_rate,
                bits_per_sample: 16,
                sample_format: SampleFormat::Int,
            },
            Self::Float32 => WavSpec {
                channels,
                sample_rate,
                bits_per_sample: 32,
                sample_format: SampleFormat::Float,
            },
        }
    }
}

impl fmt::Display for SampleEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Signed16 => f.write_str("s16"),
            Self::Float32 => f.write_str("f32"),
        }
    }
}

/// Configuration for one MP3 to WAV run.
#[derive(Clone, Debug)]
pub struct TranscodeConfig {
    /// Path of the MP3 file to decode.
    pub input_path: PathBuf,
    /// Path of the WAV file to create.
    pub output_path: PathBuf,
    /// Output sample encoding requested from the decoder.
    pub encoding: SampleEncoding,
    /// Optional override of the decode buffer size in bytes.
    pub buffer_bytes: Option<usize>,
    /// Whether to run the seek-index scan pass before decoding.
    pub scan: bool,
}

impl TranscodeConfig {
    /// Construct a configuration with the default encoding, the
    /// library-recommended buffer size, and the scan pass enabled.
    pub fn new<P: AsRef<Path>, Q: AsRef<Path>>(input: P, output: Q) -> Self {
        Self {
            input_path: input.as_ref().to_path_buf(),
            output_path: output.as_ref().to_path_buf(),
            encoding: SampleEncoding::default(),
            buffer_bytes: None,
            scan: true,
        }
    }

    /// Request a specific output sample encoding.
    pub fn encoding(mut self, encoding: SampleEncoding) -> Self {
        self.encoding = encoding;
        self
    }

    /// Override the decode buffer size in bytes.
    pub fn buffer_bytes(mut self, bytes: usize) -> Self {
        self.buffer_bytes = Some(bytes);
        self
    }

    /// Enable or disable the seek-index scan pass.
    pub fn scan(mut self, scan: bool) -> Self {
        self.scan = scan;
        self
    }
}

/// The format locked in for the remainder of a run once the decoder has
/// reported its stream parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NegotiatedFormat {
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Number of interleaved channels.
    pub channels: u16,
    /// Output sample encoding.
    pub encoding: SampleEncoding,
}

/// One entry of the diagnostic seek index.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IndexEntry {
    /// Zero-based frame number.
    pub frame: u64,
    /// Byte offset of the frame, relative to the first audio frame.
    pub byte_offset: u64,
}

/// Frame-number-to-byte-offset table built by scanning the input once
/// before the decode pass. Diagnostic only; never used for seeking.
#[derive(Clone, Debug, Default)]
pub struct SeekIndex {
    entries: Vec<IndexEntry>,
}

impl SeekIndex {
    /// Total number of frames found by the scan.
    pub fn total_frames(&self) -> u64 {
        self.entries.len() as u64
    }

    /// The recorded frame entries, in stream order.
    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }
}

/// Progress notifications emitted while a transcode run executes.
#[derive(Clone, Copy, Debug)]
pub enum ProgressEvent {
    /// Decoding is about to start; the total counts stream frames and is
    /// known when a scan ran.
    Start { total_frames: Option<u64> },
    /// Stream frames decoded so far, in the same unit as the scan total.
    Advance { frames_decoded: u64 },
    /// The run finished and the container was finalized.
    Finish,
}

/// Summary of a completed transcode run.
#[derive(Clone, Debug)]
pub struct TranscodeReport {
    /// The format negotiated with the decoder.
    pub format: NegotiatedFormat,
    /// Total frames found by the scan pass, when it ran.
    pub total_frames: Option<u64>,
    /// Size in bytes of the decode buffer that was used.
    pub buffer_bytes: usize,
    /// Samples written to the container, divided by the channel count.
    pub samples_per_channel: u64,
    /// Corrupt packets the decoder rejected and stepped over.
    pub packets_skipped: u64,
    /// Set when decoding ended for any reason other than a clean
    /// end-of-stream; the output file is still complete up to that point.
    pub decode_failure: Option<String>,
}

struct OpenedInput {
    reader: Box<dyn FormatReader>,
    track_id: u32,
    codec_params: CodecParameters,
}

fn open_input(path: &Path) -> Result<OpenedInput, TranscodeError> {
    let file = File::open(path).map_err(|source| TranscodeError::OpenInput {
        path: path.to_path_buf(),
        source,
    })?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(extension) = path.extension().and_then(|ext| ext.to_str()) {
        hint.with_extension(extension);
    }

    let probed = get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(TranscodeError::Probe)?;
    let reader = probed.format;

    let track = reader
        .default_track()
        .ok_or(TranscodeError::MissingDefaultTrack)?;
    if track.codec_params.codec == CODEC_TYPE_NULL {
        return Err(TranscodeError::UnsupportedCodec);
    }

    Ok(OpenedInput {
        track_id: track.id,
        codec_params: track.codec_params.clone(),
        reader,
    })
}

/// Peek the decoder's reported stream parameters and combine them with the
/// requested encoding. The result must not change for the rest of the run.
fn negotiate_format(
    params: &CodecParameters,
    encoding: SampleEncoding,
) -> Result<NegotiatedFormat, TranscodeError> {
    let sample_rate = params.sample_rate.ok_or(TranscodeError::MissingSampleRate)?;
    let channels = params
        .channels
        .filter(|channels| channels.count() > 0)
        .ok_or(TranscodeError::MissingChannels)?;
    Ok(NegotiatedFormat {
        sample_rate,
        channels: channels.count() as u16,
        encoding,
    })
}

/// Scan the input once without decoding and record one entry per frame of
/// the selected track.
///
/// The byte offsets are cumulative packet offsets relative to the first
/// audio frame. A clean end-of-stream ends the pass; any other demux error
/// keeps the partial index and logs a warning, so a damaged tail does not
/// prevent the decode pass from running.
pub fn scan_input(path: &Path) -> Result<SeekIndex, TranscodeError> {
    let mut opened = open_input(path)?;
    let mut entries = Vec::new();
    let mut byte_offset = 0u64;

    loop {
        let packet = match opened.reader.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(err)) if err.kind() == io::ErrorKind::UnexpectedEof => {
                break;
            }
            Err(err) => {
                warn!("seek index scan stopped early: {err}");
                break;
            }
        };
        if packet.track_id() != opened.track_id {
            continue;
        }

        let frame = entries.len() as u64;
        trace!("frame {frame}: stream offset {byte_offset}");
        entries.push(IndexEntry { frame, byte_offset });
        byte_offset += packet.data.len() as u64;
    }

    Ok(SeekIndex { entries })
}

/// Read the sample rate and channel count out of a 4-byte MPEG audio
/// frame header. `None` means the bytes do not form a valid header.
fn parse_frame_header(data: &[u8]) -> Option<(u32, u16)> {
    if data.len() < 4 || data[0] != 0xff || data[1] & 0b1110_0000 != 0b1110_0000 {
        return None;
    }

    let version = (data[1] & 0b0001_1000) >> 3;
    let layer = (data[1] & 0b110) >> 1;
    if version == 0b01 || layer == 0b00 {
        return None;
    }

    // The rate index is keyed by the MPEG version; 0b00/0b10/0b11 are
    // versions 2.5, 2, and 1.
    let rate_index = (data[2] & 0b0000_1100) >> 2;
    let sample_rate = match (version, rate_index) {
        (0b11, 0b00) => 44_100,
        (0b11, 0b01) => 48_000,
        (0b11, 0b10) => 32_000,
        (0b10, 0b00) => 22_050,
        (0b10, 0b01) => 24_000,
        (0b10, 0b10) => 16_000,
        (0b00, 0b00) => 11_025,
        (0b00, 0b01) => 12_000,
        (0b00, 0b10) => 8_000,
        _ => return None,
    };

    let channels = if data[3] & 0b11_000000 == 0b11_000000 { 1 } else { 2 };
    Some((sample_rate, channels))
}

enum ReadOutcome<'a, S> {
    /// Up to one buffer's worth of interleaved samples.
    Chunk(&'a [S]),
    /// Clean end of stream.
    Done,
}

/// Pulls decoded samples out of the format reader in caller-sized chunks,
/// holding back the remainder of a packet between reads.
struct ChunkedDecoder<S: ConvertibleSample> {
    reader: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    spec: SignalSpec,
    buffer: SampleBuffer<S>,
    buffer_frames: usize,
    pending: std::ops::Range<usize>,
    frames_decoded: u64,
    packets_skipped: u64,
}

impl<S: ConvertibleSample> ChunkedDecoder<S> {
    fn new(opened: OpenedInput, format: &NegotiatedFormat) -> Result<Self, TranscodeError> {
        let channels = opened
            .codec_params
            .channels
            .ok_or(TranscodeError::MissingChannels)?;
        let spec = SignalSpec::new(format.sample_rate, channels);
        let buffer_frames = opened
            .codec_params
            .max_frames_per_packet
            .unwrap_or(DEFAULT_FRAMES_PER_PACKET)
            .max(1) as usize;
        let decoder = get_codecs()
            .make(&opened.codec_params, &DecoderOptions::default())
            .map_err(TranscodeError::MakeDecoder)?;

        Ok(Self {
            reader: opened.reader,
            decoder,
            track_id: opened.track_id,
            spec,
            buffer: SampleBuffer::new(buffer_frames as u64, spec),
            buffer_frames,
            pending: 0..0,
            frames_decoded: 0,
            packets_skipped: 0,
        })
    }

    /// Serve up to `max_samples` interleaved samples, refilling from the
    /// next packet when the previous one has been fully handed out.
    fn read_chunk(&mut self, max_samples: usize) -> Result<ReadOutcome<'_, S>, TranscodeError> {
        if self.pending.is_empty() && !self.refill()? {
            return Ok(ReadOutcome::Done);
        }

        let take = self.pending.len().min(max_samples);
        let start = self.pending.start;
        self.pending.start += take;
        Ok(ReadOutcome::Chunk(&self.buffer.samples()[start..start + take]))
    }

    /// Decode packets until one yields samples. Returns `false` on a clean
    /// end of stream. A packet that fails to decode but still carries a
    /// well-formed header with other stream parameters ends the run as a
    /// format change; only corrupt packets are stepped over.
    fn refill(&mut self) -> Result<bool, TranscodeError> {
        loop {
            let packet = match self.reader.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(err))
                    if err.kind() == io::ErrorKind::UnexpectedEof =>
                {
                    return Ok(false);
                }
                Err(err) => return Err(TranscodeError::Decode(err)),
            };
            if packet.track_id() != self.track_id {
                continue;
            }

            match self.decoder.decode(&packet) {
                Ok(decoded) => {
                    let spec = *decoded.spec();
                    // The negotiated format is locked for the rest of the run.
                    if spec.rate != self.spec.rate || spec.channels != self.spec.channels {
                        return Err(TranscodeError::FormatChanged);
                    }
                    self.frames_decoded += 1;
                    let frames = decoded.frames();
                    if frames == 0 {
                        continue;
                    }
                    if frames > self.buffer_frames {
                        debug!("growing the decode buffer to {frames} frames");
                        self.buffer = SampleBuffer::new(frames as u64, spec);
                        self.buffer_frames = frames;
                    }
                    self.buffer.copy_interleaved_ref(decoded);
                    self.pending = 0..self.buffer.len();
                    return Ok(true);
                }
                Err(SymphoniaError::DecodeError(err)) => {
                    // A rejected packet that still starts on a valid frame
                    // header with other parameters is a renegotiated
                    // stream, not corruption.
                    if let Some((rate, channels)) = parse_frame_header(&packet.data) {
                        if rate != self.spec.rate
                            || usize::from(channels) != self.spec.channels.count()
                        {
                            return Err(TranscodeError::FormatChanged);
                        }
                    }
                    self.packets_skipped += 1;
                    trace!("skipping undecodable packet: {err}");
                    continue;
                }
                Err(err) => return Err(TranscodeError::Decode(err)),
            }
        }
    }
}

/// WAV container sink wrapping the file handle for one run.
struct WavSink {
    writer: WavWriter<io::BufWriter<File>>,
}

impl WavSink {
    fn create(path: &Path, spec: WavSpec) -> Result<Self, TranscodeError> {
        let writer = WavWriter::create(path, spec).map_err(|source| TranscodeError::CreateOutput {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self { writer })
    }

    /// Append a chunk of samples, returning how many were accepted. A
    /// rejected sample stops the chunk but not the run.
    fn write_chunk<S: hound::Sample + Copy>(&mut self, chunk: &[S]) -> u64 {
        let mut written = 0u64;
        for sample in chunk {
            if let Err(err) = self.writer.write_sample(*sample) {
                debug!("container writer rejected a sample: {err}");
                break;
            }
            written += 1;
        }
        written
    }

    fn finalize(self) -> Result<(), TranscodeError> {
        self.writer.finalize().map_err(TranscodeError::FinalizeOutput)
    }
}

fn validate_buffer(buffer_bytes: usize, width: usize) -> Result<usize, TranscodeError> {
    if buffer_bytes == 0 || buffer_bytes % width != 0 {
        return Err(TranscodeError::InvalidBufferSize {
            requested: buffer_bytes,
            width,
        });
    }
    Ok(buffer_bytes / width)
}

/// Recommended buffer size: enough bytes for one whole decoded packet.
fn default_buffer_bytes(params: &CodecParameters, format: &NegotiatedFormat) -> usize {
    let frames = params
        .max_frames_per_packet
        .unwrap_or(DEFAULT_FRAMES_PER_PACKET)
        .max(1) as usize;
    frames * format.channels as usize * format.encoding.sample_width()
}

/// One decode-then-write pair per iteration; the loop ends on the first
/// read outcome that is not a chunk and never retries a failed read.
fn transcode_stream<S, F>(
    decoder: &mut ChunkedDecoder<S>,
    sink: &mut WavSink,
    chunk_samples: usize,
    format: &NegotiatedFormat,
    progress: &mut F,
) -> (u64, Option<TranscodeError>)
where
    S: ConvertibleSample + hound::Sample,
    F: FnMut(ProgressEvent),
{
    let width = format.encoding.sample_width() as u64;
    let mut samples_written = 0u64;

    loop {
        match decoder.read_chunk(chunk_samples) {
            Ok(ReadOutcome::Chunk(chunk)) => {
                let expected = chunk.len() as u64;
                let written = sink.write_chunk(chunk);
                if written != expected {
                    warn!(
                        "written sample count does not match the byte count from the decoder: {} != {}",
                        written * width,
                        expected * width,
                    );
                }
                samples_written += written;
                progress(ProgressEvent::Advance {
                    frames_decoded: decoder.frames_decoded,
                });
            }
            Ok(ReadOutcome::Done) => return (samples_written, None),
            Err(err) => return (samples_written, Some(err)),
        }
    }
}

/// Run the MP3 to WAV pipeline described by `config`.
pub fn run(config: TranscodeConfig) -> Result<TranscodeReport, TranscodeError> {
    run_with_progress(config, |_| {})
}

/// Run the MP3 to WAV pipeline, reporting progress through `progress`.
///
/// Every resource is released before this returns, on success and on every
/// error path. An abnormal end of the decode loop does not fail the run:
/// the container is finalized with the samples decoded so far and the
/// cause is carried in [`TranscodeReport::decode_failure`].
pub fn run_with_progress<F>(
    config: TranscodeConfig,
    progress: F,
) -> Result<TranscodeReport, TranscodeError>
where
    F: FnMut(ProgressEvent),
{
    let opened = open_input(&config.input_path)?;
    let format = negotiate_format(&opened.codec_params, config.encoding)?;
    info!(
        "negotiated {} Hz, {} channel(s), {} output",
        format.sample_rate, format.channels, format.encoding
    );

    let index = if config.scan {
        let index = scan_input(&config.input_path)?;
        debug!("seek index holds {} frames", index.total_frames());
        Some(index)
    } else {
        None
    };

    match format.encoding {
        SampleEncoding::Signed16 => run_pipeline::<i16, F>(config, opened, format, index, progress),
        SampleEncoding::Float32 => run_pipeline::<f32, F>(config, opened, format, index, progress),
    }
}

fn run_pipeline<S, F>(
    config: TranscodeConfig,
    opened: OpenedInput,
    format: NegotiatedFormat,
    index: Option<SeekIndex>,
    mut progress: F,
) -> Result<TranscodeReport, TranscodeError>
where
    S: ConvertibleSample + hound::Sample,
    F: FnMut(ProgressEvent),
{
    let codec_params = opened.codec_params.clone();
    let mut decoder = ChunkedDecoder::<S>::new(opened, &format)?;
    let mut sink = WavSink::create(
        &config.output_path,
        format.encoding.wav_spec(format.sample_rate, format.channels),
    )?;

    let width = format.encoding.sample_width();
    let buffer_bytes = match config.buffer_bytes {
        Some(bytes) => bytes,
        None => default_buffer_bytes(&codec_params, &format),
    };
    let chunk_samples = validate_buffer(buffer_bytes, width)?;
    debug!("decode buffer of {buffer_bytes} bytes, {chunk_samples} samples per read");

    let total_frames = index.as_ref().map(SeekIndex::total_frames);
    progress(ProgressEvent::Start { total_frames });

    let (samples_written, failure) =
        transcode_stream(&mut decoder, &mut sink, chunk_samples, &format, &mut progress);
    if decoder.packets_skipped > 0 {
        warn!("skipped {} undecodable packet(s)", decoder.packets_skipped);
    }
    if let Some(err) = &failure {
        warn!("decoding ended prematurely: {err}");
    }

    sink.finalize()?;
    progress(ProgressEvent::Finish);

    Ok(TranscodeReport {
        format,
        total_frames,
        buffer_bytes,
        samples_per_channel: samples_written / u64::from(format.channels),
        packets_skipped: decoder.packets_skipped,
        decode_failure: failure.map(|err| err.to_string()),
    })
}
