//! Core library for converting between MP3 and raw PCM audio.
//!
//! Two pipelines are provided. [`transcode`] decodes an MP3 file into a
//! WAV container, with an optional pre-decode scan that builds a seek
//! index for diagnostics and progress totals. [`encode`] reads raw
//! interleaved stereo PCM and produces an MP3 file through the LAME
//! backend.
//!
//! Both pipelines are driven by a config struct and report a summary of
//! the finished run, leaving all terminal output to the binaries.

pub mod encode;
pub mod transcode;

pub use encode::{EncodeConfig, EncodeError, EncodeReport};
pub use transcode::{
    ProgressEvent, SampleEncoding, TranscodeConfig, TranscodeError, TranscodeReport,
};
