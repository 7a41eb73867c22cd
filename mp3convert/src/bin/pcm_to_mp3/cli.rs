use std::path::PathBuf;

use clap::{value_parser, Arg, Command};

pub fn build_cli() -> Command {
    Command::new("pcm_to_mp3")
        .about("Encode raw interleaved 16-bit stereo PCM into an MP3 file")
        .version(env!("CARGO_PKG_VERSION"))
        .arg(
            Arg::new("input")
                .value_name("INPUT")
                .help("Path to the raw PCM file to encode")
                .required(true)
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("output")
                .value_name("OUTPUT")
                .help("Path of the MP3 file to create")
                .required(true)
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("rate")
                .short('r')
                .long("rate")
                .value_name("HZ")
                .help("Sample rate of the input")
                .default_value("44100")
                .value_parser(value_parser!(u32)),
        )
        .arg(
            Arg::new("bitrate")
                .short('b')
                .long("bitrate")
                .value_name("KBPS")
                .help("Target bitrate, rounded up to a supported step")
                .default_value("128")
                .value_parser(value_parser!(u32)),
        )
}
