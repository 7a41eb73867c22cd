use std::path::PathBuf;

use clap::{value_parser, Arg, ArgAction, Command};

pub fn build_cli() -> Command {
    Command::new("mp3_to_wav")
        .about("Decode an MP3 file into a WAV file")
        .version(env!("CARGO_PKG_VERSION"))
        .arg(
            Arg::new("input")
                .value_name("INPUT")
                .help("Path to the MP3 file to decode")
                .required(true)
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("output")
                .value_name("OUTPUT")
                .help("Path of the WAV file to create")
                .required(true)
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("encoding")
                .value_name("ENCODING")
                .help("Output sample encoding: s16 (default) or f32"),
        )
        .arg(
            Arg::new("buffer")
                .value_name("BYTES")
                .help("Decode buffer size in bytes (multiple of the sample width)")
                .requires("encoding")
                .value_parser(value_parser!(u64)),
        )
        .arg(
            Arg::new("skip-scan")
                .long("skip-scan")
                .help("Skip the pre-decode scan that counts the total frames")
                .action(ArgAction::SetTrue),
        )
}
