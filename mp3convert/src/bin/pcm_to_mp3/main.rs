mod cli;

use std::path::PathBuf;

use clap::error::ErrorKind;
use mp3convert_core::encode::{self, EncodeConfig, EncodeError};

use crate::cli::build_cli;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    std::process::exit(run());
}

/// Only a failure to open one of the two files earns the reference tool's
/// -1 (255 on Unix); everything after the files are open exits 1.
fn exit_code(err: &EncodeError) -> i32 {
    match err {
        EncodeError::OpenInput { .. } | EncodeError::CreateOutput { .. } => -1,
        _ => 1,
    }
}

fn run() -> i32 {
    let matches = match build_cli().try_get_matches() {
        Ok(matches) => matches,
        Err(err) => {
            let code = match err.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
                _ => 1,
            };
            let _ = err.print();
            return code;
        }
    };

    let input_path = matches
        .get_one::<PathBuf>("input")
        .expect("required argument");
    let output_path = matches
        .get_one::<PathBuf>("output")
        .expect("required argument");
    let rate = *matches.get_one::<u32>("rate").expect("defaulted argument");
    let bitrate = *matches
        .get_one::<u32>("bitrate")
        .expect("defaulted argument");

    let config = EncodeConfig::new(input_path, output_path)
        .sample_rate(rate)
        .bitrate_kbps(bitrate);

    println!("Input file: {}", input_path.display());
    println!("Output file: {}", output_path.display());

    match encode::run(config) {
        Ok(report) => {
            println!(
                "{} frames encoded into {} bytes.",
                report.frames_read, report.bytes_written
            );
            0
        }
        Err(err) => {
            eprintln!("error: {err}");
            exit_code(&err)
        }
    }
}
