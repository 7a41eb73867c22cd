mod cli;

use std::cell::RefCell;
use std::path::PathBuf;
use std::time::Duration;

use clap::error::ErrorKind;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use mp3convert_core::transcode::{
    self, ProgressEvent, SampleEncoding, TranscodeConfig, TranscodeError,
};

use crate::cli::build_cli;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    std::process::exit(run());
}

/// Exit codes follow the reference tool: negative codes show up as
/// 255/254/253 on Unix.
fn exit_code(err: &TranscodeError) -> i32 {
    match err {
        TranscodeError::UnsupportedEncoding { .. }
        | TranscodeError::CreateOutput { .. }
        | TranscodeError::FinalizeOutput(_) => -2,
        TranscodeError::InvalidBufferSize { .. } => -3,
        _ => -1,
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

    let encoding = match matches.get_one::<String>("encoding") {
        Some(spelling) => match SampleEncoding::parse(spelling) {
            Ok(encoding) => encoding,
            Err(err) => {
                eprintln!("error: {err}");
                return exit_code(&err);
            }
        },
        None => SampleEncoding::default(),
    };

    let mut config = TranscodeConfig::new(input_path, output_path)
        .encoding(encoding)
        .scan(!matches.get_flag("skip-scan"));
    if let Some(bytes) = matches.get_one::<u64>("buffer") {
        config = config.buffer_bytes(*bytes as usize);
    }

    println!("Input file: {}", input_path.display());
    println!("Output file: {}", output_path.display());

    let progress = ProgressBar::new(0);
    progress.set_draw_target(ProgressDrawTarget::stderr());

    let bar_style = ProgressStyle::with_template(
        "{spinner:.green} [{elapsed_precise}] {bar:40.cyan/blue} {msg}",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar());
    let spinner_style = ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner());

    let total_frames = RefCell::new(None::<u64>);

    let progress_handle = progress.clone();
    let result = transcode::run_with_progress(config, move |event| match event {
        ProgressEvent::Start { total_frames: total } => {
            let mut total_frames = total_frames.borrow_mut();
            if let Some(total) = total {
                *total_frames = Some(total.max(1));
                progress_handle.set_style(bar_style.clone());
                progress_handle.set_length(total.max(1));
            } else {
                *total_frames = None;
                progress_handle.set_style(spinner_style.clone());
            }
            progress_handle.enable_steady_tick(Duration::from_millis(100));
            progress_handle.set_message(String::new());
        }
        ProgressEvent::Advance { frames_decoded } => {
            if let Some(total) = *total_frames.borrow() {
                progress_handle.set_position(frames_decoded.min(total));
            }
            progress_handle.set_message(format!("{frames_decoded} frames"));
        }
        ProgressEvent::Finish => {
            progress_handle.set_message(String::from("Completed"));
        }
    });

    progress.finish_and_clear();

    let report = match result {
        Ok(report) => report,
        Err(err) => {
            eprintln!("error: {err}");
            return exit_code(&err);
        }
    };

    println!("Rate: {} Hz", report.format.sample_rate);
    println!("Channels: {}", report.format.channels);
    println!("Encoding: {}", report.format.encoding);
    if let Some(total) = report.total_frames {
        println!("Total frames: {total}");
    }
    println!("Buffer size: {} bytes", report.buffer_bytes);
    println!("{} samples written.", report.samples_per_channel);

    // The premature end was already logged by the pipeline; only the exit
    // status still has to reflect it.
    if report.decode_failure.is_some() {
        return -1;
    }
    0
}
