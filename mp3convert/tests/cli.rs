use assert_cmd::Command;
use std::error::Error;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::tempdir;

/// Generate a small raw PCM fixture for testing.
///
/// The fixtures are produced on the fly as interleaved little-endian
/// 16-bit stereo sine-wave frames. This keeps the repository free from
/// committed binary assets while still exercising both pipelines
/// end-to-end.
fn write_test_tone<P: AsRef<Path>>(
    path: P,
    sample_rate: u32,
    frames: u32,
) -> Result<(), Box<dyn Error>> {
    let mut bytes = Vec::with_capacity(frames as usize * 4);
    for n in 0..frames {
        let theta = (n as f32 / sample_rate as f32) * 2.0 * std::f32::consts::PI * 440.0;
        let sample = (theta.sin() * 0.5 * i16::MAX as f32) as i16;
        bytes.extend_from_slice(&sample.to_le_bytes());
        bytes.extend_from_slice(&sample.to_le_bytes());
    }
    File::create(path)?.write_all(&bytes)?;
    Ok(())
}

/// Run the encoder binary to turn a tone fixture into an MP3 fixture, so
/// the decoder tests consume exactly what the encoder produces.
fn encode_fixture(dir: &Path, frames: u32) -> Result<PathBuf, Box<dyn Error>> {
    let pcm_path = dir.join("tone.pcm");
    let mp3_path = dir.join("tone.mp3");
    write_test_tone(&pcm_path, 44_100, frames)?;

    let mut cmd = Command::cargo_bin("pcm_to_mp3")?;
    cmd.arg(&pcm_path).arg(&mp3_path);
    cmd.assert().success();

    Ok(mp3_path)
}

#[test]
fn pcm_to_mp3_encodes_and_reports_the_frame_count() -> Result<(), Box<dyn Error>> {
    let work_dir = tempdir()?;
    let pcm_path = work_dir.path().join("tone.pcm");
    let mp3_path = work_dir.path().join("tone.mp3");
    write_test_tone(&pcm_path, 44_100, 44_100)?;

    let mut cmd = Command::cargo_bin("pcm_to_mp3")?;
    let assert = cmd
        .args(["--rate", "44100", "--bitrate", "128"])
        .arg(&pcm_path)
        .arg(&mp3_path)
        .assert()
        .success();

    let stdout = String::from_utf8(assert.get_output().stdout.clone())?;
    assert!(stdout.contains("44100 frames encoded into"));
    assert!(fs::metadata(&mp3_path)?.len() > 0);

    work_dir.close()?;
    Ok(())
}

#[test]
fn mp3_to_wav_reports_the_negotiated_format() -> Result<(), Box<dyn Error>> {
    let work_dir = tempdir()?;
    let mp3_path = encode_fixture(work_dir.path(), 44_100)?;
    let wav_path = work_dir.path().join("tone.wav");

    let mut cmd = Command::cargo_bin("mp3_to_wav")?;
    let assert = cmd.arg(&mp3_path).arg(&wav_path).assert().success();

    let stdout = String::from_utf8(assert.get_output().stdout.clone())?;
    assert!(stdout.contains("Rate: 44100 Hz"));
    assert!(stdout.contains("Channels: 2"));
    assert!(stdout.contains("Encoding: s16"));
    assert!(stdout.contains("Total frames:"));
    assert!(stdout.contains("Buffer size:"));
    assert!(stdout.contains("samples written."));

    let spec = hound::WavReader::open(&wav_path)?.spec();
    assert_eq!(spec.sample_rate, 44_100);
    assert_eq!(spec.channels, 2);
    assert_eq!(spec.bits_per_sample, 16);

    work_dir.close()?;
    Ok(())
}

#[test]
fn skip_scan_omits_the_total_frame_report() -> Result<(), Box<dyn Error>> {
    let work_dir = tempdir()?;
    let mp3_path = encode_fixture(work_dir.path(), 8_192)?;
    let wav_path = work_dir.path().join("tone.wav");

    let mut cmd = Command::cargo_bin("mp3_to_wav")?;
    let assert = cmd
        .arg(&mp3_path)
        .arg(&wav_path)
        .arg("--skip-scan")
        .assert()
        .success();

    let stdout = String::from_utf8(assert.get_output().stdout.clone())?;
    assert!(!stdout.contains("Total frames:"));
    assert!(stdout.contains("samples written."));

    work_dir.close()?;
    Ok(())
}

#[test]
fn float_encoding_is_selectable_from_the_command_line() -> Result<(), Box<dyn Error>> {
    let work_dir = tempdir()?;
    let mp3_path = encode_fixture(work_dir.path(), 8_192)?;
    let wav_path = work_dir.path().join("tone.wav");

    let mut cmd = Command::cargo_bin("mp3_to_wav")?;
    let assert = cmd
        .arg(&mp3_path)
        .arg(&wav_path)
        .arg("f32")
        .arg("4096")
        .assert()
        .success();

    let stdout = String::from_utf8(assert.get_output().stdout.clone())?;
    assert!(stdout.contains("Encoding: f32"));
    assert!(stdout.contains("Buffer size: 4096 bytes"));

    let spec = hound::WavReader::open(&wav_path)?.spec();
    assert_eq!(spec.bits_per_sample, 32);

    work_dir.close()?;
    Ok(())
}

#[test]
fn missing_arguments_are_a_usage_error() -> Result<(), Box<dyn Error>> {
    let mut cmd = Command::cargo_bin("mp3_to_wav")?;
    cmd.arg("only-input.mp3").assert().failure().code(1);

    let mut cmd = Command::cargo_bin("pcm_to_mp3")?;
    cmd.arg("only-input.pcm").assert().failure().code(1);

    let mut cmd = Command::cargo_bin("pcm_to_mp3")?;
    cmd.args(["--rate", "fast", "in.pcm", "out.mp3"])
        .assert()
        .failure()
        .code(1);
    Ok(())
}

#[test]
fn unknown_encoding_exits_with_the_format_error_code() -> Result<(), Box<dyn Error>> {
    let work_dir = tempdir()?;
    let mp3_path = encode_fixture(work_dir.path(), 8_192)?;

    let mut cmd = Command::cargo_bin("mp3_to_wav")?;
    let assert = cmd
        .arg(&mp3_path)
        .arg(work_dir.path().join("out.wav"))
        .arg("pcm24")
        .assert()
        .failure()
        .code(254);

    let stderr = String::from_utf8(assert.get_output().stderr.clone())?;
    assert!(stderr.contains("bad encoding 'pcm24'"));

    work_dir.close()?;
    Ok(())
}

#[test]
fn misaligned_buffer_exits_with_the_buffer_error_code() -> Result<(), Box<dyn Error>> {
    let work_dir = tempdir()?;
    let mp3_path = encode_fixture(work_dir.path(), 8_192)?;

    let mut cmd = Command::cargo_bin("mp3_to_wav")?;
    let assert = cmd
        .arg(&mp3_path)
        .arg(work_dir.path().join("out.wav"))
        .arg("s16")
        .arg("4097")
        .assert()
        .failure()
        .code(253);

    let stderr = String::from_utf8(assert.get_output().stderr.clone())?;
    assert!(stderr.contains("not a positive multiple"));

    work_dir.close()?;
    Ok(())
}

#[test]
fn unreadable_inputs_exit_with_the_open_error_code() -> Result<(), Box<dyn Error>> {
    let work_dir = tempdir()?;

    let mut cmd = Command::cargo_bin("mp3_to_wav")?;
    cmd.arg(work_dir.path().join("missing.mp3"))
        .arg(work_dir.path().join("out.wav"))
        .assert()
        .failure()
        .code(255);

    let mut cmd = Command::cargo_bin("pcm_to_mp3")?;
    cmd.arg(work_dir.path().join("missing.pcm"))
        .arg(work_dir.path().join("out.mp3"))
        .assert()
        .failure()
        .code(255);

    work_dir.close()?;
    Ok(())
}

#[test]
fn garbage_input_fails_to_probe() -> Result<(), Box<dyn Error>> {
    let work_dir = tempdir()?;
    let input_path = work_dir.path().join("input.bin");
    File::create(&input_path)?.write_all(b"not an mpeg stream")?;

    let mut cmd = Command::cargo_bin("mp3_to_wav")?;
    let assert = cmd
        .arg(&input_path)
        .arg(work_dir.path().join("out.wav"))
        .assert()
        .failure()
        .code(255);

    let stderr = String::from_utf8(assert.get_output().stderr.clone())?;
    assert!(stderr.contains("error:"));

    work_dir.close()?;
    Ok(())
}

#[test]
fn a_mid_stream_format_change_exits_with_the_decode_error_code() -> Result<(), Box<dyn Error>> {
    let work_dir = tempdir()?;
    let pcm_path = work_dir.path().join("tone.pcm");
    write_test_tone(&pcm_path, 44_100, 22_050)?;

    // The same tone encoded at two declared rates, then byte-concatenated
    // into one stream that changes format partway through.
    let head_path = work_dir.path().join("head.mp3");
    let mut cmd = Command::cargo_bin("pcm_to_mp3")?;
    cmd.arg(&pcm_path).arg(&head_path);
    cmd.assert().success();

    let tail_path = work_dir.path().join("tail.mp3");
    let mut cmd = Command::cargo_bin("pcm_to_mp3")?;
    cmd.args(["--rate", "22050"]).arg(&pcm_path).arg(&tail_path);
    cmd.assert().success();

    let mixed_path = work_dir.path().join("mixed.mp3");
    let mut mixed = fs::read(&head_path)?;
    mixed.extend_from_slice(&fs::read(&tail_path)?);
    File::create(&mixed_path)?.write_all(&mixed)?;

    let wav_path = work_dir.path().join("mixed.wav");
    let mut cmd = Command::cargo_bin("mp3_to_wav")?;
    let assert = cmd
        .arg(&mixed_path)
        .arg(&wav_path)
        .assert()
        .failure()
        .code(255);

    // The decoded head is kept and the summary is still printed.
    let stdout = String::from_utf8(assert.get_output().stdout.clone())?;
    assert!(stdout.contains("samples written."));
    assert!(wav_path.is_file());

    work_dir.close()?;
    Ok(())
}

#[test]
fn empty_pcm_input_still_produces_an_output() -> Result<(), Box<dyn Error>> {
    let work_dir = tempdir()?;
    let pcm_path = work_dir.path().join("empty.pcm");
    let mp3_path = work_dir.path().join("empty.mp3");
    File::create(&pcm_path)?;

    let mut cmd = Command::cargo_bin("pcm_to_mp3")?;
    let assert = cmd.arg(&pcm_path).arg(&mp3_path).assert().success();

    let stdout = String::from_utf8(assert.get_output().stdout.clone())?;
    assert!(stdout.contains("0 frames encoded into"));
    assert!(mp3_path.is_file());

    work_dir.close()?;
    Ok(())
}
