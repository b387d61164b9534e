use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};

use estela_core::config::DEFAULT_PAYLOAD_BITS;
use estela_core::{AudioBuffer, DecodeReport, Key, Parameters, Payload, SpeedMode};

#[derive(Parser)]
#[command(name = "estela", about = "Keyed audio watermarking tool", version)]
struct Cli {
    /// Key file to use (see gen-key)
    #[arg(long, global = true, conflicts_with = "test_key")]
    key: Option<PathBuf>,

    /// Deterministic numbered key (testing only)
    #[arg(long, global = true, value_name = "N")]
    test_key: Option<u64>,

    /// Only print errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Embed a message into a WAV file
    Add {
        /// Input WAV file
        input: PathBuf,

        /// Output WAV file
        output: PathBuf,

        /// Message as a hex string
        message: String,

        #[command(flatten)]
        mark: MarkOpts,

        /// Skip the output limiter (testing only)
        #[arg(long)]
        test_no_limiter: bool,
    },
    /// Read the message carried by a WAV file
    Get {
        /// Marked WAV file
        input: PathBuf,

        #[command(flatten)]
        mark: MarkOpts,

        #[command(flatten)]
        decode: DecodeOpts,
    },
    /// Decode a WAV file and grade the result against a message
    Cmp {
        /// Marked WAV file
        input: PathBuf,

        /// Expected message as a hex string
        message: String,

        /// Minimum exact Block matches for success
        #[arg(long, value_name = "N")]
        expect_matches: Option<usize>,

        #[command(flatten)]
        mark: MarkOpts,

        #[command(flatten)]
        decode: DecodeOpts,
    },
    /// Generate a fresh random key file
    GenKey {
        /// Key file to write
        output: PathBuf,
    },
}

/// Options shared by every command that touches a mark.
#[derive(Args)]
struct MarkOpts {
    /// Embedding strength
    #[arg(long, default_value_t = 0.025)]
    strength: f32,

    /// Payload bits for the error-correcting short mode (16, 32, 48 or 64)
    #[arg(long, value_name = "BITS")]
    short: Option<usize>,

    /// Data frames carrying each message bit
    #[arg(long, default_value_t = 2)]
    frames_per_bit: usize,

    /// Escalate recoverable problems to hard errors
    #[arg(long)]
    strict: bool,
}

/// Decode-side options for get and cmp.
#[derive(Args)]
struct DecodeOpts {
    /// Scan for playback-speed drift before decoding
    #[arg(long, conflicts_with_all = ["detect_speed_patient", "try_speed"])]
    detect_speed: bool,

    /// Like --detect-speed, slower and more precise
    #[arg(long, conflicts_with = "try_speed")]
    detect_speed_patient: bool,

    /// Decode at this exact playback-speed ratio
    #[arg(long, value_name = "RATIO")]
    try_speed: Option<f64>,

    /// Assume Block-aligned audio instead of searching (testing only)
    #[arg(long)]
    test_no_sync: bool,

    /// Drop this many leading samples before decoding (testing only)
    #[arg(long, value_name = "SAMPLES")]
    test_cut: Option<usize>,

    /// Decode only the first N seconds (testing only)
    #[arg(long, value_name = "SECONDS")]
    test_truncate: Option<u32>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.quiet { "error" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Add {
            input,
            output,
            message,
            mark,
            test_no_limiter,
        } => {
            let key = resolve_key(cli.key.as_deref(), cli.test_key)?;
            let payload = Payload::from_hex(&message)?;
            let params = Parameters {
                test_no_limiter,
                ..mark_params(&mark)
            };

            let (mut buffer, spec) = read_wav(&input)?;
            if !cli.quiet {
                eprintln!(
                    "embedding into {} ({} samples, {} channels, {} Hz)",
                    input.display(),
                    buffer.len(),
                    buffer.channels(),
                    buffer.sample_rate()
                );
            }
            let original = buffer.samples().to_vec();
            estela_core::embed(&mut buffer, &key, &payload, &params)?;
            write_wav(&output, &buffer, spec)?;
            println!("message {}", payload.to_hex());
            println!("snr {:.2} dB", watermark_snr(&original, buffer.samples()));
            if !cli.quiet {
                eprintln!("marked audio written to {}", output.display());
            }
        }
        Command::Get {
            input,
            mark,
            decode,
        } => {
            let key = resolve_key(cli.key.as_deref(), cli.test_key)?;
            let params = Parameters {
                speed: speed_mode(&decode),
                test_no_sync: decode.test_no_sync,
                test_cut: decode.test_cut,
                test_truncate_seconds: decode.test_truncate,
                ..mark_params(&mark)
            };

            let (buffer, _) = read_wav(&input)?;
            let report = estela_core::decode(&buffer, &key, &params)?;
            if !print_report(&report, buffer.sample_rate(), &params) {
                std::process::exit(1);
            }
        }
        Command::Cmp {
            input,
            message,
            expect_matches,
            mark,
            decode,
        } => {
            let key = resolve_key(cli.key.as_deref(), cli.test_key)?;
            let expected = Payload::from_hex(&message)?;
            let params = Parameters {
                speed: speed_mode(&decode),
                required_matches: expect_matches,
                test_no_sync: decode.test_no_sync,
                test_cut: decode.test_cut,
                test_truncate_seconds: decode.test_truncate,
                ..mark_params(&mark)
            };

            let (buffer, _) = read_wav(&input)?;
            let comparison = estela_core::compare(&buffer, &key, &expected, &params)?;
            println!("bit_errors {}", comparison.bit_errors);
            println!("bit_error_rate {:.4}", comparison.bit_error_rate);
            println!("match_count {}", comparison.match_count);
            if !comparison.required_met {
                eprintln!("no match");
                std::process::exit(1);
            }
        }
        Command::GenKey { output } => {
            let key = Key::generate();
            let text = format!("# watermarking key for estela\n\nkey {}\n", key.to_hex());
            std::fs::write(&output, text)?;
            if !cli.quiet {
                eprintln!("key written to {}", output.display());
            }
        }
    }

    Ok(())
}

/// Key precedence: --test-key, then --key, then the all-zero default.
fn resolve_key(
    key_file: Option<&Path>,
    test_key: Option<u64>,
) -> Result<Key, Box<dyn std::error::Error>> {
    if let Some(n) = test_key {
        return Ok(Key::from_test_key(n));
    }
    if let Some(path) = key_file {
        let text = std::fs::read_to_string(path)?;
        return Ok(Key::parse_key_file(&text)?);
    }
    Ok(Key::new(&[0; 16])?)
}

fn mark_params(mark: &MarkOpts) -> Parameters {
    Parameters {
        strength: mark.strength,
        frames_per_bit: mark.frames_per_bit,
        short: mark.short.is_some(),
        payload_size: mark.short.unwrap_or(DEFAULT_PAYLOAD_BITS),
        strict: mark.strict,
        ..Parameters::default()
    }
}

fn speed_mode(decode: &DecodeOpts) -> SpeedMode {
    if let Some(ratio) = decode.try_speed {
        SpeedMode::Fixed(ratio)
    } else if decode.detect_speed_patient {
        SpeedMode::Patient
    } else if decode.detect_speed {
        SpeedMode::Quick
    } else {
        SpeedMode::Disabled
    }
}

/// Prints sync and message lines; true when the mark counts as found.
fn print_report(report: &DecodeReport, sample_rate: u32, params: &Parameters) -> bool {
    for candidate in &report.diagnostics.candidates {
        println!(
            "sync {} {:.3}",
            format_time(candidate.offset, sample_rate),
            candidate.score
        );
    }
    match report.outcome.decoded() {
        Some(decoded) => {
            println!(
                "pattern all {} {:.3} {:.3}{}",
                decoded.payload.to_hex(),
                decoded.confidence,
                decoded.bit_error_estimate,
                if decoded.uncorrected { " ecc-failed" } else { "" }
            );
            if let Some(n) = decoded.corrected_errors {
                println!("ecc corrected {n}");
            }
            if !matches!(params.speed, SpeedMode::Disabled) {
                println!("speed {:.4}", report.diagnostics.speed_ratio);
            }
            report.outcome.is_found()
        }
        None => {
            eprintln!("no watermark found");
            false
        }
    }
}

fn format_time(offset: usize, sample_rate: u32) -> String {
    let seconds = offset / sample_rate as usize;
    format!("{}:{:02}", seconds / 60, seconds % 60)
}

/// Ratio of signal energy to watermark delta energy, in dB.
fn watermark_snr(original: &[f32], marked: &[f32]) -> f64 {
    let mut signal = 0.0f64;
    let mut delta = 0.0f64;
    for (o, m) in original.iter().zip(marked.iter()) {
        signal += f64::from(*o) * f64::from(*o);
        let d = f64::from(m - o);
        delta += d * d;
    }
    if delta == 0.0 {
        return f64::INFINITY;
    }
    10.0 * (signal / delta).log10()
}

fn read_wav(path: &Path) -> Result<(AudioBuffer, hound::WavSpec), Box<dyn std::error::Error>> {
    let reader = hound::WavReader::open(path)?;
    let spec = reader.spec();

    let samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<Result<Vec<f32>, _>>()?,
        hound::SampleFormat::Int => {
            let max = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .into_samples::<i32>()
                .collect::<Result<Vec<i32>, _>>()?
                .into_iter()
                .map(|s| s as f32 / max)
                .collect()
        }
    };

    let buffer = AudioBuffer::new(samples, spec.channels as usize, spec.sample_rate)?;
    Ok((buffer, spec))
}

/// Writes the buffer back in the input's sample format.
fn write_wav(
    path: &Path,
    buffer: &AudioBuffer,
    spec: hound::WavSpec,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut writer = hound::WavWriter::create(path, spec)?;
    match spec.sample_format {
        hound::SampleFormat::Float => {
            for &s in buffer.samples() {
                writer.write_sample(s)?;
            }
        }
        hound::SampleFormat::Int => {
            let max = (1i64 << (spec.bits_per_sample - 1)) as f32;
            let hi = max - 1.0;
            for &s in buffer.samples() {
                writer.write_sample((s * max).round().clamp(-max, hi) as i32)?;
            }
        }
    }
    writer.finalize()?;
    Ok(())
}
