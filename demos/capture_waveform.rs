// Waveform capture example
//
// Reads the capture currently latched on the scope, prints a per-channel
// summary and optionally writes the calibrated samples as CSV.

use clap::Parser;
use owonpds::{Channel, OwonContext, OwonScope};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "capture_waveform")]
#[command(about = "Read a waveform capture from an Owon PDS oscilloscope")]
struct Args {
    /// Device index as printed by the list_devices example
    #[arg(short, long, default_value_t = 0)]
    device: usize,

    /// Stream timeout in milliseconds
    #[arg(short, long, default_value_t = 5000)]
    timeout: u64,

    /// Write the calibrated samples to this CSV file
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    if args.verbose {
        env_logger::Builder::from_default_env()
            .filter_level(log::LevelFilter::Debug)
            .init();
    } else {
        env_logger::init();
    }

    let ctx = OwonContext::new()?;
    let mut scope = OwonScope::open(&ctx, args.device)?;
    println!(
        "Connected to {} {}",
        scope.manufacturer().unwrap_or("?"),
        scope.product().unwrap_or("?")
    );

    let capture = scope.read_timeout(Duration::from_millis(args.timeout))?;
    println!(
        "Capture from {} ({} declared bytes)",
        capture.name, capture.file_length
    );

    let channels = capture.channels();
    if channels.is_empty() {
        println!("No waveform channels. The scope is set to bitmap transfer; see capture_screen.");
    }
    for channel in channels {
        println!(
            "  {}: {} samples, {} s/div, {} V/div (x{} probe), {:.0} Sa/s, offset {:.3} V",
            channel.name,
            channel.volts.len(),
            channel.timebase,
            channel.sensitivity,
            channel.attenuation,
            channel.sample_rate,
            channel.offset
        );
    }

    if let Some(path) = &args.output {
        let mut writer = BufWriter::new(File::create(path)?);
        write_csv(&mut writer, channels)?;
        println!("Wrote samples to {}", path.display());
    }

    scope.close();
    Ok(())
}

// One row per sample index; shorter channels leave their field empty
fn write_csv(out: &mut impl Write, channels: &[Channel]) -> std::io::Result<()> {
    let names: Vec<&str> = channels.iter().map(|channel| channel.name.as_str()).collect();
    writeln!(out, "time,{}", names.join(","))?;

    let rows = channels.iter().map(|channel| channel.volts.len()).max().unwrap_or(0);
    let interval = channels
        .first()
        .map_or(0.0, |channel| channel.sample_interval());
    for row in 0..rows {
        write!(out, "{}", row as f64 * interval)?;
        for channel in channels {
            match channel.volts.get(row) {
                Some(volts) => write!(out, ",{}", volts)?,
                None => write!(out, ",")?,
            }
        }
        writeln!(out)?;
    }
    Ok(())
}
