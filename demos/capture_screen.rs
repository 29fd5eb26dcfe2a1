// Screen capture example
//
// Reads the capture currently latched on the scope and writes the screen
// bitmap to a PNG file. The scope must be set to bitmap transfer mode.

use clap::Parser;
use image::{ImageBuffer, Rgb};
use owonpds::{OwonContext, OwonScope};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "capture_screen")]
#[command(about = "Save the Owon PDS screen as a PNG file")]
struct Args {
    /// Device index as printed by the list_devices example
    #[arg(short, long, default_value_t = 0)]
    device: usize,

    /// Stream timeout in milliseconds
    #[arg(short, long, default_value_t = 5000)]
    timeout: u64,

    /// Output file
    #[arg(short, long, default_value = "screen.png")]
    output: PathBuf,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let ctx = OwonContext::new()?;
    let mut scope = OwonScope::open(&ctx, args.device)?;
    let capture = scope.read_timeout(Duration::from_millis(args.timeout))?;

    let bitmap = match capture.bitmap() {
        Some(bitmap) => bitmap,
        None => {
            eprintln!("The scope sent waveform data. Switch it to bitmap transfer mode.");
            std::process::exit(1);
        }
    };

    let image: ImageBuffer<Rgb<u8>, Vec<u8>> = ImageBuffer::from_raw(
        bitmap.width as u32,
        bitmap.height as u32,
        bitmap.data.clone(),
    )
    .ok_or("bitmap size does not match its dimensions")?;
    image.save(&args.output)?;
    println!(
        "Wrote {}x{} PNG to {}",
        bitmap.width,
        bitmap.height,
        args.output.display()
    );

    scope.close();
    Ok(())
}
