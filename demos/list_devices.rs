// Device discovery example
//
// Lists the Owon PDS oscilloscopes currently attached over USB.

use owonpds::OwonContext;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let ctx = OwonContext::new()?;
    let devices = ctx.list_devices()?;

    if devices.is_empty() {
        println!("No Owon PDS oscilloscopes found. Connect a scope and try again.");
        return Ok(());
    }

    println!("Found {} device(s):", devices.len());
    for device in &devices {
        println!(
            "  [{}] bus {:03} address {:03}",
            device.index, device.bus_number, device.address
        );
    }
    println!("\nPass an index to the capture examples, e.g. --device 0");

    Ok(())
}
