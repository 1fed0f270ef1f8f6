use std::time::Duration;
use clap::Parser;
use log::{error, info, LevelFilter};
use microbit_accel::app::RunOptions;
use microbit_accel::{init_logging, run};
use microbit_accel::error::{AppRunError, ConfigError};

#[derive(Parser, Debug)]
#[command(author, version)]
#[command(about = "Streams accelerometer readings from a BBC micro:bit over Bluetooth LE.\n\nExample: microbit-accel --scan-timeout 10s --save", long_about = None)]
struct Args {
    /// Peripheral to connect to: its address, or the CoreBluetooth UUID on macOS.
    /// Without it the first device named "BBC micro:bit" is used.
    #[arg(long)]
    device: Option<String>,

    /// How long to scan for the device, for example "5s" or "1500ms".
    #[arg(long, value_parser = humantime::parse_duration)]
    scan_timeout: Option<Duration>,

    /// Remember the device that was used in the config file.
    #[arg(long)]
    save: bool,

    /// Log debug messages.
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), AppRunError> {
    let args = Args::parse();

    init_logging(if args.verbose { LevelFilter::Debug } else { LevelFilter::Info });
    info!(concat!("microbit-accel ", env!("CARGO_PKG_VERSION")));

    let options = RunOptions {
        device_id: args.device,
        scan_timeout: args.scan_timeout,
        save_device: args.save,
    };

    match run(options).await {
        Err(AppRunError::ConfigError { source: ConfigError::CanNotLock { .. } }) => {
            error!("This application has already been started");
            Ok(())
        },
        Err(err) => {
            error!("Unexpected error: {}", err);
            Err(err)
        },
        Ok(_) => Ok(()),
    }
}
