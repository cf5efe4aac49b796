//! CAN to MQTT bridge service
//!
//! Console entry for the bridge engine: loads the configuration given as
//! the single positional argument, starts the bridge and runs until
//! SIGINT. The exit code reflects initialization success.

use anyhow::{bail, Context, Result};
use can_mqtt_bridge::CanMqttBridge;
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// CAN to MQTT bridge - publish decoded CAN signals as MQTT metrics
#[derive(Parser, Debug)]
#[command(name = "can-mqtt-server")]
#[command(about = "Bridge live CAN bus traffic to MQTT metric topics", long_about = None)]
#[command(version)]
struct Args {
    /// Path to the bridge configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Verbosity level (can be repeated: -v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long)]
    quiet: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(args.verbose, args.quiet);

    log::info!(
        "CAN to MQTT bridge v{} (library v{})",
        env!("CARGO_PKG_VERSION"),
        can_mqtt_bridge::VERSION
    );

    let mut service = CanMqttBridge::new();
    service.set_config_file(args.config.to_string_lossy());
    if service.load_config().is_err() {
        bail!("Can't parse the config file: {:?}", args.config);
    }
    if service.start().is_err() {
        bail!("Can't start the service");
    }
    log::info!(
        "Bridge running, publishing to {}:{}",
        service.broker_host(),
        service.broker_port()
    );

    wait_for_shutdown().context("Failed to install the signal handler")?;

    log::info!("Stopping the bridge");
    service.stop();
    Ok(())
}

/// Block until SIGINT/SIGTERM arrives
fn wait_for_shutdown() -> Result<()> {
    let running = Arc::new(AtomicBool::new(true));
    let handler_flag = Arc::clone(&running);
    ctrlc::set_handler(move || {
        handler_flag.store(false, Ordering::SeqCst);
    })?;
    while running.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(200));
    }
    Ok(())
}

/// Initialize logging based on verbosity level
fn init_logging(verbose: u8, quiet: bool) {
    use env_logger::Builder;
    use log::LevelFilter;
    use std::io::Write;

    let level = if quiet {
        LevelFilter::Error
    } else {
        match verbose {
            0 => LevelFilter::Info,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    };

    Builder::new()
        .filter_level(level)
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {}] {}",
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();
}
