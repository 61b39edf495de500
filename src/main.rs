//! sofar-probe: a replay and probing tool for the Sofar data-logger TCP protocol
//!
//! Replays captured logger frames against an endpoint and reports what comes
//! back:
//! - Built-in heartbeat and telemetry captures, or hex payload files
//! - Paced, bounded-size write chunks matching the original probe sessions
//! - One acknowledgement frame read and decoded per replayed payload
//! - Configuration via CLI arguments or TOML file

mod capture;
mod config;
mod frame;
mod replay;

use capture::Payload;
use config::Config;
use frame::Frame;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    if config.list_captures {
        list_captures();
        return Ok(());
    }

    let payloads = resolve_payloads(&config)?;

    info!(
        target = %config.target,
        chunk_size = config.chunk_size,
        chunk_delay_ms = config.chunk_delay_ms,
        phases = payloads.len(),
        "Starting sofar-probe"
    );

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let reports = runtime.block_on(replay::run(&config, &payloads))?;

    let acknowledged = reports.iter().filter(|r| r.ack.is_some()).count();
    info!(
        phases = reports.len(),
        acknowledged,
        "Replay complete"
    );

    Ok(())
}

/// Resolve positional arguments into payloads; no arguments means the
/// original heartbeat + telemetry script.
fn resolve_payloads(config: &Config) -> Result<Vec<Payload>, capture::CaptureError> {
    if config.inputs.is_empty() {
        Ok(capture::default_script())
    } else {
        config.inputs.iter().map(|arg| capture::resolve(arg)).collect()
    }
}

/// Print the built-in captures with a decoded summary of each.
fn list_captures() {
    for c in capture::builtins() {
        match Frame::decode(c.bytes) {
            Ok(frame) => println!(
                "{:<12} {:>4} bytes  {:?} from logger 0x{:08x}",
                c.name,
                c.bytes.len(),
                frame.message_type,
                frame.logger_serial
            ),
            Err(err) => println!("{:<12} {:>4} bytes  ({})", c.name, c.bytes.len(), err),
        }
    }
}
