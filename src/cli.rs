use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::info;

use flowlens_lib::capture;
use flowlens_lib::config::{Config, OutputFormat};
use flowlens_lib::emitter::StdoutSink;

#[derive(Parser)]
#[command(name = "flowlens")]
#[command(author, version, about = "Bidirectional flow tracker emitting per-packet flow features")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List capture-capable network interfaces
    Interfaces {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Track flows and print a feature record for every packet
    Run {
        /// Live interface to capture on
        #[arg(short, long, conflicts_with = "file")]
        interface: Option<String>,

        /// Replay a capture file instead of sniffing
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// BPF filter expression
        #[arg(long)]
        filter: Option<String>,

        /// Output format
        #[arg(long, value_enum)]
        format: Option<OutputFormat>,

        /// Evict flows idle for this many seconds
        #[arg(long)]
        idle_timeout: Option<u64>,
    },
}

pub fn run_command(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Interfaces { json } => {
            let interfaces = capture::list_interfaces().context("Failed to list network devices")?;
            if json {
                println!("{}", serde_json::to_string_pretty(&interfaces)?);
            } else {
                for iface in interfaces {
                    let state = if iface.is_up { "up" } else { "down" };
                    println!("{:<16} {:<6} {}", iface.name, state, iface.description);
                }
            }
        }

        Commands::Run { interface, file, filter, format, idle_timeout } => {
            let mut config = match &cli.config {
                Some(path) => Config::load(path)?,
                None => Config::load_or_default()?,
            };

            // Command line wins over the file
            if let Some(interface) = interface {
                config.capture.interface = Some(interface);
                config.capture.file = None;
            }
            if let Some(file) = file {
                config.capture.file = Some(file);
                config.capture.interface = None;
            }
            if let Some(filter) = filter {
                config.capture.filter = filter;
            }
            if let Some(format) = format {
                config.emitter.format = format;
            }
            if idle_timeout.is_some() {
                config.tracker.idle_timeout_secs = idle_timeout;
            }
            config.validate().context("Invalid configuration")?;

            run(&config)?;
        }
    }

    Ok(())
}

fn run(config: &Config) -> Result<()> {
    let running = Arc::new(AtomicBool::new(true));
    let running_clone = running.clone();
    ctrlc::set_handler(move || {
        running_clone.store(false, Ordering::Relaxed);
    })?;

    let sink = StdoutSink::stdout(config.emitter.format);
    let system = flowlens_lib::start_system(config, Box::new(sink))
        .context("Failed to start capture")?;

    while running.load(Ordering::Relaxed) && !system.is_finished() {
        thread::sleep(Duration::from_millis(100));
    }
    if !running.load(Ordering::Relaxed) {
        info!("Received Ctrl+C, stopping...");
    }

    let stats = system.stop_system().context("Capture ended with an error")?;
    info!(
        received = stats.capture.received,
        malformed = stats.capture.malformed,
        packets = stats.tracker.packets_processed,
        flows = stats.tracker.flows_created,
        records = stats.tracker.records_emitted,
        "Done"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_overrides_parse() {
        let cli = Cli::parse_from([
            "flowlens", "run", "--file", "trace.pcap", "--format", "text", "--idle-timeout", "30",
        ]);
        match cli.command {
            Commands::Run { file, format, idle_timeout, interface, .. } => {
                assert_eq!(file, Some(PathBuf::from("trace.pcap")));
                assert_eq!(format, Some(OutputFormat::Text));
                assert_eq!(idle_timeout, Some(30));
                assert!(interface.is_none());
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_interface_conflicts_with_file() {
        let res = Cli::try_parse_from(["flowlens", "run", "-i", "eth0", "-f", "trace.pcap"]);
        assert!(res.is_err());
    }
}
