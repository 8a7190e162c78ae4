pub mod capture;
pub mod config;
pub mod emitter;
pub mod error;
pub mod processor;
pub mod types;

use tracing::{info, warn};

use capture::{PacketSniffer, SnifferStats};
use config::Config;
use emitter::FeatureSink;
use error::{FlowError, Result};
use processor::{FeatureProcessor, TrackerStats};

/// Final counters of a finished run.
#[derive(Debug, Clone, Default)]
pub struct RunStats {
    pub capture: SnifferStats,
    pub tracker: TrackerStats,
}

/// A running capture: one sniffer feeding one processor.
pub struct System {
    sniffer: PacketSniffer,
    processor: FeatureProcessor,
}

/// Opens the configured capture source and starts the pipeline, sending
/// every feature record to `sink`.
///
/// With no file and no interface configured, the pcap default device is used.
pub fn start_system(config: &Config, sink: Box<dyn FeatureSink + Send>) -> Result<System> {
    config.validate()?;

    let mut processor = FeatureProcessor::new(config.capture.channel_capacity);
    let mut sniffer = PacketSniffer::new_with_sender(processor.get_sender()?);

    match (&config.capture.file, &config.capture.interface) {
        (Some(path), _) => sniffer.init_offline(path, &config.capture)?,
        (None, Some(interface)) => {
            match capture::interface_info(interface) {
                Ok(info) => info!(interface = %info.name, description = %info.description, up = info.is_up, "Selected interface"),
                Err(e) => warn!("{e}"),
            }
            sniffer.init_sniffer(interface, &config.capture)?;
        }
        (None, None) => {
            let device = capture::default_interface()?;
            info!(interface = %device.name, description = %device.description, "Using default interface");
            sniffer.init_sniffer(&device.name, &config.capture)?;
        }
    }

    processor.start_processor(config, sink)?;
    if let Err(e) = sniffer.start_sniffer() {
        let _ = processor.stop_processor();
        return Err(e);
    }

    info!("System started successfully");
    Ok(System { sniffer, processor })
}

impl System {
    /// True once the pipeline has run dry: the capture source is exhausted
    /// and the engine drained its queue, or either side failed.
    pub fn is_finished(&self) -> bool {
        self.processor.is_finished()
    }

    pub fn stop_system(mut self) -> Result<RunStats> {
        let captured = self.sniffer.stop_sniffer();
        let processed = self.processor.stop_processor();

        // A capture failure is the root cause of anything the engine saw after it.
        let capture = captured?;
        let tracker = match processed {
            Err(FlowError::NotRunning(_)) => TrackerStats::default(),
            other => other?,
        };
        info!("System stopped successfully");
        Ok(RunStats { capture, tracker })
    }
}
