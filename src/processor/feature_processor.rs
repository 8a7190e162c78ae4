use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::info;

use crate::capture::ParsedPacket;
use crate::config::Config;
use crate::emitter::FeatureSink;
use crate::error::{FlowError, Result};
use crate::types::NetworkStats;
use super::engine::{self, EngineSettings};
use super::publisher;
use super::tracker::{FlowTracker, TrackerStats};

pub struct FeatureProcessor {
    running: Arc<AtomicBool>,
    processing_thread: Option<JoinHandle<Result<TrackerStats>>>,
    publisher_thread: Option<JoinHandle<()>>,
    // Channel ends are handed off on start
    packet_tx: Option<Sender<ParsedPacket>>,
    packet_rx: Option<Receiver<ParsedPacket>>,
    stats_tx: Option<Sender<NetworkStats>>,
    stats_rx: Receiver<NetworkStats>,
}

impl FeatureProcessor {
    /// `capacity` bounds the packet queue; `None` leaves it unbounded.
    pub fn new(capacity: Option<usize>) -> Self {
        let (packet_tx, packet_rx) = match capacity {
            Some(n) => bounded(n),
            None => unbounded(),
        };
        let (stats_tx, stats_rx) = unbounded();
        Self {
            running: Arc::new(AtomicBool::new(false)),
            processing_thread: None,
            publisher_thread: None,
            packet_tx: Some(packet_tx),
            packet_rx: Some(packet_rx),
            stats_tx: Some(stats_tx),
            stats_rx,
        }
    }

    /// Sender for the packet source. Only available before the processor starts.
    pub fn get_sender(&self) -> Result<Sender<ParsedPacket>> {
        self.packet_tx.clone().ok_or(FlowError::AlreadyRunning("Processor"))
    }

    pub fn start_processor(&mut self, config: &Config, sink: Box<dyn FeatureSink + Send>) -> Result<()> {
        if self.running.load(Ordering::Relaxed) {
            return Err(FlowError::AlreadyRunning("Processor"));
        }
        let (Some(packet_rx), Some(stats_tx)) = (self.packet_rx.take(), self.stats_tx.take()) else {
            return Err(FlowError::AlreadyRunning("Processor"));
        };
        self.running.store(true, Ordering::Relaxed);

        // From here on only the packet source holds senders and only the
        // engine holds the receiver, so either side ending closes the queue.
        self.packet_tx = None;

        let settings = EngineSettings {
            idle_timeout: config.tracker.idle_timeout(),
            sweep_interval: config.tracker.sweep_interval(),
            stats_interval: Duration::from_secs(config.stats.interval_secs),
        };
        let tracker = FlowTracker::new(&config.tracker);

        let processing = {
            let running = self.running.clone();
            thread::spawn(move || engine::processing_loop(running, packet_rx, stats_tx, tracker, sink, settings))
        };

        let publisher = {
            let running = self.running.clone();
            let stats_rx = self.stats_rx.clone();
            let interval = Duration::from_millis(config.stats.publish_interval_ms);
            thread::spawn(move || publisher::publisher_loop(running, stats_rx, interval))
        };

        self.processing_thread = Some(processing);
        self.publisher_thread = Some(publisher);
        info!("Processor started");
        Ok(())
    }

    /// True once the processing loop has returned, e.g. because the packet source closed.
    pub fn is_finished(&self) -> bool {
        self.processing_thread.as_ref().map_or(true, |h| h.is_finished())
    }

    pub fn stop_processor(&mut self) -> Result<TrackerStats> {
        if !self.running.swap(false, Ordering::Relaxed) {
            return Err(FlowError::NotRunning("Processor"));
        }

        let result = match self.processing_thread.take() {
            Some(h) => h.join().map_err(|_| FlowError::ThreadPanicked("Processor"))?,
            None => Ok(TrackerStats::default()),
        };
        if let Some(h) = self.publisher_thread.take() { let _ = h.join(); }
        info!("Processor stopped");
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emitter::ChannelSink;
    use std::net::{IpAddr, Ipv4Addr};
    use std::time::Instant;

    #[test]
    fn test_processor_runs_until_source_closes() {
        let (rec_tx, rec_rx) = unbounded();
        let mut processor = FeatureProcessor::new(Some(16));
        let tx = processor.get_sender().unwrap();
        processor.start_processor(&Config::default(), Box::new(ChannelSink::new(rec_tx))).unwrap();
        assert!(processor.get_sender().is_err());

        let a = IpAddr::V4(Ipv4Addr::new(192, 168, 1, 10));
        let b = IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8));
        tx.send(ParsedPacket::ip(a, 5353, b, 53, 17, 70, 0.0)).unwrap();
        tx.send(ParsedPacket::ip(b, 53, a, 5353, 17, 130, 0.02)).unwrap();
        drop(tx);

        let deadline = Instant::now() + Duration::from_secs(5);
        while !processor.is_finished() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(processor.is_finished());

        let stats = processor.stop_processor().unwrap();
        assert_eq!(stats.packets_processed, 2);
        assert_eq!(stats.flows_created, 1);
        assert_eq!(rec_rx.try_iter().count(), 2);
    }

    #[test]
    fn test_stop_without_start_fails() {
        let mut processor = FeatureProcessor::new(None);
        assert!(matches!(processor.stop_processor(), Err(FlowError::NotRunning(_))));
    }
}
