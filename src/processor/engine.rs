use crossbeam_channel::{never, select, tick, Receiver, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

use crate::capture::ParsedPacket;
use crate::emitter::FeatureSink;
use crate::error::{FlowError, Result};
use crate::types::NetworkStats;
use super::tracker::{FlowTracker, TrackerStats};

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub idle_timeout: Option<Duration>,
    pub sweep_interval: Duration,
    pub stats_interval: Duration,
}

/// Owns the tracker for the lifetime of the loop; every packet runs through
/// the whole pipeline before the next one is received.
///
/// Ends when `running` is cleared or every packet sender is gone (queued
/// packets are drained first). A sink failure ends it with an error.
pub fn processing_loop(
    running: Arc<AtomicBool>,
    packet_rx: Receiver<ParsedPacket>,
    stats_tx: Sender<NetworkStats>,
    mut tracker: FlowTracker,
    mut sink: Box<dyn FeatureSink + Send>,
    settings: EngineSettings,
) -> Result<TrackerStats> {
    let start_time = Instant::now();

    // Timers to sweep idle flows and sample traffic stats
    let expire_tick = match settings.idle_timeout {
        Some(_) => tick(settings.sweep_interval),
        None => never(),
    };
    let stats_tick = tick(settings.stats_interval);
    let idle_secs = settings.idle_timeout.map(|d| d.as_secs_f64()).unwrap_or(f64::INFINITY);

    let mut last_rate = Instant::now();
    let mut pkts_acc: u64 = 0;
    let mut bytes_acc: u64 = 0;

    loop {
        if !running.load(Ordering::Relaxed) { break; }

        select! {
            recv(packet_rx) -> msg => {
                let Ok(pkt) = msg else {
                    debug!("Packet source closed");
                    break;
                };
                if let Err(e) = tracker.process_and_emit(&pkt, &mut sink) {
                    error!("Failed to emit feature record: {e}");
                    return Err(FlowError::Sink(e));
                }
                pkts_acc += 1;
                bytes_acc += pkt.packet_len as u64;
            },

            recv(expire_tick) -> _ => {
                let expired = tracker.expire_idle(idle_secs);
                if !expired.is_empty() {
                    debug!("Expired {} idle flows", expired.len());
                }
            },

            recv(stats_tick) -> _ => {
                let dt = last_rate.elapsed().as_secs_f64().max(1e-6);
                let totals = tracker.stats();

                let stats = NetworkStats {
                    flow_count: tracker.active_flows() as u64,
                    packets_per_second: (pkts_acc as f64) / dt,
                    bytes_per_second: (bytes_acc as f64) / dt,
                    total_packets: totals.packets_processed,
                    total_bytes: totals.bytes_processed,
                    packets_dropped: totals.packets_dropped,
                    flows_expired: totals.flows_expired,
                    uptime_seconds: start_time.elapsed().as_secs(),
                };

                let _ = stats_tx.send(stats);
                pkts_acc = 0;
                bytes_acc = 0;
                last_rate = Instant::now();
            },
        }
    }

    sink.flush()?;
    let stats = tracker.stats().clone();
    info!(
        packets = stats.packets_processed,
        dropped = stats.packets_dropped,
        flows = stats.flows_created,
        records = stats.records_emitted,
        "Processing loop finished"
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrackerConfig;
    use crate::emitter::ChannelSink;
    use crossbeam_channel::unbounded;
    use std::net::{IpAddr, Ipv4Addr};

    fn settings() -> EngineSettings {
        EngineSettings {
            idle_timeout: None,
            sweep_interval: Duration::from_secs(1),
            stats_interval: Duration::from_secs(1),
        }
    }

    #[test]
    fn test_loop_drains_queue_then_stops_on_close() {
        let (pkt_tx, pkt_rx) = unbounded();
        let (stats_tx, _stats_rx) = unbounded();
        let (rec_tx, rec_rx) = unbounded();
        let a = IpAddr::V4(Ipv4Addr::new(1, 1, 1, 1));
        let b = IpAddr::V4(Ipv4Addr::new(2, 2, 2, 2));

        pkt_tx.send(ParsedPacket::ip(a, 1, b, 2, 6, 100, 0.0)).unwrap();
        pkt_tx.send(ParsedPacket::non_ip(60, 0.1)).unwrap();
        pkt_tx.send(ParsedPacket::ip(b, 2, a, 1, 6, 200, 1.0)).unwrap();
        drop(pkt_tx);

        let stats = processing_loop(
            Arc::new(AtomicBool::new(true)),
            pkt_rx,
            stats_tx,
            FlowTracker::new(&TrackerConfig::default()),
            Box::new(ChannelSink::new(rec_tx)),
            settings(),
        ).unwrap();

        assert_eq!(stats.packets_processed, 2);
        assert_eq!(stats.packets_dropped, 1);
        assert_eq!(stats.records_emitted, 2);
        let records: Vec<_> = rec_rx.try_iter().collect();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].features.down_up_ratio, 1.0);
    }

    #[test]
    fn test_sink_failure_is_fatal() {
        let (pkt_tx, pkt_rx) = unbounded();
        let (stats_tx, _stats_rx) = unbounded();
        let (rec_tx, rec_rx) = unbounded();
        drop(rec_rx);
        let a = IpAddr::V4(Ipv4Addr::new(1, 1, 1, 1));
        pkt_tx.send(ParsedPacket::ip(a, 1, a, 2, 17, 64, 0.0)).unwrap();

        let result = processing_loop(
            Arc::new(AtomicBool::new(true)),
            pkt_rx,
            stats_tx,
            FlowTracker::new(&TrackerConfig::default()),
            Box::new(ChannelSink::new(rec_tx)),
            settings(),
        );
        assert!(matches!(result, Err(FlowError::Sink(_))));
    }
}
