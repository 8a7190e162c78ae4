use crossbeam_channel::{select, tick, Receiver};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::types::NetworkStats;

/// Keeps the latest stats snapshot and logs it at most once per `interval`,
/// skipping ticks with nothing new.
pub fn publisher_loop(
    running: Arc<AtomicBool>,
    stats_rx: Receiver<NetworkStats>,
    interval: Duration,
) {
    let emit_tick = tick(interval);
    let mut latest: Option<NetworkStats> = None;

    loop {
        if !running.load(Ordering::Relaxed) { break; }

        select! {
            recv(stats_rx) -> msg => {
                match msg {
                    Ok(s) => latest = Some(s),
                    Err(_) => break,
                }
            }
            recv(emit_tick) -> _ => {
                if let Some(s) = latest.take() {
                    publish(&s);
                }
            }
        }
    }

    if let Some(s) = latest.take() {
        publish(&s);
    }
}

fn publish(s: &NetworkStats) {
    info!(
        flows = s.flow_count,
        pps = s.packets_per_second,
        bps = s.bytes_per_second,
        packets = s.total_packets,
        bytes = s.total_bytes,
        dropped = s.packets_dropped,
        expired = s.flows_expired,
        uptime = s.uptime_seconds,
        "Network stats"
    );
}
