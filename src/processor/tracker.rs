//! Per-packet pipeline: identity -> direction -> flow table -> features.
//!
//! The first packet seen for an endpoint pair fixes the flow's forward
//! direction. Keys are never reordered by address, so which side ends up
//! "forward" depends only on arrival order.

use tracing::{debug, trace};

use crate::capture::ParsedPacket;
use crate::config::TrackerConfig;
use crate::emitter::{FeatureRecord, FeatureSink, SinkError};
use super::flow::{FlowDirection, FlowKey, FlowRecord};
use super::table::{FlowTable, TableStats};

#[derive(Debug, Clone, Default)]
pub struct TrackerStats {
    pub packets_processed: u64,
    pub bytes_processed: u64,
    /// Packets without a network layer
    pub packets_dropped: u64,
    pub flows_created: u64,
    pub flows_expired: u64,
    pub records_emitted: u64,
}

pub struct FlowTracker {
    table: FlowTable,
    stats: TrackerStats,
    /// Latest packet timestamp seen; the idle sweep runs on this clock.
    clock: f64,
}

impl FlowTracker {
    pub fn new(config: &TrackerConfig) -> Self {
        Self {
            table: FlowTable::new(config.retain_samples),
            stats: TrackerStats::default(),
            clock: f64::NEG_INFINITY,
        }
    }

    /// Resolves the table key for a packet whose own identity is `key`:
    /// its reverse if that flow already exists, otherwise `key` itself.
    pub fn resolve(&self, key: FlowKey) -> FlowKey {
        let reverse = key.reversed();
        if reverse != key && self.table.contains(&reverse) { reverse } else { key }
    }

    /// Runs one packet through the pipeline and returns the flow's updated
    /// feature record, or `None` if the packet has no network layer.
    pub fn process(&mut self, pkt: &ParsedPacket) -> Option<FeatureRecord> {
        let Some(own_key) = FlowKey::from_packet(pkt) else {
            self.stats.packets_dropped += 1;
            trace!("Dropping packet without network layer");
            return None;
        };

        let key = self.resolve(own_key);
        let (flow, created) = self.table.get_or_create(key, pkt.timestamp);
        let direction = flow.direction_of(&own_key);
        if created {
            self.stats.flows_created += 1;
            debug!(flow = %key, "New flow");
        }

        self.stats.packets_processed += 1;
        self.stats.bytes_processed += pkt.packet_len as u64;
        if pkt.timestamp > self.clock {
            self.clock = pkt.timestamp;
        }

        let flow = self.table.record(&key, pkt.timestamp, pkt.packet_len, direction)?;
        let record = FeatureRecord::new(flow, direction);
        debug_assert!(record.features.is_finite());
        trace!(flow = %key, ?direction, len = pkt.packet_len, "Flow updated");
        Some(record)
    }

    /// [`FlowTracker::process`] followed by synchronous delivery to `sink`.
    pub fn process_and_emit<S: FeatureSink + ?Sized>(&mut self, pkt: &ParsedPacket, sink: &mut S) -> Result<Option<FlowDirection>, SinkError> {
        let Some(record) = self.process(pkt) else {
            return Ok(None);
        };
        sink.emit(&record)?;
        self.stats.records_emitted += 1;
        Ok(Some(record.direction))
    }

    /// Evicts flows idle for more than `idle_secs` on the packet clock.
    pub fn expire_idle(&mut self, idle_secs: f64) -> Vec<FlowRecord> {
        if !self.clock.is_finite() {
            return Vec::new();
        }
        let expired = self.table.sweep_idle(self.clock, idle_secs);
        self.stats.flows_expired += expired.len() as u64;
        for flow in &expired {
            debug!(flow = %flow.key, packets = flow.total_packets(), "Flow expired");
        }
        expired
    }

    pub fn get_flow(&self, key: &FlowKey) -> Option<&FlowRecord> {
        self.table.get(key)
    }

    pub fn flows(&self) -> impl Iterator<Item = &FlowRecord> {
        self.table.iter()
    }

    pub fn active_flows(&self) -> usize {
        self.table.len()
    }

    pub fn stats(&self) -> &TrackerStats {
        &self.stats
    }

    pub fn table_stats(&self) -> &TableStats {
        &self.table.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    const A: IpAddr = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));
    const B: IpAddr = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2));

    fn tracker() -> FlowTracker {
        FlowTracker::new(&TrackerConfig { retain_samples: true, ..Default::default() })
    }

    fn tcp(src: IpAddr, sport: u16, dst: IpAddr, dport: u16, len: u32, ts: f64) -> ParsedPacket {
        ParsedPacket::ip(src, sport, dst, dport, 6, len, ts)
    }

    #[test]
    fn test_first_packet_creates_forward_flow() {
        let mut t = tracker();
        let rec = t.process(&tcp(A, 1234, B, 80, 100, 0.0)).unwrap();

        assert_eq!(rec.direction, FlowDirection::Forward);
        assert_eq!(rec.key, FlowKey::new(A, 1234, B, 80, 6));
        assert_eq!(rec.features.total_fwd_packets, 1);
        assert_eq!(rec.features.total_bwd_packets, 0);
        assert_eq!(t.active_flows(), 1);
        assert_eq!(t.stats().flows_created, 1);
    }

    #[test]
    fn test_reply_routes_to_same_flow_as_backward() {
        let mut t = tracker();
        t.process(&tcp(A, 1234, B, 80, 100, 0.0));
        let rec = t.process(&tcp(B, 80, A, 1234, 200, 1.0)).unwrap();

        assert_eq!(rec.direction, FlowDirection::Backward);
        assert_eq!(rec.key, FlowKey::new(A, 1234, B, 80, 6));
        assert_eq!(t.active_flows(), 1);

        let flow = t.get_flow(&rec.key).unwrap();
        let log = flow.samples().unwrap();
        assert_eq!(log.forward_lengths, vec![100]);
        assert_eq!(log.backward_lengths, vec![200]);
    }

    #[test]
    fn test_responder_seen_first_becomes_forward() {
        // capture joined mid-connection: the server's packet arrives first
        let mut t = tracker();
        t.process(&tcp(B, 80, A, 1234, 1500, 0.0));
        let rec = t.process(&tcp(A, 1234, B, 80, 60, 0.1)).unwrap();

        assert_eq!(rec.key, FlowKey::new(B, 80, A, 1234, 6));
        assert_eq!(rec.direction, FlowDirection::Backward);
        assert_eq!(rec.features.total_fwd_bytes, 1500);
    }

    #[test]
    fn test_protocol_is_part_of_identity() {
        let mut t = tracker();
        t.process(&tcp(A, 53, B, 53, 80, 0.0));
        t.process(&ParsedPacket::ip(A, 53, B, 53, 17, 80, 0.0));
        assert_eq!(t.active_flows(), 2);
    }

    #[test]
    fn test_non_ip_packet_is_dropped() {
        let mut t = tracker();
        t.process(&tcp(A, 1234, B, 80, 100, 0.0));
        assert!(t.process(&ParsedPacket::non_ip(60, 0.5)).is_none());
        assert_eq!(t.active_flows(), 1);
        assert_eq!(t.stats().packets_dropped, 1);
        assert_eq!(t.stats().packets_processed, 1);
    }

    #[test]
    fn test_missing_ports_default_to_zero() {
        let mut t = tracker();
        let mut pkt = ParsedPacket::ip(A, 0, B, 0, 1, 84, 0.0);
        pkt.src_port = None;
        pkt.dst_port = None;
        let rec = t.process(&pkt).unwrap();
        assert_eq!(rec.key.src_port, 0);
        assert_eq!(rec.key.dst_port, 0);
        assert_eq!(rec.key.protocol, 1);
    }

    #[test]
    fn test_self_addressed_packets_stay_forward() {
        let mut t = tracker();
        t.process(&tcp(A, 7, A, 7, 40, 0.0));
        let rec = t.process(&tcp(A, 7, A, 7, 40, 1.0)).unwrap();
        assert_eq!(rec.direction, FlowDirection::Forward);
        assert_eq!(rec.features.total_fwd_packets, 2);
    }

    #[test]
    fn test_expire_idle_uses_packet_clock() {
        let mut t = tracker();
        t.process(&tcp(A, 1000, B, 80, 60, 0.0));
        t.process(&tcp(A, 2000, B, 80, 60, 100.0));

        let expired = t.expire_idle(60.0);
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].key.src_port, 1000);
        assert_eq!(t.active_flows(), 1);
        assert_eq!(t.stats().flows_expired, 1);

        // a returning pair after expiry starts a fresh flow
        let rec = t.process(&tcp(B, 80, A, 1000, 60, 101.0)).unwrap();
        assert_eq!(rec.direction, FlowDirection::Forward);
        assert_eq!(rec.start_time, 101.0);
    }

    #[test]
    fn test_expire_idle_on_empty_tracker() {
        let mut t = tracker();
        assert!(t.expire_idle(1.0).is_empty());
    }
}
