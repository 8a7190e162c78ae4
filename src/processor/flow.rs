use serde::Serialize;
use std::fmt;
use std::net::IpAddr;

use crate::capture::ParsedPacket;

/// Identity of a flow as seen by its first packet.
///
/// Unlike a sorted 5-tuple, the key keeps the orientation of the packet that
/// produced it; both orientations of a pair are matched through [`FlowKey::reversed`].
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, Serialize)]
pub struct FlowKey {
    #[serde(rename = "Source IP")]
    pub src_ip: IpAddr,
    #[serde(rename = "Source Port")]
    pub src_port: u16,
    #[serde(rename = "Destination IP")]
    pub dst_ip: IpAddr,
    #[serde(rename = "Destination Port")]
    pub dst_port: u16,
    #[serde(rename = "Protocol")]
    pub protocol: u8,
}

impl FlowKey {
    pub fn new(src_ip: IpAddr, src_port: u16, dst_ip: IpAddr, dst_port: u16, protocol: u8) -> Self {
        Self { src_ip, src_port, dst_ip, dst_port, protocol }
    }

    /// Builds the packet's own identity. Packets without a network layer have none,
    /// and missing transport ports collapse to 0.
    pub fn from_packet(pkt: &ParsedPacket) -> Option<Self> {
        let net = pkt.network.as_ref()?;
        Some(Self::new(
            net.src_ip,
            pkt.src_port.unwrap_or(0),
            net.dst_ip,
            pkt.dst_port.unwrap_or(0),
            net.protocol,
        ))
    }

    pub fn reversed(&self) -> Self {
        Self {
            src_ip: self.dst_ip,
            src_port: self.dst_port,
            dst_ip: self.src_ip,
            dst_port: self.src_port,
            protocol: self.protocol,
        }
    }
}

impl fmt::Display for FlowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} -> {} (proto={})",
            endpoint(self.src_ip, self.src_port),
            endpoint(self.dst_ip, self.dst_port),
            self.protocol
        )
    }
}

fn endpoint(ip: IpAddr, port: u16) -> String {
    match ip {
        IpAddr::V4(v4) => format!("{v4}:{port}"),
        IpAddr::V6(v6) => format!("[{v6}]:{port}"),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowDirection { Forward, Backward }

/// Running length aggregate for one direction (or both, once merged).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LengthStats {
    count: u64,
    sum: u64,
    mean: f64,
    m2: f64,
    min: u32,
    max: u32,
}

impl LengthStats {
    pub fn push(&mut self, len: u32) {
        if self.count == 0 {
            self.min = len;
            self.max = len;
        } else {
            self.min = self.min.min(len);
            self.max = self.max.max(len);
        }
        self.count += 1;
        self.sum += len as u64;

        // Online mean and variance (Welford)
        let x = len as f64;
        let delta = x - self.mean;
        self.mean += delta / self.count as f64;
        let delta2 = x - self.mean;
        self.m2 += delta * delta2;
    }

    /// Combines two aggregates as if every sample had been pushed into one (Chan et al.).
    pub fn merged(&self, other: &LengthStats) -> LengthStats {
        if self.count == 0 { return other.clone(); }
        if other.count == 0 { return self.clone(); }

        let na = self.count as f64;
        let nb = other.count as f64;
        let n = na + nb;
        let delta = other.mean - self.mean;

        LengthStats {
            count: self.count + other.count,
            sum: self.sum + other.sum,
            mean: self.mean + delta * nb / n,
            m2: self.m2 + other.m2 + delta * delta * na * nb / n,
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    pub fn count(&self) -> u64 { self.count }

    pub fn sum(&self) -> u64 { self.sum }

    pub fn is_empty(&self) -> bool { self.count == 0 }

    // An empty aggregate reads as the single sample 0.0: mean, variance,
    // min and max are all zero.

    pub fn mean(&self) -> f64 {
        if self.count == 0 { 0.0 } else { self.mean }
    }

    /// Population variance.
    pub fn variance(&self) -> f64 {
        if self.count == 0 { return 0.0; }
        // m2 can dip a hair below zero from rounding on identical samples
        (self.m2 / self.count as f64).max(0.0)
    }

    pub fn std_dev(&self) -> f64 { self.variance().sqrt() }

    pub fn min(&self) -> u32 { self.min }

    pub fn max(&self) -> u32 { self.max }
}

/// Running mean of consecutive inter-arrival gaps, in arrival order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IatStats {
    gaps: u64,
    total: f64,
    previous: Option<f64>,
}

impl IatStats {
    pub fn push(&mut self, timestamp: f64) {
        if let Some(prev) = self.previous {
            self.total += timestamp - prev;
            self.gaps += 1;
        }
        self.previous = Some(timestamp);
    }

    pub fn mean(&self) -> f64 {
        if self.gaps == 0 { 0.0 } else { self.total / self.gaps as f64 }
    }

    pub fn gaps(&self) -> u64 { self.gaps }
}

/// Raw observations of a flow, kept only when sample retention is enabled.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SampleLog {
    pub forward_lengths: Vec<u32>,
    pub backward_lengths: Vec<u32>,
    pub timestamps: Vec<f64>,
}

#[derive(Debug, Clone)]
pub struct FlowRecord {
    pub key: FlowKey,

    pub start_time: f64,
    pub last_time: f64,

    fwd: LengthStats,
    bwd: LengthStats,
    iat: IatStats,
    samples: Option<SampleLog>,
}

impl FlowRecord {
    pub fn new(key: FlowKey, start_time: f64, retain_samples: bool) -> Self {
        Self {
            key,
            start_time,
            last_time: start_time,
            fwd: LengthStats::default(),
            bwd: LengthStats::default(),
            iat: IatStats::default(),
            samples: retain_samples.then(SampleLog::default),
        }
    }

    /// Direction of a packet whose own identity is `key`, relative to this flow.
    pub fn direction_of(&self, key: &FlowKey) -> FlowDirection {
        if *key == self.key { FlowDirection::Forward } else { FlowDirection::Backward }
    }

    pub fn record(&mut self, timestamp: f64, packet_len: u32, direction: FlowDirection) {
        match direction {
            FlowDirection::Forward => self.fwd.push(packet_len),
            FlowDirection::Backward => self.bwd.push(packet_len),
        }
        self.iat.push(timestamp);

        if let Some(log) = self.samples.as_mut() {
            match direction {
                FlowDirection::Forward => log.forward_lengths.push(packet_len),
                FlowDirection::Backward => log.backward_lengths.push(packet_len),
            }
            log.timestamps.push(timestamp);
        }

        // last_time never moves backwards, even on an out-of-order capture timestamp
        if timestamp > self.last_time {
            self.last_time = timestamp;
        }
    }

    pub fn forward(&self) -> &LengthStats { &self.fwd }

    pub fn backward(&self) -> &LengthStats { &self.bwd }

    pub fn iat(&self) -> &IatStats { &self.iat }

    pub fn samples(&self) -> Option<&SampleLog> { self.samples.as_ref() }

    pub fn total_packets(&self) -> u64 { self.fwd.count() + self.bwd.count() }

    pub fn total_bytes(&self) -> u64 { self.fwd.sum() + self.bwd.sum() }

    /// Helper the engine uses to expire idle flows.
    #[inline]
    pub fn last_seen(&self) -> f64 {
        self.last_time
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn key() -> FlowKey {
        FlowKey::new(
            IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)), 1234,
            IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)), 80,
            6,
        )
    }

    #[test]
    fn test_reversed_swaps_endpoints() {
        let k = key();
        let r = k.reversed();
        assert_eq!(r.src_ip, k.dst_ip);
        assert_eq!(r.src_port, 80);
        assert_eq!(r.dst_port, 1234);
        assert_eq!(r.protocol, 6);
        assert_eq!(r.reversed(), k);
    }

    #[test]
    fn test_key_is_not_canonicalized() {
        // the higher address first must stay first
        let k = key().reversed();
        assert_eq!(k.src_ip, IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)));
        assert_ne!(k, key());
    }

    #[test]
    fn test_length_stats_population_variance() {
        let mut s = LengthStats::default();
        for len in [2, 4, 4, 4, 5, 5, 7, 9] {
            s.push(len);
        }
        assert_eq!(s.count(), 8);
        assert_eq!(s.sum(), 40);
        assert!((s.mean() - 5.0).abs() < 1e-12);
        assert!((s.variance() - 4.0).abs() < 1e-12);
        assert!((s.std_dev() - 2.0).abs() < 1e-12);
        assert_eq!(s.min(), 2);
        assert_eq!(s.max(), 9);
    }

    #[test]
    fn test_empty_length_stats_read_as_zero_sample() {
        let s = LengthStats::default();
        assert!(s.is_empty());
        assert_eq!(s.mean(), 0.0);
        assert_eq!(s.variance(), 0.0);
        assert_eq!(s.min(), 0);
        assert_eq!(s.max(), 0);
    }

    #[test]
    fn test_merged_matches_single_pass() {
        let mut a = LengthStats::default();
        let mut b = LengthStats::default();
        let mut all = LengthStats::default();
        for len in [60, 1500, 40] {
            a.push(len);
            all.push(len);
        }
        for len in [576, 52] {
            b.push(len);
            all.push(len);
        }
        let m = a.merged(&b);
        assert_eq!(m.count(), all.count());
        assert_eq!(m.sum(), all.sum());
        assert_eq!(m.min(), 40);
        assert_eq!(m.max(), 1500);
        assert!((m.mean() - all.mean()).abs() < 1e-9);
        assert!((m.variance() - all.variance()).abs() < 1e-6);
    }

    #[test]
    fn test_merged_with_empty_side() {
        let mut a = LengthStats::default();
        a.push(100);
        assert_eq!(a.merged(&LengthStats::default()), a);
        assert_eq!(LengthStats::default().merged(&a), a);
    }

    #[test]
    fn test_iat_mean() {
        let mut iat = IatStats::default();
        assert_eq!(iat.mean(), 0.0);
        iat.push(1.0);
        assert_eq!(iat.mean(), 0.0);
        iat.push(1.5);
        iat.push(3.0);
        assert_eq!(iat.gaps(), 2);
        assert!((iat.mean() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_record_routes_by_direction() {
        let mut flow = FlowRecord::new(key(), 0.0, true);
        flow.record(0.0, 100, FlowDirection::Forward);
        flow.record(1.0, 200, FlowDirection::Backward);
        flow.record(2.0, 300, FlowDirection::Forward);

        assert_eq!(flow.forward().count(), 2);
        assert_eq!(flow.backward().count(), 1);
        assert_eq!(flow.total_bytes(), 600);
        assert_eq!(flow.last_time, 2.0);

        let log = flow.samples().unwrap();
        assert_eq!(log.forward_lengths, vec![100, 300]);
        assert_eq!(log.backward_lengths, vec![200]);
        assert_eq!(log.timestamps, vec![0.0, 1.0, 2.0]);
    }

    #[test]
    fn test_last_time_never_moves_backwards() {
        let mut flow = FlowRecord::new(key(), 10.0, false);
        flow.record(10.0, 60, FlowDirection::Forward);
        flow.record(9.5, 60, FlowDirection::Backward);
        assert_eq!(flow.last_time, 10.0);
        assert!(flow.last_time >= flow.start_time);
        assert!(flow.samples().is_none());
    }

    #[test]
    fn test_direction_of() {
        let flow = FlowRecord::new(key(), 0.0, false);
        assert_eq!(flow.direction_of(&key()), FlowDirection::Forward);
        assert_eq!(flow.direction_of(&key().reversed()), FlowDirection::Backward);
    }
}
