use serde::{Serialize, Deserialize};

/// Aggregate traffic snapshot sampled by the engine on its stats tick.
#[derive(Clone, Serialize, Deserialize, Debug, Default, PartialEq)]
pub struct NetworkStats {
    pub flow_count: u64,
    pub packets_per_second: f64,
    pub bytes_per_second: f64,
    pub total_packets: u64,
    pub total_bytes: u64,
    pub packets_dropped: u64,
    pub flows_expired: u64,
    pub uptime_seconds: u64,
}
