use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use std::net::IpAddr;

use super::FeatureRecord;

/// Event shape consumed by the monitoring dashboard.
///
/// Only the traffic-derived fields are filled here; `ddos_probability`,
/// `status` and `note` belong to the external classifier and stay `null`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardEvent {
    pub src_ip: IpAddr,
    pub dst_ip: IpAddr,
    pub dst_port: u16,
    pub flow_bytes_s: f64,
    pub flow_packets_s: f64,
    pub total_packets: u64,
    pub avg_pkt_size: f64,
    pub ddos_probability: Option<f64>,
    pub status: Option<String>,
    pub note: Option<String>,
    pub timestamp: String,
}

impl From<&FeatureRecord> for DashboardEvent {
    fn from(record: &FeatureRecord) -> Self {
        let f = &record.features;
        Self {
            src_ip: record.key.src_ip,
            dst_ip: record.key.dst_ip,
            dst_port: record.key.dst_port,
            flow_bytes_s: f.flow_bytes_per_sec,
            flow_packets_s: f.flow_packets_per_sec,
            total_packets: f.total_packets(),
            avg_pkt_size: f.avg_packet_size,
            ddos_probability: None,
            status: None,
            note: None,
            timestamp: rfc3339(record.last_time),
        }
    }
}

fn rfc3339(seconds: f64) -> String {
    let secs = seconds.floor();
    let nanos = ((seconds - secs) * 1e9) as u32;
    DateTime::<Utc>::from_timestamp(secs as i64, nanos.min(999_999_999))
        .unwrap_or_default()
        .to_rfc3339_opts(SecondsFormat::Millis, true)
}
