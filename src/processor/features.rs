use serde::Serialize;

use super::flow::FlowRecord;

/// Lower bound on flow duration in seconds, so rates stay finite.
pub const DURATION_EPSILON: f64 = 1e-6;

pub const FEATURE_COUNT: usize = 20;

/// Column names, in the order produced by [`FlowFeatures::to_vector`].
pub const FEATURE_NAMES: [&str; FEATURE_COUNT] = [
    "Flow Bytes/s",
    "Flow Packets/s",
    "Total Length of Fwd Packets",
    "Total Length of Bwd Packets",
    "Total Fwd Packets",
    "Total Backward Packets",
    "Average Packet Size",
    "Packet Length Mean",
    "Packet Length Variance",
    "Max Packet Length",
    "Min Packet Length",
    "Fwd Packet Length Max",
    "Fwd Packet Length Min",
    "Fwd Packet Length Mean",
    "Fwd Packet Length Std",
    "Bwd Packet Length Mean",
    "Bwd Packet Length Std",
    "Flow Duration",
    "Flow IAT Mean",
    "Down/Up Ratio",
];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlowFeatures {
    #[serde(rename = "Flow Bytes/s")]
    pub flow_bytes_per_sec: f64,
    #[serde(rename = "Flow Packets/s")]
    pub flow_packets_per_sec: f64,
    #[serde(rename = "Total Length of Fwd Packets")]
    pub total_fwd_bytes: u64,
    #[serde(rename = "Total Length of Bwd Packets")]
    pub total_bwd_bytes: u64,
    #[serde(rename = "Total Fwd Packets")]
    pub total_fwd_packets: u64,
    #[serde(rename = "Total Backward Packets")]
    pub total_bwd_packets: u64,
    #[serde(rename = "Average Packet Size")]
    pub avg_packet_size: f64,
    #[serde(rename = "Packet Length Mean")]
    pub packet_len_mean: f64,
    #[serde(rename = "Packet Length Variance")]
    pub packet_len_variance: f64,
    #[serde(rename = "Max Packet Length")]
    pub packet_len_max: u32,
    #[serde(rename = "Min Packet Length")]
    pub packet_len_min: u32,
    #[serde(rename = "Fwd Packet Length Max")]
    pub fwd_packet_len_max: u32,
    #[serde(rename = "Fwd Packet Length Min")]
    pub fwd_packet_len_min: u32,
    #[serde(rename = "Fwd Packet Length Mean")]
    pub fwd_packet_len_mean: f64,
    #[serde(rename = "Fwd Packet Length Std")]
    pub fwd_packet_len_std: f64,
    #[serde(rename = "Bwd Packet Length Mean")]
    pub bwd_packet_len_mean: f64,
    #[serde(rename = "Bwd Packet Length Std")]
    pub bwd_packet_len_std: f64,
    #[serde(rename = "Flow Duration")]
    pub flow_duration: f64,
    #[serde(rename = "Flow IAT Mean")]
    pub flow_iat_mean: f64,
    #[serde(rename = "Down/Up Ratio")]
    pub down_up_ratio: f64,
}

impl FlowFeatures {
    /// Derives the feature set from the flow's running aggregates in O(1).
    ///
    /// An empty direction behaves like the single sample `0.0`, and the
    /// duration is clamped to [`DURATION_EPSILON`], so every value is finite
    /// for finite timestamps.
    pub fn compute(flow: &FlowRecord) -> Self {
        let fwd = flow.forward();
        let bwd = flow.backward();
        let all = fwd.merged(bwd);

        let duration = (flow.last_time - flow.start_time).max(DURATION_EPSILON);

        let down_up_ratio = if fwd.count() > 0 {
            bwd.count() as f64 / fwd.count() as f64
        } else {
            0.0
        };

        Self {
            flow_bytes_per_sec: all.sum() as f64 / duration,
            flow_packets_per_sec: all.count() as f64 / duration,
            total_fwd_bytes: fwd.sum(),
            total_bwd_bytes: bwd.sum(),
            total_fwd_packets: fwd.count(),
            total_bwd_packets: bwd.count(),
            avg_packet_size: all.mean(),
            packet_len_mean: all.mean(),
            packet_len_variance: all.variance(),
            packet_len_max: all.max(),
            packet_len_min: all.min(),
            fwd_packet_len_max: fwd.max(),
            fwd_packet_len_min: fwd.min(),
            fwd_packet_len_mean: fwd.mean(),
            fwd_packet_len_std: fwd.std_dev(),
            bwd_packet_len_mean: bwd.mean(),
            bwd_packet_len_std: bwd.std_dev(),
            flow_duration: duration,
            flow_iat_mean: flow.iat().mean(),
            down_up_ratio,
        }
    }

    pub fn total_packets(&self) -> u64 {
        self.total_fwd_packets + self.total_bwd_packets
    }

    pub fn to_vector(&self) -> [f64; FEATURE_COUNT] {
        [
            self.flow_bytes_per_sec,
            self.flow_packets_per_sec,
            self.total_fwd_bytes as f64,
            self.total_bwd_bytes as f64,
            self.total_fwd_packets as f64,
            self.total_bwd_packets as f64,
            self.avg_packet_size,
            self.packet_len_mean,
            self.packet_len_variance,
            self.packet_len_max as f64,
            self.packet_len_min as f64,
            self.fwd_packet_len_max as f64,
            self.fwd_packet_len_min as f64,
            self.fwd_packet_len_mean,
            self.fwd_packet_len_std,
            self.bwd_packet_len_mean,
            self.bwd_packet_len_std,
            self.flow_duration,
            self.flow_iat_mean,
            self.down_up_ratio,
        ]
    }

    pub fn is_finite(&self) -> bool {
        self.to_vector().iter().all(|v| v.is_finite())
    }
}
