//! Feature emission
//!
//! A [`FeatureRecord`] is produced for every packet that updates a flow and is
//! handed synchronously to a [`FeatureSink`]. Sinks decide where records go:
//! a writer (stdout by default), or an in-process channel.

pub mod channel;
pub mod dashboard;
pub mod writer;

pub use channel::ChannelSink;
pub use dashboard::DashboardEvent;
pub use writer::{StdoutSink, WriterSink};

use serde::Serialize;
use thiserror::Error;

use crate::processor::{FlowDirection, FlowFeatures, FlowKey, FlowRecord};

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("write failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("feature consumer disconnected")]
    Disconnected,
}

/// Feature vector of one flow, bundled with the flow's identity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureRecord {
    #[serde(flatten)]
    pub key: FlowKey,
    /// Direction of the packet that triggered this record.
    #[serde(rename = "Direction")]
    pub direction: FlowDirection,
    #[serde(rename = "Start Time")]
    pub start_time: f64,
    #[serde(rename = "Last Time")]
    pub last_time: f64,
    #[serde(flatten)]
    pub features: FlowFeatures,
}

impl FeatureRecord {
    pub fn new(flow: &FlowRecord, direction: FlowDirection) -> Self {
        Self {
            key: flow.key,
            direction,
            start_time: flow.start_time,
            last_time: flow.last_time,
            features: FlowFeatures::compute(flow),
        }
    }
}

pub trait FeatureSink {
    fn emit(&mut self, record: &FeatureRecord) -> Result<(), SinkError>;

    fn flush(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}

impl<S: FeatureSink + ?Sized> FeatureSink for Box<S> {
    fn emit(&mut self, record: &FeatureRecord) -> Result<(), SinkError> {
        (**self).emit(record)
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        (**self).flush()
    }
}
