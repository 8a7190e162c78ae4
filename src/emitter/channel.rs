use crossbeam_channel::Sender;

use super::{FeatureRecord, FeatureSink, SinkError};

/// Hands records to an in-process consumer (e.g. a scoring thread).
pub struct ChannelSink {
    tx: Sender<FeatureRecord>,
}

impl ChannelSink {
    pub fn new(tx: Sender<FeatureRecord>) -> Self {
        Self { tx }
    }
}

impl FeatureSink for ChannelSink {
    fn emit(&mut self, record: &FeatureRecord) -> Result<(), SinkError> {
        self.tx.send(record.clone()).map_err(|_| SinkError::Disconnected)
    }
}
