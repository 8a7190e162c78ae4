pub mod feature_processor;
mod engine;
mod publisher;
pub mod features;
pub mod flow;
pub mod table;
pub mod tracker;

pub use engine::EngineSettings;
pub use feature_processor::FeatureProcessor;
pub use features::{FlowFeatures, DURATION_EPSILON, FEATURE_COUNT, FEATURE_NAMES};
pub use flow::{
    FlowKey, FlowDirection, FlowRecord, IatStats, LengthStats, SampleLog
};
pub use table::{FlowTable, TableStats};
pub use tracker::{FlowTracker, TrackerStats};
