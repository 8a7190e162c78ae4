use thiserror::Error;

use crate::emitter::SinkError;

#[derive(Debug, Error)]
pub enum FlowError {
    #[error("capture error: {0}")]
    Capture(#[from] pcap::Error),

    #[error("capture is not initialized, open a device or file first")]
    CaptureClosed,

    #[error("no capture device available")]
    NoDevice,

    #[error("unsupported link type {0}")]
    UnsupportedLinkType(i32),

    #[error("sink error: {0}")]
    Sink(#[from] SinkError),

    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0} is already running")]
    AlreadyRunning(&'static str),

    #[error("{0} isn't running")]
    NotRunning(&'static str),

    #[error("{0} thread panicked")]
    ThreadPanicked(&'static str),
}

pub type Result<T> = std::result::Result<T, FlowError>;
