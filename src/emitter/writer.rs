use std::io::{self, Stdout, Write};

use super::{DashboardEvent, FeatureRecord, FeatureSink, SinkError};
use crate::config::OutputFormat;
use crate::processor::FEATURE_NAMES;

/// Writes one rendering per record to any `Write` (stdout in the binary).
pub struct WriterSink<W: Write> {
    out: W,
    format: OutputFormat,
}

pub type StdoutSink = WriterSink<Stdout>;

impl StdoutSink {
    pub fn stdout(format: OutputFormat) -> Self {
        Self::new(io::stdout(), format)
    }
}

impl<W: Write> WriterSink<W> {
    pub fn new(out: W, format: OutputFormat) -> Self {
        Self { out, format }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn write_text(&mut self, record: &FeatureRecord) -> io::Result<()> {
        writeln!(self.out, "\nFlow: {}", record.key)?;
        for (name, value) in FEATURE_NAMES.iter().zip(record.features.to_vector()) {
            writeln!(self.out, "  {name}: {value:.6}")?;
        }
        Ok(())
    }
}

impl<W: Write> FeatureSink for WriterSink<W> {
    fn emit(&mut self, record: &FeatureRecord) -> Result<(), SinkError> {
        match self.format {
            OutputFormat::Text => self.write_text(record)?,
            OutputFormat::Json => {
                serde_json::to_writer(&mut self.out, record)?;
                writeln!(self.out)?;
            }
            OutputFormat::Dashboard => {
                serde_json::to_writer(&mut self.out, &DashboardEvent::from(record))?;
                writeln!(self.out)?;
            }
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        self.out.flush()?;
        Ok(())
    }
}
