//! Event sinks: where correlated events end up.

use std::io::Write;

use serde::Deserialize;
use tracing::warn;

use crate::emitter::Event;

/// Receives every event the engine produces, in emission order.
pub trait EventSink {
    fn emit(&mut self, event: Event);
}

/// Collects events in memory.
impl EventSink for Vec<Event> {
    fn emit(&mut self, event: Event) {
        self.push(event);
    }
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// One `[TAG] ...` line per event
    #[default]
    Text,
    /// One JSON object per line
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            other => Err(format!("unknown output format: {other}")),
        }
    }
}

/// Writes events to `W` in the configured format, one per line.
///
/// Write failures are logged and the event is dropped; output problems never
/// stop the engine.
pub struct WriterSink<W: Write> {
    writer: W,
    format: OutputFormat,
}

impl<W: Write> WriterSink<W> {
    pub fn new(writer: W, format: OutputFormat) -> Self {
        Self { writer, format }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    fn write_event(&mut self, event: &Event) -> std::io::Result<()> {
        match self.format {
            OutputFormat::Text => writeln!(self.writer, "{event}")?,
            OutputFormat::Json => {
                serde_json::to_writer(&mut self.writer, event)?;
                self.writer.write_all(b"\n")?;
            }
        }
        self.writer.flush()
    }
}

impl<W: Write> EventSink for WriterSink<W> {
    fn emit(&mut self, event: Event) {
        if let Err(e) = self.write_event(&event) {
            warn!(error = %e, "failed to write event");
        }
    }
}

/// Sink for the process's standard output.
pub fn stdout_sink(format: OutputFormat) -> WriterSink<std::io::Stdout> {
    WriterSink::new(std::io::stdout(), format)
}
