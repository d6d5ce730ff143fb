//! Output sinks for enriched events.
//!
//! Every sink renders the whole batch in memory before touching the
//! destination, then writes it in one call and releases the handle, so a
//! batch is either appended completely or a write error is reported.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::Context;
use common::{EnrichedEvent, OutputConfig, OutputFormat};
use log::{debug, info};
use serde::Serialize;
use serde_json::ser::PrettyFormatter;

use crate::error::{Error, Result};

pub const CSV_HEADER: [&str; 17] = [
    "eventId",
    "customerId",
    "saas",
    "entityId",
    "state",
    "type",
    "confidenceIndicator",
    "eventCreated",
    "severity",
    "description",
    "senderAddress",
    "data",
    "recipients",
    "entityLink",
    "actionType",
    "actionCreateTime",
    "actionRelatedEntityId",
];

pub trait OutputSink: Send {
    fn name(&self) -> &'static str;

    /// Appends `events`. An empty batch writes nothing.
    fn write_batch(&mut self, events: &[EnrichedEvent]) -> Result<()>;
}

pub fn from_config(config: &OutputConfig) -> anyhow::Result<Box<dyn OutputSink>> {
    let sink: Box<dyn OutputSink> = match config.format {
        OutputFormat::Txt => {
            let path = config.path.clone().context("txt output needs an output path")?;
            Box::new(TextSink::new(path))
        }
        OutputFormat::Csv => {
            let path = config.path.clone().context("csv output needs an output path")?;
            Box::new(CsvSink::new(path))
        }
        OutputFormat::Syslog => Box::new(SyslogSink::new("hec-agent")),
    };
    Ok(sink)
}

fn append(path: &Path, sink: &'static str, bytes: &[u8]) -> Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| Error::write(sink, e))?;
    file.write_all(bytes).map_err(|e| Error::write(sink, e))?;
    file.flush().map_err(|e| Error::write(sink, e))?;
    Ok(())
}

/// Pretty-printed JSON documents (four-space indent), one per event, each
/// followed by a newline.
pub struct TextSink {
    path: PathBuf,
}

impl TextSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn render(events: &[EnrichedEvent]) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        for event in events {
            let formatter = PrettyFormatter::with_indent(b"    ");
            let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
            event.serialize(&mut ser).map_err(|e| Error::write("txt", e))?;
            buf.push(b'\n');
        }
        Ok(buf)
    }
}

impl OutputSink for TextSink {
    fn name(&self) -> &'static str {
        "txt"
    }

    fn write_batch(&mut self, events: &[EnrichedEvent]) -> Result<()> {
        if events.is_empty() {
            return Ok(());
        }
        let buf = Self::render(events)?;
        append(&self.path, self.name(), &buf)?;
        info!("Appended {} events to {}", events.len(), self.path.display());
        Ok(())
    }
}

/// One row per action, or a single row with blank action columns.
pub struct CsvSink {
    path: PathBuf,
}

impl CsvSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn render(events: &[EnrichedEvent], include_header: bool) -> Result<(Vec<u8>, usize)> {
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(Vec::new());

        if include_header {
            writer.write_record(CSV_HEADER).map_err(|e| Error::write("csv", e))?;
        }

        let mut count = 0;
        for event in events {
            for row in csv_rows(event)? {
                writer.write_record(&row).map_err(|e| Error::write("csv", e))?;
                count += 1;
            }
        }

        let buf = writer.into_inner().map_err(|e| Error::write("csv", e.into_error()))?;
        Ok((buf, count))
    }
}

impl OutputSink for CsvSink {
    fn name(&self) -> &'static str {
        "csv"
    }

    fn write_batch(&mut self, events: &[EnrichedEvent]) -> Result<()> {
        if events.is_empty() {
            return Ok(());
        }

        let needs_header = match std::fs::metadata(&self.path) {
            Ok(meta) => meta.len() == 0,
            Err(e) if e.kind() == io::ErrorKind::NotFound => true,
            Err(e) => return Err(Error::write(self.name(), e)),
        };

        let (buf, rows) = Self::render(events, needs_header)?;
        append(&self.path, self.name(), &buf)?;
        info!(
            "Appended {} rows for {} events to {}",
            rows,
            events.len(),
            self.path.display()
        );
        Ok(())
    }
}

/// Flattens one event into `max(1, actions)` rows in `CSV_HEADER` order.
pub fn csv_rows(enriched: &EnrichedEvent) -> Result<Vec<Vec<String>>> {
    let event = &enriched.event;
    let data = match &event.data {
        Some(value) => serde_json::to_string(value),
        None => serde_json::to_string(""),
    }
    .map_err(|e| Error::write("csv", e))?;

    let base = vec![
        event.event_id.clone(),
        event.customer_id.clone(),
        event.saas.clone(),
        event.entity_id.clone(),
        event.state.clone(),
        event.event_type.clone(),
        event.confidence_indicator.clone(),
        event.event_created.clone(),
        event.severity.clone(),
        event.description.clone(),
        event.sender_address.clone(),
        data,
        enriched.recipient.clone(),
        event.entity_link.clone(),
    ];

    if event.actions.is_empty() {
        let mut row = base;
        row.extend([String::new(), String::new(), String::new()]);
        return Ok(vec![row]);
    }

    Ok(event
        .actions
        .iter()
        .map(|action| {
            let mut row = base.clone();
            row.extend([
                action.action_type.clone(),
                action.create_time.clone(),
                action.related_entity_id.clone(),
            ]);
            row
        })
        .collect())
}

/// Destination for syslog messages; opened once per batch.
pub trait SyslogWriter {
    fn info(&mut self, message: &str) -> io::Result<()>;
}

type Connector = Box<dyn Fn() -> io::Result<Box<dyn SyslogWriter>> + Send>;

pub struct SyslogSink {
    connect: Connector,
}

impl SyslogSink {
    /// Local syslog over the unix socket, facility `user`.
    pub fn new(process: impl Into<String>) -> Self {
        let process = process.into();
        Self::with_connector(move || connect_local(&process))
    }

    pub fn with_connector<F>(connect: F) -> Self
    where
        F: Fn() -> io::Result<Box<dyn SyslogWriter>> + Send + 'static,
    {
        Self { connect: Box::new(connect) }
    }
}

impl OutputSink for SyslogSink {
    fn name(&self) -> &'static str {
        "syslog"
    }

    fn write_batch(&mut self, events: &[EnrichedEvent]) -> Result<()> {
        if events.is_empty() {
            return Ok(());
        }

        let lines = events
            .iter()
            .map(syslog_line)
            .collect::<Result<Vec<_>>>()?;

        let mut writer = (self.connect)().map_err(|e| Error::write(self.name(), e))?;
        for line in &lines {
            writer.info(line).map_err(|e| Error::write(self.name(), e))?;
        }
        debug!("Sent {} events to syslog", lines.len());
        Ok(())
    }
}

pub fn syslog_line(event: &EnrichedEvent) -> Result<String> {
    let payload = serde_json::to_string(event).map_err(|e| Error::write("syslog", e))?;
    Ok(format!("Event ID: {}, Data: {}", event.event.event_id, payload))
}

#[cfg(unix)]
impl SyslogWriter for syslog::Logger<syslog::LoggerBackend, syslog::Formatter3164> {
    fn info(&mut self, message: &str) -> io::Result<()> {
        syslog::Logger::info(self, message).map_err(|e| io::Error::other(e.to_string()))
    }
}

#[cfg(unix)]
fn connect_local(process: &str) -> io::Result<Box<dyn SyslogWriter>> {
    let formatter = syslog::Formatter3164 {
        facility: syslog::Facility::LOG_USER,
        hostname: None,
        process: process.to_string(),
        pid: std::process::id(),
    };
    let logger = syslog::unix(formatter).map_err(|e| io::Error::other(e.to_string()))?;
    Ok(Box::new(logger))
}

#[cfg(not(unix))]
fn connect_local(_process: &str) -> io::Result<Box<dyn SyslogWriter>> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "syslog output is only available on unix",
    ))
}
