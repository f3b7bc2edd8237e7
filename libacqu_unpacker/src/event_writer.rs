use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use super::acqu::Info;
use super::error::EventWriterError;
use super::event::{Event, EventId, Message};

/// This is the version of the output format
const FORMAT_VERSION: &str = "1.0";

/// One YAML document of a dump
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DumpRecord {
    Info(Info),
    Event(Event),
    /// Messages which could not be attached to an event
    Messages(Vec<Message>),
}

/// Writes the unpacked events of one file as a stream of YAML documents.
///
/// The first document is the file [`Info`], followed by one document per event.
#[derive(Debug)]
pub struct EventWriter {
    writer: BufWriter<File>,
    path: PathBuf,
    n_events: u64,
    first_id: Option<EventId>,
    last_id: Option<EventId>,
}

impl EventWriter {
    /// Create the writer, opening a file at path and writing the file info
    pub fn new(path: &Path, info: &Info) -> Result<Self, EventWriterError> {
        let mut writer = BufWriter::new(File::create(path)?);
        writeln!(writer, "# {}:{}", env!("CARGO_PKG_NAME"), FORMAT_VERSION)?;
        let mut event_writer = Self {
            writer,
            path: path.to_path_buf(),
            n_events: 0,
            first_id: None,
            last_id: None,
        };
        event_writer.write_record(&DumpRecord::Info(info.clone()))?;
        Ok(event_writer)
    }

    fn write_record(&mut self, record: &DumpRecord) -> Result<(), EventWriterError> {
        writeln!(self.writer, "---")?;
        self.writer
            .write_all(serde_yaml::to_string(record)?.as_bytes())?;
        Ok(())
    }

    pub fn write_event(&mut self, event: &Event) -> Result<(), EventWriterError> {
        self.write_record(&DumpRecord::Event(event.clone()))?;
        if self.first_id.is_none() {
            self.first_id = Some(event.id);
        }
        self.last_id = Some(event.id);
        self.n_events += 1;
        Ok(())
    }

    pub fn write_messages(&mut self, messages: &[Message]) -> Result<(), EventWriterError> {
        if messages.is_empty() {
            return Ok(());
        }
        self.write_record(&DumpRecord::Messages(messages.to_vec()))
    }

    pub fn n_events(&self) -> u64 {
        self.n_events
    }

    /// Flush everything to disk, consume the writer
    pub fn close(mut self) -> Result<(), EventWriterError> {
        self.writer.flush()?;
        match (self.first_id, self.last_id) {
            (Some(first), Some(last)) => spdlog::info!(
                "{} events written to {}, ids {} to {}",
                self.n_events,
                self.path.display(),
                first,
                last
            ),
            _ => spdlog::info!("No events written to {}", self.path.display()),
        }
        Ok(())
    }
}

/// Read a dump back, e.g. to compare two of them
pub fn read_dump(path: &Path) -> Result<Vec<DumpRecord>, EventWriterError> {
    let contents = std::fs::read_to_string(path)?;
    let mut records = Vec::new();
    for document in serde_yaml::Deserializer::from_str(&contents) {
        records.push(DumpRecord::deserialize(document)?);
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acqu::AcquFormat;
    use crate::event::{ChannelKind, DetectorRead, DetectorType, LogicalChannel, MessageLevel};

    #[test]
    fn test_dump_read_back() {
        let info = Info {
            format: AcquFormat::Mk1,
            run_number: 42,
            time: String::from("Mon Jun  1 12:00:00 2015"),
            timestamp: 1433152800,
            description: String::from("test"),
            run_note: String::new(),
            out_file: String::from("run_42.dat"),
            record_length: 0x2000,
            adc_modules: Vec::new(),
            scaler_modules: Vec::new(),
        };
        let event = Event {
            id: EventId::new(1433152800, 0),
            detector_reads: vec![DetectorRead {
                channel: LogicalChannel::new(DetectorType::CB, ChannelKind::Integral, 3),
                values: vec![1, 2],
            }],
            slow_controls: Vec::new(),
            daq_errors: Vec::new(),
            messages: vec![Message::new(MessageLevel::Warn, "careful")],
        };

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run_42.yaml");
        let mut writer = EventWriter::new(&path, &info).unwrap();
        writer.write_event(&event).unwrap();
        writer.write_messages(&[]).unwrap();
        writer
            .write_messages(&[Message::new(MessageLevel::Info, "done")])
            .unwrap();
        assert_eq!(writer.n_events(), 1);
        writer.close().unwrap();

        let records = read_dump(&path).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0], DumpRecord::Info(info));
        assert_eq!(records[1], DumpRecord::Event(event));
    }
}
