//! Decoders for the Acqu raw formats.
//!
//! Both formats share one life cycle: the header record is parsed into an [`Info`], the
//! first data buffer is located, and then one fixed-size record buffer at a time is
//! unpacked into events. They differ in their header layouts and in how events are
//! delimited inside a buffer.
mod blocks;
mod epics;
pub mod mk1;
pub mod mk2;
mod search;

use serde::{Deserialize, Serialize};
use std::fmt::Display;

use super::byte_source::{ByteSource, ProgressMonitor};
use super::channel_map::{MappingIndex, MappingProvider};
use super::constants::{END_OF_BUFFER_MARKER, END_OF_EVENT_MARKER, WORD_SIZE};
use super::error::SetupError;
use super::event::{Event, EventId, Message, MessageLevel};
use super::event_builder::EventBuilder;
use super::record::Record;
use super::timestamp::header_timestamp;
use super::unpacker::{FormatCandidate, UnpackerOptions};
use search::FirstBuffer;

/// How far a malformed sub-record reaches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Escalation {
    /// Drop the event and resume at the next event boundary
    Event,
    /// Drop every event of the buffer
    Buffer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AcquFormat {
    Mk1,
    Mk2,
}

impl Display for AcquFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Mk1 => write!(f, "Acqu Mk1"),
            Self::Mk2 => write!(f, "Acqu Mk2"),
        }
    }
}

impl AcquFormat {
    /// Every format the prober knows about
    pub const ALL: [AcquFormat; 2] = [Self::Mk1, Self::Mk2];

    pub fn default_escalation(&self) -> Escalation {
        match self {
            Self::Mk1 => Escalation::Buffer,
            Self::Mk2 => Escalation::Event,
        }
    }

    /// Parse the header, locate the first data buffer and load the channel mapping.
    ///
    /// `header` is the word sample the format was probed with; `reader` is positioned
    /// right after it.
    pub fn setup(
        self,
        mut reader: ByteSource,
        header: Vec<u32>,
        options: &UnpackerOptions,
        mappings: &dyn MappingProvider,
    ) -> Result<AcquDecoder, SetupError> {
        let mut buffer = header;
        let mut messages = Vec::new();

        let mut info = match self {
            Self::Mk1 => mk1::read_info(&mut reader, &mut buffer, &mut messages)?,
            Self::Mk2 => mk2::read_info(&mut reader, &mut buffer, &mut messages)?,
        };
        info.timestamp = header_timestamp(&info.time, &options.timezone, &options.dst_exceptions)?;

        let search = match self {
            Self::Mk1 => mk1::buffer_search(options.search_max_multiplier),
            Self::Mk2 => mk2::buffer_search(options.search_max_multiplier),
        };
        match search::locate_first_buffer(&mut reader, &mut buffer, &search)? {
            FirstBuffer::Found { record_length } => {
                if info.record_length as usize != record_length {
                    messages.push(Message::logged(
                        MessageLevel::Warn,
                        format!(
                            "Record length in header {:#x} does not match true file record length {:#x}",
                            info.record_length, record_length
                        ),
                    ));
                    info.record_length = record_length as u32;
                }
            }
            FirstBuffer::HeaderOnly { header_length } => {
                messages.push(Message::logged(
                    MessageLevel::Warn,
                    format!(
                        "File is exactly {header_length:#x} bytes long and contains only its header"
                    ),
                ));
                info.record_length = header_length as u32;
            }
        }

        let map = mappings.mapping_for(&info)?;
        if map.is_empty() {
            messages.push(Message::logged(
                MessageLevel::Warn,
                format!(
                    "No channel mapping for run {}, all hits will be dropped",
                    info.run_number
                ),
            ));
        }
        messages.extend(map.validate(&info));

        messages.push(Message::logged(
            MessageLevel::Info,
            format!(
                "{} header successfully unpacked: run {}, started {}, record length {:#x}, {} ADC and {} scaler modules",
                self,
                info.run_number,
                info.time,
                info.record_length,
                info.adc_modules.len(),
                info.scaler_modules.len()
            ),
        ));

        let state = DecodeState {
            escalation: options.escalation.unwrap_or(self.default_escalation()),
            mapping: MappingIndex::new(map),
            next_id: info.base_id(),
            last_serial: None,
            pending: messages,
            timestamp: info.timestamp,
        };
        Ok(AcquDecoder {
            format: self,
            record_words: info.record_length as usize / WORD_SIZE,
            info,
            reader,
            buffer,
            state,
        })
    }
}

impl FormatCandidate for AcquFormat {
    fn name(&self) -> String {
        self.to_string()
    }

    fn header_size(&self) -> usize {
        match self {
            Self::Mk1 => mk1::HEADER_SIZE,
            Self::Mk2 => mk2::HEADER_SIZE,
        }
    }

    fn probe(&self, header: &[u32]) -> bool {
        match self {
            Self::Mk1 => mk1::probe(header),
            Self::Mk2 => mk2::probe(header),
        }
    }
}

/// Checks both header layouts share: a ctime-like time string and an output file name
pub(crate) fn plausible_header(header: &Record) -> bool {
    let time_ok = header.string("time").map(|t| t.len() == 24).unwrap_or(false);
    let out_file_ok = header
        .string("out_file")
        .map(|f| !f.is_empty())
        .unwrap_or(false);
    time_ok && out_file_ok
}

/// A hardware module from the header module table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HardwareModule {
    pub identifier: String,
    pub index: u32,
    pub first_raw_channel: u32,
    pub n_raw_channels: u32,
    pub bits: u32,
}

impl HardwareModule {
    pub fn contains(&self, raw_channel: u32) -> bool {
        raw_channel >= self.first_raw_channel
            && raw_channel - self.first_raw_channel < self.n_raw_channels
    }
}

/// Everything the header record says about a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Info {
    pub format: AcquFormat,
    pub run_number: u32,
    /// Local time string as written by the DAQ
    pub time: String,
    /// `time` resolved to a unix timestamp
    pub timestamp: i64,
    pub description: String,
    pub run_note: String,
    pub out_file: String,
    /// Record length in bytes
    pub record_length: u32,
    pub adc_modules: Vec<HardwareModule>,
    pub scaler_modules: Vec<HardwareModule>,
}

impl Info {
    /// Id of the first event of the run
    pub fn base_id(&self) -> EventId {
        EventId::new(u32::try_from(self.timestamp).unwrap_or_default(), 0)
    }
}

/// Why a buffer or sub-record could not be unpacked
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Malformed(pub String);

impl Malformed {
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}

/// How the unpacking of one event failed
#[derive(Debug)]
pub(crate) enum EventFailure {
    /// The event end is unknown, the rest of the buffer cannot be trusted
    Undelimited(Malformed),
    /// The content is broken; `resume` is the first word after the event, if it is known
    Content {
        reason: Malformed,
        resume: Option<usize>,
    },
}

/// The per-format part of the buffer state machine
pub(crate) trait EventFraming {
    const DATA_MARKER: u32;

    /// Unpack the event whose serial word is at `pos - 1`. Returns the index of the first
    /// word after the event.
    fn unpack_event(
        buffer: &[u32],
        pos: usize,
        builder: &mut EventBuilder,
    ) -> Result<usize, EventFailure>;
}

/// Counters and queues carried from buffer to buffer
pub(crate) struct DecodeState {
    pub escalation: Escalation,
    pub mapping: MappingIndex,
    pub next_id: EventId,
    pub last_serial: Option<u32>,
    pub pending: Vec<Message>,
    pub timestamp: i64,
}

impl DecodeState {
    fn report(&mut self, level: MessageLevel, text: impl Into<String>) {
        self.pending.push(Message::logged(level, text));
    }

    fn check_serial(&mut self, serial: u32, builder: &mut EventBuilder) {
        if let Some(last) = self.last_serial {
            if serial != last.wrapping_add(1) {
                if serial < last {
                    builder.add_message(Message::logged(
                        MessageLevel::Info,
                        format!("Overflow of Acqu event serial detected ({last} -> {serial})"),
                    ));
                } else {
                    builder.add_message(Message::logged(
                        MessageLevel::DataError,
                        format!("Acqu event serial jumped from {last} to {serial}"),
                    ));
                }
            }
        }
        self.last_serial = Some(serial);
    }

    fn finish_event(&mut self, builder: EventBuilder) -> Event {
        let pending = std::mem::take(&mut self.pending);
        let event = builder.build(self.next_id, &self.mapping, self.timestamp, pending);
        self.next_id = self.next_id.next();
        event
    }

    fn abort_event(&mut self, builder: EventBuilder, reason: Malformed) {
        self.pending.extend(builder.into_messages());
        self.report(
            MessageLevel::DataError,
            format!("Skipping malformed event: {}", reason.0),
        );
    }

    /// Take back every event of the buffer. Their messages are kept for the next event and
    /// the running id is rolled back so the produced ids stay contiguous.
    fn discard_buffer(&mut self, events: Vec<Event>, first_id: EventId, reason: Malformed) {
        let mut carried: Vec<Message> = events.into_iter().flat_map(|e| e.messages).collect();
        carried.append(&mut self.pending);
        self.pending = carried;
        self.next_id = first_id;
        self.last_serial = None;
        self.report(MessageLevel::DataError, reason.0);
        self.report(
            MessageLevel::DataDiscard,
            "Discarding all events of the current buffer",
        );
    }
}

/// Unpack one record buffer, or nothing if the buffer has to be discarded
pub(crate) fn unpack_buffer<F: EventFraming>(buffer: &[u32], state: &mut DecodeState) -> Vec<Event> {
    let first_id = state.next_id;
    let mut events = Vec::new();
    match unpack_events::<F>(buffer, state, &mut events) {
        Ok(()) => events,
        Err(reason) => {
            state.discard_buffer(events, first_id, reason);
            Vec::new()
        }
    }
}

fn unpack_events<F: EventFraming>(
    buffer: &[u32],
    state: &mut DecodeState,
    events: &mut Vec<Event>,
) -> Result<(), Malformed> {
    match buffer.first() {
        None => return Ok(()),
        Some(word) if *word == F::DATA_MARKER => (),
        Some(word) => {
            return Err(Malformed(format!(
                "Buffer starts with unexpected header word {word:#010x}"
            )))
        }
    }

    let mut pos = 1;
    loop {
        if pos >= buffer.len() {
            // Exactly filled by the last event is fine
            if pos == 1 || buffer[pos - 1] != END_OF_EVENT_MARKER {
                state.report(
                    MessageLevel::DataError,
                    "Buffer ended without end-of-buffer marker",
                );
            }
            return Ok(());
        }
        if buffer[pos] == END_OF_BUFFER_MARKER {
            return Ok(());
        }

        let mut builder = EventBuilder::new();
        state.check_serial(buffer[pos], &mut builder);
        match F::unpack_event(buffer, pos + 1, &mut builder) {
            Ok(next) => {
                events.push(state.finish_event(builder));
                pos = next;
            }
            Err(EventFailure::Content {
                reason,
                resume: Some(next),
            }) if state.escalation == Escalation::Event => {
                state.abort_event(builder, reason);
                pos = next;
            }
            Err(EventFailure::Content { reason, .. }) | Err(EventFailure::Undelimited(reason)) => {
                state.pending.extend(builder.into_messages());
                return Err(reason);
            }
        }
    }
}

/// The result of one pull from a decoder
#[derive(Debug, Clone, Default)]
pub struct Batch {
    pub events: Vec<Event>,
    /// False once the input is exhausted
    pub more_available: bool,
}

/// A set up decoder: owns the byte source and the record buffer
pub struct AcquDecoder {
    format: AcquFormat,
    info: Info,
    reader: ByteSource,
    buffer: Vec<u32>,
    record_words: usize,
    state: DecodeState,
}

impl AcquDecoder {
    pub fn format(&self) -> AcquFormat {
        self.format
    }

    pub fn info(&self) -> &Info {
        &self.info
    }

    pub fn escalation(&self) -> Escalation {
        self.state.escalation
    }

    pub fn percent_done(&self) -> f64 {
        self.reader.percent_done()
    }

    pub fn set_progress_monitor(&mut self, monitor: ProgressMonitor) {
        self.reader.set_progress_monitor(monitor);
    }

    /// Unpack the current buffer and refill it. An empty batch without more data means
    /// the input is done; an empty batch with more data means the buffer was discarded.
    pub fn next_batch(&mut self) -> Batch {
        if self.buffer.is_empty() {
            return Batch {
                events: Vec::new(),
                more_available: false,
            };
        }
        let events = match self.format {
            AcquFormat::Mk1 => unpack_buffer::<mk1::Mk1Framing>(&self.buffer, &mut self.state),
            AcquFormat::Mk2 => unpack_buffer::<mk2::Mk2Framing>(&self.buffer, &mut self.state),
        };
        self.refill();
        Batch {
            events,
            more_available: !self.buffer.is_empty(),
        }
    }

    /// Messages not attached to any event yet
    pub fn take_messages(&mut self) -> Vec<Message> {
        std::mem::take(&mut self.state.pending)
    }

    fn refill(&mut self) {
        self.buffer.clear();
        self.buffer.resize(self.record_words, 0);
        let expected = self.record_words * WORD_SIZE;
        match self.reader.read_words(&mut self.buffer) {
            Ok(n) if n == expected => (),
            Ok(0) if self.reader.is_eof() => {
                self.buffer.clear();
                spdlog::info!("Reached end of {}", self.reader.path().display());
            }
            Ok(n) => {
                self.buffer.clear();
                self.state.report(
                    MessageLevel::DataError,
                    format!("Only {n} bytes read from file, but {expected} required for data buffer"),
                );
            }
            Err(e) => {
                self.buffer.clear();
                self.state.report(
                    MessageLevel::DataError,
                    format!("Reading the next data buffer failed: {e}"),
                );
            }
        }
    }
}
