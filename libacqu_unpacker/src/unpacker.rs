use std::collections::VecDeque;
use std::path::Path;

use super::acqu::{AcquDecoder, AcquFormat, Batch, Escalation, Info};
use super::byte_source::{ByteSource, ProgressMonitor};
use super::channel_map::MappingProvider;
use super::constants::{DEFAULT_XZ_BUFFER_SIZE, WORD_SIZE};
use super::error::UnpackerError;
use super::event::{Event, Message};
use super::timestamp::{DstException, TimeZoneRule};

/// A decoder the prober can offer a file to
pub trait FormatCandidate {
    fn name(&self) -> String;
    /// Bytes of header the candidate needs to decide
    fn header_size(&self) -> usize;
    /// Decide from the header sample alone whether the file is in this format
    fn probe(&self, header: &[u32]) -> bool;
}

/// Number of words sampled from the file start, enough for every candidate
pub fn header_sample_words<C: FormatCandidate>(candidates: &[C]) -> usize {
    candidates
        .iter()
        .map(|c| c.header_size())
        .max()
        .unwrap_or(0)
        / WORD_SIZE
        + 1
}

/// Find the one candidate claiming the header
pub fn select_format<'a, C: FormatCandidate>(
    candidates: &'a [C],
    header: &[u32],
) -> Result<&'a C, UnpackerError> {
    let accepted: Vec<&C> = candidates.iter().filter(|c| c.probe(header)).collect();
    match accepted.as_slice() {
        [] => Err(UnpackerError::NoSuitableFormat),
        [only] => Ok(*only),
        many => Err(UnpackerError::AmbiguousFormat(
            many.iter()
                .map(|c| c.name())
                .collect::<Vec<String>>()
                .join(", "),
        )),
    }
}

/// Everything which steers opening and decoding a file, besides the channel mapping
#[derive(Debug, Clone)]
pub struct UnpackerOptions {
    /// Overrides the format's own escalation policy
    pub escalation: Option<Escalation>,
    pub timezone: TimeZoneRule,
    pub dst_exceptions: Vec<DstException>,
    /// Overrides the format's first-buffer scan bound (multiples of its record unit)
    pub search_max_multiplier: Option<usize>,
    pub xz_buffer_size: usize,
}

impl Default for UnpackerOptions {
    fn default() -> Self {
        Self {
            escalation: None,
            timezone: TimeZoneRule::default(),
            dst_exceptions: Vec::new(),
            search_max_multiplier: None,
            xz_buffer_size: DEFAULT_XZ_BUFFER_SIZE,
        }
    }
}

fn open_and_sample(path: &Path, options: &UnpackerOptions) -> Result<(ByteSource, Vec<u32>), UnpackerError> {
    let mut reader = ByteSource::open_with_buffer(path, options.xz_buffer_size)?;
    let mut header = vec![0u32; header_sample_words(&AcquFormat::ALL)];
    let n_bytes = reader.read_words(&mut header)?;
    header.truncate(n_bytes / WORD_SIZE);
    Ok((reader, header))
}

/// Only find out which format a file is in
pub fn probe_file(path: &Path, options: &UnpackerOptions) -> Result<AcquFormat, UnpackerError> {
    let (_, header) = open_and_sample(path, options)?;
    select_format(&AcquFormat::ALL, &header).copied()
}

/// Pull-based access to the events of one Acqu file
pub struct Unpacker {
    decoder: AcquDecoder,
    queue: VecDeque<Event>,
    exhausted: bool,
}

impl Unpacker {
    /// Open the file, pick its format and set up the decoder. Fails only if the file cannot
    /// be read, is in no (or more than one) known format, or its header is unusable.
    pub fn open(
        path: &Path,
        options: &UnpackerOptions,
        mappings: &dyn MappingProvider,
    ) -> Result<Self, UnpackerError> {
        let (reader, header) = open_and_sample(path, options)?;
        let format = *select_format(&AcquFormat::ALL, &header)?;
        spdlog::info!("{} is in format {}", path.display(), format);
        let decoder = format.setup(reader, header, options, mappings)?;
        Ok(Self {
            decoder,
            queue: VecDeque::new(),
            exhausted: false,
        })
    }

    pub fn info(&self) -> &Info {
        self.decoder.info()
    }

    pub fn format(&self) -> AcquFormat {
        self.decoder.format()
    }

    pub fn escalation(&self) -> Escalation {
        self.decoder.escalation()
    }

    /// The events of the next record buffer. See [`AcquDecoder::next_batch`].
    pub fn next_batch(&mut self) -> Batch {
        if !self.queue.is_empty() {
            return Batch {
                events: self.queue.drain(..).collect(),
                more_available: !self.exhausted,
            };
        }
        if self.exhausted {
            return Batch::default();
        }
        let batch = self.decoder.next_batch();
        self.exhausted = !batch.more_available;
        batch
    }

    /// One event at a time, None once the file is done
    pub fn next_event(&mut self) -> Option<Event> {
        loop {
            if let Some(event) = self.queue.pop_front() {
                return Some(event);
            }
            if self.exhausted {
                return None;
            }
            let batch = self.decoder.next_batch();
            self.exhausted = !batch.more_available;
            self.queue.extend(batch.events);
        }
    }

    /// Messages not attached to any event, e.g. the setup messages of a file without events
    pub fn take_messages(&mut self) -> Vec<Message> {
        self.decoder.take_messages()
    }

    pub fn percent_done(&self) -> f64 {
        self.decoder.percent_done()
    }

    pub fn set_progress_monitor(&mut self, monitor: ProgressMonitor) {
        self.decoder.set_progress_monitor(monitor);
    }
}
