use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Display;
use std::path::PathBuf;
use std::sync::mpsc::Sender;

use super::acqu::AcquFormat;
use super::byte_source::ProgressMonitor;
use super::config::Config;
use super::error::{ConfigError, ProcessorError};
use super::event::{Event, Message, MessageLevel};
use super::event_writer::EventWriter;
use super::unpacker::Unpacker;
use super::worker_status::{BarColor, WorkerStatus};

/// What happened while unpacking one file
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileSummary {
    pub path: PathBuf,
    pub format: AcquFormat,
    pub run_number: u32,
    pub n_events: u64,
    pub n_detector_reads: u64,
    pub n_slow_controls: u64,
    pub n_daq_errors: u64,
    pub message_counts: BTreeMap<MessageLevel, u64>,
}

impl FileSummary {
    fn new(path: PathBuf, format: AcquFormat, run_number: u32) -> Self {
        Self {
            path,
            format,
            run_number,
            n_events: 0,
            n_detector_reads: 0,
            n_slow_controls: 0,
            n_daq_errors: 0,
            message_counts: BTreeMap::new(),
        }
    }

    fn add_event(&mut self, event: &Event) {
        self.n_events += 1;
        self.n_detector_reads += event.detector_reads.len() as u64;
        self.n_slow_controls += event.slow_controls.len() as u64;
        self.n_daq_errors += event.daq_errors.len() as u64;
        self.add_messages(&event.messages);
    }

    fn add_messages(&mut self, messages: &[Message]) {
        for message in messages {
            *self.message_counts.entry(message.level).or_default() += 1;
        }
    }

    pub fn count(&self, level: MessageLevel) -> u64 {
        self.message_counts.get(&level).copied().unwrap_or(0)
    }
}

impl Display for FileSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} ({}, run {}): {} events, {} detector reads, {} slow controls, {} DAQ errors, {} data errors, {} discarded buffers",
            self.path.display(),
            self.format,
            self.run_number,
            self.n_events,
            self.n_detector_reads,
            self.n_slow_controls,
            self.n_daq_errors,
            self.count(MessageLevel::DataError),
            self.count(MessageLevel::DataDiscard)
        )
    }
}

/// The main loop of acqu_unpacker.
///
/// Unpacks one input file of the config end to end, writing the event dump if one was
/// requested and reporting progress through `tx`.
pub fn process_file(
    config: &Config,
    file_index: usize,
    tx: &Sender<WorkerStatus>,
    worker_id: &usize,
) -> Result<FileSummary, ProcessorError> {
    let Some(path) = config.input_files.get(file_index) else {
        return Err(ConfigError::BadFilePath(PathBuf::from(format!("input file #{file_index}"))).into());
    };
    spdlog::info!(
        "Unpacking {} with size {}",
        path.display(),
        human_bytes::human_bytes(path.metadata()?.len() as f64)
    );

    let mut unpacker = Unpacker::open(path, &config.unpacker_options(), config)?;
    unpacker.set_progress_monitor(ProgressMonitor::logging(config.progress_interval()));
    let info = unpacker.info();
    let mut summary = FileSummary::new(path.clone(), info.format, info.run_number);
    let mut writer = match config.get_output_file_name(path)? {
        Some(output) => Some(EventWriter::new(&output, info)?),
        None => None,
    };
    let color = if writer.is_some() {
        BarColor::MAGENTA
    } else {
        BarColor::CYAN
    };

    let flush_frac: f32 = 0.01;
    let mut progress: f32 = 0.0;
    tx.send(WorkerStatus::new(0.0, file_index, *worker_id, color.clone()))?;
    loop {
        let batch = unpacker.next_batch();
        for event in batch.events.iter() {
            summary.add_event(event);
            if let Some(w) = writer.as_mut() {
                w.write_event(event)?;
            }
        }

        let done = unpacker.percent_done() as f32;
        if done - progress > flush_frac {
            progress = done;
            tx.send(WorkerStatus::new(
                progress,
                file_index,
                *worker_id,
                color.clone(),
            ))?;
        }

        if !batch.more_available {
            break;
        }
    }

    let remaining = unpacker.take_messages();
    summary.add_messages(&remaining);
    if let Some(mut w) = writer {
        w.write_messages(&remaining)?;
        w.close()?;
    }

    tx.send(WorkerStatus::new(
        1.0,
        file_index,
        *worker_id,
        BarColor::GREEN,
    ))?;
    spdlog::info!("Done with {}", summary);
    Ok(summary)
}

/// Process a list of files. A file which fails is reported and skipped; only losing the
/// status channel stops the worker.
pub fn process_subset(
    config: Config,
    tx: Sender<WorkerStatus>,
    worker_id: usize,
    subset: Vec<usize>,
) -> Result<Vec<FileSummary>, ProcessorError> {
    let mut summaries = Vec::new();
    for file_index in subset {
        if !config.does_file_exist(file_index) {
            spdlog::info!("Input file #{} does not exist, skipping...", file_index);
            continue;
        }
        match process_file(&config, file_index, &tx, &worker_id) {
            Ok(summary) => summaries.push(summary),
            Err(ProcessorError::SendError(e)) => return Err(ProcessorError::SendError(e)),
            Err(e) => {
                spdlog::error!("Failed to unpack input file #{}: {}", file_index, e);
                tx.send(WorkerStatus::new(1.0, file_index, worker_id, BarColor::RED))?;
            }
        }
    }
    Ok(summaries)
}

/// The function to be called by a separate thread. Processes every configured file.
pub fn process(
    config: Config,
    tx: Sender<WorkerStatus>,
    worker_id: usize,
) -> Result<Vec<FileSummary>, ProcessorError> {
    let all = (0..config.input_files.len()).collect();
    process_subset(config, tx, worker_id, all)
}

/// Divide the input files in to a set of subsets (per thread/worker)
pub fn create_subsets(config: &Config) -> Vec<Vec<usize>> {
    let mut subsets: Vec<Vec<usize>> = vec![Vec::new(); config.n_threads.max(1) as usize];
    let n_subsets = subsets.len();

    for file_index in 0..config.input_files.len() {
        subsets[file_index % n_subsets].push(file_index)
    }

    subsets
}
