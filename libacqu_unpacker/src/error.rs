use std::path::PathBuf;
use thiserror::Error;

use super::worker_status::WorkerStatus;

#[derive(Debug, Error)]
pub enum ByteSourceError {
    #[error("Could not open ByteSource because file {0:?} does not exist")]
    BadFilePath(PathBuf),
    #[error("ByteSource failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("ByteSource failed to decompress the XZ stream: {0}")]
    Decompression(std::io::Error),
    #[error("ByteSource could only deliver {available} of {requested} requested bytes")]
    InsufficientData { requested: usize, available: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordError {
    #[error("Record {layout} needs {needed} bytes but only {available} are present")]
    Truncated {
        layout: &'static str,
        needed: usize,
        available: usize,
    },
    #[error("Record {layout} has no field named {field}")]
    NoSuchField { layout: &'static str, field: String },
    #[error("Field {field} of record {layout} is not of the requested kind")]
    WrongKind { layout: &'static str, field: String },
}

#[derive(Debug, Error)]
pub enum TimestampError {
    #[error("Could not parse header time {0:?}: {1}")]
    InvalidTime(String, time::error::Parse),
    #[error("Local time {0:?} is ambiguous and not listed in the DST exceptions")]
    UnknownDst(String),
    #[error("Time zone arithmetic went out of range: {0}")]
    OutOfRange(#[from] time::error::ComponentRange),
}

#[derive(Debug, Error)]
pub enum ChannelMapError {
    #[error("ChannelMap failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("ChannelMap failed to parse an integer: {0}")]
    ParsingError(#[from] std::num::ParseIntError),
    #[error("ChannelMap found invalid detector keyword: {0}")]
    BadDetKeyword(String),
    #[error("ChannelMap found invalid channel kind keyword: {0}")]
    BadKindKeyword(String),
    #[error("ChannelMap was given a file with the incorrect format at line {0}; most likely the number of columns is incorrect")]
    BadFileFormat(usize),
    #[error("ChannelMap entry at line {0} combines more than {max} raw channels", max=crate::channel_map::MAX_RAW_CHANNELS_PER_HIT)]
    TooManyRawChannels(usize),
}

#[derive(Debug, Error)]
pub enum SetupError {
    #[error("Decoder setup failed due to ByteSource error: {0}")]
    ByteSource(#[from] ByteSourceError),
    #[error("Decoder setup failed to decode a header record: {0}")]
    Record(#[from] RecordError),
    #[error("Decoder setup found a malformed header: {0}")]
    BadHeader(String),
    #[error("Decoder setup could not resolve the run timestamp: {0}")]
    Timestamp(#[from] TimestampError),
    #[error("Decoder setup found no data buffer within the first {0:#x} bytes")]
    NoDataBufferFound(usize),
    #[error("Decoder setup read only {read} of {expected} bytes of the first data buffer")]
    IncompleteFirstBuffer { expected: usize, read: usize },
    #[error("Decoder setup failed to load the channel mapping: {0}")]
    Mapping(#[from] ChannelMapError),
}

#[derive(Debug, Error)]
pub enum UnpackerError {
    #[error("Unpacker failed due to ByteSource error: {0}")]
    ByteSource(#[from] ByteSourceError),
    #[error("Unpacker found no decoder which understands the file")]
    NoSuitableFormat,
    #[error("Unpacker found more than one decoder claiming the file: {0}")]
    AmbiguousFormat(String),
    #[error("Unpacker failed during decoder setup: {0}")]
    Setup(#[from] SetupError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration as file {0:?} does not exist")]
    BadFilePath(PathBuf),
    #[error("Config failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Config failed to parse YAML: {0}")]
    ParsingError(#[from] serde_yaml::Error),
}

#[derive(Debug, Error)]
pub enum EventWriterError {
    #[error("EventWriter failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("EventWriter failed to convert to yaml: {0}")]
    ParsingError(#[from] serde_yaml::Error),
}

#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error("Processor failed due to Unpacker error: {0}")]
    UnpackerError(#[from] UnpackerError),
    #[error("Processor failed due to EventWriter error: {0}")]
    WriterError(#[from] EventWriterError),
    #[error("Processor failed due to Config error: {0}")]
    ConfigError(#[from] ConfigError),
    #[error("Processor failed due to Send error: {0}")]
    SendError(#[from] std::sync::mpsc::SendError<WorkerStatus>),
    #[error("Processor failed due to IO error: {0}")]
    IoError(#[from] std::io::Error),
}
