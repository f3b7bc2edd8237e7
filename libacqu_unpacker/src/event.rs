use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::str::FromStr;

use super::error::ChannelMapError;

/// Unique, monotonically increasing identifier of an Event.
///
/// `upper` is the run timestamp, `lower` counts events within the run.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct EventId {
    pub upper: u32,
    pub lower: u32,
}

impl EventId {
    pub fn new(upper: u32, lower: u32) -> Self {
        Self { upper, lower }
    }

    pub fn next(&self) -> Self {
        Self {
            upper: self.upper,
            lower: self.lower.wrapping_add(1),
        }
    }
}

impl Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({},{})", self.upper, self.lower)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DetectorType {
    Trigger,
    Tagger,
    TaggerMicro,
    EPT,
    Moeller,
    PairSpec,
    CB,
    PID,
    MWPC0,
    MWPC1,
    TAPS,
    TAPSVeto,
    Cherenkov,
    Raw,
}

impl FromStr for DetectorType {
    type Err = ChannelMapError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Trigger" => Ok(Self::Trigger),
            "Tagger" => Ok(Self::Tagger),
            "TaggerMicro" => Ok(Self::TaggerMicro),
            "EPT" => Ok(Self::EPT),
            "Moeller" => Ok(Self::Moeller),
            "PairSpec" => Ok(Self::PairSpec),
            "CB" => Ok(Self::CB),
            "PID" => Ok(Self::PID),
            "MWPC0" => Ok(Self::MWPC0),
            "MWPC1" => Ok(Self::MWPC1),
            "TAPS" => Ok(Self::TAPS),
            "TAPSVeto" => Ok(Self::TAPSVeto),
            "Cherenkov" => Ok(Self::Cherenkov),
            "Raw" => Ok(Self::Raw),
            _ => Err(ChannelMapError::BadDetKeyword(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChannelKind {
    Timing,
    Integral,
    IntegralShort,
    IntegralAlternate,
    IntegralShortAlternate,
    BitPattern,
    Scaler,
    Counter,
    Raw,
}

impl FromStr for ChannelKind {
    type Err = ChannelMapError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Timing" => Ok(Self::Timing),
            "Integral" => Ok(Self::Integral),
            "IntegralShort" => Ok(Self::IntegralShort),
            "IntegralAlternate" => Ok(Self::IntegralAlternate),
            "IntegralShortAlternate" => Ok(Self::IntegralShortAlternate),
            "BitPattern" => Ok(Self::BitPattern),
            "Scaler" => Ok(Self::Scaler),
            "Counter" => Ok(Self::Counter),
            "Raw" => Ok(Self::Raw),
            _ => Err(ChannelMapError::BadKindKeyword(s.to_string())),
        }
    }
}

/// A channel as seen by the analysis: which detector, what is measured, and where
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LogicalChannel {
    pub detector: DetectorType,
    pub kind: ChannelKind,
    pub index: u32,
}

impl LogicalChannel {
    pub fn new(detector: DetectorType, kind: ChannelKind, index: u32) -> Self {
        Self {
            detector,
            kind,
            index,
        }
    }
}

impl Display for LogicalChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}/{:?}/{}", self.detector, self.kind, self.index)
    }
}

/// All values read for one logical channel within one event (multi-hit)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectorRead {
    pub channel: LogicalChannel,
    pub values: Vec<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SlowControlKind {
    EpicsOneShot,
    EpicsScaler,
    EpicsTimer,
    AcquScaler,
}

/// Whether a slow control reading describes the events before or after it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Validity {
    Forward,
    Backward,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlowControl {
    pub kind: SlowControlKind,
    pub validity: Validity,
    pub timestamp: i64,
    pub name: String,
    pub description: String,
    pub payload_int: Vec<(u32, i64)>,
    pub payload_float: Vec<(u32, f64)>,
    pub payload_string: Vec<(u32, String)>,
}

impl SlowControl {
    pub fn new(
        kind: SlowControlKind,
        validity: Validity,
        timestamp: i64,
        name: &str,
        description: &str,
    ) -> Self {
        Self {
            kind,
            validity,
            timestamp,
            name: name.to_string(),
            description: description.to_string(),
            payload_int: Vec::new(),
            payload_float: Vec::new(),
            payload_string: Vec::new(),
        }
    }
}

/// A hardware module which reported a read error
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaqError {
    pub module_id: i32,
    pub module_index: i32,
    pub error_code: i32,
    pub module_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum MessageLevel {
    Info,
    Warn,
    DataError,
    DataDiscard,
    HardwareError,
}

/// A diagnostic produced while unpacking
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub level: MessageLevel,
    pub text: String,
}

impl Message {
    pub fn new(level: MessageLevel, text: impl Into<String>) -> Self {
        Self {
            level,
            text: text.into(),
        }
    }

    /// Create a message and mirror it to the log
    pub fn logged(level: MessageLevel, text: impl Into<String>) -> Self {
        let message = Self::new(level, text);
        match message.level {
            MessageLevel::Info => spdlog::info!("{}", message.text),
            MessageLevel::Warn => spdlog::warn!("{}", message.text),
            MessageLevel::DataError | MessageLevel::DataDiscard => {
                spdlog::error!("{}", message.text)
            }
            MessageLevel::HardwareError => spdlog::debug!("{}", message.text),
        }
        message
    }
}

/// One unpacked DAQ event, moved to the consumer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub detector_reads: Vec<DetectorRead>,
    pub slow_controls: Vec<SlowControl>,
    pub daq_errors: Vec<DaqError>,
    pub messages: Vec<Message>,
}

impl Event {
    pub fn messages_at(&self, level: MessageLevel) -> impl Iterator<Item = &Message> {
        self.messages.iter().filter(move |m| m.level == level)
    }

    /// All reads of a given logical channel
    pub fn reads_of(&self, channel: &LogicalChannel) -> Option<&DetectorRead> {
        self.detector_reads.iter().find(|r| r.channel == *channel)
    }
}
