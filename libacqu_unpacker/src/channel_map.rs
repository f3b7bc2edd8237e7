// Mapping from raw hardware channels to logical detector channels.
//
// The mapping is many-to-many: one raw channel may feed several logical channels (e.g. a
// discriminator read as both timing and bit pattern), and one logical channel may need
// several raw channels (e.g. a 32-bit value split over two 16-bit ADC words, low first).
//
// The CSV format has one entry per line after a header line:
// hit,<detector>,<kind>,<index>,<raw>[:mask][,<raw>[:mask]]
// scaler,<detector>,<kind>,<index>,<raw>[,<slow control name>]
use fxhash::FxHashMap;
use std::fs::File;
use std::io::Read;
use std::num::ParseIntError;
use std::path::Path;
use std::str::FromStr;

use super::acqu::Info;
use super::error::ChannelMapError;
use super::event::{ChannelKind, DetectorType, LogicalChannel, Message, MessageLevel};

/// Raw channels combined into one value are limited by the 32-bit value width
pub const MAX_RAW_CHANNELS_PER_HIT: usize = 2;
pub const DEFAULT_MASK: u16 = 0xFFFF;

const HIT_KEYWORD: &str = "hit";
const SCALER_KEYWORD: &str = "scaler";
const MIN_HIT_ENTRIES_PER_LINE: usize = 5; //type, detector, kind, index, raw
const SCALER_ENTRIES_PER_LINE: usize = 5;
const NAMED_SCALER_ENTRIES_PER_LINE: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawChannel {
    pub channel: u16,
    pub mask: u16,
}

impl RawChannel {
    pub fn new(channel: u16) -> Self {
        Self {
            channel,
            mask: DEFAULT_MASK,
        }
    }

    pub fn with_mask(channel: u16, mask: u16) -> Self {
        Self { channel, mask }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HitMapping {
    pub logical: LogicalChannel,
    pub raw_channels: Vec<RawChannel>,
}

impl HitMapping {
    pub fn new(logical: LogicalChannel, raw_channels: Vec<RawChannel>) -> Self {
        Self {
            logical,
            raw_channels,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScalerMapping {
    pub logical: LogicalChannel,
    pub raw_channel: u32,
    /// If set, values become a slow control item of this name instead of a detector read
    pub slow_control: Option<String>,
}

impl ScalerMapping {
    pub fn new(logical: LogicalChannel, raw_channel: u32, slow_control: Option<&str>) -> Self {
        Self {
            logical,
            raw_channel,
            slow_control: slow_control.map(String::from),
        }
    }
}

/// The hit and scaler mappings valid for one run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelMap {
    pub hits: Vec<HitMapping>,
    pub scalers: Vec<ScalerMapping>,
}

/// Integers may be given in decimal or with a 0x prefix
fn parse_number<T>(s: &str) -> Result<T, ParseIntError>
where
    T: FromStr<Err = ParseIntError> + FromStrRadix,
{
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => T::from_str_radix(hex, 16),
        None => s.parse(),
    }
}

trait FromStrRadix: Sized {
    fn from_str_radix(s: &str, radix: u32) -> Result<Self, ParseIntError>;
}

impl FromStrRadix for u16 {
    fn from_str_radix(s: &str, radix: u32) -> Result<Self, ParseIntError> {
        u16::from_str_radix(s, radix)
    }
}

impl FromStrRadix for u32 {
    fn from_str_radix(s: &str, radix: u32) -> Result<Self, ParseIntError> {
        u32::from_str_radix(s, radix)
    }
}

fn parse_raw_channel(entry: &str) -> Result<RawChannel, ChannelMapError> {
    match entry.split_once(':') {
        Some((channel, mask)) => Ok(RawChannel::with_mask(
            parse_number(channel.trim())?,
            parse_number(mask.trim())?,
        )),
        None => Ok(RawChannel::new(parse_number(entry)?)),
    }
}

fn parse_logical(entries: &[&str]) -> Result<LogicalChannel, ChannelMapError> {
    Ok(LogicalChannel::new(
        DetectorType::from_str(entries[1])?,
        ChannelKind::from_str(entries[2])?,
        parse_number(entries[3])?,
    ))
}

impl ChannelMap {
    /// Load a channel map from a CSV file
    pub fn new(path: &Path) -> Result<Self, ChannelMapError> {
        let mut contents = String::new();
        let mut file = File::open(path)?;
        file.read_to_string(&mut contents)?;
        Self::from_csv(&contents)
    }

    /// Parse the CSV contents of a channel map. The first line is a header; blank lines
    /// and lines starting with '#' are skipped.
    pub fn from_csv(contents: &str) -> Result<Self, ChannelMapError> {
        let mut map = Self::default();

        let mut lines = contents.lines().enumerate();
        lines.next(); // Skip the header
        for (line_idx, line) in lines {
            let line_number = line_idx + 1;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let entries: Vec<&str> = line.split_terminator(",").map(str::trim).collect();
            if entries.len() < MIN_HIT_ENTRIES_PER_LINE {
                return Err(ChannelMapError::BadFileFormat(line_number));
            }

            match entries[0] {
                HIT_KEYWORD => {
                    let raw_channels = entries[4..]
                        .iter()
                        .map(|e| parse_raw_channel(e))
                        .collect::<Result<Vec<_>, _>>()?;
                    if raw_channels.len() > MAX_RAW_CHANNELS_PER_HIT {
                        return Err(ChannelMapError::TooManyRawChannels(line_number));
                    }
                    map.hits
                        .push(HitMapping::new(parse_logical(&entries)?, raw_channels));
                }
                SCALER_KEYWORD => {
                    let slow_control = match entries.len() {
                        SCALER_ENTRIES_PER_LINE => None,
                        NAMED_SCALER_ENTRIES_PER_LINE => Some(entries[5]),
                        _ => return Err(ChannelMapError::BadFileFormat(line_number)),
                    };
                    map.scalers.push(ScalerMapping::new(
                        parse_logical(&entries)?,
                        parse_number(entries[4])?,
                        slow_control,
                    ));
                }
                _ => return Err(ChannelMapError::BadFileFormat(line_number)),
            }
        }

        Ok(map)
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty() && self.scalers.is_empty()
    }

    /// Check the raw channels against the modules listed in the file header.
    ///
    /// Problems are reported as warnings; the mapping is used as is.
    pub fn validate(&self, info: &Info) -> Vec<Message> {
        let mut messages = Vec::new();
        for hit in self.hits.iter() {
            for raw in hit.raw_channels.iter() {
                match info
                    .adc_modules
                    .iter()
                    .find(|m| m.contains(raw.channel as u32))
                {
                    None => messages.push(Message::logged(
                        MessageLevel::Warn,
                        format!(
                            "Hit mapping {} uses raw channel {} which no ADC module provides",
                            hit.logical, raw.channel
                        ),
                    )),
                    Some(module) => {
                        if raw.mask != DEFAULT_MASK
                            && module.bits < 16
                            && (raw.mask as u32) >> module.bits != 0
                        {
                            messages.push(Message::logged(
                                MessageLevel::Warn,
                                format!(
                                    "Hit mapping {} masks raw channel {} with {:#06x}, wider than the {} bits of module {}",
                                    hit.logical, raw.channel, raw.mask, module.bits, module.identifier
                                ),
                            ))
                        }
                    }
                }
            }
        }
        for scaler in self.scalers.iter() {
            if !info
                .scaler_modules
                .iter()
                .any(|m| m.contains(scaler.raw_channel))
            {
                messages.push(Message::logged(
                    MessageLevel::Warn,
                    format!(
                        "Scaler mapping {} uses raw channel {} which no scaler module provides",
                        scaler.logical, scaler.raw_channel
                    ),
                ))
            }
        }
        messages
    }
}

/// Supplies the channel map for a file once its header is known
pub trait MappingProvider {
    fn mapping_for(&self, info: &Info) -> Result<ChannelMap, ChannelMapError>;
}

impl MappingProvider for ChannelMap {
    fn mapping_for(&self, _info: &Info) -> Result<ChannelMap, ChannelMapError> {
        Ok(self.clone())
    }
}

/// The immutable, pre-indexed mapping used while unpacking
#[derive(Debug, Clone, Default)]
pub struct MappingIndex {
    hits: Vec<HitMapping>,
    hit_index: FxHashMap<u16, Vec<usize>>,
    scalers: Vec<ScalerMapping>,
    scaler_index: FxHashMap<u32, Vec<usize>>,
}

impl MappingIndex {
    pub fn new(map: ChannelMap) -> Self {
        let mut index = Self::default();
        for hit in map.hits {
            if hit.raw_channels.is_empty() || hit.raw_channels.len() > MAX_RAW_CHANNELS_PER_HIT {
                spdlog::warn!(
                    "Ignoring hit mapping {} with {} raw channels",
                    hit.logical,
                    hit.raw_channels.len()
                );
                continue;
            }
            let entry = index.hits.len();
            for raw in hit.raw_channels.iter() {
                let entries = index.hit_index.entry(raw.channel).or_default();
                if !entries.contains(&entry) {
                    entries.push(entry);
                }
            }
            index.hits.push(hit);
        }
        for scaler in map.scalers {
            index
                .scaler_index
                .entry(scaler.raw_channel)
                .or_default()
                .push(index.scalers.len());
            index.scalers.push(scaler);
        }
        index
    }

    pub fn hit_entries(&self, raw_channel: u16) -> &[usize] {
        self.hit_index
            .get(&raw_channel)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn hit(&self, entry: usize) -> &HitMapping {
        &self.hits[entry]
    }

    pub fn n_hits(&self) -> usize {
        self.hits.len()
    }

    pub fn scaler_entries(&self, raw_channel: u32) -> &[usize] {
        self.scaler_index
            .get(&raw_channel)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn scaler(&self, entry: usize) -> &ScalerMapping {
        &self.scalers[entry]
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty() && self.scalers.is_empty()
    }
}
