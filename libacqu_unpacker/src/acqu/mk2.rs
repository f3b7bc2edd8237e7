//! The Acqu Mk2 format.
//!
//! Header record: start marker, [`MK2_HEADER`] and one [`MK2_MODULE`] per module. Data
//! records hold events of the form `[serial][length in bytes][content...][end of event]`,
//! where the length reaches from the length word to the end-of-event word.
use crate::byte_source::ByteSource;
use crate::constants::{
    module_name, END_OF_EVENT_MARKER, EPICS_BLOCK_MARKER, HEADER_BUFFER_MARKER,
    MK2_DATA_BUFFER_MARKER, MK2_SEARCH_MAX_MULTIPLIER, MK2_SEARCH_OFFSETS, MK2_SEARCH_UNIT,
    MODULE_TYPE_ADC, MODULE_TYPE_SCALER, READ_ERROR_MARKER, SCALER_BLOCK_MARKER, WORD_SIZE,
};
use crate::error::SetupError;
use crate::event::{Message, MessageLevel};
use crate::event_builder::{EventBuilder, RawHit};
use crate::record::{words_to_bytes, FieldKind, FieldSpec, Layout};

use super::blocks::{handle_error_block, handle_scaler_block, ErrorBlockFormat};
use super::epics::handle_epics_block;
use super::search::BufferSearch;
use super::{plausible_header, AcquFormat, EventFailure, EventFraming, HardwareModule, Info, Malformed};

pub const MK2_HEADER: Layout = Layout::new(
    "AcquMk2Info",
    &[
        FieldSpec::new("mk2", FieldKind::U32),
        FieldSpec::new("time", FieldKind::Chars(32)),
        FieldSpec::new("description", FieldKind::Chars(256)),
        FieldSpec::new("run_note", FieldKind::Chars(256)),
        FieldSpec::new("out_file", FieldKind::Chars(128)),
        FieldSpec::new("run", FieldKind::I32),
        FieldSpec::new("n_module", FieldKind::I32),
        FieldSpec::new("n_adc_module", FieldKind::I32),
        FieldSpec::new("n_scaler_module", FieldKind::I32),
        FieldSpec::new("n_adc", FieldKind::I32),
        FieldSpec::new("n_scaler", FieldKind::I32),
        FieldSpec::new("rec_len", FieldKind::I32),
    ],
);

pub const MK2_MODULE: Layout = Layout::new(
    "ModuleInfoMk2",
    &[
        FieldSpec::new("module_id", FieldKind::I32),
        FieldSpec::new("module_index", FieldKind::I32),
        FieldSpec::new("module_type", FieldKind::I32),
        FieldSpec::new("first_channel", FieldKind::I32),
        FieldSpec::new("n_channels", FieldKind::I32),
        FieldSpec::new("n_scaler_channels", FieldKind::I32),
        FieldSpec::new("bits", FieldKind::I32),
    ],
);

/// Bytes of the header record a probe needs, start marker included
pub const HEADER_SIZE: usize = WORD_SIZE + MK2_HEADER.size();

const HEADER_WORDS: usize = HEADER_SIZE / WORD_SIZE;
const MODULE_WORDS: usize = MK2_MODULE.size() / WORD_SIZE;

pub fn probe(header: &[u32]) -> bool {
    if header.len() < HEADER_WORDS || header[0] != HEADER_BUFFER_MARKER {
        return false;
    }
    match MK2_HEADER.decode(&words_to_bytes(&header[1..HEADER_WORDS])) {
        Ok(record) => {
            record.u32("mk2").ok() == Some(HEADER_BUFFER_MARKER) && plausible_header(&record)
        }
        Err(_) => false,
    }
}

/// Parse the header record. `buffer` starts with the header sample and is expanded to
/// cover the module table.
pub(crate) fn read_info(
    reader: &mut ByteSource,
    buffer: &mut Vec<u32>,
    messages: &mut Vec<Message>,
) -> Result<Info, SetupError> {
    if buffer.len() < HEADER_WORDS {
        return Err(SetupError::BadHeader(String::from(
            "Mk2 header sample is too short",
        )));
    }
    let header = MK2_HEADER.decode(&words_to_bytes(&buffer[1..HEADER_WORDS]))?;

    let n_modules = header.i32("n_module")?;
    if n_modules < 0 {
        return Err(SetupError::BadHeader(format!(
            "Mk2 header claims {n_modules} modules"
        )));
    }
    let n_modules = n_modules as usize;
    let total_words = HEADER_WORDS + n_modules * MODULE_WORDS;
    if !reader.expand(buffer, total_words)? {
        return Err(SetupError::BadHeader(format!(
            "File ends within the module table of {n_modules} modules"
        )));
    }

    let mut info = Info {
        format: AcquFormat::Mk2,
        run_number: header.i32("run")? as u32,
        time: header.string("time")?,
        timestamp: 0,
        description: header.string("description")?,
        run_note: header.string("run_note")?,
        out_file: header.string("out_file")?,
        record_length: header.i32("rec_len")? as u32,
        adc_modules: Vec::new(),
        scaler_modules: Vec::new(),
    };
    spdlog::debug!("Mk2 header says: have {} modules", n_modules);

    for idx in 0..n_modules {
        let start = HEADER_WORDS + idx * MODULE_WORDS;
        let module = MK2_MODULE.decode(&words_to_bytes(&buffer[start..start + MODULE_WORDS]))?;
        let module_id = module.i32("module_id")?;
        let Some(identifier) = module_name(module_id as u32) else {
            messages.push(Message::logged(
                MessageLevel::Warn,
                format!("Skipping unknown module with ID={module_id:#x}"),
            ));
            continue;
        };
        let mut hardware = HardwareModule {
            identifier: identifier.to_string(),
            index: module.i32("module_index")? as u32,
            first_raw_channel: module.i32("first_channel")? as u32,
            n_raw_channels: 0,
            bits: module.i32("bits")? as u32,
        };
        let module_type = module.i32("module_type")? as u32;
        if module_type & MODULE_TYPE_ADC != 0 {
            hardware.n_raw_channels = module.i32("n_channels")? as u32;
            info.adc_modules.push(hardware.clone());
        }
        if module_type & MODULE_TYPE_SCALER != 0 {
            hardware.n_raw_channels = module.i32("n_scaler_channels")? as u32;
            info.scaler_modules.push(hardware);
        }
    }
    spdlog::debug!(
        "Mk2 header says: have {} ADC and {} scaler modules",
        info.adc_modules.len(),
        info.scaler_modules.len()
    );

    Ok(info)
}

pub(crate) fn buffer_search(max_multiplier: Option<usize>) -> BufferSearch {
    BufferSearch {
        unit: MK2_SEARCH_UNIT,
        offsets: &MK2_SEARCH_OFFSETS,
        max_multiplier: max_multiplier.unwrap_or(MK2_SEARCH_MAX_MULTIPLIER),
        marker: MK2_DATA_BUFFER_MARKER,
    }
}

/// Unpack the content between the length word and the end-of-event word
fn unpack_content(words: &[u32], builder: &mut EventBuilder) -> Result<(), Malformed> {
    let mut pos = 0;
    while pos < words.len() {
        pos = match words[pos] {
            EPICS_BLOCK_MARKER => handle_epics_block(words, pos, builder)?,
            SCALER_BLOCK_MARKER => {
                handle_scaler_block(words, pos, ErrorBlockFormat::Mk2, builder)?
            }
            READ_ERROR_MARKER => handle_error_block(words, pos, ErrorBlockFormat::Mk2, builder)?,
            END_OF_EVENT_MARKER => {
                return Err(Malformed::new("Found premature end-of-event marker"))
            }
            word => {
                builder.add_hit(RawHit::from_word(word));
                pos + 1
            }
        };
    }
    Ok(())
}

pub(crate) struct Mk2Framing;

impl EventFraming for Mk2Framing {
    const DATA_MARKER: u32 = MK2_DATA_BUFFER_MARKER;

    fn unpack_event(
        buffer: &[u32],
        pos: usize,
        builder: &mut EventBuilder,
    ) -> Result<usize, EventFailure> {
        let Some(length) = buffer.get(pos) else {
            return Err(EventFailure::Undelimited(Malformed::new(
                "Event consists only of its serial",
            )));
        };
        let length = *length as usize;
        if length % WORD_SIZE != 0 {
            return Err(EventFailure::Undelimited(Malformed(format!(
                "Event length {length:#x} is not a multiple of the word size"
            ))));
        }
        let end = pos + length / WORD_SIZE;
        if end >= buffer.len() {
            return Err(EventFailure::Undelimited(Malformed(format!(
                "Event with size {:#x} too big to fit in buffer of remaining size {}",
                length / WORD_SIZE,
                buffer.len() - pos
            ))));
        }
        if buffer[end] != END_OF_EVENT_MARKER {
            return Err(EventFailure::Undelimited(Malformed(format!(
                "At designated end of event, found unexpected word {:#010x}",
                buffer[end]
            ))));
        }

        match unpack_content(&buffer[pos + 1..end], builder) {
            Ok(()) => Ok(end + 1),
            Err(reason) => Err(EventFailure::Content {
                reason,
                resume: Some(end + 1),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel_map::{ChannelMap, MappingIndex};
    use crate::event::EventId;
    use std::io::Write;

    fn chars(s: &str, width: usize) -> Vec<u8> {
        let mut bytes = s.as_bytes().to_vec();
        bytes.resize(width, 0);
        bytes
    }

    fn module(id: i32, index: i32, module_type: i32, first: i32, n: i32, n_sc: i32) -> Vec<u8> {
        [id, index, module_type, first, n, n_sc, 16]
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect()
    }

    fn header_bytes(time: &str, out_file: &str, modules: &[Vec<u8>]) -> Vec<u8> {
        let mut bytes = HEADER_BUFFER_MARKER.to_le_bytes().to_vec();
        bytes.extend(HEADER_BUFFER_MARKER.to_le_bytes());
        bytes.extend(chars(time, 32));
        bytes.extend(chars("Compton scattering", 256));
        bytes.extend(chars("beam on", 256));
        bytes.extend(chars(out_file, 128));
        let n_modules = modules.len() as i32;
        for v in [1234, n_modules, 1, 1, 32, 32, 0x8000] {
            bytes.extend(v.to_le_bytes());
        }
        for m in modules {
            bytes.extend(m);
        }
        bytes
    }

    fn to_words(bytes: &[u8]) -> Vec<u32> {
        bytes
            .chunks(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect()
    }

    #[test]
    fn test_probe() {
        let words = to_words(&header_bytes("Mon Jun  1 12:00:00 2015\n", "scratch/run_1234.dat", &[]));
        assert!(probe(&words));
        // Time string of the wrong length
        let words = to_words(&header_bytes("Jun 1 2015", "run.dat", &[]));
        assert!(!probe(&words));
        // No output file
        let words = to_words(&header_bytes("Mon Jun  1 12:00:00 2015", "", &[]));
        assert!(!probe(&words));
        // Missing Mk2 flag
        let mut words = to_words(&header_bytes("Mon Jun  1 12:00:00 2015", "run.dat", &[]));
        words[1] = 0;
        assert!(!probe(&words));
        assert!(!probe(&words[..10]));
    }

    #[test]
    fn test_read_info_modules() {
        let modules = vec![
            module(0x0302, 0, 1, 0, 32, 0),
            module(0x0702, 1, 3, 100, 16, 8),
            module(0x4242, 2, 1, 200, 8, 0),
        ];
        let bytes = header_bytes("Mon Jun  1 12:00:00 2015", "run.dat", &modules);
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&bytes).unwrap();
        file.flush().unwrap();

        let mut reader = ByteSource::open(file.path()).unwrap();
        let mut buffer = vec![0u32; HEADER_WORDS];
        reader.read_words(&mut buffer).unwrap();
        let mut messages = Vec::new();
        let info = read_info(&mut reader, &mut buffer, &mut messages).unwrap();

        assert_eq!(info.format, AcquFormat::Mk2);
        assert_eq!(info.run_number, 1234);
        assert_eq!(info.time, "Mon Jun  1 12:00:00 2015");
        assert_eq!(info.description, "Compton scattering");
        assert_eq!(info.record_length, 0x8000);
        assert_eq!(info.adc_modules.len(), 2);
        assert_eq!(info.scaler_modules.len(), 1);
        assert_eq!(info.adc_modules[1].identifier, "GSI_VUPROM_Scaler");
        assert_eq!(info.adc_modules[1].n_raw_channels, 16);
        assert_eq!(info.scaler_modules[0].n_raw_channels, 8);
        assert_eq!(info.scaler_modules[0].first_raw_channel, 100);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].level, MessageLevel::Warn);
    }

    #[test]
    fn test_truncated_module_table() {
        let modules = vec![module(0x0302, 0, 1, 0, 32, 0)];
        let mut bytes = header_bytes("Mon Jun  1 12:00:00 2015", "run.dat", &modules);
        bytes.truncate(bytes.len() - 8);
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&bytes).unwrap();
        file.flush().unwrap();

        let mut reader = ByteSource::open(file.path()).unwrap();
        let mut buffer = vec![0u32; HEADER_WORDS];
        reader.read_words(&mut buffer).unwrap();
        assert!(read_info(&mut reader, &mut buffer, &mut Vec::new()).is_err());
    }

    fn build(builder: EventBuilder) -> crate::event::Event {
        builder.build(EventId::new(0, 0), &MappingIndex::new(ChannelMap::default()), 0, Vec::new())
    }

    #[test]
    fn test_event_framing() {
        // serial, length, two hits, scaler block, end
        let buffer = [
            MK2_DATA_BUFFER_MARKER,
            1,
            8 * 4,
            0x0001_0002,
            0x0003_0004,
            SCALER_BLOCK_MARKER,
            12,
            5,
            6,
            SCALER_BLOCK_MARKER,
            END_OF_EVENT_MARKER,
            END_OF_EVENT_MARKER,
        ];
        let mut builder = EventBuilder::new();
        let next = Mk2Framing::unpack_event(&buffer, 2, &mut builder).unwrap();
        assert_eq!(next, 11);
        assert!(build(builder).messages.is_empty());
    }

    #[test]
    fn test_undelimited_event() {
        let buffer = [MK2_DATA_BUFFER_MARKER, 1, 3 * 4, 0x0001_0002, 0x0003_0004, 0];
        let mut builder = EventBuilder::new();
        match Mk2Framing::unpack_event(&buffer, 2, &mut builder) {
            Err(EventFailure::Undelimited(_)) => (),
            _ => panic!(),
        }
        let buffer = [MK2_DATA_BUFFER_MARKER, 1, 40 * 4, 0x0001_0002];
        match Mk2Framing::unpack_event(&buffer, 2, &mut builder) {
            Err(EventFailure::Undelimited(_)) => (),
            _ => panic!(),
        }
    }

    #[test]
    fn test_broken_content_resumes_after_event() {
        // A scaler block without its closing marker
        let buffer = [
            MK2_DATA_BUFFER_MARKER,
            1,
            5 * 4,
            SCALER_BLOCK_MARKER,
            8,
            5,
            6,
            END_OF_EVENT_MARKER,
            END_OF_EVENT_MARKER,
        ];
        let mut builder = EventBuilder::new();
        match Mk2Framing::unpack_event(&buffer, 2, &mut builder) {
            Err(EventFailure::Content { resume, .. }) => assert_eq!(resume, Some(8)),
            _ => panic!(),
        }
    }
}
