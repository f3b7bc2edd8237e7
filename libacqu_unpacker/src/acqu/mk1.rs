//! The Acqu Mk1 format.
//!
//! The header record is the start marker, [`MK1_HEADER`] and a table of [`MK1_MODULE`]
//! entries, none of them word aligned. Events carry no length: `[serial][content...]
//! [end of event]`, so the end is only known once the end-of-event word was reached.
use crate::byte_source::ByteSource;
use crate::constants::{
    END_OF_EVENT_MARKER, EPICS_BLOCK_MARKER, HEADER_BUFFER_MARKER, MK1_DATA_BUFFER_MARKER,
    MK1_SEARCH_MAX_MULTIPLIER, MK1_SEARCH_OFFSETS, MK1_SEARCH_UNIT, MODULE_TYPE_ADC,
    MODULE_TYPE_SCALER, READ_ERROR_MARKER, SCALER_BLOCK_MARKER, WORD_SIZE,
};
use crate::error::SetupError;
use crate::event::{Message, MessageLevel};
use crate::event_builder::{EventBuilder, RawHit};
use crate::record::{sanitize, words_to_bytes, FieldKind, FieldSpec, Layout};

use super::blocks::{handle_error_block, handle_scaler_block, ErrorBlockFormat};
use super::search::BufferSearch;
use super::{plausible_header, AcquFormat, EventFailure, EventFraming, HardwareModule, Info, Malformed};

pub const MK1_HEADER: Layout = Layout::new(
    "AcquExptInfo",
    &[
        FieldSpec::new("time", FieldKind::Chars(26)),
        FieldSpec::new("description", FieldKind::Chars(133)),
        FieldSpec::new("run_note", FieldKind::Chars(133)),
        FieldSpec::new("out_file", FieldKind::Chars(40)),
        FieldSpec::new("run", FieldKind::U16),
        FieldSpec::new("n_slave", FieldKind::U16),
        FieldSpec::new("n_module", FieldKind::U16),
        FieldSpec::new("n_vme", FieldKind::U16),
        FieldSpec::new("n_camac", FieldKind::U16),
        FieldSpec::new("n_fastbus", FieldKind::U16),
        FieldSpec::new("n_spect", FieldKind::U16),
        FieldSpec::new("n_scaler", FieldKind::U16),
        FieldSpec::new("camac_irq", FieldKind::U16),
        FieldSpec::new("camac_irq_scaler", FieldKind::U16),
        FieldSpec::new("fastbus_irq", FieldKind::U16),
        FieldSpec::new("fastbus_irq_scaler", FieldKind::U16),
        FieldSpec::new("rec_len", FieldKind::U16),
    ],
);

pub const MK1_MODULE: Layout = Layout::new(
    "ModuleInfo",
    &[
        FieldSpec::new("name", FieldKind::Chars(20)),
        FieldSpec::new("vic_crate", FieldKind::U16),
        FieldSpec::new("bus_type", FieldKind::U16),
        FieldSpec::new("mod_type", FieldKind::U16),
        FieldSpec::new("branch", FieldKind::U16),
        FieldSpec::new("crate", FieldKind::U16),
        FieldSpec::new("station", FieldKind::U16),
        FieldSpec::new("a_min", FieldKind::U16),
        FieldSpec::new("a_max", FieldKind::U16),
        FieldSpec::new("bits", FieldKind::U16),
    ],
);

/// Bytes of the header record a probe needs, start marker included
pub const HEADER_SIZE: usize = WORD_SIZE + MK1_HEADER.size();

const HEADER_WORDS: usize = HEADER_SIZE.div_ceil(WORD_SIZE);

pub fn probe(header: &[u32]) -> bool {
    if header.len() < HEADER_WORDS || header[0] != HEADER_BUFFER_MARKER {
        return false;
    }
    match MK1_HEADER.decode(&words_to_bytes(&header[1..])) {
        Ok(record) => plausible_header(&record),
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
            "Mk1 header sample is too short",
        )));
    }
    let header = MK1_HEADER.decode(&words_to_bytes(&buffer[1..]))?;

    let n_modules = header.u16("n_module")? as usize;
    let table_end = HEADER_SIZE + n_modules * MK1_MODULE.size();
    if !reader.expand(buffer, table_end.div_ceil(WORD_SIZE))? {
        return Err(SetupError::BadHeader(format!(
            "File ends within the module table of {n_modules} modules"
        )));
    }

    let mut info = Info {
        format: AcquFormat::Mk1,
        run_number: header.u16("run")? as u32,
        time: header.string("time")?,
        timestamp: 0,
        description: header.string("description")?,
        run_note: header.string("run_note")?,
        out_file: header.string("out_file")?,
        record_length: header.u16("rec_len")? as u32,
        adc_modules: Vec::new(),
        scaler_modules: Vec::new(),
    };
    spdlog::debug!("Mk1 header says: have {} modules", n_modules);

    let bytes = words_to_bytes(buffer);
    for idx in 0..n_modules {
        let start = HEADER_SIZE + idx * MK1_MODULE.size();
        let module = MK1_MODULE.decode(&bytes[start..])?;
        let identifier = sanitize(module.chars("name")?);
        let a_min = module.u16("a_min")?;
        let a_max = module.u16("a_max")?;
        if a_max < a_min {
            messages.push(Message::logged(
                MessageLevel::Warn,
                format!("Skipping module {identifier} with empty subaddress range {a_min}..{a_max}"),
            ));
            continue;
        }
        let hardware = HardwareModule {
            identifier,
            index: idx as u32,
            first_raw_channel: a_min as u32,
            n_raw_channels: (a_max - a_min) as u32 + 1,
            bits: module.u16("bits")? as u32,
        };
        let module_type = module.u16("mod_type")? as u32;
        if module_type & MODULE_TYPE_ADC != 0 {
            info.adc_modules.push(hardware.clone());
        }
        if module_type & MODULE_TYPE_SCALER != 0 {
            info.scaler_modules.push(hardware);
        }
    }

    Ok(info)
}

pub(crate) fn buffer_search(max_multiplier: Option<usize>) -> BufferSearch {
    BufferSearch {
        unit: MK1_SEARCH_UNIT,
        offsets: &MK1_SEARCH_OFFSETS,
        max_multiplier: max_multiplier.unwrap_or(MK1_SEARCH_MAX_MULTIPLIER),
        marker: MK1_DATA_BUFFER_MARKER,
    }
}

/// Position after the next end-of-event word at or after `pos`
fn next_event_boundary(buffer: &[u32], pos: usize) -> Option<usize> {
    buffer[pos.min(buffer.len())..]
        .iter()
        .position(|w| *w == END_OF_EVENT_MARKER)
        .map(|offset| pos + offset + 1)
}

pub(crate) struct Mk1Framing;

impl EventFraming for Mk1Framing {
    const DATA_MARKER: u32 = MK1_DATA_BUFFER_MARKER;

    fn unpack_event(
        buffer: &[u32],
        pos: usize,
        builder: &mut EventBuilder,
    ) -> Result<usize, EventFailure> {
        let mut cursor = pos;
        while cursor < buffer.len() {
            let block = match buffer[cursor] {
                END_OF_EVENT_MARKER => return Ok(cursor + 1),
                SCALER_BLOCK_MARKER => {
                    handle_scaler_block(buffer, cursor, ErrorBlockFormat::Mk1, builder)
                }
                READ_ERROR_MARKER => {
                    handle_error_block(buffer, cursor, ErrorBlockFormat::Mk1, builder)
                }
                EPICS_BLOCK_MARKER => Err(Malformed::new(
                    "EPICS blocks are not part of the Mk1 format",
                )),
                word => {
                    builder.add_hit(RawHit::from_word(word));
                    Ok(cursor + 1)
                }
            };
            cursor = match block {
                Ok(next) => next,
                Err(reason) => {
                    return Err(EventFailure::Content {
                        reason,
                        resume: next_event_boundary(buffer, cursor + 1),
                    })
                }
            };
        }
        Err(EventFailure::Undelimited(Malformed::new(
            "Event not terminated before the end of the buffer",
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn chars(s: &str, width: usize) -> Vec<u8> {
        let mut bytes = s.as_bytes().to_vec();
        bytes.resize(width, 0);
        bytes
    }

    fn module(name: &str, mod_type: u16, a_min: u16, a_max: u16) -> Vec<u8> {
        let mut bytes = chars(name, 20);
        for v in [0u16, 1, mod_type, 0, 2, 5, a_min, a_max, 12] {
            bytes.extend(v.to_le_bytes());
        }
        bytes
    }

    fn header_bytes(time: &str, modules: &[Vec<u8>]) -> Vec<u8> {
        let mut bytes = HEADER_BUFFER_MARKER.to_le_bytes().to_vec();
        bytes.extend(chars(time, 26));
        bytes.extend(chars("Tagger calibration", 133));
        bytes.extend(chars("", 133));
        bytes.extend(chars("run_42.dat", 40));
        let n_modules = modules.len() as u16;
        for v in [42u16, 0, n_modules, n_modules, 0, 0, 16, 4, 0, 0, 0, 0, 0x2000] {
            bytes.extend(v.to_le_bytes());
        }
        for m in modules {
            bytes.extend(m);
        }
        while bytes.len() % 4 != 0 {
            bytes.push(0);
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
        let words = to_words(&header_bytes("Mon Jun  1 12:00:00 2015\n", &[]));
        assert!(probe(&words));
        let words = to_words(&header_bytes("yesterday", &[]));
        assert!(!probe(&words));
        assert!(!probe(&words[..20]));
    }

    #[test]
    fn test_read_info_modules() {
        let modules = vec![
            module("ADC 4418 ", 1, 0, 31),
            module("SCALER 3801", 2, 100, 115),
            module("PATTERN", 3, 200, 207),
            module("BROKEN", 1, 10, 2),
        ];
        let bytes = header_bytes("Mon Jun  1 12:00:00 2015\n", &modules);
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&bytes).unwrap();
        file.flush().unwrap();

        let mut reader = ByteSource::open(file.path()).unwrap();
        let mut buffer = vec![0u32; HEADER_WORDS];
        reader.read_words(&mut buffer).unwrap();
        let mut messages = Vec::new();
        let info = read_info(&mut reader, &mut buffer, &mut messages).unwrap();

        assert_eq!(info.format, AcquFormat::Mk1);
        assert_eq!(info.run_number, 42);
        assert_eq!(info.record_length, 0x2000);
        assert_eq!(info.out_file, "run_42.dat");
        assert_eq!(info.adc_modules.len(), 2);
        assert_eq!(info.scaler_modules.len(), 2);
        assert_eq!(info.adc_modules[0].identifier, "ADC 4418");
        assert_eq!(info.adc_modules[0].n_raw_channels, 32);
        assert_eq!(info.scaler_modules[0].first_raw_channel, 100);
        assert_eq!(info.scaler_modules[0].n_raw_channels, 16);
        assert_eq!(info.scaler_modules[1].index, 2);
        assert_eq!(info.scaler_modules[1].bits, 12);
        assert_eq!(messages.len(), 1);
    }

    #[test]
    fn test_event_scan() {
        let buffer = [
            MK1_DATA_BUFFER_MARKER,
            7,
            0x0001_0002,
            READ_ERROR_MARKER,
            0x0002_0001,
            0x0004_0003,
            0x0000_0005,
            END_OF_EVENT_MARKER,
            END_OF_EVENT_MARKER,
        ];
        let mut builder = EventBuilder::new();
        assert_eq!(Mk1Framing::unpack_event(&buffer, 2, &mut builder).unwrap(), 8);

        let buffer = [MK1_DATA_BUFFER_MARKER, 7, 0x0001_0002, 0x0001_0003];
        match Mk1Framing::unpack_event(&buffer, 2, &mut builder) {
            Err(EventFailure::Undelimited(_)) => (),
            _ => panic!(),
        }
    }

    #[test]
    fn test_broken_content_resumes_at_next_end() {
        let buffer = [
            MK1_DATA_BUFFER_MARKER,
            7,
            EPICS_BLOCK_MARKER,
            0x0001_0002,
            END_OF_EVENT_MARKER,
            8,
            0x0001_0002,
            END_OF_EVENT_MARKER,
        ];
        let mut builder = EventBuilder::new();
        match Mk1Framing::unpack_event(&buffer, 2, &mut builder) {
            Err(EventFailure::Content { resume, .. }) => assert_eq!(resume, Some(5)),
            _ => panic!(),
        }

        let buffer = [MK1_DATA_BUFFER_MARKER, 7, SCALER_BLOCK_MARKER, 400, 1];
        match Mk1Framing::unpack_event(&buffer, 2, &mut builder) {
            Err(EventFailure::Content { resume, .. }) => assert_eq!(resume, None),
            _ => panic!(),
        }
    }
}
