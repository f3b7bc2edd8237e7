// Synthetic Acqu files for the integration tests
#![allow(dead_code)]

use std::io::Write;
use std::path::Path;

use libacqu_unpacker::channel_map::ChannelMap;
use libacqu_unpacker::constants::{
    END_OF_BUFFER_MARKER, END_OF_EVENT_MARKER, EPICS_BLOCK_MARKER, HEADER_BUFFER_MARKER,
    MK1_DATA_BUFFER_MARKER, MK2_DATA_BUFFER_MARKER, READ_ERROR_MARKER, SCALER_BLOCK_MARKER,
};
use libacqu_unpacker::event::{Event, Message, MessageLevel};
use libacqu_unpacker::unpacker::{Unpacker, UnpackerOptions};

pub const RUN_START: &str = "Mon Jun  1 12:00:00 2015";
/// RUN_START in CEST
pub const RUN_TIMESTAMP: u32 = 1433152800;
pub const MK2_RECORD_WORDS: usize = 0x8000 / 4;
pub const MK1_RECORD_WORDS: usize = 0x2000 / 4;

pub const TEST_MAP: &str = "type,detector,kind,index,raw
hit,CB,Integral,0,10
hit,CB,Integral,1,11
hit,Tagger,Timing,4,20:0x0fff,21
scaler,Tagger,Counter,4,7
scaler,Trigger,Scaler,0,8,TriggerScalers
scaler,Trigger,Scaler,1,9,TriggerScalers
";

pub fn test_map() -> ChannelMap {
    ChannelMap::from_csv(TEST_MAP).unwrap()
}

pub fn hit(channel: u16, value: u16) -> u32 {
    ((value as u32) << 16) | channel as u32
}

fn chars(s: &str, width: usize) -> Vec<u8> {
    let mut bytes = s.as_bytes().to_vec();
    bytes.resize(width, 0);
    bytes
}

fn to_words(bytes: &[u8]) -> Vec<u32> {
    let mut bytes = bytes.to_vec();
    while bytes.len() % 4 != 0 {
        bytes.push(0);
    }
    bytes
        .chunks(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// Mk2 header record with one ADC and one scaler module
pub fn mk2_header(time: &str, run: i32, declared_record_length: i32, record_words: usize) -> Vec<u32> {
    let mut bytes = HEADER_BUFFER_MARKER.to_le_bytes().to_vec();
    bytes.extend(HEADER_BUFFER_MARKER.to_le_bytes());
    bytes.extend(chars(time, 32));
    bytes.extend(chars("Synthetic test run", 256));
    bytes.extend(chars("", 256));
    bytes.extend(chars("run_1234.dat", 128));
    for v in [run, 2, 1, 1, 64, 32, declared_record_length] {
        bytes.extend(v.to_le_bytes());
    }
    // id, index, type, first channel, channels, scaler channels, bits
    for v in [0x0302i32, 0, 1, 0, 64, 0, 16] {
        bytes.extend(v.to_le_bytes());
    }
    for v in [0x0702i32, 1, 2, 0, 0, 32, 32] {
        bytes.extend(v.to_le_bytes());
    }
    let mut words = to_words(&bytes);
    words.resize(record_words, 0);
    words
}

/// `[serial][length][content][end of event]`
pub fn mk2_event(serial: u32, content: &[u32]) -> Vec<u32> {
    let mut words = vec![serial, ((content.len() + 1) * 4) as u32];
    words.extend_from_slice(content);
    words.push(END_OF_EVENT_MARKER);
    words
}

/// `[serial][content][end of event]`
pub fn mk1_event(serial: u32, content: &[u32]) -> Vec<u32> {
    let mut words = vec![serial];
    words.extend_from_slice(content);
    words.push(END_OF_EVENT_MARKER);
    words
}

/// A data record holding `events`, closed by the end-of-buffer word if there is room
pub fn data_buffer(marker: u32, record_words: usize, events: &[Vec<u32>]) -> Vec<u32> {
    let mut words = vec![marker];
    for event in events {
        words.extend_from_slice(event);
    }
    assert!(words.len() <= record_words, "events do not fit the record");
    if words.len() < record_words {
        words.push(END_OF_BUFFER_MARKER);
    }
    words.resize(record_words, 0);
    words
}

pub fn mk2_buffer(events: &[Vec<u32>]) -> Vec<u32> {
    data_buffer(MK2_DATA_BUFFER_MARKER, MK2_RECORD_WORDS, events)
}

pub fn mk1_buffer(events: &[Vec<u32>]) -> Vec<u32> {
    data_buffer(MK1_DATA_BUFFER_MARKER, MK1_RECORD_WORDS, events)
}

/// Mk1 header record with one ADC and one scaler module
pub fn mk1_header(time: &str, run: u16) -> Vec<u32> {
    let mut bytes = HEADER_BUFFER_MARKER.to_le_bytes().to_vec();
    bytes.extend(chars(time, 26));
    bytes.extend(chars("Synthetic Mk1 run", 133));
    bytes.extend(chars("", 133));
    bytes.extend(chars("run_42.dat", 40));
    for v in [run, 0, 2, 2, 0, 0, 64, 32, 0, 0, 0, 0, 0x2000] {
        bytes.extend(v.to_le_bytes());
    }
    for (name, mod_type, a_min, a_max) in [("ADC", 1u16, 0u16, 63u16), ("SCALER", 2, 0, 31)] {
        bytes.extend(chars(name, 20));
        for v in [0u16, 1, mod_type, 0, 2, 5, a_min, a_max, 16] {
            bytes.extend(v.to_le_bytes());
        }
    }
    let mut words = to_words(&bytes);
    words.resize(MK1_RECORD_WORDS, 0);
    words
}

pub fn scaler_block(pairs: &[(u32, u32)]) -> Vec<u32> {
    let mut words = vec![SCALER_BLOCK_MARKER, (pairs.len() * 2 * 4 + 4) as u32];
    for (index, value) in pairs {
        words.push(*index);
        words.push(*value);
    }
    words.push(SCALER_BLOCK_MARKER);
    words
}

pub fn mk2_error_block(module_id: i32, module_index: i32, code: i32) -> Vec<u32> {
    vec![
        READ_ERROR_MARKER,
        module_id as u32,
        module_index as u32,
        code as u32,
        READ_ERROR_MARKER,
    ]
}

/// One EPICS channel: name, type code, element bytes and element count
pub struct EpicsChannel<'a> {
    pub name: &'a str,
    pub type_code: i16,
    pub payload: Vec<u8>,
    pub n_elements: i16,
}

/// EPICS block claiming `nchan` channels, carrying `channels`
pub fn epics_block(period: i16, nchan: i16, channels: &[EpicsChannel]) -> Vec<u32> {
    let mut body = Vec::new();
    for channel in channels {
        body.extend(chars(channel.name, 32));
        body.extend(((38 + channel.payload.len()) as i16).to_le_bytes());
        body.extend(channel.n_elements.to_le_bytes());
        body.extend(channel.type_code.to_le_bytes());
        body.extend(&channel.payload);
    }
    while body.len() % 4 != 0 {
        body.push(0);
    }
    let mut bytes = chars("EPICS_BEAM", 32);
    bytes.extend(RUN_TIMESTAMP.to_le_bytes());
    bytes.extend(0i16.to_le_bytes());
    bytes.extend(period.to_le_bytes());
    bytes.extend(1i16.to_le_bytes());
    bytes.extend(nchan.to_le_bytes());
    bytes.extend(((48 + body.len()) as i16).to_le_bytes());
    bytes.extend([0u8, 0]);
    bytes.extend(body);

    let mut words = vec![EPICS_BLOCK_MARKER];
    words.extend(to_words(&bytes));
    words
}

pub fn double_channel(name: &str, value: f64) -> EpicsChannel {
    EpicsChannel {
        name,
        type_code: 6,
        payload: value.to_le_bytes().to_vec(),
        n_elements: 1,
    }
}

pub fn write_plain(dir: &Path, name: &str, records: &[Vec<u32>]) -> std::path::PathBuf {
    let path = dir.join(name);
    let mut file = std::fs::File::create(&path).unwrap();
    for record in records {
        for word in record {
            file.write_all(&word.to_le_bytes()).unwrap();
        }
    }
    file.flush().unwrap();
    path
}

pub fn write_xz(dir: &Path, name: &str, records: &[Vec<u32>]) -> std::path::PathBuf {
    let path = dir.join(name);
    let file = std::fs::File::create(&path).unwrap();
    let mut encoder = xz2::write::XzEncoder::new(file, 6);
    for record in records {
        for word in record {
            encoder.write_all(&word.to_le_bytes()).unwrap();
        }
    }
    encoder.finish().unwrap();
    path
}

/// Every event of the file, and every message whether attached to an event or not
pub fn unpack_all(path: &Path, options: &UnpackerOptions) -> (Vec<Event>, Vec<Message>) {
    let mut unpacker = Unpacker::open(path, options, &test_map()).unwrap();
    let mut events = Vec::new();
    while let Some(event) = unpacker.next_event() {
        events.push(event);
    }
    let mut messages: Vec<Message> = events.iter().flat_map(|e| e.messages.clone()).collect();
    messages.extend(unpacker.take_messages());
    (events, messages)
}

pub fn count(messages: &[Message], level: MessageLevel) -> usize {
    messages.iter().filter(|m| m.level == level).count()
}
