// EPICS slow control blocks (Mk2 only).
//
// [marker][48 byte header][channel]...
// Each channel is a 38 byte header followed by `nelem` typed elements. The header `len`
// counts the bytes from the header start to the end of the last channel. Past the header
// the data is no longer word aligned, so channels are read from a byte image.
use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;

use crate::constants::WORD_SIZE;
use crate::error::RecordError;
use crate::event::{SlowControl, SlowControlKind, Validity};
use crate::event_builder::EventBuilder;
use crate::record::{sanitize, words_to_bytes, FieldKind, FieldSpec, Layout};

use super::Malformed;

const EPICS_HEADER: Layout = Layout::new(
    "EpicsHeaderInfo",
    &[
        FieldSpec::new("name", FieldKind::Chars(32)),
        FieldSpec::new("time", FieldKind::U32),
        FieldSpec::new("index", FieldKind::I16),
        FieldSpec::new("period", FieldKind::I16),
        FieldSpec::new("id", FieldKind::I16),
        FieldSpec::new("nchan", FieldKind::I16),
        FieldSpec::new("len", FieldKind::I16),
        FieldSpec::new("pad", FieldKind::Pad(2)),
    ],
);

const EPICS_CHANNEL: Layout = Layout::new(
    "EpicsChannelInfo",
    &[
        FieldSpec::new("pvname", FieldKind::Chars(32)),
        FieldSpec::new("bytes", FieldKind::I16),
        FieldSpec::new("nelem", FieldKind::I16),
        FieldSpec::new("type", FieldKind::I16),
    ],
);

const EPICS_STRING_SIZE: usize = 40;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EpicsType {
    String,
    Short,
    Float,
    Byte,
    Long,
    Double,
}

impl EpicsType {
    fn from_code(code: i16) -> Option<Self> {
        match code {
            0 => Some(Self::String),
            1 => Some(Self::Short),
            2 => Some(Self::Float),
            4 => Some(Self::Byte),
            5 => Some(Self::Long),
            6 => Some(Self::Double),
            _ => None,
        }
    }

    fn size(&self) -> usize {
        match self {
            Self::String => EPICS_STRING_SIZE,
            Self::Short => 2,
            Self::Float => 4,
            Self::Byte => 1,
            Self::Long => 4,
            Self::Double => 8,
        }
    }
}

fn record_error(e: RecordError) -> Malformed {
    Malformed(format!("Could not decode EPICS block: {e}"))
}

fn kind_for_period(period: i16) -> (SlowControlKind, Validity, String) {
    if period < 0 {
        (
            SlowControlKind::EpicsTimer,
            Validity::Backward,
            format!("Period='{} ms'", -(period as i32)),
        )
    } else if period > 0 {
        (
            SlowControlKind::EpicsScaler,
            Validity::Backward,
            format!("Period='{period} scalers'"),
        )
    } else {
        (SlowControlKind::EpicsOneShot, Validity::Forward, String::new())
    }
}

fn truncated() -> Malformed {
    Malformed::new("EPICS channel payload not completely present in buffer")
}

fn read_element(
    cursor: &mut Cursor<&[u8]>,
    element_type: EpicsType,
    element: u32,
    slow_control: &mut SlowControl,
) -> Result<(), Malformed> {
    match element_type {
        EpicsType::Byte => {
            let value = cursor.read_u8().map_err(|_| truncated())?;
            slow_control.payload_int.push((element, value as i64));
        }
        EpicsType::Short => {
            let value = cursor.read_i16::<LittleEndian>().map_err(|_| truncated())?;
            slow_control.payload_int.push((element, value as i64));
        }
        EpicsType::Long => {
            let value = cursor.read_i32::<LittleEndian>().map_err(|_| truncated())?;
            slow_control.payload_int.push((element, value as i64));
        }
        EpicsType::Float => {
            let value = cursor.read_f32::<LittleEndian>().map_err(|_| truncated())?;
            slow_control.payload_float.push((element, value as f64));
        }
        EpicsType::Double => {
            let value = cursor.read_f64::<LittleEndian>().map_err(|_| truncated())?;
            slow_control.payload_float.push((element, value));
        }
        EpicsType::String => {
            let start = cursor.position() as usize;
            let bytes = cursor.get_ref();
            if bytes.len() < start + EPICS_STRING_SIZE {
                return Err(truncated());
            }
            let raw = &bytes[start..start + EPICS_STRING_SIZE];
            if !raw.contains(&0) {
                return Err(Malformed::new(
                    "EPICS channel string data too long (no terminating NUL)",
                ));
            }
            slow_control.payload_string.push((element, sanitize(raw)));
            cursor.set_position((start + EPICS_STRING_SIZE) as u64);
        }
    }
    Ok(())
}

pub(crate) fn handle_epics_block(
    words: &[u32],
    pos: usize,
    builder: &mut EventBuilder,
) -> Result<usize, Malformed> {
    let start = pos + 1;
    let header_words = EPICS_HEADER.size() / WORD_SIZE;
    if words.len() - start < header_words {
        return Err(Malformed::new(
            "EPICS header not completely present in buffer",
        ));
    }
    let header = EPICS_HEADER
        .decode(&words_to_bytes(&words[start..start + header_words]))
        .map_err(record_error)?;

    let len = header.i16("len").map_err(record_error)?;
    if len < 0 || len as usize % WORD_SIZE != 0 {
        return Err(Malformed::new("EPICS data not word aligned"));
    }
    let total_words = len as usize / WORD_SIZE;
    if total_words < header_words {
        return Err(Malformed::new("EPICS data shorter than its own header"));
    }
    let Some(module_name) = header.terminated_string("name").map_err(record_error)? else {
        return Err(Malformed::new("EPICS header has malformed module name"));
    };
    if words.len() - start < total_words {
        return Err(Malformed::new(
            "EPICS data not completely present in buffer",
        ));
    }
    let n_channels = header.i16("nchan").map_err(record_error)?.max(0) as usize;
    let time = header.u32("time").map_err(record_error)? as i64;
    let period = header.i16("period").map_err(record_error)?;

    let bytes = words_to_bytes(&words[start..start + total_words]);
    let mut offset = EPICS_HEADER.size();
    spdlog::trace!("EPICS module {} with {} channels", module_name, n_channels);

    for _ in 0..n_channels {
        let remaining = bytes.len() - offset;
        if remaining < EPICS_CHANNEL.size() {
            return Err(Malformed::new(
                "EPICS channel header not completely present in buffer",
            ));
        }
        let channel = EPICS_CHANNEL.decode(&bytes[offset..]).map_err(record_error)?;
        let channel_bytes = channel.i16("bytes").map_err(record_error)?;
        if channel_bytes < 0 || remaining < channel_bytes as usize {
            return Err(Malformed::new(
                "EPICS channel payload not completely present in buffer",
            ));
        }
        let Some(element_type) = EpicsType::from_code(channel.i16("type").map_err(record_error)?)
        else {
            return Err(Malformed::new("EPICS channel type unknown"));
        };
        let n_elements = channel.i16("nelem").map_err(record_error)?;
        if n_elements < 0
            || channel_bytes as usize
                != EPICS_CHANNEL.size() + n_elements as usize * element_type.size()
        {
            return Err(Malformed::new("EPICS channel payload size inconsistent"));
        }

        let (kind, validity, description) = kind_for_period(period);
        let mut slow_control = SlowControl::new(
            kind,
            validity,
            time,
            &channel.string("pvname").map_err(record_error)?,
            &description,
        );

        let payload_start = offset + EPICS_CHANNEL.size();
        let mut cursor = Cursor::new(&bytes[..offset + channel_bytes as usize]);
        cursor.set_position(payload_start as u64);
        for element in 0..n_elements as u32 {
            read_element(&mut cursor, element_type, element, &mut slow_control)?;
        }
        builder.add_slow_control(slow_control);
        offset += channel_bytes as usize;
    }

    Ok(start + total_words)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel_map::{ChannelMap, MappingIndex};
    use crate::constants::EPICS_BLOCK_MARKER;
    use crate::event::EventId;
    use byteorder::ByteOrder;

    fn chars(s: &str, width: usize) -> Vec<u8> {
        let mut bytes = s.as_bytes().to_vec();
        bytes.resize(width, 0);
        bytes
    }

    fn channel(name: &str, code: i16, payload: &[u8], n_elements: i16) -> Vec<u8> {
        let mut bytes = chars(name, 32);
        bytes.extend_from_slice(&((38 + payload.len()) as i16).to_le_bytes());
        bytes.extend_from_slice(&n_elements.to_le_bytes());
        bytes.extend_from_slice(&code.to_le_bytes());
        bytes.extend_from_slice(payload);
        bytes
    }

    fn block(period: i16, nchan: i16, channels: &[Vec<u8>]) -> Vec<u32> {
        let mut body: Vec<u8> = channels.concat();
        while body.len() % 4 != 0 {
            body.push(0);
        }
        let mut bytes = chars("BEAM", 32);
        bytes.extend_from_slice(&1433152800u32.to_le_bytes());
        bytes.extend_from_slice(&0i16.to_le_bytes());
        bytes.extend_from_slice(&period.to_le_bytes());
        bytes.extend_from_slice(&7i16.to_le_bytes());
        bytes.extend_from_slice(&nchan.to_le_bytes());
        bytes.extend_from_slice(&((48 + body.len()) as i16).to_le_bytes());
        bytes.extend_from_slice(&[0, 0]);
        bytes.extend_from_slice(&body);

        let mut words = vec![EPICS_BLOCK_MARKER];
        let mut data = vec![0u32; bytes.len() / 4];
        LittleEndian::read_u32_into(&bytes, &mut data);
        words.extend(data);
        words
    }

    fn build(builder: EventBuilder) -> crate::event::Event {
        builder.build(EventId::new(0, 0), &MappingIndex::new(ChannelMap::default()), 0, Vec::new())
    }

    #[test]
    fn test_typed_channels() {
        let mut double_payload = Vec::new();
        double_payload.extend_from_slice(&1.5f64.to_le_bytes());
        double_payload.extend_from_slice(&(-2.25f64).to_le_bytes());
        let channels = vec![
            channel("TAGG:current", 6, &double_payload, 2),
            channel("BEAM:count", 5, &(-12i32).to_le_bytes(), 1),
            channel("TARGET:state", 0, &chars("cold", 40), 1),
        ];
        let mut words = block(-1000, 3, &channels);
        words.push(0xFFFFFFFF);

        let mut builder = EventBuilder::new();
        let next = handle_epics_block(&words, 0, &mut builder).unwrap();
        assert_eq!(next, words.len() - 1);

        let event = build(builder);
        assert_eq!(event.slow_controls.len(), 3);
        let current = &event.slow_controls[0];
        assert_eq!(current.name, "TAGG:current");
        assert_eq!(current.kind, SlowControlKind::EpicsTimer);
        assert_eq!(current.validity, Validity::Backward);
        assert_eq!(current.description, "Period='1000 ms'");
        assert_eq!(current.timestamp, 1433152800);
        assert_eq!(current.payload_float, vec![(0, 1.5), (1, -2.25)]);
        assert_eq!(event.slow_controls[1].payload_int, vec![(0, -12)]);
        assert_eq!(
            event.slow_controls[2].payload_string,
            vec![(0, String::from("cold"))]
        );
    }

    #[test]
    fn test_period_kinds() {
        assert_eq!(kind_for_period(0).0, SlowControlKind::EpicsOneShot);
        assert_eq!(kind_for_period(0).1, Validity::Forward);
        let (kind, validity, description) = kind_for_period(5);
        assert_eq!(kind, SlowControlKind::EpicsScaler);
        assert_eq!(validity, Validity::Backward);
        assert_eq!(description, "Period='5 scalers'");
    }

    #[test]
    fn test_missing_channel() {
        let channels = vec![
            channel("A", 1, &3i16.to_le_bytes(), 1),
            channel("B", 1, &4i16.to_le_bytes(), 1),
        ];
        let words = block(0, 3, &channels);
        let mut builder = EventBuilder::new();
        assert!(handle_epics_block(&words, 0, &mut builder).is_err());
    }

    #[test]
    fn test_inconsistent_channel() {
        // Claims two shorts but carries one
        let channels = vec![channel("A", 1, &3i16.to_le_bytes(), 2)];
        let words = block(0, 1, &channels);
        let mut builder = EventBuilder::new();
        assert!(handle_epics_block(&words, 0, &mut builder).is_err());
    }

    #[test]
    fn test_unterminated_string() {
        let channels = vec![channel("A", 0, &[b'x'; 40], 1)];
        let words = block(0, 1, &channels);
        let mut builder = EventBuilder::new();
        assert!(handle_epics_block(&words, 0, &mut builder).is_err());
    }
}
