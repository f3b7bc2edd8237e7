// Sub-records shared by both formats: scaler blocks and hardware read error blocks.
// Every handler gets the words it may look at and the position of the block marker, and
// returns the position right after the block.
use crate::constants::{module_name, READ_ERROR_MARKER, SCALER_BLOCK_MARKER, WORD_SIZE};
use crate::event::{DaqError, Message, MessageLevel};
use crate::event_builder::EventBuilder;
use crate::record::{words_to_bytes, FieldKind, FieldSpec, Layout};

use super::Malformed;

const MK2_READ_ERROR: Layout = Layout::new(
    "ReadErrorMk2",
    &[
        FieldSpec::new("header", FieldKind::U32),
        FieldSpec::new("module_id", FieldKind::I32),
        FieldSpec::new("module_index", FieldKind::I32),
        FieldSpec::new("error_code", FieldKind::I32),
        FieldSpec::new("trailer", FieldKind::U32),
    ],
);

const MK1_READ_ERROR: Layout = Layout::new(
    "ReadErrorMk1",
    &[
        FieldSpec::new("header", FieldKind::U32),
        FieldSpec::new("bus", FieldKind::U16),
        FieldSpec::new("crate", FieldKind::U16),
        FieldSpec::new("station", FieldKind::U16),
        FieldSpec::new("sub_address", FieldKind::U16),
        FieldSpec::new("code", FieldKind::U16),
        FieldSpec::new("align", FieldKind::Pad(2)),
    ],
);

/// Which read error record the format writes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ErrorBlockFormat {
    Mk1,
    Mk2,
}

impl ErrorBlockFormat {
    fn layout(&self) -> &'static Layout {
        match self {
            Self::Mk1 => &MK1_READ_ERROR,
            Self::Mk2 => &MK2_READ_ERROR,
        }
    }
}

fn record_error(e: crate::error::RecordError) -> Malformed {
    Malformed(format!("Could not decode read error block: {e}"))
}

pub(crate) fn handle_error_block(
    words: &[u32],
    pos: usize,
    format: ErrorBlockFormat,
    builder: &mut EventBuilder,
) -> Result<usize, Malformed> {
    let n_words = format.layout().size() / WORD_SIZE;
    if words.len() - pos < n_words {
        return Err(Malformed::new("Read error block not completely present"));
    }
    let record = format
        .layout()
        .decode(&words_to_bytes(&words[pos..pos + n_words]))
        .map_err(record_error)?;

    let error = match format {
        ErrorBlockFormat::Mk2 => {
            let trailer = record.u32("trailer").map_err(record_error)?;
            if trailer != READ_ERROR_MARKER {
                return Err(Malformed(format!(
                    "Read error block ends with {trailer:#010x} instead of its trailer"
                )));
            }
            let module_id = record.i32("module_id").map_err(record_error)?;
            DaqError {
                module_id,
                module_index: record.i32("module_index").map_err(record_error)?,
                error_code: record.i32("error_code").map_err(record_error)?,
                module_name: module_name(module_id as u32)
                    .unwrap_or("unknown")
                    .to_string(),
            }
        }
        ErrorBlockFormat::Mk1 => {
            let crate_number = record.u16("crate").map_err(record_error)?;
            let station = record.u16("station").map_err(record_error)?;
            let sub_address = record.u16("sub_address").map_err(record_error)?;
            DaqError {
                module_id: record.u16("bus").map_err(record_error)? as i32,
                module_index: station as i32,
                error_code: record.u16("code").map_err(record_error)? as i32,
                module_name: format!(
                    "crate {crate_number} station {station} sub-address {sub_address}"
                ),
            }
        }
    };

    builder.add_message(Message::logged(
        MessageLevel::HardwareError,
        format!(
            "Module {} (id {:#x}, index {}) reported read error code {:#x}",
            error.module_name, error.module_id, error.module_index, error.error_code
        ),
    ));
    builder.add_daq_error(error);
    Ok(pos + n_words)
}

/// A scaler block: marker, length in bytes, (index, value) pairs possibly interleaved
/// with read error blocks, and the marker again where the length says it is
pub(crate) fn handle_scaler_block(
    words: &[u32],
    pos: usize,
    errors: ErrorBlockFormat,
    builder: &mut EventBuilder,
) -> Result<usize, Malformed> {
    let length_pos = pos + 1;
    if length_pos >= words.len() {
        return Err(Malformed::new("Scaler block consists only of its start marker"));
    }
    let length = words[length_pos] as usize;
    if length % WORD_SIZE != 0 {
        return Err(Malformed(format!(
            "Scaler block length {length:#x} is not a multiple of the word size"
        )));
    }
    let end = length_pos + length / WORD_SIZE;
    if end >= words.len() {
        return Err(Malformed(format!(
            "Scaler block length {length:#x} exceeds the remaining event"
        )));
    }
    if words[end] != SCALER_BLOCK_MARKER {
        return Err(Malformed(format!(
            "Scaler block does not end with its marker, found {:#010x}",
            words[end]
        )));
    }

    let mut cursor = length_pos + 1;
    while cursor < end {
        if words[cursor] == READ_ERROR_MARKER {
            cursor = handle_error_block(&words[..end], cursor, errors, builder)?;
            continue;
        }
        if end - cursor < 2 {
            return Err(Malformed::new("Scaler block contains an incomplete scaler read"));
        }
        builder.add_scaler(words[cursor], words[cursor + 1]);
        cursor += 2;
    }
    Ok(end + 1)
}
