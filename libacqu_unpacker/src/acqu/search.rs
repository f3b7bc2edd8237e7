// Locating the first data record behind the header record.
//
// The header record has the same length as every data record, but the length written in
// the header is not trustworthy. So the record boundary is searched: first at the usual
// record lengths, then at every multiple of the base unit.
use crate::byte_source::ByteSource;
use crate::constants::WORD_SIZE;
use crate::error::{ByteSourceError, SetupError};

/// Where and how to look for the first data record
#[derive(Debug, Clone)]
pub(crate) struct BufferSearch {
    /// Base unit of record lengths in bytes
    pub unit: usize,
    /// Multiples of `unit` tried first, in order
    pub offsets: &'static [usize],
    /// Largest multiple of `unit` the fallback scan tries
    pub max_multiplier: usize,
    pub marker: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FirstBuffer {
    /// The buffer holds the first data record, which is `record_length` bytes long
    Found { record_length: usize },
    /// The file ends right after a header of `header_length` bytes; the buffer is empty
    HeaderOnly { header_length: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Boundary {
    Found,
    NoMarker,
    HeaderOnly,
    TooShort,
}

/// Inspect the word right after the first `n_words` words of the file
fn check_boundary(
    reader: &mut ByteSource,
    buffer: &mut Vec<u32>,
    n_words: usize,
    marker: u32,
) -> Result<Boundary, SetupError> {
    if buffer.len() < n_words {
        match reader.expand(buffer, n_words) {
            Ok(true) => (),
            Ok(false) | Err(ByteSourceError::InsufficientData { .. }) => {
                return Ok(Boundary::TooShort)
            }
            Err(e) => return Err(e.into()),
        }
    }
    if buffer.len() == n_words {
        match reader.expand(buffer, n_words + 1) {
            Ok(true) => (),
            Ok(false) => return Ok(Boundary::HeaderOnly),
            Err(ByteSourceError::InsufficientData { .. }) => return Ok(Boundary::TooShort),
            Err(e) => return Err(e.into()),
        }
    }
    if buffer[n_words] == marker {
        Ok(Boundary::Found)
    } else {
        Ok(Boundary::NoMarker)
    }
}

/// Read exactly `words.len()` words
fn read_full(reader: &mut ByteSource, words: &mut [u32]) -> Result<(), SetupError> {
    let expected = words.len() * WORD_SIZE;
    let read = reader.read_words(words)?;
    if read != expected {
        return Err(SetupError::IncompleteFirstBuffer { expected, read });
    }
    Ok(())
}

/// The words from `n_words` on belong to the first data record. Move them to the front and
/// complete the record from the reader.
fn take_first_record(
    reader: &mut ByteSource,
    buffer: &mut Vec<u32>,
    n_words: usize,
) -> Result<(), SetupError> {
    buffer.drain(..n_words);
    let have = buffer.len();
    if have >= n_words {
        buffer.truncate(n_words);
        return Ok(());
    }
    buffer.resize(n_words, 0);
    read_full(reader, &mut buffer[have..])
}

/// Fill `buffer` with the first data record.
///
/// `buffer` holds the beginning of the file and `reader` is positioned right after it.
pub(crate) fn locate_first_buffer(
    reader: &mut ByteSource,
    buffer: &mut Vec<u32>,
    search: &BufferSearch,
) -> Result<FirstBuffer, SetupError> {
    for offset in search.offsets {
        let n_words = offset * search.unit / WORD_SIZE;
        spdlog::debug!(
            "Searching first data buffer at offset {:#x}",
            n_words * WORD_SIZE
        );
        match check_boundary(reader, buffer, n_words, search.marker)? {
            Boundary::Found => {
                take_first_record(reader, buffer, n_words)?;
                spdlog::debug!(
                    "Found first data buffer at offset {:#x}",
                    n_words * WORD_SIZE
                );
                return Ok(FirstBuffer::Found {
                    record_length: n_words * WORD_SIZE,
                });
            }
            Boundary::HeaderOnly => {
                buffer.clear();
                return Ok(FirstBuffer::HeaderOnly {
                    header_length: n_words * WORD_SIZE,
                });
            }
            Boundary::NoMarker => (),
            Boundary::TooShort => break,
        }
    }

    spdlog::info!(
        "First data buffer not at a usual offset, scanning up to {:#x} bytes",
        search.max_multiplier * search.unit
    );
    // A short expand above has consumed data the buffer no longer holds
    reader.rewind()?;
    buffer.clear();
    for multiplier in 1..=search.max_multiplier {
        let n_words = multiplier * search.unit / WORD_SIZE;
        match check_boundary(reader, buffer, n_words, search.marker)? {
            Boundary::Found => {
                // Start over and verify the record really begins there
                reader.rewind()?;
                let mut header = vec![0u32; n_words];
                read_full(reader, &mut header)?;
                buffer.clear();
                buffer.resize(n_words, 0);
                read_full(reader, buffer)?;
                if buffer[0] != search.marker {
                    buffer.clear();
                    break;
                }
                spdlog::info!(
                    "Found first data buffer at offset {:#x} by scanning",
                    n_words * WORD_SIZE
                );
                return Ok(FirstBuffer::Found {
                    record_length: n_words * WORD_SIZE,
                });
            }
            Boundary::HeaderOnly => {
                buffer.clear();
                return Ok(FirstBuffer::HeaderOnly {
                    header_length: n_words * WORD_SIZE,
                });
            }
            Boundary::NoMarker => (),
            Boundary::TooShort => break,
        }
    }

    Err(SetupError::NoDataBufferFound(
        search.max_multiplier * search.unit,
    ))
}
