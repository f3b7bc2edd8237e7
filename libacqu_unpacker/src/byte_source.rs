use byteorder::{ByteOrder, LittleEndian};
use std::fs::File;
use std::io::{BufReader, ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use xz2::bufread::XzDecoder;

use super::constants::{DEFAULT_XZ_BUFFER_SIZE, WORD_SIZE, XZ_MAGIC};
use super::error::ByteSourceError;

/// How the bytes of a file reach the decoder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceMode {
    Plain,
    Xz,
}

enum Stream {
    Plain(BufReader<File>),
    Xz(XzDecoder<BufReader<File>>),
}

impl Stream {
    fn open(path: &Path, mode: SourceMode, buffer_size: usize) -> Result<Self, ByteSourceError> {
        let reader = BufReader::with_capacity(buffer_size, File::open(path)?);
        Ok(match mode {
            SourceMode::Plain => Self::Plain(reader),
            SourceMode::Xz => Self::Xz(XzDecoder::new_multi_decoder(reader)),
        })
    }
}

/// Inspect the leading bytes of a file for the XZ container magic
fn detect_mode(path: &Path) -> Result<SourceMode, ByteSourceError> {
    let mut file = File::open(path)?;
    let mut magic = [0u8; XZ_MAGIC.len()];
    let mut filled = 0;
    while filled < magic.len() {
        match file.read(&mut magic[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(ByteSourceError::IOError(e)),
        }
    }
    if filled == magic.len() && magic == XZ_MAGIC {
        Ok(SourceMode::Xz)
    } else {
        Ok(SourceMode::Plain)
    }
}

/// A snapshot of how far a ByteSource got, handed to progress callbacks
#[derive(Debug, Clone, Copy)]
pub struct ReadProgress {
    pub bytes_read: u64,
    pub bytes_read_compressed: Option<u64>,
    pub file_size: u64,
    pub percent_done: f64,
    pub interval: Duration,
    pub bytes_in_interval: u64,
    pub compressed_in_interval: Option<u64>,
}

impl ReadProgress {
    /// Uncompressed bytes per second over the last interval
    pub fn throughput(&self) -> f64 {
        self.bytes_in_interval as f64 / self.interval.as_secs_f64().max(f64::EPSILON)
    }

    pub fn compressed_throughput(&self) -> Option<f64> {
        self.compressed_in_interval
            .map(|c| c as f64 / self.interval.as_secs_f64().max(f64::EPSILON))
    }

    pub fn compression_ratio(&self) -> Option<f64> {
        match self.bytes_read_compressed {
            Some(c) if c > 0 => Some(self.bytes_read as f64 / c as f64),
            _ => None,
        }
    }

    /// Estimated time until the whole file is consumed at the current rate
    pub fn eta(&self) -> Option<Duration> {
        let consumed_rate = self
            .compressed_throughput()
            .unwrap_or_else(|| self.throughput());
        if consumed_rate <= 0.0 {
            return None;
        }
        let remaining = self.file_size as f64 * (1.0 - self.percent_done).max(0.0);
        Some(Duration::from_secs_f64(remaining / consumed_rate))
    }
}

#[derive(Debug, Clone, Copy)]
struct ProgressSample {
    at: Instant,
    bytes_read: u64,
    compressed: Option<u64>,
}

/// Calls back with a ReadProgress at most once per interval
pub struct ProgressMonitor {
    interval: Duration,
    last: Option<ProgressSample>,
    callback: Box<dyn FnMut(&ReadProgress) + Send>,
}

impl ProgressMonitor {
    pub fn new(interval: Duration, callback: Box<dyn FnMut(&ReadProgress) + Send>) -> Self {
        Self {
            interval,
            last: None,
            callback,
        }
    }

    /// The default reporter, which only writes throughput to the log
    pub fn logging(interval: Duration) -> Self {
        Self::new(interval, Box::new(log_throughput))
    }

    fn reset(&mut self) {
        self.last = None;
    }

    fn sample(&mut self, bytes_read: u64, compressed: Option<u64>, file_size: u64, percent: f64) {
        let now = Instant::now();
        let current = ProgressSample {
            at: now,
            bytes_read,
            compressed,
        };
        let Some(last) = self.last else {
            self.last = Some(current);
            return;
        };
        let elapsed = now.duration_since(last.at);
        if elapsed < self.interval {
            return;
        }
        let progress = ReadProgress {
            bytes_read,
            bytes_read_compressed: compressed,
            file_size,
            percent_done: percent,
            interval: elapsed,
            bytes_in_interval: bytes_read.saturating_sub(last.bytes_read),
            compressed_in_interval: compressed
                .zip(last.compressed)
                .map(|(now, before)| now.saturating_sub(before)),
        };
        (self.callback)(&progress);
        self.last = Some(current);
    }
}

fn format_eta(eta: Option<Duration>) -> String {
    match eta {
        Some(d) => {
            let secs = d.as_secs();
            format!("{}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60)
        }
        None => String::from("unknown"),
    }
}

/// Write the read throughput, compression ratio and ETA to the log
pub fn log_throughput(progress: &ReadProgress) {
    match (progress.compressed_throughput(), progress.compression_ratio()) {
        (Some(compressed), Some(ratio)) => spdlog::info!(
            "Reading with {}/s uncompressed, {}/s compressed (ratio {:.2}), {:.1}% done, ETA: {}",
            human_bytes::human_bytes(progress.throughput()),
            human_bytes::human_bytes(compressed),
            ratio,
            progress.percent_done * 100.0,
            format_eta(progress.eta())
        ),
        _ => spdlog::info!(
            "Reading with {}/s, {:.1}% done, ETA: {}",
            human_bytes::human_bytes(progress.throughput()),
            progress.percent_done * 100.0,
            format_eta(progress.eta())
        ),
    }
}

/// ByteSource is the uniform byte stream underneath every decoder.
///
/// A file starting with the XZ magic is transparently decompressed; anything else is
/// read as is. After any read either all requested bytes were delivered or the source is
/// at end-of-file.
pub struct ByteSource {
    path: PathBuf,
    mode: SourceMode,
    stream: Stream,
    buffer_size: usize,
    file_size: u64,
    bytes_read: u64,
    eof: bool,
    progress: Option<ProgressMonitor>,
}

impl ByteSource {
    /// Open a file using the default chunk size for compressed input
    pub fn open(path: &Path) -> Result<Self, ByteSourceError> {
        Self::open_with_buffer(path, DEFAULT_XZ_BUFFER_SIZE)
    }

    pub fn open_with_buffer(path: &Path, buffer_size: usize) -> Result<Self, ByteSourceError> {
        if !path.exists() {
            return Err(ByteSourceError::BadFilePath(path.to_path_buf()));
        }
        let file_size = path.metadata()?.len();
        let mode = detect_mode(path)?;
        let buffer_size = buffer_size.max(WORD_SIZE);
        let stream = Stream::open(path, mode, buffer_size)?;
        spdlog::debug!(
            "Opened {} ({:?}, {})",
            path.display(),
            mode,
            human_bytes::human_bytes(file_size as f64)
        );
        Ok(Self {
            path: path.to_path_buf(),
            mode,
            stream,
            buffer_size,
            file_size,
            bytes_read: 0,
            eof: false,
            progress: None,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mode(&self) -> SourceMode {
        self.mode
    }

    pub fn is_eof(&self) -> bool {
        self.eof
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Bytes delivered to the caller (uncompressed)
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// Bytes consumed from the file, only known for compressed input
    pub fn bytes_read_compressed(&self) -> Option<u64> {
        match &self.stream {
            Stream::Plain(_) => None,
            Stream::Xz(decoder) => Some(decoder.total_in()),
        }
    }

    /// Fraction of the file consumed so far, in [0, 1]
    pub fn percent_done(&self) -> f64 {
        if self.file_size == 0 {
            return 1.0;
        }
        let consumed = self.bytes_read_compressed().unwrap_or(self.bytes_read);
        (consumed as f64 / self.file_size as f64).min(1.0)
    }

    pub fn set_progress_monitor(&mut self, monitor: ProgressMonitor) {
        self.progress = Some(monitor);
    }

    /// Fill as much of `buf` as the source allows. Returns the number of bytes delivered;
    /// a short count means end-of-file was reached.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize, ByteSourceError> {
        let mut filled = 0;
        while filled < buf.len() {
            let result = match &mut self.stream {
                Stream::Plain(reader) => reader.read(&mut buf[filled..]),
                Stream::Xz(decoder) => decoder.read(&mut buf[filled..]),
            };
            match result {
                Ok(0) => {
                    self.eof = true;
                    break;
                }
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    return Err(match self.mode {
                        SourceMode::Plain => ByteSourceError::IOError(e),
                        SourceMode::Xz => ByteSourceError::Decompression(e),
                    })
                }
            }
        }
        self.bytes_read += filled as u64;
        self.sample_progress();
        Ok(filled)
    }

    /// Read little-endian words into `words`. Returns the number of bytes delivered; only
    /// complete words are written.
    pub fn read_words(&mut self, words: &mut [u32]) -> Result<usize, ByteSourceError> {
        let mut bytes = vec![0u8; words.len() * WORD_SIZE];
        let n_bytes = self.read(&mut bytes)?;
        let complete = n_bytes / WORD_SIZE;
        LittleEndian::read_u32_into(&bytes[..complete * WORD_SIZE], &mut words[..complete]);
        Ok(n_bytes)
    }

    /// Grow `words` to `target` words, reading only the missing part.
    ///
    /// Returns `Ok(false)` and leaves `words` untouched if the source is exhausted exactly
    /// at the current end. Any other shortfall is `InsufficientData`.
    pub fn expand(&mut self, words: &mut Vec<u32>, target: usize) -> Result<bool, ByteSourceError> {
        let old_len = words.len();
        if old_len >= target {
            return Ok(true);
        }
        words.resize(target, 0);
        let requested = (target - old_len) * WORD_SIZE;
        let delivered = match self.read_words(&mut words[old_len..]) {
            Ok(n) => n,
            Err(e) => {
                words.truncate(old_len);
                return Err(e);
            }
        };
        if delivered == requested {
            return Ok(true);
        }
        words.truncate(old_len);
        if delivered == 0 && self.eof {
            Ok(false)
        } else {
            Err(ByteSourceError::InsufficientData {
                requested,
                available: delivered,
            })
        }
    }

    /// Restart at the beginning of the file
    pub fn rewind(&mut self) -> Result<(), ByteSourceError> {
        self.stream = Stream::open(&self.path, self.mode, self.buffer_size)?;
        self.bytes_read = 0;
        self.eof = false;
        if let Some(monitor) = self.progress.as_mut() {
            monitor.reset();
        }
        Ok(())
    }

    fn sample_progress(&mut self) {
        let compressed = self.bytes_read_compressed();
        let percent = self.percent_done();
        let (bytes_read, file_size) = (self.bytes_read, self.file_size);
        if let Some(monitor) = self.progress.as_mut() {
            monitor.sample(bytes_read, compressed, file_size, percent);
        }
    }
}
