//! # acqu_unpacker
//!
//! acqu_unpacker reads the raw files written by the Acqu data acquisition, in either the
//! Mk1 or the Mk2 record format and optionally XZ compressed, and turns them into a
//! stream of events. Raw hardware channels are translated into logical detector channels
//! through configurable mapping tables. Scalers, EPICS slow control blocks and hardware
//! read errors are unpacked alongside the detector hits.
//!
//! Broken data never stops a file: a malformed event or buffer is skipped and reported
//! through messages attached to the next event, and unpacking continues with the next
//! good data.
//!
//! ## Installation
//!
//! Currently the only method of install is from source.
//!
//! ### Rust
//!
//! If you have not used Rust before, you will most likely need to install the Rust tool
//! chain. See the [Rust docs](https://www.rust-lang.org/tools/install) for installation
//! instructions.
//!
//! ### Building & Install
//!
//! To build and install the CLI use `cargo install --path ./acqu_unpacker_cli` from the
//! top level repository. To use the CLI see the `acqu_unpacker_cli` documentation.
//!
//! ## Use as a library
//!
//! ```no_run
//! use std::path::Path;
//! use libacqu_unpacker::channel_map::ChannelMap;
//! use libacqu_unpacker::unpacker::{Unpacker, UnpackerOptions};
//!
//! let map = ChannelMap::new(Path::new("maps/2015.csv")).unwrap();
//! let mut unpacker =
//!     Unpacker::open(Path::new("run_1234.dat.xz"), &UnpackerOptions::default(), &map).unwrap();
//! while let Some(event) = unpacker.next_event() {
//!     println!("{} has {} detector reads", event.id, event.detector_reads.len());
//! }
//! ```
//!
//! ## Configuration
//!
//! The YAML configuration used by the CLI (`acqu_unpacker_cli -p config.yaml new` writes
//! a template) looks as follows:
//!
//! ```yml
//! input_files:
//! - /data/run_1234.dat.xz
//! output_path: /data/dumps
//! mapping_sets:
//! - first_run: 1000
//!   last_run: 1999
//!   path: /maps/2015.csv
//! escalation: null
//! timezone:
//!   standard_offset_hours: 1
//!   dst: EuropeanUnion
//! dst_exceptions:
//! - time: Sun Oct 25 02:30:00 2015
//!   dst: true
//! search_max_multiplier: null
//! progress_interval_secs: 10
//! xz_buffer_size: 65536
//! n_threads: 1
//! ```
//!
//! - `output_path`: directory receiving one YAML event dump per input file and a summary.
//! `null` disables the dumps.
//! - `mapping_sets`: the channel map of a file is chosen by its run number. A file whose
//! run is in no set is unpacked without mapping, so only slow control and errors remain.
//! - `escalation`: `Event` or `Buffer`, overrides how much data a malformed sub-record
//! costs. By default Mk2 drops only the event and Mk1 the whole buffer.
//! - `timezone` and `dst_exceptions`: the header time is local time of the DAQ. A time in
//! the repeated hour at the end of summer time must be listed in the exceptions.
//! - `search_max_multiplier`: how far the first data record is searched, in multiples of
//! the format's record unit.
//!
//! ### Channel Map Format
//!
//! The channel map is a CSV file with a header line. Each further line is one entry:
//!
//! ```csv
//! hit,<detector>,<kind>,<index>,<raw>[:mask][,<raw>[:mask]]
//! scaler,<detector>,<kind>,<index>,<raw>[,<slow control name>]
//! ```
//!
//! A hit entry with two raw channels combines their masked 16 bit values into one 32 bit
//! value, the first raw channel being the low half. Scalers with a slow control name are
//! grouped into one slow control item per name instead of becoming detector reads.
//!
//! ## Output
//!
//! Besides the optional dumps the CLI writes a log file, `acqu_unpacker.log`. Every
//! message attached to an event is mirrored there as well.
pub mod acqu;
pub mod byte_source;
pub mod channel_map;
pub mod config;
pub mod constants;
pub mod error;
pub mod event;
pub mod event_builder;
pub mod event_writer;
pub mod process;
pub mod record;
pub mod timestamp;
pub mod unpacker;
pub mod worker_status;
