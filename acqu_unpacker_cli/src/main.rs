//! # acqu_unpacker_cli
//!
//! Part of the acqu_unpacker crate family.
//!
//! Command line application unpacking Acqu raw DAQ files (plain or XZ compressed) into
//! events, as configured by a YAML file.
//!
//! ## Use
//!
//! ```bash
//! acqu_unpacker_cli -p config.yaml new    # write a template configuration
//! acqu_unpacker_cli -p config.yaml probe  # only tell the format of every input file
//! acqu_unpacker_cli -p config.yaml        # unpack every input file
//! ```
//!
//! Detailed diagnostics of the library are written to `acqu_unpacker.log` in the working
//! directory.
use clap::{Arg, Command};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use indicatif_log_bridge::LogWrapper;
use std::collections::HashMap;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{mpsc, Arc};
use std::thread::JoinHandle;

use libacqu_unpacker::config::Config;
use libacqu_unpacker::error::ProcessorError;
use libacqu_unpacker::process::{create_subsets, process_subset, FileSummary};
use libacqu_unpacker::unpacker::probe_file;
use libacqu_unpacker::worker_status::{BarColor, WorkerStatus};

const SUMMARY_FILE_NAME: &str = "summary.yaml";

fn make_template_config(path: &Path) {
    let config = Config::default();
    let yaml_str = serde_yaml::to_string(&config).unwrap();
    let mut file = File::create(path).expect("Could create template config file!");
    file.write_all(yaml_str.as_bytes())
        .expect("Failed to write yaml data to file!");
}

fn init_file_logger() {
    let file_sink = Arc::new(
        spdlog::sink::FileSink::builder()
            .path(PathBuf::from("./acqu_unpacker.log"))
            .formatter(Box::new(spdlog::formatter::PatternFormatter::new(
                spdlog::formatter::pattern!(
                    "[{date_short} {time_short}] - [thread: {tid}] - [{^{level}}] - {payload}{eol}"
                ),
            )))
            .truncate(true)
            .build()
            .expect("Could not create log file!"),
    );
    let logger = Arc::new(
        spdlog::Logger::builder()
            .flush_level_filter(spdlog::LevelFilter::All)
            .sink(file_sink)
            .build()
            .expect("Could not create file logger!"),
    );
    spdlog::set_default_logger(logger);
}

fn bar_style(color: &BarColor) -> ProgressStyle {
    let template = match color {
        BarColor::CYAN => "{prefix} {msg:10} [{bar:40.cyan/blue}] {pos:>3}%",
        BarColor::MAGENTA => "{prefix} {msg:10} [{bar:40.magenta/blue}] {pos:>3}%",
        BarColor::RED => "{prefix} {msg:10} [{bar:40.red/blue}] {pos:>3}%",
        BarColor::GREEN => "{prefix} {msg:10} [{bar:40.green/blue}] {pos:>3}%",
    };
    ProgressStyle::with_template(template).unwrap_or_else(|_| ProgressStyle::default_bar())
}

fn bar_message(color: &BarColor) -> &'static str {
    match color {
        BarColor::CYAN => "Unpacking",
        BarColor::MAGENTA => "Dumping",
        BarColor::RED => "Failed",
        BarColor::GREEN => "Done",
    }
}

fn probe_inputs(config: &Config) {
    let options = config.unpacker_options();
    for path in config.input_files.iter() {
        match probe_file(path, &options) {
            Ok(format) => log::info!("{}: {}", path.display(), format),
            Err(e) => log::error!("{}: {}", path.display(), e),
        }
    }
}

fn write_summaries(config: &Config, summaries: &[FileSummary]) {
    for summary in summaries.iter() {
        log::info!("{summary}");
    }
    let Some(output_path) = config.output_path.as_ref() else {
        return;
    };
    let path = output_path.join(SUMMARY_FILE_NAME);
    match serde_yaml::to_string(summaries) {
        Ok(yaml_str) => match File::create(&path).and_then(|mut f| f.write_all(yaml_str.as_bytes())) {
            Ok(()) => log::info!("Summary written to {}", path.display()),
            Err(e) => log::error!("Could not write summary to {}: {e}", path.display()),
        },
        Err(e) => log::error!("Unable to serialize summary: {e}"),
    }
}

fn main() {
    // Create a cli
    let matches = Command::new("acqu_unpacker_cli")
        .arg_required_else_help(true)
        .subcommand(Command::new("new").about("Make a template configuration yaml file"))
        .subcommand(Command::new("probe").about("Report the format of every input file"))
        .arg(
            Arg::new("path")
                .short('p')
                .long("path")
                .help("Path to the configuration file"),
        )
        .get_matches();

    // Initialize feedback
    let logger = simplelog::TermLogger::new(
        simplelog::LevelFilter::Info,
        simplelog::Config::default(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    );

    let pb_manager = MultiProgress::new();

    LogWrapper::new(pb_manager.clone(), logger)
        .try_init()
        .expect("Could not create logging/progress!");
    log::set_max_level(log::LevelFilter::Info);
    init_file_logger();

    // Parse the cli
    let config_path = PathBuf::from(matches.get_one::<String>("path").expect("We require args"));

    if let Some(("new", _)) = matches.subcommand() {
        log::info!(
            "Making a template config at {}...",
            config_path.to_string_lossy()
        );
        make_template_config(&config_path);
        log::info!("Done.");
        return;
    }

    // Load our config
    log::info!("Loading config from {}...", config_path.to_string_lossy());
    let config = match Config::read_config_file(&config_path) {
        Ok(c) => c,
        Err(e) => {
            log::error!("{e}");
            return;
        }
    };
    log::info!("Config successfully loaded.");
    log::info!("Input files: {}", config.input_files.len());
    match config.output_path.as_ref() {
        Some(p) => log::info!("Event dumps: {}", p.to_string_lossy()),
        None => log::info!("Event dumps: disabled"),
    }
    log::info!("Mapping sets: {}", config.mapping_sets.len());
    log::info!("Time zone: {:?}", config.timezone);

    if let Some(("probe", _)) = matches.subcommand() {
        probe_inputs(&config);
        return;
    }

    if !config.is_n_threads_valid() {
        log::error!("The number of threads must be at least 1!");
        return;
    }

    // Spawn the workers, one bar each
    let (tx, rx) = mpsc::channel::<WorkerStatus>();
    let mut workers: Vec<JoinHandle<Result<Vec<FileSummary>, ProcessorError>>> = Vec::new();
    let mut bars: HashMap<usize, ProgressBar> = HashMap::new();
    for (idx, subset) in create_subsets(&config).into_iter().enumerate() {
        // Dont make empty workers
        if subset.is_empty() {
            continue;
        }
        let pb = pb_manager.add(ProgressBar::new(100));
        pb.set_style(bar_style(&BarColor::CYAN));
        pb.set_prefix(format!("Worker {idx}"));
        pb.set_message(bar_message(&BarColor::CYAN));
        bars.insert(idx, pb);

        let conf = config.clone();
        let tx = tx.clone();
        workers.push(std::thread::spawn(move || {
            process_subset(conf, tx, idx, subset)
        }));
    }
    drop(tx);

    // Since we don't have a UI here, sleep for ~ 1 sec before trying to update
    loop {
        std::thread::sleep(std::time::Duration::from_secs(1));
        loop {
            match rx.try_recv() {
                Ok(status) => {
                    if let Some(pb) = bars.get(&status.worker_id) {
                        pb.set_style(bar_style(&status.color));
                        pb.set_message(bar_message(&status.color));
                        pb.set_prefix(format!(
                            "Worker {} file #{}",
                            status.worker_id, status.file_index
                        ));
                        pb.set_position((status.progress * 100.0) as u64);
                    }
                }
                Err(mpsc::TryRecvError::Empty) => break,
                Err(mpsc::TryRecvError::Disconnected) => break,
            }
        }
        if workers.iter().all(|w| w.is_finished()) {
            break;
        }
    }

    let mut summaries = Vec::new();
    for worker in workers {
        match worker.join() {
            Ok(Ok(mut worker_summaries)) => summaries.append(&mut worker_summaries),
            Ok(Err(e)) => log::error!("Unpacking failed with error: {e}"),
            Err(_) => log::error!("Failed to join unpacking task!"),
        }
    }
    for pb in bars.values() {
        pb.finish();
    }

    write_summaries(&config, &summaries);
    log::info!("Done.");
}
