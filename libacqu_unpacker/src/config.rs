use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::acqu::{Escalation, Info};
use super::channel_map::{ChannelMap, MappingProvider};
use super::constants::DEFAULT_XZ_BUFFER_SIZE;
use super::error::{ChannelMapError, ConfigError};
use super::timestamp::{DstException, TimeZoneRule};
use super::unpacker::UnpackerOptions;

/// A channel map valid for an inclusive range of run numbers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingSet {
    pub first_run: u32,
    pub last_run: u32,
    pub path: PathBuf,
}

impl MappingSet {
    pub fn contains(&self, run_number: u32) -> bool {
        run_number >= self.first_run && run_number <= self.last_run
    }
}

/// Structure representing the application configuration. Contains pathing and decoding
/// information. Configs are seralizable and deserializable to YAML using serde and serde_yaml
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub input_files: Vec<PathBuf>,
    /// Directory for YAML dumps of the events, no dump if None
    pub output_path: Option<PathBuf>,
    pub mapping_sets: Vec<MappingSet>,
    pub escalation: Option<Escalation>,
    pub timezone: TimeZoneRule,
    pub dst_exceptions: Vec<DstException>,
    pub search_max_multiplier: Option<usize>,
    pub progress_interval_secs: u64,
    pub xz_buffer_size: usize,
    pub n_threads: i32,
}

impl Default for Config {
    /// Generate a new Config object. Paths will be empty
    fn default() -> Self {
        Self {
            input_files: Vec::new(),
            output_path: None,
            mapping_sets: Vec::new(),
            escalation: None,
            timezone: TimeZoneRule::default(),
            dst_exceptions: Vec::new(),
            search_max_multiplier: None,
            progress_interval_secs: 10,
            xz_buffer_size: DEFAULT_XZ_BUFFER_SIZE,
            n_threads: 1,
        }
    }
}

impl Config {
    /// Read the configuration in a YAML file
    /// Returns a Config if successful
    pub fn read_config_file(config_path: &Path) -> Result<Self, ConfigError> {
        if !config_path.exists() {
            return Err(ConfigError::BadFilePath(config_path.to_path_buf()));
        }

        let yaml_str = std::fs::read_to_string(config_path)?;

        Ok(serde_yaml::from_str::<Self>(&yaml_str)?)
    }

    pub fn does_file_exist(&self, file_index: usize) -> bool {
        self.input_files
            .get(file_index)
            .map(|f| f.exists())
            .unwrap_or(false)
    }

    /// Get the path of the event dump for an input file, None if no dump was requested
    pub fn get_output_file_name(&self, input_file: &Path) -> Result<Option<PathBuf>, ConfigError> {
        let Some(output_path) = self.output_path.as_ref() else {
            return Ok(None);
        };
        if !output_path.exists() {
            return Err(ConfigError::BadFilePath(output_path.clone()));
        }
        // run_1234.dat.xz -> run_1234
        let stem = input_file
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let stem = stem.split('.').next().unwrap_or_default();
        Ok(Some(output_path.join(format!("{stem}.yaml"))))
    }

    pub fn mapping_set_for_run(&self, run_number: u32) -> Option<&MappingSet> {
        self.mapping_sets.iter().find(|s| s.contains(run_number))
    }

    pub fn unpacker_options(&self) -> UnpackerOptions {
        UnpackerOptions {
            escalation: self.escalation,
            timezone: self.timezone,
            dst_exceptions: self.dst_exceptions.clone(),
            search_max_multiplier: self.search_max_multiplier,
            xz_buffer_size: self.xz_buffer_size,
        }
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_secs(self.progress_interval_secs)
    }

    pub fn is_n_threads_valid(&self) -> bool {
        self.n_threads >= 1
    }

    pub fn has_output_path(&self) -> bool {
        self.output_path.is_some()
    }
}

impl MappingProvider for Config {
    /// Load the channel map of the run. No configured map gives an empty one.
    fn mapping_for(&self, info: &Info) -> Result<ChannelMap, ChannelMapError> {
        match self.mapping_set_for_run(info.run_number) {
            Some(set) => {
                spdlog::info!(
                    "Using channel map {} for run {}",
                    set.path.display(),
                    info.run_number
                );
                ChannelMap::new(&set.path)
            }
            None => Ok(ChannelMap::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acqu::AcquFormat;
    use crate::timestamp::DstRule;
    use std::io::Write;

    fn info(run_number: u32) -> Info {
        Info {
            format: AcquFormat::Mk2,
            run_number,
            time: String::from("Mon Jun  1 12:00:00 2015"),
            timestamp: 1433152800,
            description: String::new(),
            run_note: String::new(),
            out_file: String::from("run.dat"),
            record_length: 0x8000,
            adc_modules: Vec::new(),
            scaler_modules: Vec::new(),
        }
    }

    #[test]
    fn test_yaml_round_trip() {
        let mut config = Config::default();
        config.input_files.push(PathBuf::from("/data/run_1234.dat.xz"));
        config.escalation = Some(Escalation::Buffer);
        config.timezone.dst = DstRule::None;
        config.dst_exceptions.push(DstException {
            time: String::from("Sun Oct 25 02:30:00 2015"),
            dst: true,
        });
        config.mapping_sets.push(MappingSet {
            first_run: 1000,
            last_run: 1999,
            path: PathBuf::from("/maps/2015.csv"),
        });
        let yaml = serde_yaml::to_string(&config).unwrap();
        let parsed: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_missing_file() {
        match Config::read_config_file(Path::new("/does/not/exist.yaml")) {
            Err(ConfigError::BadFilePath(p)) => assert_eq!(p, PathBuf::from("/does/not/exist.yaml")),
            _ => panic!(),
        }
    }

    #[test]
    fn test_read_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            "{}",
            serde_yaml::to_string(&Config::default()).unwrap()
        )
        .unwrap();
        file.flush().unwrap();
        let config = Config::read_config_file(file.path()).unwrap();
        assert_eq!(config, Config::default());
        assert!(config.is_n_threads_valid());
        assert_eq!(config.progress_interval(), Duration::from_secs(10));
    }

    #[test]
    fn test_output_file_name() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        assert_eq!(
            config.get_output_file_name(Path::new("run_1.dat")).unwrap(),
            None
        );
        config.output_path = Some(dir.path().to_path_buf());
        assert_eq!(
            config
                .get_output_file_name(Path::new("/data/run_1234.dat.xz"))
                .unwrap(),
            Some(dir.path().join("run_1234.yaml"))
        );
        config.output_path = Some(dir.path().join("missing"));
        assert!(config.get_output_file_name(Path::new("run_1.dat")).is_err());
    }

    #[test]
    fn test_mapping_by_run() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "type,detector,kind,index,raw").unwrap();
        writeln!(file, "hit,CB,Integral,0,10").unwrap();
        file.flush().unwrap();

        let mut config = Config::default();
        config.mapping_sets.push(MappingSet {
            first_run: 100,
            last_run: 200,
            path: file.path().to_path_buf(),
        });
        assert_eq!(config.mapping_for(&info(150)).unwrap().hits.len(), 1);
        assert!(config.mapping_for(&info(201)).unwrap().is_empty());

        config.mapping_sets[0].path = PathBuf::from("/does/not/exist.csv");
        assert!(config.mapping_for(&info(100)).is_err());
    }
}
