//! Command line, environment and config-file settings.
//!
//! Precedence, highest first: CLI flags, environment variables, config
//! file, built-in defaults.

use ::config::FileFormat;
use clap::{Parser, ValueEnum};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;
use crate::filter::{split_patterns, SkipPatterns};
use crate::pipeline::{PipelineOptions, MIN_LINE_BYTES};

pub const DEFAULT_OUTPUT: &str = "./output/filtered_result.tar.gz";
pub const DEFAULT_TMP_DIR: &str = "./tmp";
pub const DEFAULT_MAX_LINE_BYTES: usize = 8 * 1024 * 1024;

#[derive(Parser, Debug)]
#[command(name = "dumpfilter")]
#[command(version, about = "Remove INSERT statements for selected tables from archived SQL dumps")]
pub struct Cli {
    /// Input archive (.tar.gz) holding SQL dump files
    #[arg(short = 'i', long = "input", env = "DUMPFILE")]
    pub input: Option<PathBuf>,

    /// Output archive path
    #[arg(short = 'o', long = "output", env = "OUTPUT_FILE")]
    pub output: Option<PathBuf>,

    /// Table name regexes to remove, separated by ':' or ','
    #[arg(short = 's', long = "skip", env = "TABLE_MAP")]
    pub skip: Option<String>,

    /// Directory for temporary workspaces
    #[arg(long = "tmp-dir", env = "TMP_DIR")]
    pub tmp_dir: Option<PathBuf>,

    /// Maximum bytes in a single SQL line
    #[arg(long = "max-line-bytes", env = "MAX_LINE_BYTES")]
    pub max_line_bytes: Option<usize>,

    /// Interval between runs in schedule mode, e.g. 30m
    #[arg(long = "every", env = "SCHEDULE_EVERY")]
    pub every: Option<String>,

    /// Run once or on a schedule
    #[arg(long = "mode", env = "MODE", value_enum)]
    pub mode: Option<RunMode>,

    /// Config file with the same keys as the environment variables
    #[arg(short = 'c', long = "config", env = "CONFIG_FILE")]
    pub config: Option<PathBuf>,

    /// Config file format
    #[arg(long = "config-format", env = "CONFIG_FORMAT", value_enum, default_value = "auto")]
    pub config_format: ConfigFormat,

    /// Log verbosity (logs go to stderr)
    #[arg(long = "log-level", env = "LOG_LEVEL", value_enum, default_value = "info")]
    pub log_level: LogLevel,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum RunMode {
    Once,
    Schedule,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ConfigFormat {
    Auto,
    #[value(alias = "yml")]
    Yaml,
    Json,
    Toml,
    #[value(alias = "cfg", alias = "ini")]
    Conf,
}

impl ConfigFormat {
    /// Parser format for `path`; `Auto` goes by the file extension
    pub fn file_format(self, path: &Path) -> Result<FileFormat, ConfigError> {
        match self {
            ConfigFormat::Yaml => Ok(FileFormat::Yaml),
            ConfigFormat::Json => Ok(FileFormat::Json),
            ConfigFormat::Toml => Ok(FileFormat::Toml),
            ConfigFormat::Conf => Ok(FileFormat::Ini),
            ConfigFormat::Auto => {
                let ext = path
                    .extension()
                    .map(|e| e.to_string_lossy().to_lowercase())
                    .unwrap_or_default();
                match ext.as_str() {
                    "yaml" | "yml" => Ok(FileFormat::Yaml),
                    "json" => Ok(FileFormat::Json),
                    "toml" => Ok(FileFormat::Toml),
                    "conf" | "cfg" | "ini" => Ok(FileFormat::Ini),
                    _ => Err(ConfigError::UnknownFormat(path.to_path_buf())),
                }
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

/// Fully validated settings for a process lifetime
#[derive(Debug, Clone)]
pub struct Config {
    pub input: PathBuf,
    pub output: PathBuf,
    pub skip_patterns: SkipPatterns,
    pub tmp_dir: PathBuf,
    pub max_line_bytes: usize,
    pub mode: RunMode,
    pub schedule_interval: Duration,
}

impl Config {
    /// Merge CLI/env values over the optional config file and validate.
    ///
    /// Every validation failure is collected before returning. The tmp
    /// directory is created if it does not exist yet.
    pub fn load(cli: &Cli) -> Result<Config, ConfigError> {
        let file = match &cli.config {
            Some(path) => load_config_file(path, cli.config_format)?,
            None => FileSettings::default(),
        };
        let mut errors = Vec::new();

        let input = non_empty_path(cli.input.as_deref()).or_else(|| present(&file.dumpfile).map(PathBuf::from));
        let output = non_empty_path(cli.output.as_deref())
            .or_else(|| present(&file.output_file).map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT));
        let tmp_dir = non_empty_path(cli.tmp_dir.as_deref())
            .or_else(|| present(&file.tmp_dir).map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_TMP_DIR));
        let skip_raw = cli
            .skip
            .as_deref()
            .and_then(non_empty)
            .map(str::to_string)
            .or_else(|| file.table_map.as_ref().map(PatternList::joined))
            .unwrap_or_default();

        let max_line_bytes = match (cli.max_line_bytes, present(&file.max_line_bytes)) {
            (Some(value), _) => value,
            (None, Some(raw)) => raw.trim().parse().unwrap_or_else(|_| {
                errors.push(ConfigError::InvalidNumber(raw.to_string()));
                DEFAULT_MAX_LINE_BYTES
            }),
            (None, None) => DEFAULT_MAX_LINE_BYTES,
        };

        let mode = match (cli.mode, present(&file.mode)) {
            (Some(mode), _) => mode,
            (None, Some(raw)) => RunMode::from_str(raw.trim(), true).unwrap_or_else(|_| {
                errors.push(ConfigError::InvalidMode(raw.to_string()));
                RunMode::Once
            }),
            (None, None) => RunMode::Once,
        };

        let interval_raw = cli
            .every
            .as_deref()
            .and_then(non_empty)
            .or_else(|| present(&file.schedule_every));
        let schedule_interval = match interval_raw.map(|raw| (raw, humantime::parse_duration(raw.trim()))) {
            Some((_, Ok(interval))) => Some(interval),
            Some((raw, Err(source))) => {
                errors.push(ConfigError::InvalidInterval {
                    value: raw.to_string(),
                    source,
                });
                None
            }
            None => Some(Duration::ZERO),
        };

        if input.is_none() {
            errors.push(ConfigError::Missing("DUMPFILE (or --input)"));
        }
        if max_line_bytes < MIN_LINE_BYTES {
            errors.push(ConfigError::LineLimitTooSmall {
                value: max_line_bytes,
                min: MIN_LINE_BYTES,
            });
        }
        if mode == RunMode::Schedule && schedule_interval.is_some_and(|interval| interval.is_zero()) {
            errors.push(ConfigError::IntervalRequired);
        }
        if let Err(source) = fs::create_dir_all(&tmp_dir) {
            errors.push(ConfigError::TmpDir {
                path: tmp_dir.clone(),
                source,
            });
        }

        let patterns = split_patterns(&skip_raw);
        for pattern in &patterns {
            if let Err(e) = SkipPatterns::compile([pattern]) {
                errors.push(e);
            }
        }

        match (errors.len(), input) {
            (0, Some(input)) => Ok(Config {
                input,
                output,
                skip_patterns: SkipPatterns::compile(&patterns)?,
                tmp_dir,
                max_line_bytes,
                mode,
                schedule_interval: schedule_interval.unwrap_or_default(),
            }),
            (1, _) => Err(errors.remove(0)),
            _ => Err(ConfigError::Multiple(errors)),
        }
    }

    pub fn pipeline_options(&self) -> PipelineOptions {
        PipelineOptions {
            input_path: self.input.clone(),
            output_path: self.output.clone(),
            tmp_work_dir: self.tmp_dir.clone(),
            max_line_bytes: self.max_line_bytes,
            skip_patterns: self.skip_patterns.clone(),
        }
    }
}

fn non_empty(value: &str) -> Option<&str> {
    if value.trim().is_empty() {
        None
    } else {
        Some(value)
    }
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().and_then(non_empty)
}

fn non_empty_path(path: Option<&Path>) -> Option<PathBuf> {
    path.filter(|p| !p.as_os_str().is_empty()).map(Path::to_path_buf)
}

/// Values read from a config file.
///
/// Keys are the environment variable names, in upper or lower case. Keys
/// inside sections or tables are ignored.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct FileSettings {
    #[serde(alias = "DUMPFILE")]
    pub dumpfile: Option<String>,
    #[serde(alias = "OUTPUT_FILE")]
    pub output_file: Option<String>,
    #[serde(alias = "TABLE_MAP")]
    pub table_map: Option<PatternList>,
    #[serde(alias = "TMP_DIR")]
    pub tmp_dir: Option<String>,
    #[serde(alias = "MAX_LINE_BYTES")]
    pub max_line_bytes: Option<String>,
    #[serde(alias = "SCHEDULE_EVERY")]
    pub schedule_every: Option<String>,
    #[serde(alias = "MODE")]
    pub mode: Option<String>,
}

/// `TABLE_MAP` as a list or as a single `:`/`,` separated string
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum PatternList {
    List(Vec<String>),
    Joined(String),
}

impl PatternList {
    pub fn joined(&self) -> String {
        match self {
            PatternList::List(items) => items.join(":"),
            PatternList::Joined(raw) => raw.clone(),
        }
    }
}

pub fn load_config_file(path: &Path, format: ConfigFormat) -> Result<FileSettings, ConfigError> {
    let format = format.file_format(path)?;
    let file_error = |e: ::config::ConfigError| ConfigError::File {
        path: path.to_path_buf(),
        message: e.to_string(),
    };

    ::config::Config::builder()
        .add_source(::config::File::from(path).format(format).required(true))
        .build()
        .map_err(file_error)?
        .try_deserialize()
        .map_err(file_error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn parse(args: &[&str]) -> Cli {
        let mut argv = vec!["dumpfilter"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap()
    }

    fn write(dir: &TempDir, name: &str, content: &str) -> String {
        let path = dir.path().join(name);
        fs::write(&path, content).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[test]
    fn test_json_file_with_pattern_list() {
        let dir = TempDir::new().unwrap();
        let tmp = dir.path().join("work");
        let content = format!(
            r#"{{"DUMPFILE":"/data/in.tar.gz","OUTPUT_FILE":"/data/out.tar.gz","TABLE_MAP":["^tmp_","^log_"],"MODE":"schedule","SCHEDULE_EVERY":"15m","TMP_DIR":{:?}}}"#,
            tmp.to_string_lossy()
        );
        let path = write(&dir, "config.json", &content);

        let config = Config::load(&parse(&["--config", &path, "--config-format", "json"])).unwrap();

        assert_eq!(config.input, PathBuf::from("/data/in.tar.gz"));
        assert_eq!(config.output, PathBuf::from("/data/out.tar.gz"));
        assert_eq!(config.skip_patterns.len(), 2);
        assert_eq!(config.mode, RunMode::Schedule);
        assert_eq!(config.schedule_interval, Duration::from_secs(15 * 60));
        assert!(tmp.is_dir());
    }

    #[test]
    fn test_cli_overrides_yaml_file() {
        let dir = TempDir::new().unwrap();
        let tmp = dir.path().join("work");
        let content = format!(
            "DUMPFILE: /yaml/in.tar.gz\nOUTPUT_FILE: /yaml/out.tar.gz\nMODE: once\nTMP_DIR: {}\nTABLE_MAP:\n  - ^a_\n  - ^b_\n",
            tmp.display()
        );
        let path = write(&dir, "config.yaml", &content);

        let config = Config::load(&parse(&["--config", &path, "--input", "/cli/in.tar.gz", "--mode", "once"])).unwrap();

        assert_eq!(config.input, PathBuf::from("/cli/in.tar.gz"));
        assert_eq!(config.output, PathBuf::from("/yaml/out.tar.gz"));
        assert_eq!(config.skip_patterns.as_strs().collect::<Vec<_>>(), vec!["^a_", "^b_"]);
        assert_eq!(config.max_line_bytes, DEFAULT_MAX_LINE_BYTES);
    }

    #[test]
    fn test_toml_file_with_pattern_array() {
        let dir = TempDir::new().unwrap();
        let tmp = dir.path().join("work");
        let content = format!(
            "# dump settings\nDUMPFILE = \"/toml/in.tar.gz\" # nightly backup\nTABLE_MAP = [\"^tmp_\", \"^log_\"]\nMAX_LINE_BYTES = 4096\nTMP_DIR = '{}'\n\n[notes]\nowner = \"ops\"\n",
            tmp.display()
        );
        let path = write(&dir, "settings.toml", &content);

        let config = Config::load(&parse(&["--config", &path])).unwrap();

        assert_eq!(config.input, PathBuf::from("/toml/in.tar.gz"));
        assert_eq!(config.max_line_bytes, 4096);
        assert_eq!(config.skip_patterns.as_strs().collect::<Vec<_>>(), vec!["^tmp_", "^log_"]);
        assert_eq!(config.tmp_dir, tmp);
    }

    #[test]
    fn test_ini_file_with_lowercase_keys() {
        let dir = TempDir::new().unwrap();
        let tmp = dir.path().join("work");
        let content = format!(
            "# dump settings\n; legacy comment\ndumpfile = /conf/in.tar.gz\ntable_map = ^tmp_,^cache_\nmax_line_bytes = 4096\ntmp_dir = {}\n",
            tmp.display()
        );
        let path = write(&dir, "settings.ini", &content);

        let config = Config::load(&parse(&["--config", &path])).unwrap();

        assert_eq!(config.input, PathBuf::from("/conf/in.tar.gz"));
        assert_eq!(config.max_line_bytes, 4096);
        assert_eq!(config.skip_patterns.as_strs().collect::<Vec<_>>(), vec!["^tmp_", "^cache_"]);
        assert_eq!(config.tmp_dir, tmp);
    }

    #[test]
    fn test_explicit_format_overrides_extension() {
        assert_eq!(ConfigFormat::Conf.file_format(Path::new("a.txt")).unwrap(), FileFormat::Ini);
        assert_eq!(ConfigFormat::Auto.file_format(Path::new("a.YML")).unwrap(), FileFormat::Yaml);
        assert!(ConfigFormat::Auto.file_format(Path::new("a")).is_err());
    }

    #[test]
    fn test_missing_config_file_is_reported() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("absent.yaml");
        let err = Config::load(&parse(&["--config", &path.to_string_lossy()])).unwrap_err();
        assert!(matches!(err, ConfigError::File { .. }));
    }

    #[test]
    fn test_validation_collects_all_errors() {
        let dir = TempDir::new().unwrap();
        let content = format!(
            "MODE = weekly\nMAX_LINE_BYTES = 10\nTABLE_MAP = ^ok_:(broken\nTMP_DIR = {}\n",
            dir.path().join("work").display()
        );
        let path = write(&dir, "settings.conf", &content);

        match Config::load(&parse(&["--config", &path])) {
            Err(ConfigError::Multiple(errors)) => {
                assert!(errors.iter().any(|e| matches!(e, ConfigError::InvalidMode(m) if m == "weekly")));
                assert!(errors.iter().any(|e| matches!(e, ConfigError::LineLimitTooSmall { value: 10, .. })));
                assert!(errors.iter().any(|e| matches!(e, ConfigError::InvalidPattern { .. })));
                assert!(errors.iter().any(|e| matches!(e, ConfigError::Missing(_))));
            }
            other => panic!("expected Multiple, got {:?}", other),
        }
    }

    #[test]
    fn test_schedule_mode_requires_interval() {
        let dir = TempDir::new().unwrap();
        let tmp = dir.path().join("work");
        let tmp = tmp.to_string_lossy();

        let err = Config::load(&parse(&["-i", "in.tar.gz", "--tmp-dir", &tmp, "--mode", "schedule"])).unwrap_err();
        assert!(matches!(err, ConfigError::IntervalRequired));

        let err = Config::load(&parse(&["-i", "in.tar.gz", "--tmp-dir", &tmp, "--mode", "schedule", "--every", "0"]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::IntervalRequired));

        let config =
            Config::load(&parse(&["-i", "in.tar.gz", "--tmp-dir", &tmp, "--mode", "schedule", "--every", "90s"])).unwrap();
        assert_eq!(config.schedule_interval, Duration::from_secs(90));
    }

    #[test]
    fn test_bad_interval_is_reported() {
        let dir = TempDir::new().unwrap();
        let tmp = dir.path().join("work");
        let err = Config::load(&parse(&["-i", "in.tar.gz", "--tmp-dir", &tmp.to_string_lossy(), "--every", "soon"]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidInterval { .. }));
    }

    #[test]
    fn test_auto_format_needs_known_extension() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "settings.txt", "DUMPFILE=x\n");
        let err = Config::load(&parse(&["--config", &path])).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownFormat(_)));
    }

    #[test]
    fn test_defaults_and_pipeline_options() {
        let dir = TempDir::new().unwrap();
        let tmp = dir.path().join("work");
        let config = Config::load(&parse(&["-i", "in.tar.gz", "--tmp-dir", &tmp.to_string_lossy()])).unwrap();

        assert_eq!(config.mode, RunMode::Once);
        assert_eq!(config.output, PathBuf::from(DEFAULT_OUTPUT));
        assert!(config.skip_patterns.is_empty());

        let options = config.pipeline_options();
        assert_eq!(options.input_path, PathBuf::from("in.tar.gz"));
        assert_eq!(options.tmp_work_dir, tmp);
        assert_eq!(options.max_line_bytes, DEFAULT_MAX_LINE_BYTES);
    }
}
