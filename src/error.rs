use std::fmt;
use std::io;
use std::path::PathBuf;

/// Errors raised while filtering a single dump stream
#[derive(Debug, thiserror::Error)]
pub enum FilterError {
    #[error("line {line} exceeds max line bytes ({max_line_bytes})")]
    LineTooLong { line: u64, max_line_bytes: usize },

    #[error("read line: {0}")]
    Read(#[source] io::Error),

    #[error("write output: {0}")]
    Write(#[source] io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid skip pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("max line bytes must be >= {min}, got {value}")]
    LineLimitTooSmall { value: usize, min: usize },

    #[error("missing required setting: {0}")]
    Missing(&'static str),

    #[error("mode must be once or schedule, got {0:?}")]
    InvalidMode(String),

    #[error("invalid interval {value:?}: {source}")]
    InvalidInterval {
        value: String,
        #[source]
        source: humantime::DurationError,
    },

    #[error("invalid max line bytes {0:?}")]
    InvalidNumber(String),

    #[error("schedule mode requires a positive interval (SCHEDULE_EVERY or --every)")]
    IntervalRequired,

    #[error("tmp dir {path}: {source}")]
    TmpDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("config file {path}: {message}")]
    File { path: PathBuf, message: String },

    #[error("unable to detect config format for {0}")]
    UnknownFormat(PathBuf),

    #[error("{}", join_errors(.0))]
    Multiple(Vec<ConfigError>),
}

fn join_errors(errors: &[ConfigError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Pipeline step an I/O failure happened in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    CreateWorkspace,
    OpenInput,
    Decompress,
    Extract,
    ListEntries,
    OpenExtracted,
    CreateFiltered,
    Pack,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::CreateWorkspace => "create workspace",
            Stage::OpenInput => "open input",
            Stage::Decompress => "decompress input",
            Stage::Extract => "extract archive",
            Stage::ListEntries => "list extracted files",
            Stage::OpenExtracted => "open extracted file",
            Stage::CreateFiltered => "create filtered file",
            Stage::Pack => "pack archive",
        };
        f.write_str(name)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("{stage} {}: {source}", .path.display())]
    Io {
        stage: Stage,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("filter {file}: {source}")]
    Filter {
        file: String,
        #[source]
        source: FilterError,
    },
}

impl PipelineError {
    pub(crate) fn io(stage: Stage, path: impl Into<PathBuf>, source: io::Error) -> Self {
        PipelineError::Io {
            stage,
            path: path.into(),
            source,
        }
    }

    /// The stage an I/O failure was raised in, if any
    pub fn stage(&self) -> Option<Stage> {
        match self {
            PipelineError::Io { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}
