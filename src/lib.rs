pub mod archive;
pub mod config;
pub mod error;
pub mod filter;
pub mod line_reader;
pub mod logging;
pub mod pipeline;
pub mod schedule;

pub use crate::error::*;

pub use crate::config::{Cli, Config, RunMode};
pub use crate::filter::{FilterState, FilterStats, InsertFilter, SkipPatterns};
pub use crate::line_reader::BoundedLineReader;
pub use crate::pipeline::{PipelineOptions, PipelineResult};
