use once_cell::sync::Lazy;
use regex::bytes::Regex;
use std::io::{BufRead, Write};
use std::ops::AddAssign;
use tracing::trace;

use crate::error::{ConfigError, FilterError};
use crate::line_reader::BoundedLineReader;

/// `INSERT INTO` followed by an optionally backtick-quoted table name.
/// The name ends at a backtick or a space; its bytes need not be UTF-8.
static INSERT_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^INSERT INTO `?((?-u:[^` ])*)`?").unwrap());

/// Ordered set of table-name patterns whose INSERT statements are removed
#[derive(Debug, Clone, Default)]
pub struct SkipPatterns {
    sources: Vec<String>,
    patterns: Vec<Regex>,
}

impl SkipPatterns {
    /// Compile every pattern; the first invalid one fails the whole set.
    pub fn compile<I, S>(patterns: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = SkipPatterns::default();
        for pattern in patterns {
            let pattern = pattern.as_ref();
            let regex = Regex::new(pattern).map_err(|source| ConfigError::InvalidPattern {
                pattern: pattern.to_string(),
                source,
            })?;
            set.sources.push(pattern.to_string());
            set.patterns.push(regex);
        }
        Ok(set)
    }

    /// Parse a `:` or `,` separated list such as `^tmp_:^log_`.
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        Self::compile(split_patterns(raw))
    }

    pub fn matches(&self, table: &[u8]) -> bool {
        self.patterns.iter().any(|re| re.is_match(table))
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn as_strs(&self) -> impl Iterator<Item = &str> {
        self.sources.iter().map(String::as_str)
    }
}

/// Split a raw pattern list, trimming entries and dropping empty ones
pub fn split_patterns(raw: &str) -> Vec<String> {
    raw.split([':', ','])
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

/// Line counters for one filtered stream
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FilterStats {
    pub total_lines: u64,
    pub filtered_lines: u64,
}

impl AddAssign for FilterStats {
    fn add_assign(&mut self, other: Self) {
        self.total_lines += other.total_lines;
        self.filtered_lines += other.filtered_lines;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterState {
    Passthrough,
    /// Inside a multi-line INSERT whose table is skipped
    Skipping,
}

/// Streams a SQL dump, dropping INSERT statements for skipped tables.
///
/// Statement ends are detected purely by a trailing `;` on a line, so a
/// skipped value containing `;` at the end of a physical line ends the
/// skip block early. Everything that is kept is written byte-for-byte,
/// terminator included.
pub struct InsertFilter {
    patterns: SkipPatterns,
    max_line_bytes: usize,
}

impl InsertFilter {
    pub fn new(patterns: SkipPatterns, max_line_bytes: usize) -> Self {
        InsertFilter {
            patterns,
            max_line_bytes,
        }
    }

    pub fn patterns(&self) -> &SkipPatterns {
        &self.patterns
    }

    /// Filter one stream. State always starts in passthrough, so separate
    /// calls never leak a skip block into each other.
    pub fn process_stream<R: BufRead, W: Write>(
        &self,
        input: R,
        output: &mut W,
    ) -> Result<FilterStats, FilterError> {
        let mut reader = BoundedLineReader::new(input, self.max_line_bytes);
        let mut stats = FilterStats::default();
        let mut state = FilterState::Passthrough;

        while let Some(line) = reader.read_line()? {
            stats.total_lines += 1;
            let trimmed = trim_terminator(line);
            let ends_statement = trimmed.ends_with(b";");

            match state {
                FilterState::Passthrough => {
                    if self.is_skipped_insert(trimmed) {
                        stats.filtered_lines += 1;
                        if !ends_statement {
                            trace!(line = stats.total_lines, "entering skip block");
                            state = FilterState::Skipping;
                        }
                        continue;
                    }
                    output.write_all(line).map_err(FilterError::Write)?;
                }
                FilterState::Skipping => {
                    stats.filtered_lines += 1;
                    if ends_statement {
                        state = FilterState::Passthrough;
                    }
                }
            }
        }

        Ok(stats)
    }

    fn is_skipped_insert(&self, line: &[u8]) -> bool {
        if self.patterns.is_empty() {
            return false;
        }
        INSERT_PREFIX
            .captures(line)
            .and_then(|caps| caps.get(1))
            .is_some_and(|table| self.patterns.matches(table.as_bytes()))
    }
}

/// Drop a trailing `\n`, then a trailing `\r`, for comparison only
fn trim_terminator(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}
