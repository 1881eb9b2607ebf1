use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tempfile::{NamedTempFile, TempDir};
use tracing::{debug, info, warn};

use crate::archive;
use crate::error::{ConfigError, FilterError, PipelineError, Stage};
use crate::filter::{FilterStats, InsertFilter, SkipPatterns};

/// Smallest accepted line ceiling
pub const MIN_LINE_BYTES: usize = 1024;

const IO_BUFFER_SIZE: usize = 64 * 1024;
const EXTRACTED_DIR: &str = "extracted";
const FILTERED_DIR: &str = "filtered";

/// Inputs for one pipeline run
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    pub tmp_work_dir: PathBuf,
    pub max_line_bytes: usize,
    pub skip_patterns: SkipPatterns,
}

impl PipelineOptions {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.input_path.as_os_str().is_empty() {
            return Err(ConfigError::Missing("input path"));
        }
        if self.output_path.as_os_str().is_empty() {
            return Err(ConfigError::Missing("output path"));
        }
        if self.tmp_work_dir.as_os_str().is_empty() {
            return Err(ConfigError::Missing("tmp dir"));
        }
        if self.max_line_bytes < MIN_LINE_BYTES {
            return Err(ConfigError::LineLimitTooSmall {
                value: self.max_line_bytes,
                min: MIN_LINE_BYTES,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineResult {
    pub output_path: PathBuf,
    pub total_lines: u64,
    pub filtered_lines: u64,
}

/// Extract the input archive, filter every regular file in it and pack the
/// results into `output_path`.
///
/// The workspace under `tmp_work_dir` is removed when this returns, on
/// success or failure. Nothing is written to `output_path` unless the whole
/// run succeeds.
pub fn run(options: &PipelineOptions) -> Result<PipelineResult, PipelineError> {
    options.validate()?;
    let start_time = Instant::now();

    fs::create_dir_all(&options.tmp_work_dir)
        .map_err(|e| PipelineError::io(Stage::CreateWorkspace, &options.tmp_work_dir, e))?;
    let workspace = tempfile::Builder::new()
        .prefix("cache-")
        .tempdir_in(&options.tmp_work_dir)
        .map_err(|e| PipelineError::io(Stage::CreateWorkspace, &options.tmp_work_dir, e))?;
    debug!(workspace = %workspace.path().display(), "created workspace");

    info!(
        input = %options.input_path.display(),
        patterns = options.skip_patterns.len(),
        "starting filter run"
    );

    let extracted_dir = workspace.path().join(EXTRACTED_DIR);
    let filtered_dir = workspace.path().join(FILTERED_DIR);
    extract(&options.input_path, &extracted_dir)?;

    fs::create_dir_all(&filtered_dir)
        .map_err(|e| PipelineError::io(Stage::CreateFiltered, &filtered_dir, e))?;

    let filter = InsertFilter::new(options.skip_patterns.clone(), options.max_line_bytes);
    let totals = filter_dir(&filter, &extracted_dir, &filtered_dir)?;

    pack(&filtered_dir, &options.output_path)?;
    close_workspace(workspace);

    info!(
        output = %options.output_path.display(),
        total_lines = totals.total_lines,
        filtered_lines = totals.filtered_lines,
        elapsed = ?start_time.elapsed(),
        "filter run finished"
    );

    Ok(PipelineResult {
        output_path: options.output_path.clone(),
        total_lines: totals.total_lines,
        filtered_lines: totals.filtered_lines,
    })
}

fn extract(input_path: &Path, dest: &Path) -> Result<(), PipelineError> {
    let file = File::open(input_path).map_err(|e| PipelineError::io(Stage::OpenInput, input_path, e))?;
    let mut decoded = BufReader::with_capacity(
        IO_BUFFER_SIZE,
        MultiGzDecoder::new(BufReader::with_capacity(IO_BUFFER_SIZE, file)),
    );

    // Parses the gzip header and the first compressed block
    decoded
        .fill_buf()
        .map_err(|e| PipelineError::io(Stage::Decompress, input_path, e))?;

    archive::unpack(decoded, dest).map_err(|e| PipelineError::io(Stage::Extract, input_path, e))
}

/// Filter the regular files directly under `src_dir` into `dst_dir`, in
/// file-name order.
fn filter_dir(filter: &InsertFilter, src_dir: &Path, dst_dir: &Path) -> Result<FilterStats, PipelineError> {
    let mut entries = fs::read_dir(src_dir)
        .and_then(|dir| dir.collect::<Result<Vec<_>, _>>())
        .map_err(|e| PipelineError::io(Stage::ListEntries, src_dir, e))?;
    entries.sort_by_key(|entry| entry.file_name());

    let mut totals = FilterStats::default();
    for entry in entries {
        let src_path = entry.path();
        let file_type = entry
            .file_type()
            .map_err(|e| PipelineError::io(Stage::ListEntries, &src_path, e))?;

        if file_type.is_dir() {
            continue;
        }
        if !file_type.is_file() {
            warn!(path = %src_path.display(), "skipping non-regular archive entry");
            continue;
        }

        let dst_path = dst_dir.join(entry.file_name());
        let stats = filter_file(filter, &src_path, &dst_path)?;
        info!(
            file = %entry.file_name().to_string_lossy(),
            total_lines = stats.total_lines,
            filtered_lines = stats.filtered_lines,
            "filtered file"
        );
        totals += stats;
    }

    Ok(totals)
}

fn filter_file(filter: &InsertFilter, src_path: &Path, dst_path: &Path) -> Result<FilterStats, PipelineError> {
    let file_name = src_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let src = File::open(src_path).map_err(|e| PipelineError::io(Stage::OpenExtracted, src_path, e))?;
    let dst = File::create(dst_path).map_err(|e| PipelineError::io(Stage::CreateFiltered, dst_path, e))?;

    let input = BufReader::with_capacity(IO_BUFFER_SIZE, src);
    let mut output = BufWriter::with_capacity(IO_BUFFER_SIZE, dst);

    let filtered = filter
        .process_stream(input, &mut output)
        .and_then(|stats| output.flush().map(|_| stats).map_err(FilterError::Write));

    filtered.map_err(|source| PipelineError::Filter {
        file: file_name,
        source,
    })
}

/// Pack `src_dir` into a gzip-compressed tar at `output_path`.
///
/// The archive is staged next to the destination and renamed into place
/// only after it has been fully written.
fn pack(src_dir: &Path, output_path: &Path) -> Result<(), PipelineError> {
    let parent = match output_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).map_err(|e| PipelineError::io(Stage::Pack, parent, e))?;

    let staged = staging_file(parent).map_err(|e| PipelineError::io(Stage::Pack, parent, e))?;
    {
        let sink = BufWriter::with_capacity(IO_BUFFER_SIZE, staged.as_file());
        let encoder = archive::pack(src_dir, GzEncoder::new(sink, Compression::default()))
            .map_err(|e| PipelineError::io(Stage::Pack, src_dir, e))?;
        encoder
            .finish()
            .and_then(|mut sink| sink.flush())
            .map_err(|e| PipelineError::io(Stage::Pack, output_path, e))?;
    }

    staged
        .persist(output_path)
        .map_err(|e| PipelineError::io(Stage::Pack, output_path, e.error))?;
    Ok(())
}

/// Temporary file next to the output, created with the mode `File::create`
/// would give it (0o666 less the umask)
fn staging_file(parent: &Path) -> io::Result<NamedTempFile> {
    let mut builder = tempfile::Builder::new();
    builder.prefix(".dumpfilter-").suffix(".partial");
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        builder.permissions(fs::Permissions::from_mode(0o666));
    }
    builder.tempfile_in(parent)
}

fn close_workspace(workspace: TempDir) {
    let path = workspace.path().to_path_buf();
    if let Err(e) = workspace.close() {
        warn!(workspace = %path.display(), error = %e, "failed to remove workspace");
    }
}
