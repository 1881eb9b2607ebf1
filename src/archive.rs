//! Tar packing and unpacking for dump archives.
//!
//! Compression is left to the caller: `unpack` takes an already
//! decompressed stream and `pack` writes into whatever compressing sink it
//! is handed.

use std::fs;
use std::io::{self, Read, Write};
use std::path::Path;
use tar::{Archive, Builder, HeaderMode};

/// Materialize every entry of a tar stream under `dest`.
///
/// Entries that would escape `dest` (absolute paths, `..`) are refused by
/// the tar reader.
pub fn unpack<R: Read>(reader: R, dest: &Path) -> io::Result<()> {
    fs::create_dir_all(dest)?;
    let mut archive = Archive::new(reader);
    archive.set_preserve_permissions(false);
    archive.unpack(dest)
}

/// Write `src_dir` as a tar stream rooted at the directory's own name.
///
/// Entries are added in sorted order with deterministic headers, so the
/// same tree always yields the same bytes.
pub fn pack<W: Write>(src_dir: &Path, sink: W) -> io::Result<W> {
    let root = src_dir.file_name().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("cannot pack {}: no directory name", src_dir.display()),
        )
    })?;

    let mut builder = Builder::new(sink);
    builder.mode(HeaderMode::Deterministic);
    builder.follow_symlinks(false);

    builder.append_dir(root, src_dir)?;
    append_tree(&mut builder, src_dir, Path::new(root))?;
    builder.into_inner()
}

fn append_tree<W: Write>(builder: &mut Builder<W>, dir: &Path, prefix: &Path) -> io::Result<()> {
    let mut entries = fs::read_dir(dir)?.collect::<Result<Vec<_>, _>>()?;
    entries.sort_by_key(|entry| entry.file_name());

    for entry in entries {
        let path = entry.path();
        let name = prefix.join(entry.file_name());
        let file_type = entry.file_type()?;

        if file_type.is_dir() {
            builder.append_dir(&name, &path)?;
            append_tree(builder, &path, &name)?;
        } else {
            builder.append_path_with_name(&path, &name)?;
        }
    }
    Ok(())
}
