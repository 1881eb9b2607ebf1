#![allow(dead_code)]

use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;
use tar::{Archive, Builder, Header};

/// Write a gzipped tar holding `files` (name -> content) at the archive root
pub fn write_archive(path: &Path, files: &[(&str, &[u8])]) {
    let file = File::create(path).unwrap();
    let mut builder = Builder::new(GzEncoder::new(file, Compression::default()));

    for (name, content) in files {
        let mut header = Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, name, *content).unwrap();
    }

    let mut encoder = builder.into_inner().unwrap();
    encoder.flush().unwrap();
    encoder.finish().unwrap();
}

/// Read every regular file of a gzipped tar into `path -> content`
pub fn read_archive(path: &Path) -> BTreeMap<String, Vec<u8>> {
    let mut archive = Archive::new(MultiGzDecoder::new(File::open(path).unwrap()));
    let mut files = BTreeMap::new();

    for entry in archive.entries().unwrap() {
        let mut entry = entry.unwrap();
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let name = entry.path().unwrap().to_string_lossy().into_owned();
        let mut content = Vec::new();
        std::io::Read::read_to_end(&mut entry, &mut content).unwrap();
        files.insert(name, content);
    }
    files
}

/// Number of entries left in a directory
pub fn dir_entries(path: &Path) -> usize {
    fs::read_dir(path).map(|dir| dir.count()).unwrap_or(0)
}
