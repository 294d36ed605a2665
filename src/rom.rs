//! On-demand extraction of zipped ROM images.

use std::fs;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use zip::ZipArchive;

use crate::{CoreError, CoreResult};

const ROM_EXTENSIONS: &[&str] = &["n64", "v64", "z64"];

pub fn has_zip_extension(path: &Path) -> bool {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some(ext) => ext.eq_ignore_ascii_case("zip"),
        None => false,
    }
}

fn is_rom_name(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    ROM_EXTENSIONS
        .iter()
        .any(|ext| lower.ends_with(&format!(".{}", ext)))
}

/// Removes everything inside `dir`, creating it if missing.
fn clear_dir(dir: &Path) -> io::Result<()> {
    if !dir.exists() {
        return fs::create_dir_all(dir);
    }
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            fs::remove_dir_all(entry.path())?;
        } else {
            fs::remove_file(entry.path())?;
        }
    }
    Ok(())
}

/// Extracts the first ROM entry of `archive_path` into `scratch_dir`
/// (cleared of anything a previous session left behind) and returns the
/// extracted file's path. An archive without a ROM entry is a
/// `RomInvalid` failure.
pub fn unzip_first_rom(archive_path: &Path, scratch_dir: &Path) -> CoreResult<PathBuf> {
    clear_dir(scratch_dir)?;

    let file = File::open(archive_path)?;
    let mut archive = ZipArchive::new(file)?;
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        if !is_rom_name(entry.name()) {
            continue;
        }
        // entries may carry directory components; keep only the file name
        let file_name = match Path::new(entry.name()).file_name() {
            Some(name) => name.to_os_string(),
            None => continue,
        };
        let out_path = scratch_dir.join(file_name);
        let mut out = File::create(&out_path)?;
        io::copy(&mut entry, &mut out)?;
        info!(
            "extracted ROM '{}' from '{}'",
            out_path.display(),
            archive_path.display()
        );
        return Ok(out_path);
    }

    Err(CoreError::RomInvalid(format!(
        "no ROM entry found in '{}'",
        archive_path.display()
    )))
}
