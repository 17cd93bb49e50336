use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use zip::ZipArchive;

use crate::error::SchemeError;

fn zip_error(err: impl std::fmt::Display) -> SchemeError {
    SchemeError::Filesystem(format!("zip archive: {err}"))
}

// Entries that would escape `target_dir` are rejected.
pub fn extract_zip(zip_path: &Path, target_dir: &Path) -> Result<(), SchemeError> {
    let file = fs::File::open(zip_path)
        .map_err(|err| SchemeError::Filesystem(format!("open zip {}: {err}", zip_path.display())))?;
    let mut archive = ZipArchive::new(file).map_err(zip_error)?;

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).map_err(zip_error)?;
        let Some(relative) = entry.enclosed_name() else {
            return Err(SchemeError::Filesystem(
                "zip entry path traversal detected".to_string(),
            ));
        };
        let entry_path = target_dir.join(relative);

        if entry.is_dir() {
            fs::create_dir_all(&entry_path).map_err(|err| SchemeError::Filesystem(err.to_string()))?;
            continue;
        }
        if let Some(parent) = entry_path.parent() {
            fs::create_dir_all(parent).map_err(|err| SchemeError::Filesystem(err.to_string()))?;
        }
        let mut outfile =
            fs::File::create(&entry_path).map_err(|err| SchemeError::Filesystem(err.to_string()))?;
        io::copy(&mut entry, &mut outfile).map_err(|err| SchemeError::Filesystem(err.to_string()))?;
    }
    Ok(())
}

pub fn files_with_extension(dir: &Path, extension: &str) -> Result<Vec<PathBuf>, SchemeError> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir).map_err(|err| SchemeError::Filesystem(err.to_string()))? {
        let path = entry
            .map_err(|err| SchemeError::Filesystem(err.to_string()))?
            .path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == extension) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}
