use std::fs::{self, File};
use std::io::{self, Read, Write};

use camino::{Utf8Path, Utf8PathBuf};
use flate2::Compression;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::error::SchemeError;
use crate::fasta::normalize_fasta;

pub const METADATA_FILE: &str = "metadata.json";
pub const PROFILES_FILE: &str = "profiles.tsv";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemeSidecar {
    pub last_updated: String,
    pub genes: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct SchemeDir {
    relative: Utf8PathBuf,
    path: Utf8PathBuf,
}

impl SchemeDir {
    pub fn create(output_dir: &Utf8Path, scheme_type: &str, name: &str) -> Result<Self, SchemeError> {
        let relative = Utf8PathBuf::from(format!("{scheme_type}_schemes")).join(name);
        let path = output_dir.join(&relative);
        fs::create_dir_all(path.as_std_path()).map_err(|err| SchemeError::Filesystem(err.to_string()))?;
        Ok(Self { relative, path })
    }

    pub fn relative(&self) -> &Utf8Path {
        &self.relative
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    pub fn locus_path(&self, locus: &str) -> Utf8PathBuf {
        self.path.join(format!("{locus}.fa.gz"))
    }

    pub fn write_locus(&self, locus: &str, fasta: &str) -> Result<Vec<String>, SchemeError> {
        let path = self.locus_path(locus);
        remove_if_exists(&path)?;

        let result = File::create(path.as_std_path())
            .map_err(|err| SchemeError::Filesystem(format!("create {path}: {err}")))
            .and_then(|file| {
                let mut encoder = GzEncoder::new(file, Compression::default());
                let names = normalize_fasta(fasta, &mut encoder)?;
                encoder
                    .finish()
                    .map_err(|err| SchemeError::Filesystem(format!("write {path}: {err}")))?;
                Ok(names)
            });
        if result.is_err() {
            remove_if_exists(&path)?;
        }
        result
    }

    pub fn write_profiles<R: Read>(&self, mut profiles: R) -> Result<(), SchemeError> {
        let path = self.path.join(PROFILES_FILE);
        let mut file = File::create(path.as_std_path())
            .map_err(|err| SchemeError::Filesystem(format!("create {path}: {err}")))?;
        io::copy(&mut profiles, &mut file)
            .map_err(|err| SchemeError::Filesystem(format!("write {path}: {err}")))?;
        Ok(())
    }

    pub fn write_sidecar(&self, sidecar: &SchemeSidecar) -> Result<(), SchemeError> {
        let content = serde_json::to_vec_pretty(sidecar)
            .map_err(|err| SchemeError::Filesystem(err.to_string()))?;
        write_bytes_atomic(&self.path.join(METADATA_FILE), &content)
    }
}

fn remove_if_exists(path: &Utf8Path) -> Result<(), SchemeError> {
    match fs::remove_file(path.as_std_path()) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(SchemeError::Filesystem(format!("remove {path}: {err}"))),
    }
}

pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), SchemeError> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_str().is_empty() => parent.to_path_buf(),
        _ => Utf8PathBuf::from("."),
    };
    fs::create_dir_all(parent.as_std_path()).map_err(|err| SchemeError::Filesystem(err.to_string()))?;
    let mut temp = NamedTempFile::new_in(parent.as_std_path())
        .map_err(|err| SchemeError::Filesystem(err.to_string()))?;
    temp.write_all(content)
        .map_err(|err| SchemeError::Filesystem(err.to_string()))?;
    temp.persist(path.as_std_path())
        .map_err(|err| SchemeError::Filesystem(format!("persist {path}: {err}")))?;
    Ok(())
}

pub fn write_json_atomic<T: Serialize>(path: &Utf8Path, value: &T) -> Result<(), SchemeError> {
    let content = serde_json::to_vec_pretty(value).map_err(|err| SchemeError::Filesystem(err.to_string()))?;
    write_bytes_atomic(path, &content)
}
