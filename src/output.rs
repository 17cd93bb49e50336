use camino::Utf8Path;
use serde::{Deserialize, Serialize};

use crate::domain::SchemeMetadata;
use crate::error::SchemeError;
use crate::providers::SchemeDownload;
use crate::store::write_json_atomic;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub schemes: Vec<ManifestEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    #[serde(flatten)]
    pub scheme: SchemeMetadata,
    pub db_path: String,
    pub last_updated: String,
}

impl ManifestEntry {
    pub fn new(scheme: &SchemeMetadata, download: SchemeDownload) -> Self {
        let mut scheme = scheme.clone();
        scheme.extra.remove("db_path");
        scheme.extra.remove("last_updated");
        Self {
            scheme,
            db_path: download.relative_path.into_string(),
            last_updated: download.last_updated,
        }
    }
}

impl Manifest {
    pub fn write(&self, path: &Utf8Path) -> Result<(), SchemeError> {
        write_json_atomic(path, self)
    }
}
