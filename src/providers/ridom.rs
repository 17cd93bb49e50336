use std::fs;
use std::io::Write;

use camino::Utf8Path;
use tempfile::Builder;
use tracing::{debug, info, warn};

use super::{DownloadContext, SchemeDownload, required, today};
use crate::domain::SchemeMetadata;
use crate::error::SchemeError;
use crate::fs_util::{extract_zip, files_with_extension};
use crate::http::{ARCHIVE_TIMEOUT, HttpRequest, fetch};
use crate::retry::retry;
use crate::store::{SchemeDir, SchemeSidecar};

const SCHEME_TYPE: &str = "cgmlst";

fn fs_error(err: impl std::fmt::Display) -> SchemeError {
    SchemeError::Filesystem(err.to_string())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RidomDownloader {
    scheme_id: String,
    name: String,
}

impl RidomDownloader {
    pub fn from_metadata(metadata: &SchemeMetadata) -> Result<Self, SchemeError> {
        let scheme_id = required(
            metadata,
            "scheme_id",
            metadata.scheme_id.as_ref().map(ToString::to_string),
        )?;
        let species = metadata
            .shortname
            .split('_')
            .next()
            .unwrap_or(&metadata.shortname);
        let name = format!("ridom_{species}_{scheme_id}");
        Ok(Self { scheme_id, name })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn download(
        &self,
        ctx: &mut DownloadContext<'_>,
        output_dir: &Utf8Path,
    ) -> Result<SchemeDownload, SchemeError> {
        let url = format!(
            "{}/{}/alleles/",
            ctx.endpoints.ridom.trim_end_matches('/'),
            self.scheme_id
        );
        let dir = SchemeDir::create(output_dir, SCHEME_TYPE, &self.name)?;

        info!(scheme = %self.name, %url, "downloading allele archive");
        let request = HttpRequest::get(&url).timeout(ARCHIVE_TIMEOUT);
        let response = retry(ctx.retry, &format!("archive of {}", self.name), || {
            fetch(ctx.transport, &request)
        })?;

        // Both are removed on drop, including the early returns below.
        let mut archive = Builder::new()
            .prefix("alleles_")
            .suffix(".zip")
            .tempfile_in(output_dir.as_std_path())
            .map_err(fs_error)?;
        archive.write_all(&response.body).map_err(fs_error)?;
        archive.flush().map_err(fs_error)?;
        let scratch = Builder::new()
            .prefix("scratch_")
            .tempdir_in(output_dir.as_std_path())
            .map_err(fs_error)?;

        extract_zip(archive.path(), scratch.path())?;
        let files = files_with_extension(scratch.path(), "fasta")?;
        if files.is_empty() {
            return Err(SchemeError::LociUnavailable(self.name.clone()));
        }

        let mut genes = Vec::with_capacity(files.len());
        for path in files {
            let Some(locus) = path.file_stem().and_then(|stem| stem.to_str()) else {
                warn!(path = %path.display(), "skipping non UTF-8 file name");
                continue;
            };
            debug!(scheme = %self.name, %locus, "normalizing alleles");
            let raw = fs::read(&path).map_err(fs_error)?;
            dir.write_locus(locus, &String::from_utf8_lossy(&raw))?;
            genes.push(locus.to_string());
        }

        warn!(scheme = %self.name, "Ridom publishes no timestamp, using today's date");
        let last_updated = today();
        dir.write_sidecar(&SchemeSidecar {
            last_updated: last_updated.clone(),
            genes,
        })?;
        Ok(SchemeDownload {
            relative_path: dir.relative().to_path_buf(),
            last_updated,
        })
    }
}
