use std::io::{BufRead, BufReader, Read};

use camino::Utf8Path;
use chrono::NaiveDate;
use flate2::read::MultiGzDecoder;
use tracing::{debug, info};

use super::{DownloadContext, SchemeDownload, required};
use crate::domain::SchemeMetadata;
use crate::error::SchemeError;
use crate::http::{ARCHIVE_TIMEOUT, HttpRequest, fetch};
use crate::retry::retry;
use crate::store::{SchemeDir, SchemeSidecar};

const PROFILES_LIST: &str = "profiles.list.gz";
const INDEX_DATE_FORMAT: &str = "%d-%b-%Y";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnterobaseDownloader {
    scheme_id: String,
    scheme_type: String,
    name: String,
}

impl EnterobaseDownloader {
    pub fn from_metadata(metadata: &SchemeMetadata) -> Result<Self, SchemeError> {
        let scheme_id = required(
            metadata,
            "scheme_id",
            metadata.scheme_id.as_ref().map(ToString::to_string),
        )?;
        let scheme_type = required(metadata, "type", metadata.scheme_type.clone())?;
        let name = format!("enterobase_{scheme_id}");
        Ok(Self {
            scheme_id,
            scheme_type,
            name,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn download(
        &self,
        ctx: &mut DownloadContext<'_>,
        output_dir: &Utf8Path,
    ) -> Result<SchemeDownload, SchemeError> {
        let scheme_url = format!(
            "{}/{}",
            ctx.endpoints.enterobase.trim_end_matches('/'),
            self.scheme_id
        );

        let dir = SchemeDir::create(output_dir, &self.scheme_type, &self.name)?;
        let profiles = self.fetch_bulk(ctx, &format!("{scheme_url}/{PROFILES_LIST}"))?;
        let loci = profile_header(&profiles)
            .as_deref()
            .and_then(loci_from_header)
            .ok_or_else(|| SchemeError::LociUnavailable(self.name.clone()))?;
        let last_updated = self.fetch_timestamp(ctx, &scheme_url)?;

        info!(scheme = %self.name, loci = loci.len(), "downloading alleles");
        for locus in &loci {
            debug!(scheme = %self.name, %locus, "downloading alleles");
            let url = format!("{scheme_url}/{locus}.fasta.gz");
            let alleles = retry(ctx.retry, &format!("download {url}"), || {
                let body = self.fetch_bulk_once(ctx, &url)?;
                gunzip(&url, &body)
            })?;
            dir.write_locus(locus, &alleles)?;
        }

        if self.scheme_type != "cgmlst" {
            dir.write_profiles(MultiGzDecoder::new(profiles.as_slice()))?;
        }

        dir.write_sidecar(&SchemeSidecar {
            last_updated: last_updated.clone(),
            genes: loci,
        })?;
        Ok(SchemeDownload {
            relative_path: dir.relative().to_path_buf(),
            last_updated,
        })
    }

    fn fetch_bulk(&self, ctx: &DownloadContext<'_>, url: &str) -> Result<Vec<u8>, SchemeError> {
        retry(ctx.retry, &format!("download {url}"), || self.fetch_bulk_once(ctx, url))
    }

    fn fetch_bulk_once(&self, ctx: &DownloadContext<'_>, url: &str) -> Result<Vec<u8>, SchemeError> {
        let request = HttpRequest::get(url).timeout(ARCHIVE_TIMEOUT);
        fetch(ctx.transport, &request).map(|response| response.body)
    }

    fn fetch_timestamp(&self, ctx: &DownloadContext<'_>, scheme_url: &str) -> Result<String, SchemeError> {
        let request = HttpRequest::get(format!("{scheme_url}/"));
        let index = retry(ctx.retry, &format!("index of {}", self.name), || {
            fetch(ctx.transport, &request).map(|response| response.text())
        })?;
        index
            .lines()
            .find(|line| line.contains(".fasta.gz"))
            .and_then(index_line_date)
            .ok_or_else(|| SchemeError::TimestampUnavailable(self.name.clone()))
    }
}

fn gunzip(url: &str, body: &[u8]) -> Result<String, SchemeError> {
    let mut text = String::new();
    MultiGzDecoder::new(body)
        .read_to_string(&mut text)
        .map_err(|err| SchemeError::UnexpectedResponse {
            url: url.to_string(),
            message: format!("gzip: {err}"),
        })?;
    Ok(text)
}

// Only the header line is decoded; the rest of the list may be gigabytes.
fn profile_header(profiles: &[u8]) -> Option<String> {
    let mut header = String::new();
    BufReader::new(MultiGzDecoder::new(profiles))
        .read_line(&mut header)
        .ok()?;
    Some(header)
}

fn loci_from_header(header: &str) -> Option<Vec<String>> {
    let loci: Vec<String> = header
        .trim_end()
        .split('\t')
        .skip(1)
        .map(str::trim)
        .filter(|locus| !locus.is_empty())
        .map(str::to_string)
        .collect();
    (!loci.is_empty()).then_some(loci)
}

fn index_line_date(line: &str) -> Option<String> {
    let field = line.split_whitespace().nth(2)?;
    NaiveDate::parse_from_str(field, INDEX_DATE_FORMAT)
        .ok()
        .map(|date| date.format("%Y-%m-%d").to_string())
}
