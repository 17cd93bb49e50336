pub mod enterobase;
pub mod pubmlst;
pub mod ridom;

use camino::{Utf8Path, Utf8PathBuf};
use tracing::warn;

use crate::domain::{Host, SchemeMetadata, UnknownHost};
use crate::error::SchemeError;
use crate::http::Transport;
use crate::keycache::KeyCache;
use crate::retry::RetryPolicy;

pub use enterobase::EnterobaseDownloader;
pub use pubmlst::PubmlstDownloader;
pub use ridom::RidomDownloader;

pub const ENTEROBASE_BASE_URL: &str = "https://enterobase.warwick.ac.uk/schemes";
pub const RIDOM_BASE_URL: &str = "https://www.cgmlst.org/ncs/schema";

#[derive(Debug, Clone)]
pub struct ProviderEndpoints {
    pub enterobase: String,
    pub ridom: String,
}

impl Default for ProviderEndpoints {
    fn default() -> Self {
        Self {
            enterobase: ENTEROBASE_BASE_URL.to_string(),
            ridom: RIDOM_BASE_URL.to_string(),
        }
    }
}

pub struct DownloadContext<'a> {
    pub transport: &'a dyn Transport,
    pub keycache: Option<&'a mut KeyCache>,
    pub retry: &'a RetryPolicy,
    pub endpoints: &'a ProviderEndpoints,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemeDownload {
    pub relative_path: Utf8PathBuf,
    pub last_updated: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Downloader {
    Pubmlst(PubmlstDownloader),
    EnterobaseFtp(EnterobaseDownloader),
    RidomCgmlst(RidomDownloader),
}

impl Downloader {
    // Schemes without a recognised host are skipped with a warning.
    pub fn select(metadata: &SchemeMetadata) -> Result<Option<Self>, SchemeError> {
        let host = match metadata.parsed_host() {
            Some(Ok(host)) => host,
            Some(Err(UnknownHost(host))) => {
                warn!(shortname = %metadata.shortname, %host, "skipping scheme with unknown host");
                return Ok(None);
            }
            None => {
                warn!(shortname = %metadata.shortname, "skipping scheme without host");
                return Ok(None);
            }
        };

        let downloader = match host {
            Host::Pubmlst | Host::Pasteur => {
                Downloader::Pubmlst(PubmlstDownloader::from_metadata(host, metadata)?)
            }
            Host::Enterobase => Downloader::EnterobaseFtp(EnterobaseDownloader::from_metadata(metadata)?),
            Host::Ridom => Downloader::RidomCgmlst(RidomDownloader::from_metadata(metadata)?),
        };
        Ok(Some(downloader))
    }

    pub fn name(&self) -> &str {
        match self {
            Downloader::Pubmlst(downloader) => downloader.name(),
            Downloader::EnterobaseFtp(downloader) => downloader.name(),
            Downloader::RidomCgmlst(downloader) => downloader.name(),
        }
    }

    pub fn download(
        &self,
        ctx: &mut DownloadContext<'_>,
        output_dir: &Utf8Path,
    ) -> Result<SchemeDownload, SchemeError> {
        match self {
            Downloader::Pubmlst(downloader) => downloader.download(ctx, output_dir),
            Downloader::EnterobaseFtp(downloader) => downloader.download(ctx, output_dir),
            Downloader::RidomCgmlst(downloader) => downloader.download(ctx, output_dir),
        }
    }
}

fn required(metadata: &SchemeMetadata, field: &str, value: Option<String>) -> Result<String, SchemeError> {
    value
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| SchemeError::InvalidScheme {
            shortname: metadata.shortname.clone(),
            message: format!("missing `{field}`"),
        })
}

fn today() -> String {
    chrono::Local::now().format("%Y-%m-%d").to_string()
}
