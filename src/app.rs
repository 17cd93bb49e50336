use std::sync::Arc;

use camino::Utf8Path;
use tracing::{error, info};

use crate::domain::SchemeMetadata;
use crate::error::SchemeError;
use crate::http::Transport;
use crate::keycache::KeyCache;
use crate::output::{Manifest, ManifestEntry};
use crate::providers::{DownloadContext, Downloader, ProviderEndpoints, SchemeDownload};
use crate::retry::RetryPolicy;

pub struct App {
    transport: Arc<dyn Transport>,
    keycache: Option<KeyCache>,
    retry: RetryPolicy,
    endpoints: ProviderEndpoints,
}

impl App {
    pub fn new(transport: Arc<dyn Transport>, keycache: Option<KeyCache>, retry: RetryPolicy) -> Self {
        Self {
            transport,
            keycache,
            retry,
            endpoints: ProviderEndpoints::default(),
        }
    }

    pub fn with_endpoints(mut self, endpoints: ProviderEndpoints) -> Self {
        self.endpoints = endpoints;
        self
    }

    pub fn download_scheme(
        &mut self,
        scheme: &SchemeMetadata,
        output_dir: &Utf8Path,
    ) -> Result<Option<SchemeDownload>, SchemeError> {
        let Some(downloader) = Downloader::select(scheme)? else {
            return Ok(None);
        };

        info!(shortname = %scheme.shortname, scheme = downloader.name(), "downloading scheme");
        let mut ctx = DownloadContext {
            transport: self.transport.as_ref(),
            keycache: self.keycache.as_mut(),
            retry: &self.retry,
            endpoints: &self.endpoints,
        };
        let download = downloader.download(&mut ctx, output_dir)?;
        info!(
            scheme = downloader.name(),
            path = %download.relative_path,
            last_updated = %download.last_updated,
            "scheme downloaded"
        );
        Ok(Some(download))
    }

    pub fn download_schemes(
        &mut self,
        schemes: &[SchemeMetadata],
        output_dir: &Utf8Path,
    ) -> Result<Manifest, SchemeError> {
        let mut manifest = Manifest::default();
        for scheme in schemes {
            match self.download_scheme(scheme, output_dir) {
                Ok(Some(download)) => manifest.schemes.push(ManifestEntry::new(scheme, download)),
                Ok(None) => {}
                Err(err) => {
                    error!(shortname = %scheme.shortname, %err, "problem downloading scheme");
                    return Err(err);
                }
            }
        }
        Ok(manifest)
    }
}
