use camino::Utf8Path;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, error, info};

use super::{DownloadContext, SchemeDownload, required, today};
use crate::domain::{Host, SchemeMetadata};
use crate::error::SchemeError;
use crate::keycache::KeyCache;
use crate::store::{SchemeDir, SchemeSidecar};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PubmlstDownloader {
    shortname: String,
    host: Host,
    host_path: String,
    scheme_id: String,
    scheme_type: String,
    database: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct LociResponse {
    loci: Vec<String>,
}

impl PubmlstDownloader {
    pub fn from_metadata(host: Host, metadata: &SchemeMetadata) -> Result<Self, SchemeError> {
        let host_path = required(metadata, "host_path", metadata.host_path.clone())?;
        let scheme_id = required(
            metadata,
            "scheme_id",
            metadata.scheme_id.as_ref().map(ToString::to_string),
        )?;
        let scheme_type = required(metadata, "type", metadata.scheme_type.clone())?;

        let database = host_path.replace("pubmlst_", "").replace("_seqdef", "");
        let name = format!("{}_{scheme_id}", host_path.replace("_seqdef", ""));
        Ok(Self {
            shortname: metadata.shortname.clone(),
            host,
            host_path,
            scheme_id,
            scheme_type,
            database,
            name,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn download(
        &self,
        ctx: &mut DownloadContext<'_>,
        output_dir: &Utf8Path,
    ) -> Result<SchemeDownload, SchemeError> {
        let keycache = ctx
            .keycache
            .as_deref_mut()
            .ok_or_else(|| SchemeError::InvalidScheme {
                shortname: self.shortname.clone(),
                message: format!("{} schemes need a secrets file", self.host),
            })?;

        let base_url = format!(
            "{}/{}",
            keycache.rest_url(self.host)?.trim_end_matches('/'),
            self.host_path
        );
        let scheme_url = format!("{base_url}/schemes/{}", self.scheme_id);
        let alleles_url = format!("{base_url}/loci");

        let dir = SchemeDir::create(output_dir, &self.scheme_type, &self.name)?;
        let last_updated = self.fetch_timestamp(keycache, &scheme_url)?;
        let loci = self.fetch_loci(keycache, &scheme_url)?;

        info!(scheme = %self.name, host = %self.host, loci = loci.len(), "downloading alleles");
        let mut genes = Vec::with_capacity(loci.len());
        for locus in &loci {
            let url = format!("{alleles_url}/{locus}/alleles_fasta");
            debug!(%locus, %url, "downloading alleles");
            // PubMLST prefixes RNA genes with an apostrophe.
            let clean_locus = locus.replace('\'', "");
            let response = keycache.authenticated_get(self.host, &self.database, &url)?;
            dir.write_locus(&clean_locus, &response.text())
                .inspect_err(|err| error!(scheme = %self.name, locus = %clean_locus, %err, "locus failed"))?;
            genes.push(clean_locus);
        }

        if self.scheme_type != "cgmlst" {
            debug!(scheme = %self.name, "downloading profiles");
            let url = format!("{scheme_url}/profiles_csv");
            let response = keycache.authenticated_get(self.host, &self.database, &url)?;
            dir.write_profiles(response.body.as_slice())?;
        }

        debug!(scheme = %self.name, "writing metadata");
        dir.write_sidecar(&SchemeSidecar {
            last_updated: last_updated.clone(),
            genes,
        })?;
        Ok(SchemeDownload {
            relative_path: dir.relative().to_path_buf(),
            last_updated,
        })
    }

    fn fetch_loci(&self, keycache: &mut KeyCache, scheme_url: &str) -> Result<Vec<String>, SchemeError> {
        debug!(scheme = %self.name, "downloading loci");
        let response = keycache.authenticated_get(self.host, &self.database, &format!("{scheme_url}/loci"))?;
        let listing: LociResponse = response.json()?;
        let loci: Vec<String> = listing
            .loci
            .iter()
            .filter_map(|url| url.trim_end_matches('/').rsplit('/').next())
            .filter(|locus| !locus.is_empty())
            .map(str::to_string)
            .collect();
        if loci.is_empty() {
            return Err(SchemeError::LociUnavailable(self.name.clone()));
        }
        Ok(loci)
    }

    fn fetch_timestamp(&self, keycache: &mut KeyCache, scheme_url: &str) -> Result<String, SchemeError> {
        debug!(scheme = %self.name, "fetching timestamp");
        let response = keycache.authenticated_get(self.host, &self.database, scheme_url)?;
        let scheme: Value = response.json()?;
        Ok(scheme
            .get("last_updated")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(today))
    }
}
