use std::collections::BTreeMap;
use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::domain::{SchemeMetadata, TokenPair};
use crate::error::SchemeError;

pub const SCHEMES_FILE: &str = "schemes.json";
pub const HOST_CONFIG_FILE: &str = "host_config.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostConfig {
    #[serde(rename = "REST_URL")]
    pub rest_url: String,
    #[serde(rename = "WEB_URL")]
    pub web_url: String,
    #[serde(rename = "AUTH_BASE")]
    pub auth_base: String,
    #[serde(rename = "LOGIN_DB", default)]
    pub login_db: BTreeMap<String, String>,
}

pub type HostConfigs = BTreeMap<String, HostConfig>;

pub type TokenTable = BTreeMap<String, BTreeMap<String, TokenPair>>;

#[derive(Debug, Deserialize, Serialize)]
pub struct SchemeCatalog {
    pub schemes: Vec<SchemeMetadata>,
}

impl SchemeCatalog {
    pub fn select(self, only: &[String]) -> Vec<SchemeMetadata> {
        if only.is_empty() {
            return self.schemes;
        }
        self.schemes
            .into_iter()
            .filter(|scheme| only.iter().any(|wanted| wanted == &scheme.shortname))
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct ConfigPaths {
    pub config_dir: Utf8PathBuf,
    pub secrets_file: Utf8PathBuf,
    pub cache_file: Utf8PathBuf,
}

impl ConfigPaths {
    pub fn schemes_file(&self) -> Utf8PathBuf {
        self.config_dir.join(SCHEMES_FILE)
    }

    pub fn host_config_file(&self) -> Utf8PathBuf {
        self.config_dir.join(HOST_CONFIG_FILE)
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn read_json<T: DeserializeOwned>(path: &Utf8Path) -> Result<T, SchemeError> {
        let content = fs::read_to_string(path.as_std_path())
            .map_err(|_| SchemeError::ConfigRead(path.as_std_path().to_path_buf()))?;
        serde_json::from_str(&content)
            .map_err(|err| SchemeError::ConfigParse(format!("{path}: {err}")))
    }

    pub fn schemes(path: &Utf8Path) -> Result<SchemeCatalog, SchemeError> {
        Self::read_json(path)
    }

    pub fn host_configs(path: &Utf8Path) -> Result<HostConfigs, SchemeError> {
        Self::read_json(path)
    }

    pub fn secrets(path: &Utf8Path) -> Result<TokenTable, SchemeError> {
        Self::read_json(path)
    }

    // A missing cache file is an empty cache.
    pub fn token_cache(path: &Utf8Path) -> Result<TokenTable, SchemeError> {
        if !path.as_std_path().exists() {
            return Ok(TokenTable::new());
        }
        Self::read_json(path)
    }
}
