use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use camino::Utf8PathBuf;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::config::{ConfigLoader, ConfigPaths, HostConfig, HostConfigs, TokenTable};
use crate::domain::{Host, KeyKind, TokenPair};
use crate::error::SchemeError;
use crate::http::{ARCHIVE_TIMEOUT, DEFAULT_TIMEOUT, HttpRequest, HttpResponse, Transport, fetch};
use crate::oauth;
use crate::retry::{RetryPolicy, retry};
use crate::scrape;

// Forced refreshes allowed per call after a revocation response.
const MAX_REFRESHES: usize = 1;

#[derive(Debug, Deserialize)]
struct OAuthTokenResponse {
    oauth_token: String,
    oauth_token_secret: String,
}

fn token_from_response(response: &HttpResponse) -> Result<TokenPair, SchemeError> {
    let parsed: OAuthTokenResponse = response.json()?;
    Ok(TokenPair::new(parsed.oauth_token, parsed.oauth_token_secret))
}

enum Signed {
    Accepted(HttpResponse),
    Revoked,
}

struct SignedGet<'a> {
    url: &'a str,
    token: Option<&'a TokenPair>,
    extra: &'a [(&'a str, &'a str)],
    revoked: &'a [u16],
    timeout: Duration,
}

impl<'a> SignedGet<'a> {
    // BIGSdb answers a revoked parent token on the OAuth endpoints with a 301.
    fn token_endpoint(url: &'a str, token: Option<&'a TokenPair>) -> Self {
        Self {
            url,
            token,
            extra: &[],
            revoked: &[301],
            timeout: DEFAULT_TIMEOUT,
        }
    }

    fn extra(mut self, extra: &'a [(&'a str, &'a str)]) -> Self {
        self.extra = extra;
        self
    }
}

pub struct KeyCache {
    secrets: TokenTable,
    hosts: HostConfigs,
    cache: TokenTable,
    cache_file: Utf8PathBuf,
    transport: Arc<dyn Transport>,
    retry: RetryPolicy,
    web_sessions: HashSet<Host>,
}

impl KeyCache {
    pub fn open(
        paths: &ConfigPaths,
        transport: Arc<dyn Transport>,
        retry: RetryPolicy,
    ) -> Result<Self, SchemeError> {
        let secrets = ConfigLoader::secrets(&paths.secrets_file)?;
        let hosts = ConfigLoader::host_configs(&paths.host_config_file())?;
        let cache = ConfigLoader::token_cache(&paths.cache_file)?;
        Self::new(secrets, hosts, cache, paths.cache_file.clone(), transport, retry)
    }

    pub fn new(
        secrets: TokenTable,
        hosts: HostConfigs,
        mut cache: TokenTable,
        cache_file: Utf8PathBuf,
        transport: Arc<dyn Transport>,
        retry: RetryPolicy,
    ) -> Result<Self, SchemeError> {
        for (host, kinds) in &secrets {
            let entry = cache.entry(host.clone()).or_default();
            for (kind, pair) in kinds {
                if kind != "user" && kind != "consumer" {
                    entry.insert(kind.clone(), pair.clone());
                }
            }
        }

        let key_cache = Self {
            secrets,
            hosts,
            cache,
            cache_file,
            transport,
            retry,
            web_sessions: HashSet::new(),
        };
        key_cache.save()?;
        Ok(key_cache)
    }

    fn save(&self) -> Result<(), SchemeError> {
        crate::store::write_json_atomic(&self.cache_file, &self.cache)
    }

    pub fn host_config(&self, host: Host) -> Result<&HostConfig, SchemeError> {
        self.hosts
            .get(host.as_str())
            .ok_or_else(|| SchemeError::UnknownHostConfig(host.to_string()))
    }

    pub fn rest_url(&self, host: Host) -> Result<&str, SchemeError> {
        Ok(self.host_config(host)?.rest_url.as_str())
    }

    pub fn get_key(&self, kind: &KeyKind, host: Host) -> Result<Option<TokenPair>, SchemeError> {
        if !host.is_bigsdb() {
            return Ok(None);
        }
        if kind.is_protected() {
            let pair = self
                .secrets
                .get(host.as_str())
                .and_then(|kinds| kinds.get(&kind.cache_key()))
                .ok_or_else(|| SchemeError::MissingSecret {
                    host: host.to_string(),
                    kind: kind.to_string(),
                })?;
            return Ok(Some(pair.clone()));
        }
        Ok(self
            .cache
            .get(host.as_str())
            .and_then(|kinds| kinds.get(&kind.cache_key()))
            .cloned())
    }

    pub fn set_key(&mut self, kind: &KeyKind, host: Host, pair: TokenPair) -> Result<(), SchemeError> {
        if kind.is_protected() {
            warn!(%kind, %host, "attempt to set token ignored");
            return Ok(());
        }
        self.cache
            .entry(host.to_string())
            .or_default()
            .insert(kind.cache_key(), pair);
        self.save()
    }

    pub fn delete_key(&mut self, kind: &KeyKind, host: Host) -> Result<(), SchemeError> {
        if kind.is_protected() {
            warn!(%kind, %host, "attempt to delete token ignored");
            return Ok(());
        }
        let removed = self
            .cache
            .get_mut(host.as_str())
            .and_then(|kinds| kinds.remove(&kind.cache_key()))
            .is_some();
        if removed {
            debug!(%kind, %host, "deleted cached token");
            self.save()?;
        }
        Ok(())
    }

    pub fn consumer_key(&self, host: Host) -> Result<TokenPair, SchemeError> {
        self.required_secret(&KeyKind::Consumer, host)
    }

    pub fn user_credentials(&self, host: Host) -> Result<TokenPair, SchemeError> {
        self.required_secret(&KeyKind::User, host)
    }

    fn required_secret(&self, kind: &KeyKind, host: Host) -> Result<TokenPair, SchemeError> {
        self.get_key(kind, host)?
            .ok_or_else(|| SchemeError::MissingSecret {
                host: host.to_string(),
                kind: kind.to_string(),
            })
    }

    pub fn request_key(&mut self, host: Host, database: &str) -> Result<TokenPair, SchemeError> {
        if let Some(pair) = self.get_key(&KeyKind::Request, host)? {
            return Ok(pair);
        }
        let pair = self.fetch_request_key(host, database)?;
        self.set_key(&KeyKind::Request, host, pair.clone())?;
        Ok(pair)
    }

    pub fn access_key(&mut self, host: Host, database: &str) -> Result<TokenPair, SchemeError> {
        if let Some(pair) = self.get_key(&KeyKind::Access, host)? {
            return Ok(pair);
        }
        let pair = self.fetch_access_key(host, database)?;
        self.set_key(&KeyKind::Access, host, pair.clone())?;
        Ok(pair)
    }

    pub fn session_key(&mut self, host: Host, database: &str) -> Result<TokenPair, SchemeError> {
        let kind = KeyKind::session(database);
        if let Some(pair) = self.get_key(&kind, host)? {
            return Ok(pair);
        }
        let pair = self.fetch_session_key(host, database)?;
        self.set_key(&kind, host, pair.clone())?;
        Ok(pair)
    }

    // A 301 or 401 drops the session token and retries once with a fresh one.
    pub fn authenticated_get(
        &mut self,
        host: Host,
        database: &str,
        url: &str,
    ) -> Result<HttpResponse, SchemeError> {
        debug!(%host, database, url, "authenticated fetch");
        for _ in 0..=MAX_REFRESHES {
            let consumer = self.consumer_key(host)?;
            let session = self.session_key(host, database)?;
            let call = SignedGet {
                url,
                token: Some(&session),
                extra: &[],
                revoked: &[301, 401],
                timeout: ARCHIVE_TIMEOUT,
            };
            match self.signed_get("authenticated fetch", &consumer, call)? {
                Signed::Accepted(response) => return Ok(response),
                Signed::Revoked => {
                    warn!(%host, "session access denied, regenerating keys");
                    self.delete_key(&KeyKind::session(database), host)?;
                }
            }
        }
        Err(SchemeError::AccessRevoked {
            host: host.to_string(),
        })
    }

    fn database_url(&self, host: Host, database: &str) -> Result<String, SchemeError> {
        Ok(format!(
            "{}/pubmlst_{database}_seqdef",
            self.rest_url(host)?.trim_end_matches('/')
        ))
    }

    // Statuses in `call.revoked` come back as `Signed::Revoked`, any other
    // non-200 status is an error.
    fn signed_get(
        &self,
        operation: &str,
        consumer: &TokenPair,
        call: SignedGet<'_>,
    ) -> Result<Signed, SchemeError> {
        let SignedGet {
            url,
            token,
            extra,
            revoked,
            timeout,
        } = call;
        retry(&self.retry, operation, || {
            let header = oauth::authorization_header("GET", url, consumer, token, extra)?;
            let request = HttpRequest::get(url)
                .header("Authorization", header)
                .without_redirects()
                .timeout(timeout);
            let response = self.transport.send(&request)?;
            if response.is_ok() {
                Ok(Signed::Accepted(response))
            } else if revoked.contains(&response.status) {
                Ok(Signed::Revoked)
            } else {
                Err(SchemeError::HttpStatus {
                    url: url.to_string(),
                    status: response.status,
                })
            }
        })
    }

    fn fetch_request_key(&self, host: Host, database: &str) -> Result<TokenPair, SchemeError> {
        debug!(%host, database, "fetching request token");
        let consumer = self.consumer_key(host)?;
        let url = format!("{}/oauth/get_request_token", self.database_url(host, database)?);
        let call = SignedGet::token_endpoint(&url, None).extra(&[("oauth_callback", "oob")]);
        match self.signed_get("request token", &consumer, call)? {
            Signed::Accepted(response) => token_from_response(&response),
            Signed::Revoked => Err(SchemeError::Auth {
                host: host.to_string(),
                message: "unable to get a request token, check the consumer key and secret".to_string(),
            }),
        }
    }

    fn fetch_access_key(&mut self, host: Host, database: &str) -> Result<TokenPair, SchemeError> {
        debug!(%host, database, "fetching access token");
        for _ in 0..=MAX_REFRESHES {
            let request = self.request_key(host, database)?;
            let consumer = self.consumer_key(host)?;

            info!(%host, database, "authorising application");
            let Some(verifier) = self.authorize_request_token(host, database, &request)? else {
                info!(%host, "request token has already been redeemed");
                self.delete_key(&KeyKind::Request, host)?;
                continue;
            };

            info!(%host, database, "getting access token");
            let url = format!("{}/oauth/get_access_token", self.database_url(host, database)?);
            let extra = [("oauth_verifier", verifier.as_str())];
            let call = SignedGet::token_endpoint(&url, Some(&request)).extra(&extra);
            match self.signed_get("access token", &consumer, call)? {
                Signed::Accepted(response) => return token_from_response(&response),
                Signed::Revoked => {
                    warn!(%host, "request token rejected, requesting a new one");
                    self.delete_key(&KeyKind::Request, host)?;
                }
            }
        }
        Err(SchemeError::Auth {
            host: host.to_string(),
            message: "request token was rejected after refreshing it".to_string(),
        })
    }

    fn fetch_session_key(&mut self, host: Host, database: &str) -> Result<TokenPair, SchemeError> {
        debug!(%host, database, "fetching session token");
        let url = format!("{}/oauth/get_session_token", self.database_url(host, database)?);
        for _ in 0..=MAX_REFRESHES {
            let access = self.access_key(host, database)?;
            let consumer = self.consumer_key(host)?;
            let call = SignedGet::token_endpoint(&url, Some(&access));
            match self.signed_get("session token", &consumer, call)? {
                Signed::Accepted(response) => return token_from_response(&response),
                Signed::Revoked => {
                    warn!(%host, "session access denied, regenerating access token");
                    self.delete_key(&KeyKind::Access, host)?;
                }
            }
        }
        Err(SchemeError::AccessRevoked {
            host: host.to_string(),
        })
    }

    fn authorize_request_token(
        &mut self,
        host: Host,
        database: &str,
        request: &TokenPair,
    ) -> Result<Option<String>, SchemeError> {
        self.ensure_logged_in(host)?;
        let config = self.host_config(host)?.clone();

        let authorize_url = format!(
            "{}?db=pubmlst_{database}_seqdef&page=authorizeClient&oauth_token={}",
            config.web_url, request.token
        );
        debug!(url = %authorize_url, "authorise client");
        let page = self.fetch_page(&HttpRequest::get(&authorize_url))?;
        if scrape::is_request_token_redeemed(&page) {
            return Ok(None);
        }

        let form = scrape::find_form(&page, Some("authorizeClient")).ok_or_else(|| {
            debug!(content = %page, "authorisation page");
            SchemeError::Auth {
                host: host.to_string(),
                message: "failed to find authorisation form".to_string(),
            }
        })?;
        let mut fields = form.fields;
        set_field(&mut fields, "submit", "Authorize");

        let verifier_url = format!("{}{}", config.auth_base, form.action);
        debug!(url = %verifier_url, "submitting authorisation");
        let result = self.fetch_page(&HttpRequest::post_form(&verifier_url, fields))?;
        let verifier = scrape::extract_verifier(&result).ok_or_else(|| {
            debug!(content = %result, "verification page");
            SchemeError::Auth {
                host: host.to_string(),
                message: "failed to obtain verifier code".to_string(),
            }
        })?;
        Ok(Some(verifier))
    }

    fn fetch_page(&self, request: &HttpRequest) -> Result<String, SchemeError> {
        retry(&self.retry, "web page", || {
            fetch(self.transport.as_ref(), request)
        })
        .map(|response| response.text())
    }

    fn is_logged_in(&self, host: Host) -> Result<bool, SchemeError> {
        let web_url = self.host_config(host)?.web_url.clone();
        Ok(scrape::is_logged_in(&self.fetch_page(&HttpRequest::get(web_url))?))
    }

    fn ensure_logged_in(&mut self, host: Host) -> Result<(), SchemeError> {
        if self.web_sessions.contains(&host) && self.is_logged_in(host)? {
            return Ok(());
        }
        self.web_sessions.remove(&host);
        self.login(host)?;
        if !self.is_logged_in(host)? {
            return Err(SchemeError::Auth {
                host: host.to_string(),
                message: "failed to log in".to_string(),
            });
        }
        self.web_sessions.insert(host);
        Ok(())
    }

    fn login(&self, host: Host) -> Result<(), SchemeError> {
        let config = self.host_config(host)?;
        let login_page = self.fetch_page(&HttpRequest::get(&config.web_url))?;
        let form = scrape::find_form(&login_page, None).ok_or_else(|| SchemeError::Auth {
            host: host.to_string(),
            message: "failed to find login form".to_string(),
        })?;

        let user = self.user_credentials(host)?;
        let username = user.token.trim();
        let hashed_password = format!("{:x}", md5::compute(format!("{}{username}", user.secret.trim())));

        let mut fields = form.fields;
        set_field(&mut fields, "user", username);
        set_field(&mut fields, "password", &hashed_password);
        set_field(&mut fields, "submit", "Log in");
        set_field(&mut fields, "page", "user");
        for (name, value) in &config.login_db {
            set_field(&mut fields, name, value);
        }

        let request = HttpRequest::post_form(&config.web_url, fields);
        let response = retry(&self.retry, "login", || self.transport.send(&request))?;
        if scrape::is_invalid_login(&response.text()) {
            return Err(SchemeError::Auth {
                host: host.to_string(),
                message: "invalid username/password".to_string(),
            });
        }
        if !response.is_ok() {
            return Err(SchemeError::HttpStatus {
                url: config.web_url.clone(),
                status: response.status,
            });
        }
        debug!(%host, "login successful");
        Ok(())
    }
}

fn set_field(fields: &mut Vec<(String, String)>, name: &str, value: &str) {
    match fields.iter_mut().find(|(existing, _)| existing == name) {
        Some(field) => field.1 = value.to_string(),
        None => fields.push((name.to_string(), value.to_string())),
    }
}
