use std::sync::Arc;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::cookie::Jar;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use reqwest::redirect::Policy;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::SchemeError;

pub const DEFAULT_USER_AGENT: &str =
    "mlst-downloader (https://gist.github.com/bewt85/16f2b7b9c3b331f751ce40273240a2eb)";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
pub const ARCHIVE_TIMEOUT: Duration = Duration::from_secs(600);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub form: Vec<(String, String)>,
    pub follow_redirects: bool,
    pub timeout: Duration,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            url: url.into(),
            headers: Vec::new(),
            form: Vec::new(),
            follow_redirects: true,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn post_form(url: impl Into<String>, form: Vec<(String, String)>) -> Self {
        Self {
            method: Method::Post,
            form,
            ..Self::get(url)
        }
    }

    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_string(), value.into()));
        self
    }

    // BIGSdb signals revoked credentials with a 301, so redirects are returned as-is.
    pub fn without_redirects(mut self) -> Self {
        self.follow_redirects = false;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub url: String,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn is_ok(&self) -> bool {
        self.status == 200
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, SchemeError> {
        serde_json::from_slice(&self.body).map_err(|err| SchemeError::UnexpectedResponse {
            url: self.url.clone(),
            message: err.to_string(),
        })
    }
}

pub trait Transport: Send + Sync {
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse, SchemeError>;
}

pub fn fetch(transport: &dyn Transport, request: &HttpRequest) -> Result<HttpResponse, SchemeError> {
    let response = transport.send(request)?;
    if !response.is_ok() {
        return Err(SchemeError::HttpStatus {
            url: request.url.clone(),
            status: response.status,
        });
    }
    debug!(url = %request.url, bytes = response.body.len(), "downloaded");
    Ok(response)
}

#[derive(Clone)]
pub struct HttpClient {
    following: Client,
    direct: Client,
}

impl HttpClient {
    pub fn new() -> Result<Self, SchemeError> {
        Self::with_user_agent(DEFAULT_USER_AGENT)
    }

    pub fn with_user_agent(user_agent: &str) -> Result<Self, SchemeError> {
        let jar = Arc::new(Jar::default());
        let following = Self::build(user_agent, jar.clone(), Policy::default())?;
        let direct = Self::build(user_agent, jar, Policy::none())?;
        Ok(Self { following, direct })
    }

    fn build(user_agent: &str, jar: Arc<Jar>, redirect: Policy) -> Result<Client, SchemeError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(user_agent).map_err(|err| SchemeError::Http {
                url: String::new(),
                message: err.to_string(),
            })?,
        );
        Client::builder()
            .default_headers(headers)
            .danger_accept_invalid_certs(true)
            .connect_timeout(DEFAULT_TIMEOUT)
            .cookie_provider(jar)
            .redirect(redirect)
            .build()
            .map_err(|err| SchemeError::Http {
                url: String::new(),
                message: err.to_string(),
            })
    }
}

impl Transport for HttpClient {
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse, SchemeError> {
        let client = if request.follow_redirects {
            &self.following
        } else {
            &self.direct
        };
        let mut builder = match request.method {
            Method::Get => client.get(&request.url),
            Method::Post => client.post(&request.url).form(&request.form),
        };
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        let map_err = |err: reqwest::Error| {
            if err.is_timeout() {
                SchemeError::Timeout {
                    url: request.url.clone(),
                    seconds: request.timeout.as_secs(),
                }
            } else {
                SchemeError::Http {
                    url: request.url.clone(),
                    message: err.to_string(),
                }
            }
        };

        let response = builder.timeout(request.timeout).send().map_err(map_err)?;
        let status = response.status().as_u16();
        let url = response.url().to_string();
        let body = response.bytes().map_err(map_err)?.to_vec();
        Ok(HttpResponse { status, url, body })
    }
}
