use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum SchemeError {
    #[error("GET '{url}' failed: {message}")]
    Http { url: String, message: String },

    #[error("GET '{url}' timed out after {seconds} seconds")]
    Timeout { url: String, seconds: u64 },

    #[error("'{url}' returned {status}")]
    HttpStatus { url: String, status: u16 },

    #[error("unexpected response from {url}: {message}")]
    UnexpectedResponse { url: String, message: String },

    #[error("authentication failed for {host}: {message}")]
    Auth { host: String, message: String },

    #[error("access for {host} was revoked again after refreshing credentials")]
    AccessRevoked { host: String },

    #[error("{kind} for {host} not found in secrets file")]
    MissingSecret { host: String, kind: String },

    #[error("host {0} not found in host configuration")]
    UnknownHostConfig(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("invalid scheme {shortname}: {message}")]
    InvalidScheme { shortname: String, message: String },

    #[error("expected there to be some contigs")]
    NoContigs,

    #[error("unable to download the list of loci for {0}")]
    LociUnavailable(String),

    #[error("unable to download the timestamp for {0}")]
    TimestampUnavailable(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}

impl SchemeError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SchemeError::Http { .. }
                | SchemeError::Timeout { .. }
                | SchemeError::HttpStatus { .. }
                | SchemeError::UnexpectedResponse { .. }
        )
    }
}
