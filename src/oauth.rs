use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use hmac::{Hmac, Mac};
use reqwest::Url;
use sha1::Sha1;

use crate::domain::TokenPair;
use crate::error::SchemeError;

type HmacSha1 = Hmac<Sha1>;

#[derive(Debug, Clone)]
pub struct Nonce {
    pub nonce: String,
    pub timestamp: i64,
}

impl Nonce {
    pub fn generate() -> Self {
        Self {
            nonce: uuid::Uuid::new_v4().simple().to_string(),
            timestamp: chrono::Utc::now().timestamp(),
        }
    }
}

fn encode(value: &str) -> String {
    urlencoding::encode(value).into_owned()
}

fn normalized_url(url: &Url) -> String {
    let scheme = url.scheme().to_ascii_lowercase();
    let host = url.host_str().unwrap_or_default().to_ascii_lowercase();
    match url.port() {
        Some(port) => format!("{scheme}://{host}:{port}{}", url.path()),
        None => format!("{scheme}://{host}{}", url.path()),
    }
}

fn oauth_parameters(
    consumer: &TokenPair,
    token: Option<&TokenPair>,
    extra: &[(&str, &str)],
    nonce: &Nonce,
) -> Vec<(String, String)> {
    let mut params = vec![
        ("oauth_consumer_key".to_string(), consumer.token.clone()),
        ("oauth_nonce".to_string(), nonce.nonce.clone()),
        ("oauth_signature_method".to_string(), "HMAC-SHA1".to_string()),
        ("oauth_timestamp".to_string(), nonce.timestamp.to_string()),
        ("oauth_version".to_string(), "1.0".to_string()),
    ];
    if let Some(token) = token {
        params.push(("oauth_token".to_string(), token.token.clone()));
    }
    params.extend(
        extra
            .iter()
            .map(|(name, value)| (name.to_string(), value.to_string())),
    );
    params
}

pub fn signature_base_string(
    method: &str,
    url: &str,
    oauth_params: &[(String, String)],
) -> Result<String, SchemeError> {
    let parsed = Url::parse(url).map_err(|err| SchemeError::UnexpectedResponse {
        url: url.to_string(),
        message: format!("invalid URL for OAuth signing: {err}"),
    })?;

    let mut pairs: Vec<(String, String)> = parsed
        .query_pairs()
        .map(|(name, value)| (encode(&name), encode(&value)))
        .chain(
            oauth_params
                .iter()
                .map(|(name, value)| (encode(name), encode(value))),
        )
        .collect();
    pairs.sort();
    let parameter_string = pairs
        .iter()
        .map(|(name, value)| format!("{name}={value}"))
        .collect::<Vec<_>>()
        .join("&");

    Ok(format!(
        "{}&{}&{}",
        method.to_ascii_uppercase(),
        encode(&normalized_url(&parsed)),
        encode(&parameter_string)
    ))
}

pub fn sign(base_string: &str, consumer_secret: &str, token_secret: Option<&str>) -> String {
    let key = format!(
        "{}&{}",
        encode(consumer_secret),
        encode(token_secret.unwrap_or_default())
    );
    let mut mac = HmacSha1::new_from_slice(key.as_bytes()).expect("HMAC accepts keys of any length");
    mac.update(base_string.as_bytes());
    STANDARD.encode(mac.finalize().into_bytes())
}

pub fn authorization_header(
    method: &str,
    url: &str,
    consumer: &TokenPair,
    token: Option<&TokenPair>,
    extra: &[(&str, &str)],
) -> Result<String, SchemeError> {
    authorization_header_with(method, url, consumer, token, extra, &Nonce::generate())
}

pub fn authorization_header_with(
    method: &str,
    url: &str,
    consumer: &TokenPair,
    token: Option<&TokenPair>,
    extra: &[(&str, &str)],
    nonce: &Nonce,
) -> Result<String, SchemeError> {
    let mut params = oauth_parameters(consumer, token, extra, nonce);
    let base = signature_base_string(method, url, &params)?;
    let signature = sign(
        &base,
        &consumer.secret,
        token.map(|token| token.secret.as_str()),
    );
    params.push(("oauth_signature".to_string(), signature));

    let fields = params
        .iter()
        .map(|(name, value)| format!("{}=\"{}\"", encode(name), encode(value)))
        .collect::<Vec<_>>()
        .join(", ");
    Ok(format!("OAuth {fields}"))
}
