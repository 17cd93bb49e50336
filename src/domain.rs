use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Host {
    Pubmlst,
    Pasteur,
    Enterobase,
    Ridom,
}

impl Host {
    pub fn as_str(&self) -> &'static str {
        match self {
            Host::Pubmlst => "pubmlst",
            Host::Pasteur => "pasteur",
            Host::Enterobase => "enterobase",
            Host::Ridom => "ridom",
        }
    }

    pub fn is_bigsdb(&self) -> bool {
        matches!(self, Host::Pubmlst | Host::Pasteur)
    }
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownHost(pub String);

impl FromStr for Host {
    type Err = UnknownHost;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "pubmlst" => Ok(Host::Pubmlst),
            "pasteur" => Ok(Host::Pasteur),
            "enterobase" => Ok(Host::Enterobase),
            "ridom" => Ok(Host::Ridom),
            other => Err(UnknownHost(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemeMetadata {
    pub shortname: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_path: Option<String>,
    #[serde(
        default,
        deserialize_with = "scheme_id_from_json",
        serialize_with = "scheme_id_to_json",
        skip_serializing_if = "Option::is_none"
    )]
    pub scheme_id: Option<SchemeId>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub scheme_type: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl SchemeMetadata {
    pub fn parsed_host(&self) -> Option<Result<Host, UnknownHost>> {
        self.host.as_deref().map(str::parse)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemeId {
    Number(u64),
    Text(String),
}

impl fmt::Display for SchemeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemeId::Number(value) => write!(f, "{value}"),
            SchemeId::Text(value) => write!(f, "{value}"),
        }
    }
}

fn scheme_id_from_json<'de, D>(deserializer: D) -> Result<Option<SchemeId>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u64),
        Text(String),
    }

    Ok(Option::<Raw>::deserialize(deserializer)?.map(|raw| match raw {
        Raw::Number(value) => SchemeId::Number(value),
        Raw::Text(value) => SchemeId::Text(value),
    }))
}

fn scheme_id_to_json<S>(value: &Option<SchemeId>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match value {
        Some(SchemeId::Number(number)) => serializer.serialize_u64(*number),
        Some(SchemeId::Text(text)) => serializer.serialize_str(text),
        None => serializer.serialize_none(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    #[serde(rename = "TOKEN")]
    pub token: String,
    #[serde(rename = "TOKEN SECRET")]
    pub secret: String,
}

impl TokenPair {
    pub fn new(token: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            secret: secret.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KeyKind {
    Consumer,
    User,
    Request,
    Access,
    Session { database: String },
}

impl KeyKind {
    pub fn session(database: &str) -> Self {
        KeyKind::Session {
            database: database.to_string(),
        }
    }

    pub fn is_protected(&self) -> bool {
        matches!(self, KeyKind::Consumer | KeyKind::User)
    }

    pub fn cache_key(&self) -> String {
        match self {
            KeyKind::Consumer => "consumer".to_string(),
            KeyKind::User => "user".to_string(),
            KeyKind::Request => "request".to_string(),
            KeyKind::Access => "access".to_string(),
            KeyKind::Session { database } => format!("session:{database}"),
        }
    }
}

impl fmt::Display for KeyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.cache_key())
    }
}
