use crate::descriptor::ResourceKind;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("failed to read desired state file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse desired state: {0}")]
    ParseToml(#[from] toml::de::Error),
    #[error("invalid {kind} '{name}': {reason}")]
    Invalid {
        kind: ResourceKind,
        name: String,
        reason: String,
    },
    #[error("unknown resource kind '{0}'")]
    UnknownKind(String),
    #[error("duplicate resource key '{0}'")]
    DuplicateKey(String),
    #[error("invalid import path '{path}': {reason}")]
    ImportPath { path: String, reason: String },
    #[error("invalid filter: {0}")]
    Filter(String),
    #[error("invalid name regex: {0}")]
    Regex(#[from] regex::Error),
    #[error("malformed {set} record: {reason}")]
    ChildRecord { set: String, reason: String },
}

impl SchemaError {
    pub fn invalid(kind: ResourceKind, name: &str, reason: impl Into<String>) -> Self {
        SchemaError::Invalid {
            kind,
            name: name.to_owned(),
            reason: reason.into(),
        }
    }
}
