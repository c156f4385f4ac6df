//! Configuration consumed by the multi-sink alert forwarder. Only the two
//! credential sections are owned here; every other key in the file is carried
//! through untouched.

use crate::types::{CredentialRecord, CredentialSnapshot, ForwardingCredential, TenantId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("could not parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("could not replace {path:?}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: tempfile::PersistError,
    },
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MultiSinkConfig {
    #[serde(default)]
    pub cred_map: BTreeMap<TenantId, ForwardingCredential>,
    #[serde(flatten)]
    pub other: serde_yaml::Mapping,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ForwarderConfig {
    #[serde(default)]
    pub kentik_creds: Vec<CredentialRecord>,
    #[serde(default)]
    pub new_relic_multi_sink: MultiSinkConfig,
    #[serde(flatten)]
    pub other: serde_yaml::Mapping,
}

impl ForwarderConfig {
    /// Returns a copy with both credential sections replaced by `snapshot`.
    /// Nothing from the previous credentials is kept.
    pub fn with_credentials(&self, snapshot: CredentialSnapshot) -> ForwarderConfig {
        let mut next = self.clone();
        next.kentik_creds = snapshot.kentik_creds;
        next.new_relic_multi_sink.cred_map = snapshot.cred_map;
        next
    }

    pub fn from_yaml(s: &str) -> Result<Self, ConfigError> {
        // An empty document means "all defaults".
        if s.trim().is_empty() {
            return Ok(ForwarderConfig::default());
        }
        Ok(serde_yaml::from_str(s)?)
    }

    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }
}

pub trait ConfigStore: Send + Sync {
    fn load(&self) -> Result<ForwarderConfig, ConfigError>;
    fn store(&self, config: &ForwarderConfig) -> Result<(), ConfigError>;
}

pub struct FilesystemConfigStore {
    path: PathBuf,
}

impl FilesystemConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FilesystemConfigStore { path: path.into() }
    }

    fn io_error(&self, source: io::Error) -> ConfigError {
        ConfigError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl ConfigStore for FilesystemConfigStore {
    fn load(&self) -> Result<ForwarderConfig, ConfigError> {
        let contents = fs::read_to_string(&self.path).map_err(|e| self.io_error(e))?;
        ForwarderConfig::from_yaml(&contents)
    }

    /// Writes to a temporary file next to the target and renames it over the
    /// target, so readers never see a partially written file.
    fn store(&self, config: &ForwarderConfig) -> Result<(), ConfigError> {
        let yaml = config.to_yaml()?;

        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| self.io_error(e))?;
        tmp.write_all(yaml.as_bytes())
            .and_then(|_| tmp.as_file().sync_all())
            .map_err(|e| self.io_error(e))?;
        tmp.persist(&self.path)
            .map_err(|source| ConfigError::Persist {
                path: self.path.clone(),
                source,
            })?;

        info!(
            path = ?self.path,
            bytes = yaml.len(),
            "Stored forwarder config"
        );

        Ok(())
    }
}
