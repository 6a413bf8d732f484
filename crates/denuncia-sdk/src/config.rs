//! Connection settings.
//!
//! Backend connection parameters come from exactly one source, picked in
//! this order:
//!
//! 1. the environment, if every `DENUNCIA_*` variable is present and non-empty;
//! 2. the `[backend]` table of a TOML config file, if every field is present;
//! 3. the built-in fallback set.
//!
//! Sources are never merged field by field: an incomplete source is skipped
//! as a whole. The winning set is validated once, at startup.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

pub const ENV_API_KEY: &str = "DENUNCIA_API_KEY";
pub const ENV_AUTH_DOMAIN: &str = "DENUNCIA_AUTH_DOMAIN";
pub const ENV_PROJECT_ID: &str = "DENUNCIA_PROJECT_ID";
pub const ENV_STORAGE_BUCKET: &str = "DENUNCIA_STORAGE_BUCKET";
pub const ENV_APP_ID: &str = "DENUNCIA_APP_ID";

/// Every environment variable of the backend set, in field order.
pub const ENV_VARS: [&str; 5] = [
    ENV_API_KEY,
    ENV_AUTH_DOMAIN,
    ENV_PROJECT_ID,
    ENV_STORAGE_BUCKET,
    ENV_APP_ID,
];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Named connection parameters of the managed backend.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendConfig {
    pub api_key: String,
    pub auth_domain: String,
    pub project_id: String,
    pub storage_bucket: String,
    pub app_id: String,
}

impl BackendConfig {
    /// The built-in set used when no complete source is available.
    pub fn fallback() -> Self {
        Self {
            api_key: "local-development-key".into(),
            auth_domain: "auth.denuncia.local".into(),
            project_id: "denuncia-local".into(),
            storage_bucket: "denuncia-local.storage.local".into(),
            app_id: "1:000000000000:web:denuncia-local".into(),
        }
    }

    /// Build the set from a variable lookup; `None` unless every variable is
    /// present and non-empty.
    pub fn from_lookup<F>(lookup: F) -> Option<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        Some(Self {
            api_key: get(ENV_API_KEY)?,
            auth_domain: get(ENV_AUTH_DOMAIN)?,
            project_id: get(ENV_PROJECT_ID)?,
            storage_bucket: get(ENV_STORAGE_BUCKET)?,
            app_id: get(ENV_APP_ID)?,
        })
    }

    /// Check every field; returns the first problem found.
    pub fn validate(&self) -> ConfigResult<()> {
        let fields: [(&'static str, &str); 5] = [
            ("api_key", &self.api_key),
            ("auth_domain", &self.auth_domain),
            ("project_id", &self.project_id),
            ("storage_bucket", &self.storage_bucket),
            ("app_id", &self.app_id),
        ];
        for (field, value) in fields {
            if value.trim().is_empty() {
                return Err(ConfigError::Invalid {
                    field,
                    reason: "must not be empty".into(),
                });
            }
            if value.chars().any(char::is_whitespace) {
                return Err(ConfigError::Invalid {
                    field,
                    reason: "must not contain whitespace".into(),
                });
            }
        }
        validate_host("auth_domain", &self.auth_domain)?;
        validate_host("storage_bucket", &self.storage_bucket)?;
        Ok(())
    }

    /// The api key with all but its first four characters masked.
    pub fn redacted_api_key(&self) -> String {
        let visible: String = self.api_key.chars().take(4).collect();
        format!("{visible}…")
    }
}

impl fmt::Debug for BackendConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendConfig")
            .field("api_key", &self.redacted_api_key())
            .field("auth_domain", &self.auth_domain)
            .field("project_id", &self.project_id)
            .field("storage_bucket", &self.storage_bucket)
            .field("app_id", &self.app_id)
            .finish()
    }
}

fn validate_host(field: &'static str, value: &str) -> ConfigResult<()> {
    let invalid = |reason: &str| ConfigError::Invalid {
        field,
        reason: reason.to_string(),
    };
    if value.contains("://") {
        return Err(invalid("expected a host name, not a URL"));
    }
    if !value.contains('.') {
        return Err(invalid("expected a dotted host name"));
    }
    if value
        .split('.')
        .any(|label| label.is_empty() || !label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-'))
    {
        return Err(invalid("malformed host label"));
    }
    Ok(())
}

/// How admin notes are appended to a report.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NoteAppendMode {
    /// Store-side atomic append; concurrent appends are all kept.
    #[default]
    Atomic,
    /// Read, append, write back with a version precondition; a stale read
    /// fails with a conflict instead of dropping a note.
    Optimistic,
    /// Read, append, write back unconditionally. Concurrent appends to the
    /// same report race and the last writer wins; callers must serialize
    /// appends per report themselves.
    ReadModifyWrite,
}

/// Tunables of the access layer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SdkConfig {
    /// Collection holding reports.
    pub collection: String,
    /// Bytes per resumable upload chunk.
    pub upload_chunk_size: usize,
    /// Resume attempts after transient upload interruptions.
    pub max_resume_attempts: u32,
    pub note_append_mode: NoteAppendMode,
}

impl Default for SdkConfig {
    fn default() -> Self {
        Self {
            collection: "reports".into(),
            upload_chunk_size: 256 * 1024,
            max_resume_attempts: 3,
            note_append_mode: NoteAppendMode::Atomic,
        }
    }
}

impl SdkConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        if self.collection.is_empty() || self.collection.contains('/') {
            return Err(ConfigError::Invalid {
                field: "collection",
                reason: "must be a single non-empty segment".into(),
            });
        }
        if self.upload_chunk_size == 0 {
            return Err(ConfigError::Invalid {
                field: "upload_chunk_size",
                reason: "must be positive".into(),
            });
        }
        Ok(())
    }
}

/// `[backend]` table as written in a config file; any field may be missing.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialBackendConfig {
    pub api_key: Option<String>,
    pub auth_domain: Option<String>,
    pub project_id: Option<String>,
    pub storage_bucket: Option<String>,
    pub app_id: Option<String>,
}

impl PartialBackendConfig {
    /// The full set, or `None` if any field is missing or empty.
    pub fn complete(&self) -> Option<BackendConfig> {
        let get = |v: &Option<String>| v.clone().filter(|s| !s.trim().is_empty());
        Some(BackendConfig {
            api_key: get(&self.api_key)?,
            auth_domain: get(&self.auth_domain)?,
            project_id: get(&self.project_id)?,
            storage_bucket: get(&self.storage_bucket)?,
            app_id: get(&self.app_id)?,
        })
    }
}

/// On-disk configuration file.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    pub backend: PartialBackendConfig,
    pub sdk: SdkConfig,
}

impl ConfigFile {
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text).map_err(|message| ConfigError::Parse {
            path: path.to_path_buf(),
            message,
        })
    }

    pub fn parse(text: &str) -> Result<Self, String> {
        toml::from_str(text).map_err(|e| e.to_string())
    }
}

/// Which source supplied the backend set.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase", tag = "kind", content = "path")]
pub enum ConfigSource {
    Environment,
    File(PathBuf),
    Fallback,
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Environment => f.write_str("environment"),
            Self::File(path) => write!(f, "file {}", path.display()),
            Self::Fallback => f.write_str("built-in fallback"),
        }
    }
}

/// Fully resolved and validated settings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Settings {
    pub backend: BackendConfig,
    pub source: ConfigSource,
    pub sdk: SdkConfig,
}

impl Settings {
    /// Resolve from the process environment and an optional config file.
    pub fn from_env(config_path: Option<&Path>) -> ConfigResult<Self> {
        Self::resolve(|name| std::env::var(name).ok(), config_path)
    }

    /// Resolve with an explicit variable lookup.
    pub fn resolve<F>(lookup: F, config_path: Option<&Path>) -> ConfigResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let file = config_path.map(ConfigFile::load).transpose()?;
        let sdk = file.as_ref().map(|f| f.sdk.clone()).unwrap_or_default();

        let present = ENV_VARS.iter().filter(|name| lookup(**name).is_some()).count();
        let (backend, source) = if let Some(env) = BackendConfig::from_lookup(&lookup) {
            (env, ConfigSource::Environment)
        } else {
            if present > 0 {
                warn!(present, required = ENV_VARS.len(), "incomplete environment backend config ignored");
            }
            match (config_path, file.as_ref().and_then(|f| f.backend.complete())) {
                (Some(path), Some(backend)) => (backend, ConfigSource::File(path.to_path_buf())),
                _ => (BackendConfig::fallback(), ConfigSource::Fallback),
            }
        };

        let settings = Self {
            backend,
            source,
            sdk,
        };
        settings.validate()?;
        info!(source = %settings.source, project = %settings.backend.project_id, "configuration resolved");
        Ok(settings)
    }

    /// Fallback backend with default tunables.
    pub fn fallback() -> Self {
        Self {
            backend: BackendConfig::fallback(),
            source: ConfigSource::Fallback,
            sdk: SdkConfig::default(),
        }
    }

    pub fn validate(&self) -> ConfigResult<()> {
        self.backend.validate()?;
        self.sdk.validate()
    }
}
