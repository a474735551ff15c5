//! Provider configuration.
//!
//! Read from the nearest `.config/chdecl.styx` at or above a directory, or
//! from `TF_CLICKHOUSE_*` / `TF_VAR_*` environment variables when there is no
//! such file. Connection fields are only carried for whoever opens the
//! connection.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chdecl_sql::{CreateMode, SynthOptions};
use facet::Facet;
use thiserror::Error;

use crate::validate::AllowList;

const CONFIG_FILE: &str = ".config/chdecl.styx";

#[derive(Clone, Default, PartialEq, Eq, Facet)]
pub struct Config {
    #[facet(default)]
    pub host: Option<String>,

    #[facet(default)]
    pub port: Option<u16>,

    #[facet(default)]
    pub username: Option<String>,

    #[facet(default)]
    pub password: Option<String>,

    /// Use TLS.
    #[facet(default)]
    pub secure: bool,

    /// `ON CLUSTER` target for resources that declare none.
    #[facet(default)]
    pub default_cluster: Option<String>,

    /// Emit `CREATE ... IF NOT EXISTS`. Wins over `create_or_replace`.
    #[facet(default)]
    pub create_if_not_exists: bool,

    /// Emit `CREATE OR REPLACE` where the object kind supports it.
    #[facet(default)]
    pub create_or_replace: bool,

    /// Database privileges accepted on top of the built-in list.
    #[facet(default)]
    pub extra_privileges: Vec<String>,

    /// Global-only privileges accepted on top of the built-in list.
    #[facet(default)]
    pub extra_global_privileges: Vec<String>,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("secure", &self.secure)
            .field("default_cluster", &self.default_cluster)
            .field("create_if_not_exists", &self.create_if_not_exists)
            .field("create_or_replace", &self.create_or_replace)
            .field("extra_privileges", &self.extra_privileges)
            .field("extra_global_privileges", &self.extra_global_privileges)
            .finish()
    }
}

impl Config {
    /// Configuration for work rooted at `start`.
    pub fn discover(start: &Path) -> Result<Self, ConfigError> {
        match find_config_file(start) {
            Some(path) => {
                let config = Self::from_file(&path)?;
                tracing::debug!(path = %path.display(), "loaded configuration");
                Ok(config)
            }
            None => {
                tracing::debug!(start = %start.display(), "no {CONFIG_FILE} found, using environment");
                Self::from_env()
            }
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let source = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Self::from_styx(&source)
    }

    /// Parse a styx document.
    pub fn from_styx(source: &str) -> Result<Self, ConfigError> {
        facet_styx::from_str(source).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Read the process environment, loading `.env` first if present.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| dotenvy::var(key).ok())
    }

    /// Build from any key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.is_empty());
        let flag = |key: &str| match non_empty(key) {
            Some(v) => parse_flag(key, &v),
            None => Ok(false),
        };

        let port = match non_empty("TF_CLICKHOUSE_PORT") {
            Some(v) => Some(v.parse::<u16>().map_err(|_| ConfigError::Invalid {
                key: "TF_CLICKHOUSE_PORT".to_string(),
                value: v.clone(),
            })?),
            None => None,
        };

        Ok(Self {
            host: non_empty("TF_CLICKHOUSE_HOST"),
            port,
            username: non_empty("TF_CLICKHOUSE_USERNAME"),
            password: non_empty("TF_CLICKHOUSE_PASSWORD"),
            secure: flag("TF_CLICKHOUSE_SECURE")?,
            default_cluster: non_empty("TF_CLICKHOUSE_DEFAULT_CLUSTER"),
            create_if_not_exists: flag("TF_VAR_CREATE_IF_NOT_EXISTS")?,
            create_or_replace: flag("TF_VAR_CREATE_OR_REPLACE")?,
            ..Default::default()
        })
    }

    pub fn create_mode(&self) -> CreateMode {
        CreateMode::from_flags(self.create_if_not_exists, self.create_or_replace)
    }

    pub fn synth_options(&self) -> SynthOptions {
        SynthOptions {
            create_mode: self.create_mode(),
            default_cluster: self.default_cluster.clone().filter(|c| !c.is_empty()),
        }
    }

    /// The built-in allow-list, extended with the configured privileges.
    pub fn allow_list(&self) -> Arc<AllowList> {
        let standard = AllowList::standard();
        if self.extra_privileges.is_empty() && self.extra_global_privileges.is_empty() {
            return Arc::clone(standard);
        }
        Arc::new(standard.extended(
            self.extra_privileges.iter().map(String::as_str),
            self.extra_global_privileges.iter().map(String::as_str),
        ))
    }
}

fn parse_flag(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        _ => Err(ConfigError::Invalid {
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}

fn find_config_file(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .map(|dir| dir.join(CONFIG_FILE))
        .find(|path| path.is_file())
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("cannot read {}: {message}", .path.display())]
    Io { path: PathBuf, message: String },

    #[error("invalid .config/chdecl.styx: {0}")]
    Parse(String),

    /// An environment variable holds a value of the wrong shape.
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: String, value: String },
}
