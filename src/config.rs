//! Engine options and the TOML configuration file read by the CLI.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::query::errors::{QueryError, Result};
use crate::store::StoreOptions;

/// Environment variable overriding the config file location.
pub const CONFIG_ENV: &str = "RUNQUERY_CONFIG";

/// Options controlling one [`Executor`](crate::query::Executor).
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct QueryOptions {
    /// Base directory for relative artifact references.
    pub artifact_root: Option<PathBuf>,
    /// Number of artifact loading threads. `1` loads sequentially.
    pub artifact_workers: usize,
    /// Busy timeout for store calls, in milliseconds.
    pub busy_timeout_ms: u64,
    /// Open the store read-only.
    pub read_only: bool,
    /// Remove runs rejected by a deferred filter instead of keeping them
    /// with empty deferred values.
    pub strict_filters: bool,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            artifact_root: None,
            artifact_workers: 1,
            busy_timeout_ms: 5_000,
            read_only: true,
            strict_filters: false,
        }
    }
}

impl QueryOptions {
    /// Defaults with `workers` artifact loading threads.
    pub fn parallel(workers: usize) -> Self {
        Self {
            artifact_workers: workers.max(1),
            ..Self::default()
        }
    }

    /// Sets the base directory for relative artifact paths.
    pub fn with_artifact_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.artifact_root = Some(root.into());
        self
    }

    /// Enables strict deferred filtering.
    pub fn with_strict_filters(mut self, strict: bool) -> Self {
        self.strict_filters = strict;
        self
    }

    /// Store connection options derived from these options.
    pub fn store_options(&self) -> StoreOptions {
        StoreOptions {
            busy_timeout_ms: self.busy_timeout_ms,
            read_only: self.read_only,
        }
    }

    /// Resolves an artifact reference against [`QueryOptions::artifact_root`].
    pub fn resolve_artifact(&self, reference: &str) -> PathBuf {
        let path = Path::new(reference);
        match &self.artifact_root {
            Some(root) if path.is_relative() => root.join(path),
            _ => path.to_path_buf(),
        }
    }
}

/// Contents of `cli.toml`.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    /// `[database]` section.
    #[serde(default)]
    pub database: DatabaseSection,
    /// `[artifacts]` section.
    #[serde(default)]
    pub artifacts: ArtifactSection,
}

/// `[database]` section.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct DatabaseSection {
    /// Database used when the command line names none.
    #[serde(rename = "default", default)]
    pub default_path: Option<PathBuf>,
    /// Busy timeout override, in milliseconds.
    #[serde(default)]
    pub busy_timeout_ms: Option<u64>,
}

/// `[artifacts]` section.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ArtifactSection {
    /// Base directory for relative artifact references.
    #[serde(default)]
    pub root: Option<PathBuf>,
    /// Loader thread count.
    #[serde(default)]
    pub workers: Option<usize>,
    /// Strict deferred filtering.
    #[serde(default)]
    pub strict_filters: Option<bool>,
}

/// Loaded configuration file plus where it came from.
#[derive(Clone, Debug, Default)]
pub struct CliConfig {
    path: Option<PathBuf>,
    data: ConfigFile,
}

impl CliConfig {
    /// Loads `explicit`, or the default location. A missing file is empty config.
    pub fn load(explicit: Option<PathBuf>) -> Result<Self> {
        let path = explicit.or_else(default_config_path);
        let data = match path.as_ref() {
            Some(path) if path.exists() => read_file(path)?,
            _ => ConfigFile::default(),
        };
        Ok(Self { path, data })
    }

    /// Parses config text directly.
    pub fn from_toml(text: &str) -> Result<Self> {
        let data = toml::from_str(text)
            .map_err(|err| QueryError::Config(format!("failed to parse config: {err}")))?;
        Ok(Self { path: None, data })
    }

    /// Path the config was read from (or would be).
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Parsed file contents.
    pub fn data(&self) -> &ConfigFile {
        &self.data
    }

    /// Default database path.
    pub fn default_db_path(&self) -> Option<&PathBuf> {
        self.data.database.default_path.as_ref()
    }

    /// Engine options with file values applied over the defaults.
    pub fn query_options(&self) -> QueryOptions {
        let mut options = QueryOptions::default();
        if let Some(root) = &self.data.artifacts.root {
            options.artifact_root = Some(root.clone());
        }
        if let Some(workers) = self.data.artifacts.workers {
            options.artifact_workers = workers.max(1);
        }
        if let Some(strict) = self.data.artifacts.strict_filters {
            options.strict_filters = strict;
        }
        if let Some(timeout) = self.data.database.busy_timeout_ms {
            options.busy_timeout_ms = timeout;
        }
        options
    }

    /// Renders the effective file contents as TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(&self.data)
            .map_err(|err| QueryError::Config(format!("failed to serialize config: {err}")))
    }
}

fn read_file(path: &Path) -> Result<ConfigFile> {
    let contents = fs::read_to_string(path).map_err(|err| {
        QueryError::Config(format!("failed to read {}: {err}", path.display()))
    })?;
    toml::from_str(&contents).map_err(|err| {
        QueryError::Config(format!("failed to parse {}: {err}", path.display()))
    })
}

/// `<config dir>/runquery/cli.toml`, if the platform has a config dir.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|base| base.join("runquery").join("cli.toml"))
}
