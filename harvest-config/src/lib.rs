//! Loader for `harvest.yaml` with environment overlays.
//!
//! Attached files and inline YAML are merged in the order they were added and
//! `HARVEST__`-prefixed environment variables are applied last. After
//! merging, `${VAR}` placeholders in string values are expanded from the
//! process environment. `HARVEST__RATE_LIMIT__WINDOW_SECS=30` sets
//! `rate_limit.window_secs`; `HARVEST__INGEST__SUBJECTS=a,b` sets a list.
use config::{Config, ConfigError, Environment, File};
use harvest_common::{LogConfig, LogFormat};
use serde::Deserialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use thiserror::Error;

const MAXIMUM_ENV_EXPANSION_DEPTH: usize = 8;

/// Timeline categories the ingest loop knows how to fetch.
pub const KNOWN_CATEGORIES: [&str; 4] = ["Tweets", "Replies", "Media", "Likes"];

#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error(transparent)]
    Load(#[from] ConfigError),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct HarvestConfig {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub credentials: CredentialsSection,
    #[serde(default)]
    pub store: StoreSection,
    #[serde(default)]
    pub rate_limit: RateLimitSection,
    #[serde(default)]
    pub ingest: IngestSection,
    #[serde(default)]
    pub twitter: TwitterSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CredentialsSection {
    #[serde(default = "default_cookie_file")]
    pub cookie_file: PathBuf,
}

impl Default for CredentialsSection {
    fn default() -> Self {
        Self {
            cookie_file: default_cookie_file(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreSection {
    #[serde(default = "default_database_url")]
    pub database_url: String,
    #[serde(default = "default_collection")]
    pub collection: String,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            database_url: default_database_url(),
            collection: default_collection(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitSection {
    #[serde(default = "default_requests_per_window")]
    pub requests_per_window: usize,
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
}

impl Default for RateLimitSection {
    fn default() -> Self {
        Self {
            requests_per_window: default_requests_per_window(),
            window_secs: default_window_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct IngestSection {
    #[serde(default)]
    pub subjects: Vec<String>,
    #[serde(default = "default_categories")]
    pub categories: Vec<String>,
    #[serde(default = "default_max_items")]
    pub max_items_per_category: usize,
    #[serde(default = "default_page_size_cap")]
    pub page_size_cap: usize,
}

impl Default for IngestSection {
    fn default() -> Self {
        Self {
            subjects: Vec::new(),
            categories: default_categories(),
            max_items_per_category: default_max_items(),
            page_size_cap: default_page_size_cap(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TwitterSection {
    #[serde(default = "default_twitter_base_url")]
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub retries: usize,
}

impl Default for TwitterSection {
    fn default() -> Self {
        Self {
            base_url: default_twitter_base_url(),
            timeout_secs: default_timeout_secs(),
            retries: 0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingSection {
    #[serde(default)]
    pub format: LogFormat,
    #[serde(default = "default_true")]
    pub emit_stderr: bool,
    #[serde(default)]
    pub dir: Option<PathBuf>,
    #[serde(default = "default_filter")]
    pub filter: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            format: LogFormat::default(),
            emit_stderr: true,
            dir: None,
            filter: default_filter(),
        }
    }
}

impl LoggingSection {
    pub fn to_log_config(&self) -> LogConfig {
        LogConfig {
            log_dir: self.dir.clone(),
            emit_stderr: self.emit_stderr,
            format: self.format,
            default_filter: self.filter.clone(),
            ..LogConfig::default()
        }
    }
}

fn default_cookie_file() -> PathBuf {
    PathBuf::from("cookies.json")
}
fn default_database_url() -> String {
    "sqlite://harvest.db".into()
}
fn default_collection() -> String {
    "tweets".into()
}
fn default_requests_per_window() -> usize {
    300
}
fn default_window_secs() -> u64 {
    60
}
fn default_categories() -> Vec<String> {
    KNOWN_CATEGORIES.iter().map(|c| c.to_string()).collect()
}
fn default_max_items() -> usize {
    100
}
fn default_page_size_cap() -> usize {
    20
}
fn default_twitter_base_url() -> String {
    "https://x.com/i/api/".into()
}
fn default_timeout_secs() -> u64 {
    15
}
fn default_true() -> bool {
    true
}
fn default_filter() -> String {
    "info".into()
}

impl HarvestConfig {
    /// Replace `ingest.subjects`, trimming surrounding whitespace from each name.
    pub fn set_subjects<I, S>(&mut self, subjects: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.ingest.subjects = subjects
            .into_iter()
            .map(|s| s.as_ref().trim().to_string())
            .collect();
    }

    /// Reject settings the ingest loop cannot run with.
    pub fn validate(&self) -> Result<(), ConfigLoadError> {
        let invalid = |msg: &str| Err(ConfigLoadError::Invalid(msg.to_string()));
        if self.rate_limit.requests_per_window == 0 {
            return invalid("rate_limit.requests_per_window must be at least 1");
        }
        if self.rate_limit.window_secs == 0 {
            return invalid("rate_limit.window_secs must be at least 1");
        }
        if self.ingest.max_items_per_category == 0 {
            return invalid("ingest.max_items_per_category must be at least 1");
        }
        if self.ingest.page_size_cap == 0 {
            return invalid("ingest.page_size_cap must be at least 1");
        }
        if self.ingest.subjects.is_empty() {
            return invalid("ingest.subjects must name at least one account");
        }
        if self.ingest.subjects.iter().any(|s| s.trim().is_empty()) {
            return invalid("ingest.subjects must not contain blank names");
        }
        if self.ingest.categories.is_empty() {
            return invalid("ingest.categories must not be empty");
        }
        if let Some(unknown) = self
            .ingest
            .categories
            .iter()
            .find(|c| !KNOWN_CATEGORIES.iter().any(|k| k.eq_ignore_ascii_case(c.trim())))
        {
            return Err(ConfigLoadError::Invalid(format!(
                "unknown category `{unknown}` (expected one of {})",
                KNOWN_CATEGORIES.join(", ")
            )));
        }
        if self.store.collection.trim().is_empty() {
            return invalid("store.collection must not be empty");
        }
        Ok(())
    }
}

fn expand_env_in_value(v: &mut Value) {
    match v {
        Value::String(s) => {
            if s.contains('$') {
                let mut cur = std::mem::take(s);
                for _ in 0..MAXIMUM_ENV_EXPANSION_DEPTH {
                    let expanded = match shellexpand::env(&cur) {
                        Ok(cow) => cow.into_owned(),
                        Err(_) => cur.clone(),
                    };
                    if expanded == cur {
                        break;
                    }
                    cur = expanded;
                }
                *s = cur;
            }
        }
        Value::Array(arr) => arr.iter_mut().for_each(expand_env_in_value),
        Value::Object(obj) => obj.values_mut().for_each(expand_env_in_value),
        _ => {}
    }
}

/// Builder hiding the `config` crate wiring (YAML + env overrides).
pub struct HarvestConfigLoader {
    builder: config::ConfigBuilder<config::builder::DefaultState>,
}

impl Default for HarvestConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl HarvestConfigLoader {
    /// Start with no files; `HARVEST__` environment overrides apply at load.
    ///
    /// ```
    /// use harvest_config::HarvestConfigLoader;
    ///
    /// let config = HarvestConfigLoader::new()
    ///     .with_yaml_str("ingest:\n  subjects: [DCI_Kenya]")
    ///     .load()
    ///     .expect("valid config");
    ///
    /// assert_eq!(config.ingest.subjects, ["DCI_Kenya"]);
    /// assert_eq!(config.ingest.page_size_cap, 20);
    /// assert_eq!(config.rate_limit.requests_per_window, 300);
    /// ```
    pub fn new() -> Self {
        Self {
            builder: Config::builder(),
        }
    }

    /// Attach a required YAML/TOML/JSON file; the format follows the suffix.
    pub fn with_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.builder = self
            .builder
            .add_source(File::from(path.as_ref()).required(true));
        self
    }

    /// Attach a file that may be absent.
    pub fn with_optional_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.builder = self
            .builder
            .add_source(File::from(path.as_ref()).required(false));
        self
    }

    pub fn with_yaml_str(mut self, yaml: &str) -> Self {
        self.builder = self
            .builder
            .add_source(File::from_str(yaml, config::FileFormat::Yaml));
        self
    }

    /// Merge every source, expand `${VAR}` placeholders and deserialize.
    ///
    /// ```
    /// use harvest_config::HarvestConfigLoader;
    ///
    /// unsafe { std::env::set_var("HARVEST_DOC_DB", "sqlite://from-env.db"); }
    ///
    /// let config = HarvestConfigLoader::new()
    ///     .with_yaml_str(r#"
    /// store:
    ///   database_url: "${HARVEST_DOC_DB}"
    /// ingest:
    ///   subjects: ["DCI_Kenya"]
    /// "#)
    ///     .load()
    ///     .expect("valid configuration");
    ///
    /// assert_eq!(config.store.database_url, "sqlite://from-env.db");
    /// assert_eq!(config.store.collection, "tweets");
    ///
    /// unsafe { std::env::remove_var("HARVEST_DOC_DB"); }
    /// ```
    pub fn load(self) -> Result<HarvestConfig, ConfigLoadError> {
        let env = Environment::with_prefix("HARVEST")
            .separator("__")
            .try_parsing(true)
            .list_separator(",")
            .with_list_parse_key("ingest.subjects")
            .with_list_parse_key("ingest.categories");
        let cfg = self.builder.add_source(env).build()?;

        let mut v: Value = cfg.try_deserialize()?;
        expand_env_in_value(&mut v);

        let mut typed: HarvestConfig =
            serde_json::from_value(v).map_err(|e| ConfigError::Message(e.to_string()))?;
        let subjects = std::mem::take(&mut typed.ingest.subjects);
        typed.set_subjects(subjects);
        Ok(typed)
    }

    /// [`Self::load`] followed by [`HarvestConfig::validate`].
    pub fn load_validated(self) -> Result<HarvestConfig, ConfigLoadError> {
        let cfg = self.load()?;
        cfg.validate()?;
        Ok(cfg)
    }
}
