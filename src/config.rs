//! Configuration file handling for budgetboard.
//!
//! The configuration file is stored at `$BUDGETBOARD_HOME/config.json` and contains the ledger
//! URL, the time zone budgets are reported in, the path of the ledger access token and a few
//! tuning knobs for the cache.

use crate::cache::{CacheOptions, DEFAULT_QUEUE_DEPTH, DEFAULT_WORKERS};
use crate::db::Db;
use crate::report::DEFAULT_TAX_CATEGORY;
use crate::{utils, Result};
use anyhow::{bail, Context};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

const APP_NAME: &str = "budgetboard";
const CONFIG_VERSION: u8 = 1;
const SECRETS: &str = ".secrets";
const TOKEN_FILE: &str = "upstream_token";
const CONFIG_JSON: &str = "config.json";
const BUDGETBOARD_SQLITE: &str = "budgetboard.sqlite";
const REQUEST_TIMEOUT_SECS: u64 = 30;
const RECONCILE_INTERVAL_SECS: u64 = 60;

/// The `Config` object represents the configuration of the app. You instantiate it by providing
/// the path to `$BUDGETBOARD_HOME` and from there it loads `$BUDGETBOARD_HOME/config.json`. It
/// provides paths to other items that are either configurable or are expected in a certain
/// location within the home directory.
#[derive(Debug, Clone)]
pub struct Config {
    root: PathBuf,
    secrets: PathBuf,
    config_path: PathBuf,
    config_file: ConfigFile,
    db: Db,
    sqlite_path: PathBuf,
    upstream_url: Url,
    time_zone: Tz,
}

impl Config {
    /// Creates the data directory, its subdirectories and:
    /// - Creates an initial `config.json` file using `upstream_url` and `time_zone` along with
    ///   default settings
    /// - Moves `token_file`, if given, into its default location in the data dir
    /// - Creates the SQLite database
    ///
    /// # Arguments
    /// - `dir` - The directory that will be the root of data directory, e.g. `$HOME/budgetboard`
    /// - `upstream_url` - The base URL of the Firefly-III server, e.g. `https://firefly.local/`
    /// - `token_file` - A file holding a Firefly-III personal access token.
    /// - `time_zone` - An IANA time zone name such as `America/Toronto`.
    ///
    /// # Errors
    /// - Returns an error if any file operations fail or if the URL or time zone are invalid.
    pub async fn create(
        dir: impl Into<PathBuf>,
        upstream_url: &str,
        token_file: Option<&Path>,
        time_zone: &str,
    ) -> Result<Self> {
        let upstream_url = parse_upstream_url(upstream_url)?;
        let tz = parse_time_zone(time_zone)?;

        let maybe_relative = dir.into();
        utils::make_dir(&maybe_relative)
            .await
            .context("Unable to create the budgetboard home directory")?;
        let root = utils::canonicalize(&maybe_relative).await?;

        let secrets_dir = root.join(SECRETS);
        utils::make_dir(&secrets_dir).await?;
        if let Some(token_file) = token_file {
            utils::rename(token_file, secrets_dir.join(TOKEN_FILE)).await?;
        }

        let config_path = root.join(CONFIG_JSON);
        let config_file = ConfigFile {
            upstream_url: upstream_url.to_string(),
            time_zone: time_zone.to_string(),
            ..ConfigFile::default()
        };
        config_file.save(&config_path).await?;

        let sqlite_path = root.join(BUDGETBOARD_SQLITE);
        let db = Db::init(&sqlite_path)
            .await
            .context("Unable to create SQLite DB")?;

        Ok(Self {
            root,
            secrets: secrets_dir,
            config_path,
            config_file,
            db,
            sqlite_path,
            upstream_url,
            time_zone: tz,
        })
    }

    /// This will
    /// - validate that the home directory exists and that the config file exists
    /// - load the config file
    /// - validate that the secrets directory exists
    /// - open the SQLite database, migrating it if needed
    pub async fn load(home: impl Into<PathBuf>) -> Result<Self> {
        let maybe_relative = home.into();
        let root = utils::canonicalize(&maybe_relative)
            .await
            .context("The budgetboard home directory is missing")?;

        let config_path = root.join(CONFIG_JSON);
        if !config_path.is_file() {
            bail!("The config file is missing '{}'", config_path.display())
        }
        let config_file = ConfigFile::load(&config_path).await?;
        let upstream_url = parse_upstream_url(&config_file.upstream_url)?;
        let time_zone = parse_time_zone(&config_file.time_zone)?;

        let secrets = root.join(SECRETS);
        if !secrets.is_dir() {
            bail!("The secrets directory is missing '{}'", secrets.display())
        }

        let sqlite_path = root.join(BUDGETBOARD_SQLITE);
        let db = Db::load(&sqlite_path)
            .await
            .context("Unable to load SQLite DB")?;

        Ok(Self {
            root,
            secrets,
            config_path,
            config_file,
            db,
            sqlite_path,
            upstream_url,
            time_zone,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub(crate) fn db(&self) -> &Db {
        &self.db
    }

    pub fn secrets(&self) -> &Path {
        &self.secrets
    }

    pub fn sqlite_path(&self) -> &Path {
        &self.sqlite_path
    }

    pub fn upstream_url(&self) -> &Url {
        &self.upstream_url
    }

    pub fn time_zone(&self) -> Tz {
        self.time_zone
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.config_file.request_timeout_secs)
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.config_file.reconcile_interval_secs.max(1))
    }

    /// The ledger category the big picture reports as taxes.
    pub fn tax_category(&self) -> &str {
        &self.config_file.tax_category
    }

    pub fn cache_options(&self) -> CacheOptions {
        CacheOptions {
            queue_depth: self.config_file.refresh_queue_depth,
            workers: self.config_file.refresh_workers,
        }
    }

    /// Returns the stored `token_path` if it is absolute, otherwise resolves the relative path.
    pub fn token_path(&self) -> PathBuf {
        let p = self.config_file.token_path();
        if p.is_absolute() {
            return p;
        }
        self.root.join(p)
    }
}

/// Represents the serialization and deserialization format of the configuration file.
///
/// Example configuration:
/// ```json
/// {
///   "app_name": "budgetboard",
///   "config_version": 1,
///   "upstream_url": "https://firefly.example.com/",
///   "time_zone": "America/Toronto",
///   "token_path": ".secrets/upstream_token",
///   "request_timeout_secs": 30,
///   "reconcile_interval_secs": 60,
///   "refresh_queue_depth": 256,
///   "refresh_workers": 4,
///   "tax_category": "taxes"
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
struct ConfigFile {
    /// Application name, should always be "budgetboard"
    app_name: String,

    /// Configuration file version
    config_version: u8,

    /// Base URL of the Firefly-III server
    upstream_url: String,

    /// IANA name of the time zone that budget months are computed in
    time_zone: String,

    /// Path to the access token file (optional, relative to config.json or absolute)
    /// Defaults to $BUDGETBOARD_HOME/.secrets/upstream_token if not specified
    #[serde(default, skip_serializing_if = "Option::is_none")]
    token_path: Option<PathBuf>,

    #[serde(default = "default_request_timeout_secs")]
    request_timeout_secs: u64,

    /// How often the MCP server checks the ledger for changes made elsewhere
    #[serde(default = "default_reconcile_interval_secs")]
    reconcile_interval_secs: u64,

    #[serde(default = "default_refresh_queue_depth")]
    refresh_queue_depth: usize,

    #[serde(default = "default_refresh_workers")]
    refresh_workers: usize,

    /// Name of the ledger category whose total is reported as taxes, matched without regard to
    /// case
    #[serde(default = "default_tax_category")]
    tax_category: String,
}

fn default_request_timeout_secs() -> u64 {
    REQUEST_TIMEOUT_SECS
}

fn default_reconcile_interval_secs() -> u64 {
    RECONCILE_INTERVAL_SECS
}

fn default_refresh_queue_depth() -> usize {
    DEFAULT_QUEUE_DEPTH
}

fn default_refresh_workers() -> usize {
    DEFAULT_WORKERS
}

fn default_tax_category() -> String {
    DEFAULT_TAX_CATEGORY.to_string()
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            app_name: APP_NAME.to_string(),
            config_version: CONFIG_VERSION,
            upstream_url: String::new(),
            time_zone: "UTC".to_string(),
            token_path: None,
            request_timeout_secs: REQUEST_TIMEOUT_SECS,
            reconcile_interval_secs: RECONCILE_INTERVAL_SECS,
            refresh_queue_depth: DEFAULT_QUEUE_DEPTH,
            refresh_workers: DEFAULT_WORKERS,
            tax_category: DEFAULT_TAX_CATEGORY.to_string(),
        }
    }
}

impl ConfigFile {
    /// Loads a ConfigFile asynchronously from the specified path.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let config: ConfigFile = utils::deserialize(path).await?;

        anyhow::ensure!(
            config.app_name == APP_NAME,
            "Invalid app_name in config file: expected '{}', got '{}'",
            APP_NAME,
            config.app_name
        );

        Ok(config)
    }

    /// Saves the ConfigFile to the specified path.
    pub async fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let p = path.as_ref();
        let data = serde_json::to_string_pretty(self).context("Unable to serialize config")?;
        utils::write(p, data)
            .await
            .context("Unable to write config file")
    }

    /// Gets the token path.
    ///
    /// If the path is relative, it should be interpreted as relative to the config.json file.
    /// If None, defaults to $BUDGETBOARD_HOME/.secrets/upstream_token
    pub fn token_path(&self) -> PathBuf {
        self.token_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(SECRETS).join(TOKEN_FILE))
    }
}

/// Parses the ledger base URL. A trailing slash is added so that API paths join beneath it.
fn parse_upstream_url(url: &str) -> Result<Url> {
    let mut url = Url::parse(url).with_context(|| format!("Invalid upstream URL '{url}'"))?;
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

fn parse_time_zone(name: &str) -> Result<Tz> {
    name.parse::<Tz>()
        .map_err(|e| anyhow::anyhow!("Invalid time zone '{name}': {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn test_config_create() {
        let dir = TempDir::new().unwrap();
        let home_dir = dir.path().join("budgetboard_home");
        let token_source = dir.path().join("token.txt");
        utils::write(&token_source, "secret-token").await.unwrap();

        let config = Config::create(
            &home_dir,
            "https://firefly.example.com/firefly",
            Some(token_source.as_path()),
            "America/Toronto",
        )
        .await
        .unwrap();

        assert_eq!(
            config.upstream_url().as_str(),
            "https://firefly.example.com/firefly/"
        );
        assert_eq!(config.time_zone(), chrono_tz::America::Toronto);
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
        assert_eq!(config.cache_options(), CacheOptions::default());
        assert_eq!(utils::read(&config.token_path()).await.unwrap(), "secret-token");
        assert!(config.secrets().is_dir());
        assert!(config.sqlite_path().is_file());

        let loaded = Config::load(&home_dir).await.unwrap();
        assert_eq!(loaded.config_file, config.config_file);
    }

    #[tokio::test]
    async fn test_config_create_rejects_bad_time_zone() {
        let dir = TempDir::new().unwrap();
        let result = Config::create(dir.path(), "http://localhost/", None, "Mars/Olympus").await;
        assert!(result.unwrap_err().to_string().contains("Invalid time zone"));
    }

    #[tokio::test]
    async fn test_config_load_missing_home() {
        let dir = TempDir::new().unwrap();
        assert!(Config::load(dir.path().join("nope")).await.is_err());
    }

    #[test]
    fn test_config_file_default() {
        let config = ConfigFile::default();
        assert_eq!(config.upstream_url, "");
        assert_eq!(config.refresh_workers, 4);
        assert_eq!(config.token_path(), PathBuf::from(SECRETS).join(TOKEN_FILE));
    }

    #[tokio::test]
    async fn test_config_file_load_with_minimal_config() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.json");

        let json = r#"{
            "app_name": "budgetboard",
            "config_version": 1,
            "upstream_url": "http://localhost:8080/",
            "time_zone": "Europe/Berlin"
        }"#;

        let mut file = tokio::fs::File::create(&config_path).await.unwrap();
        file.write_all(json.as_bytes()).await.unwrap();

        let config = ConfigFile::load(&config_path).await.unwrap();
        assert_eq!(config.request_timeout_secs, 30);
        assert_eq!(config.reconcile_interval_secs, 60);
        assert_eq!(config.refresh_queue_depth, 256);
        assert_eq!(config.tax_category, "taxes");
        assert_eq!(config.token_path(), PathBuf::from(SECRETS).join(TOKEN_FILE));
    }

    #[tokio::test]
    async fn test_config_file_load_invalid_app_name() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.json");

        let json = r#"{
            "app_name": "wrong_app",
            "config_version": 1,
            "upstream_url": "http://localhost:8080/",
            "time_zone": "UTC"
        }"#;

        let mut file = tokio::fs::File::create(&config_path).await.unwrap();
        file.write_all(json.as_bytes()).await.unwrap();

        let result = ConfigFile::load(&config_path).await;
        assert!(result.unwrap_err().to_string().contains("Invalid app_name"));
    }

    #[test]
    fn test_config_file_serialization_omits_none_fields() {
        let json = serde_json::to_string(&ConfigFile::default()).unwrap();
        assert!(!json.contains("token_path"));
    }

    #[test]
    fn test_parse_upstream_url() {
        assert_eq!(
            parse_upstream_url("http://localhost:8080").unwrap().as_str(),
            "http://localhost:8080/"
        );
        assert_eq!(
            parse_upstream_url("https://x.org/ff/").unwrap().as_str(),
            "https://x.org/ff/"
        );
        assert!(parse_upstream_url("not a url").is_err());
    }
}
