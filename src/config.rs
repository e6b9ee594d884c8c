// Run configuration.
// - `ConfigFile` is the TOML file as written by the operator.
// - `Overrides` is what the command line supplies.
// - `RunConfiguration` merges both over the built-in defaults and is
//   passed by reference to every component; it is never mutated.

use serde::Deserialize;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::api::{ClientId, NetworkId};
use crate::error::{Result, UploadError};
use crate::retry::RetryPolicy;

pub const DEFAULT_PLATFORM: &str = "https://platform.risksense.com";
pub const DEFAULT_FILES_FOLDER: &str = "files_to_process";
pub const DEFAULT_LOG_FOLDER: &str = "logs";
pub const ARCHIVE_FOLDER: &str = "archive";
const DEFAULT_UPLOAD_ATTEMPTS: u32 = 3;
const DEFAULT_RETRY_BACKOFF_SECS: u64 = 2;
const DEFAULT_POLL_INTERVAL_SECS: u64 = 15;
const DEFAULT_POLL_TIMEOUT_SECS: u64 = 30 * 60;

/// Proxy section of the configuration file (`[proxy]`).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProxyFile {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub authentication: Option<bool>,
    pub user: Option<String>,
    pub password: Option<String>,
}

/// Configuration file contents. Every key is optional; missing values fall
/// back to the command line or the defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    pub platform: Option<String>,
    #[serde(rename = "api-key", alias = "api_key")]
    pub api_key: Option<String>,
    pub files_folder: Option<PathBuf>,
    pub log_folder: Option<PathBuf>,
    pub auto_urba: Option<bool>,
    pub client_id: Option<ClientId>,
    pub network_id: Option<NetworkId>,
    pub use_proxy: Option<bool>,
    pub proxy: ProxyFile,
    pub upload_attempts: Option<u32>,
    pub retry_backoff_secs: Option<u64>,
    pub poll_interval_secs: Option<u64>,
    pub poll_timeout_secs: Option<u64>,
}

impl ConfigFile {
    /// Read and parse a TOML configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            UploadError::Configuration(format!("cannot read config file '{}': {}", path.display(), e))
        })?;
        toml::from_str(&content).map_err(|e| {
            UploadError::Configuration(format!("invalid config file '{}': {}", path.display(), e))
        })
    }

    /// Locate the configuration file: an explicit path must exist, otherwise
    /// `conf/config.toml` under `cwd`, then the user config directory.
    pub fn discover(explicit: Option<&Path>, cwd: &Path) -> Result<Option<PathBuf>> {
        if let Some(path) = explicit {
            if !path.is_file() {
                return Err(UploadError::Configuration(format!(
                    "config file '{}' does not exist",
                    path.display()
                )));
            }
            return Ok(Some(path.to_path_buf()));
        }

        let local = cwd.join("conf").join("config.toml");
        if local.is_file() {
            return Ok(Some(local));
        }

        Ok(dirs::config_dir()
            .map(|dir| dir.join("upload-to-platform").join("config.toml"))
            .filter(|path| path.is_file()))
    }
}

/// Values supplied on the command line. Same semantics as [`ConfigFile`].
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub platform: Option<String>,
    pub api_key: Option<String>,
    pub files_folder: Option<PathBuf>,
    pub log_folder: Option<PathBuf>,
    pub auto_urba: Option<bool>,
    pub client_id: Option<ClientId>,
    pub network_id: Option<NetworkId>,
    pub use_proxy: Option<bool>,
    pub proxy_host: Option<String>,
    pub proxy_port: Option<u16>,
    pub proxy_auth: Option<bool>,
    pub proxy_user: Option<String>,
    pub proxy_pwd: Option<String>,
    pub upload_attempts: Option<u32>,
    pub poll_interval_secs: Option<u64>,
    pub poll_timeout_secs: Option<u64>,
    pub interactive: bool,
    pub files: Vec<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProxySettings {
    pub enabled: bool,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub authentication: bool,
    pub user: Option<String>,
    pub password: Option<String>,
}

/// How long to wait for the platform to finish processing one upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub timeout: Duration,
}

/// Immutable configuration of one run.
#[derive(Debug, Clone)]
pub struct RunConfiguration {
    /// Base URL without trailing slash.
    pub platform: String,
    pub api_key: String,
    pub files_folder: PathBuf,
    pub log_folder: PathBuf,
    pub archive_folder: PathBuf,
    pub auto_urba: bool,
    pub client_id: Option<ClientId>,
    pub network_id: Option<NetworkId>,
    pub proxy: ProxySettings,
    pub retry: RetryPolicy,
    pub poll: PollPolicy,
    pub interactive: bool,
    /// Files named on the command line; when empty the files folder is
    /// scanned. Each is archived into an `archive` folder next to it.
    pub explicit_files: Vec<PathBuf>,
}

impl RunConfiguration {
    /// Merge CLI overrides over the file over the defaults and validate the
    /// result. Relative folders are resolved against `base_dir`. Creates the
    /// archive folder when it is missing.
    pub fn resolve(file: ConfigFile, overrides: Overrides, base_dir: &Path) -> Result<Self> {
        let platform = overrides
            .platform
            .or(file.platform)
            .unwrap_or_else(|| DEFAULT_PLATFORM.to_string())
            .trim()
            .trim_end_matches('/')
            .to_string();
        if platform.is_empty() {
            return Err(UploadError::Configuration("platform URL is empty".into()));
        }

        let api_key = overrides
            .api_key
            .or(file.api_key)
            .unwrap_or_default()
            .trim()
            .to_string();
        if api_key.is_empty() {
            return Err(UploadError::Configuration(
                "no API key configured; set `api-key` in the config file or pass --api-key".into(),
            ));
        }

        let files_folder = absolutize(
            base_dir,
            overrides
                .files_folder
                .or(file.files_folder)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_FILES_FOLDER)),
        );
        if !files_folder.is_dir() {
            return Err(UploadError::Configuration(format!(
                "files folder '{}' does not exist or is not a directory",
                files_folder.display()
            )));
        }

        let log_folder = absolutize(
            base_dir,
            overrides
                .log_folder
                .or(file.log_folder)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_FOLDER)),
        );

        let archive_folder = files_folder.join(ARCHIVE_FOLDER);
        ensure_writable_dir(&archive_folder)?;

        let proxy = ProxySettings {
            enabled: overrides.use_proxy.or(file.use_proxy).unwrap_or(false),
            host: overrides.proxy_host.or(file.proxy.host),
            port: overrides.proxy_port.or(file.proxy.port),
            authentication: overrides.proxy_auth.or(file.proxy.authentication).unwrap_or(false),
            user: overrides.proxy_user.or(file.proxy.user),
            password: overrides.proxy_pwd.or(file.proxy.password),
        };
        validate_proxy(&proxy)?;

        let attempts = overrides
            .upload_attempts
            .or(file.upload_attempts)
            .unwrap_or(DEFAULT_UPLOAD_ATTEMPTS);
        if attempts == 0 {
            return Err(UploadError::Configuration("upload attempts must be at least 1".into()));
        }
        let retry = RetryPolicy::new(
            attempts,
            Duration::from_secs(file.retry_backoff_secs.unwrap_or(DEFAULT_RETRY_BACKOFF_SECS)),
        );

        let interval = overrides
            .poll_interval_secs
            .or(file.poll_interval_secs)
            .unwrap_or(DEFAULT_POLL_INTERVAL_SECS);
        if interval == 0 {
            return Err(UploadError::Configuration("poll interval must be at least 1 second".into()));
        }
        let poll = PollPolicy {
            interval: Duration::from_secs(interval),
            timeout: Duration::from_secs(
                overrides
                    .poll_timeout_secs
                    .or(file.poll_timeout_secs)
                    .unwrap_or(DEFAULT_POLL_TIMEOUT_SECS),
            ),
        };

        Ok(RunConfiguration {
            platform,
            api_key,
            files_folder,
            log_folder,
            archive_folder,
            auto_urba: overrides.auto_urba.or(file.auto_urba).unwrap_or(false),
            client_id: overrides.client_id.or(file.client_id),
            network_id: overrides.network_id.or(file.network_id),
            proxy,
            retry,
            poll,
            interactive: overrides.interactive,
            explicit_files: overrides
                .files
                .into_iter()
                .map(|path| absolutize(base_dir, path))
                .collect(),
        })
    }

    /// Fold the resolved client/network into a new configuration value.
    pub fn with_scope(&self, client_id: ClientId, network_id: NetworkId) -> Self {
        RunConfiguration {
            client_id: Some(client_id),
            network_id: Some(network_id),
            ..self.clone()
        }
    }
}

fn absolutize(base_dir: &Path, path: PathBuf) -> PathBuf {
    if path.is_absolute() {
        path
    } else {
        base_dir.join(path)
    }
}

fn validate_proxy(proxy: &ProxySettings) -> Result<()> {
    if !proxy.enabled {
        return Ok(());
    }
    if proxy.host.as_deref().map_or(true, |h| h.trim().is_empty()) || proxy.port.is_none() {
        return Err(UploadError::Configuration(
            "use_proxy is set but proxy host or port is missing".into(),
        ));
    }
    if proxy.authentication && proxy.user.as_deref().map_or(true, str::is_empty) {
        return Err(UploadError::Configuration(
            "proxy authentication is enabled but no proxy user is set".into(),
        ));
    }
    Ok(())
}

/// Create the folder if needed and check that files can be created in it.
fn ensure_writable_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir).map_err(|e| {
        UploadError::Configuration(format!("cannot create archive folder '{}': {}", dir.display(), e))
    })?;
    let marker = dir.join(".write-check");
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&marker)
        .and_then(|_| fs::remove_file(&marker))
        .map_err(|e| {
            UploadError::Configuration(format!("archive folder '{}' is not writable: {}", dir.display(), e))
        })
}
