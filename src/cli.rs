// Command-line arguments.
// Every flag overrides the configuration-file value with the same meaning.

use clap::Parser;
use std::io::IsTerminal;
use std::path::PathBuf;

use crate::api::{ClientId, NetworkId};
use crate::config::Overrides;

/// Upload scan files to the platform and archive them once processed
#[derive(Parser, Debug)]
#[command(name = "upload-to-platform")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Configuration file (default: ./conf/config.toml)
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Platform base URL
    #[arg(long)]
    pub platform: Option<String>,

    /// API key
    #[arg(long, alias = "api_key")]
    pub api_key: Option<String>,

    /// Folder holding the files to upload
    #[arg(long, alias = "files_folder")]
    pub files_folder: Option<PathBuf>,

    /// Folder for uploads.log
    #[arg(long, alias = "log_folder")]
    pub log_folder: Option<PathBuf>,

    /// Trigger URBA after each file is processed
    #[arg(long, alias = "auto_urba", value_name = "BOOL")]
    pub auto_urba: Option<bool>,

    #[arg(long, alias = "client_id")]
    pub client_id: Option<ClientId>,

    #[arg(long, alias = "network_id")]
    pub network_id: Option<NetworkId>,

    /// Route requests through the configured proxy
    #[arg(long, alias = "use_proxy", value_name = "BOOL")]
    pub use_proxy: Option<bool>,

    #[arg(long, alias = "proxy_host")]
    pub proxy_host: Option<String>,

    #[arg(long, alias = "proxy_port")]
    pub proxy_port: Option<u16>,

    /// Authenticate against the proxy
    #[arg(long, alias = "proxy_auth", value_name = "BOOL")]
    pub proxy_auth: Option<bool>,

    #[arg(long, alias = "proxy_user")]
    pub proxy_user: Option<String>,

    #[arg(long, alias = "proxy_pwd")]
    pub proxy_pwd: Option<String>,

    /// Attempts per file upload when the platform is unreachable or busy
    #[arg(long, value_name = "N")]
    pub upload_attempts: Option<u32>,

    /// Seconds between processing status checks
    #[arg(long, value_name = "SECS")]
    pub poll_interval: Option<u64>,

    /// Seconds to wait for one file to finish processing
    #[arg(long, value_name = "SECS")]
    pub poll_timeout: Option<u64>,

    /// Never prompt; fail if a client or network has to be chosen
    #[arg(long)]
    pub non_interactive: bool,

    /// Verbose console output
    #[arg(short, long)]
    pub verbose: bool,

    /// Upload these files instead of scanning the files folder
    #[arg(value_name = "FILES")]
    pub files: Vec<PathBuf>,
}

impl Cli {
    pub fn into_overrides(self) -> Overrides {
        let interactive = !self.non_interactive && std::io::stdin().is_terminal();
        Overrides {
            platform: self.platform,
            api_key: self.api_key,
            files_folder: self.files_folder,
            log_folder: self.log_folder,
            auto_urba: self.auto_urba,
            client_id: self.client_id,
            network_id: self.network_id,
            use_proxy: self.use_proxy,
            proxy_host: self.proxy_host,
            proxy_port: self.proxy_port,
            proxy_auth: self.proxy_auth,
            proxy_user: self.proxy_user,
            proxy_pwd: self.proxy_pwd,
            upload_attempts: self.upload_attempts,
            poll_interval_secs: self.poll_interval,
            poll_timeout_secs: self.poll_timeout,
            interactive,
            files: self.files,
        }
    }
}
