use crate::checkout::CheckoutConfig;
use crate::retry::RetryConfig;
use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_HTTP_BIND: &str = "127.0.0.1:8080";
const DEFAULT_CHECKOUT_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_CHECKOUT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 30;
const MAX_CHECKOUT_ATTEMPTS: u32 = 10;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Seed catalog (YAML or JSON); the catalog starts empty without one
    pub catalog_path: Option<PathBuf>,
    pub http_bind_address: SocketAddr,
    /// Directory for per-session cart mirrors; mirroring is off without one
    pub mirror_dir: Option<PathBuf>,
    pub checkout_timeout: Duration,
    pub checkout_max_attempts: u32,
    pub enable_admin: bool,
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            catalog_path: None,
            http_bind_address: default_bind(),
            mirror_dir: None,
            checkout_timeout: Duration::from_millis(DEFAULT_CHECKOUT_TIMEOUT_MS),
            checkout_max_attempts: DEFAULT_CHECKOUT_MAX_ATTEMPTS,
            enable_admin: false,
            shutdown_timeout: Duration::from_secs(DEFAULT_SHUTDOWN_TIMEOUT_SECS),
        }
    }
}

fn default_bind() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

impl ServerConfig {
    pub fn from_args(args: CliArgs) -> Result<Self> {
        let CliArgs {
            config,
            catalog: cli_catalog,
            http_bind: cli_http_bind,
            mirror_dir: cli_mirror_dir,
            checkout_timeout_ms: cli_checkout_timeout_ms,
            checkout_max_attempts: cli_checkout_max_attempts,
            enable_admin: cli_enable_admin,
            shutdown_timeout_secs: cli_shutdown_timeout_secs,
        } = args;

        let file_config = if let Some(path) = config.as_ref() {
            load_config_file(path)?
        } else {
            PartialConfig::default()
        };

        let PartialConfig {
            catalog: file_catalog,
            http_bind: file_http_bind,
            mirror_dir: file_mirror_dir,
            checkout_timeout_ms: file_checkout_timeout_ms,
            checkout_max_attempts: file_checkout_max_attempts,
            enable_admin: file_enable_admin,
            shutdown_timeout_secs: file_shutdown_timeout_secs,
        } = file_config;

        // relative paths in a config file are relative to that file
        let base_dir = config
            .as_deref()
            .and_then(Path::parent)
            .map(Path::to_path_buf);
        let resolve = |path: PathBuf| match base_dir.as_ref() {
            Some(base) if path.is_relative() => base.join(path),
            _ => path,
        };

        let catalog_path = cli_catalog.or(file_catalog.map(resolve));
        let mirror_dir = cli_mirror_dir.or(file_mirror_dir.map(resolve));

        let http_bind_address = match cli_http_bind.or(file_http_bind) {
            Some(addr) => addr,
            None => DEFAULT_HTTP_BIND
                .parse()
                .context("default bind address invalid")?,
        };

        let checkout_timeout = Duration::from_millis(
            cli_checkout_timeout_ms
                .or(file_checkout_timeout_ms)
                .unwrap_or(DEFAULT_CHECKOUT_TIMEOUT_MS),
        );

        let checkout_max_attempts = cli_checkout_max_attempts
            .or(file_checkout_max_attempts)
            .unwrap_or(DEFAULT_CHECKOUT_MAX_ATTEMPTS);

        let enable_admin = cli_enable_admin || file_enable_admin.unwrap_or(false);

        let shutdown_timeout = Duration::from_secs(
            cli_shutdown_timeout_secs
                .or(file_shutdown_timeout_secs)
                .unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT_SECS),
        );

        Ok(Self {
            catalog_path,
            http_bind_address,
            mirror_dir,
            checkout_timeout,
            checkout_max_attempts,
            enable_admin,
            shutdown_timeout,
        })
    }

    /// Fail-fast checks run before the server starts.
    pub fn validate(&self) -> Result<()> {
        if let Some(catalog) = self.catalog_path.as_ref() {
            anyhow::ensure!(
                catalog.is_file(),
                "catalog file {:?} does not exist or is not a file",
                catalog
            );
        }
        if let Some(dir) = self.mirror_dir.as_ref() {
            anyhow::ensure!(
                !dir.exists() || dir.is_dir(),
                "mirror path {:?} is not a directory",
                dir
            );
        }
        anyhow::ensure!(
            !self.checkout_timeout.is_zero(),
            "checkout timeout must be greater than zero"
        );
        anyhow::ensure!(
            (1..=MAX_CHECKOUT_ATTEMPTS).contains(&self.checkout_max_attempts),
            "checkout attempts must be between 1 and {}, got {}",
            MAX_CHECKOUT_ATTEMPTS,
            self.checkout_max_attempts
        );
        Ok(())
    }

    pub fn checkout(&self) -> CheckoutConfig {
        CheckoutConfig {
            submit_timeout: self.checkout_timeout,
            retry: RetryConfig {
                max_attempts: self.checkout_max_attempts,
                ..RetryConfig::default()
            },
        }
    }
}

#[derive(Parser, Debug, Default, Clone)]
#[command(name = "storefront", about = "Storefront cart and checkout service", version)]
pub struct CliArgs {
    #[arg(
        long,
        value_name = "FILE",
        help = "Path to a configuration file (YAML or JSON)",
        global = true
    )]
    pub config: Option<PathBuf>,

    #[arg(
        long,
        env = "STOREFRONT_CATALOG",
        value_name = "FILE",
        help = "Seed product catalog (YAML or JSON)"
    )]
    pub catalog: Option<PathBuf>,

    #[arg(
        long,
        env = "STOREFRONT_HTTP_BIND",
        value_name = "ADDR",
        help = "HTTP bind address"
    )]
    pub http_bind: Option<SocketAddr>,

    #[arg(
        long,
        env = "STOREFRONT_MIRROR_DIR",
        value_name = "DIR",
        help = "Mirror each session's cart to a JSON file in this directory"
    )]
    pub mirror_dir: Option<PathBuf>,

    #[arg(
        long,
        env = "STOREFRONT_CHECKOUT_TIMEOUT_MS",
        value_name = "MS",
        help = "Timeout for a single order hand-off attempt",
        value_parser = clap::value_parser!(u64)
    )]
    pub checkout_timeout_ms: Option<u64>,

    #[arg(
        long,
        env = "STOREFRONT_CHECKOUT_MAX_ATTEMPTS",
        value_name = "N",
        help = "Hand-off attempts before checkout fails",
        value_parser = clap::value_parser!(u32)
    )]
    pub checkout_max_attempts: Option<u32>,

    #[arg(
        long,
        env = "STOREFRONT_ENABLE_ADMIN",
        help = "Expose the admin order and product routes"
    )]
    pub enable_admin: bool,

    #[arg(
        long,
        env = "STOREFRONT_SHUTDOWN_TIMEOUT_SECS",
        value_name = "SECS",
        help = "Grace period for in-flight requests on shutdown",
        value_parser = clap::value_parser!(u64)
    )]
    pub shutdown_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct PartialConfig {
    catalog: Option<PathBuf>,
    http_bind: Option<SocketAddr>,
    mirror_dir: Option<PathBuf>,
    checkout_timeout_ms: Option<u64>,
    checkout_max_attempts: Option<u32>,
    enable_admin: Option<bool>,
    shutdown_timeout_secs: Option<u64>,
}

fn load_config_file(path: &Path) -> Result<PartialConfig> {
    if !path.exists() {
        anyhow::bail!("config file {:?} does not exist", path);
    }
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {:?}", path))?;
    let ext = path
        .extension()
        .and_then(|os| os.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    let parsed = match ext.as_str() {
        "yaml" | "yml" => serde_yaml::from_str(&contents)
            .with_context(|| format!("failed to parse YAML config {:?}", path))?,
        "json" => serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse JSON config {:?}", path))?,
        other => anyhow::bail!("unsupported config extension: {other}"),
    };
    Ok(parsed)
}
