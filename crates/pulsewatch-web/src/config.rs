//! Pipeline configuration: CLI flags via `clap`, with an optional TOML
//! overlay file. CLI flags win over the file, the file wins over defaults
//! (spec.md §4.E "Configuration", supplemented from
//! `original_source/src/web/server/web_client.c`'s listener/ACL settings).

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use clap::Parser;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::acl::AclMask;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("TOML parse error in {path}: {source}")]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Parser, Debug)]
#[command(name = "pulsewatch-agent")]
#[command(about = "Agent-resident metrics registry and query pipeline")]
#[command(version)]
pub struct Args {
    /// TOML configuration file, overlaid on top of the built-in defaults.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Additional `host:port` to listen on (repeatable).
    #[arg(long = "listen")]
    pub listen: Vec<String>,

    /// Unix domain socket path to listen on (repeatable).
    #[arg(long = "listen-unix")]
    pub listen_unix: Vec<String>,

    /// ACL token string applied to every listener added via `--listen`.
    #[arg(long, default_value = "dashboard registry badges")]
    pub acl: String,

    /// IP patterns allowed to connect (repeatable; `*` wildcard suffix).
    /// Empty means all clients are allowed.
    #[arg(long = "allow-from")]
    pub allow_from: Vec<String>,

    /// Worker thread count. Defaults to `min(available_parallelism, 6)`.
    #[arg(long)]
    pub workers: Option<usize>,

    /// Directory served for static dashboard assets.
    #[arg(long, default_value = "./web")]
    pub web_root: PathBuf,

    /// Seconds to wait for a first request before closing an idle
    /// connection.
    #[arg(long, default_value = "60")]
    pub first_request_timeout_s: u64,

    /// Seconds of inactivity on a keep-alive connection before closing it.
    #[arg(long, default_value = "60")]
    pub idle_timeout_s: u64,

    /// `trace`, `debug`, `info`, `warn`, or `error`.
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenerSpec {
    pub bind: String,
    #[serde(default = "default_acl")]
    pub acl: String,
}

fn default_acl() -> String {
    "dashboard registry badges".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub listeners: Vec<ListenerSpec>,
    #[serde(default)]
    pub unix_listeners: Vec<String>,
    #[serde(default)]
    pub allow_from: Vec<String>,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_web_root")]
    pub web_root: PathBuf,
    #[serde(default = "default_timeout")]
    pub first_request_timeout_s: u64,
    #[serde(default = "default_timeout")]
    pub idle_timeout_s: u64,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_workers() -> usize {
    std::thread::available_parallelism().map(|n| n.get().min(6)).unwrap_or(1)
}

fn default_web_root() -> PathBuf {
    PathBuf::from("./web")
}

fn default_timeout() -> u64 {
    60
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            listeners: Vec::new(),
            unix_listeners: Vec::new(),
            allow_from: Vec::new(),
            workers: default_workers(),
            web_root: default_web_root(),
            first_request_timeout_s: default_timeout(),
            idle_timeout_s: default_timeout(),
            log_level: default_log_level(),
        }
    }
}

impl PipelineConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&content).map_err(|source| ConfigError::Toml {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Merge CLI-supplied flags over this config, CLI always wins.
    pub fn merge_args(mut self, args: &Args) -> Self {
        for bind in &args.listen {
            self.listeners.push(ListenerSpec {
                bind: bind.clone(),
                acl: args.acl.clone(),
            });
        }
        self.unix_listeners.extend(args.listen_unix.iter().cloned());
        self.allow_from.extend(args.allow_from.iter().cloned());
        if let Some(workers) = args.workers {
            self.workers = workers;
        }
        if args.web_root != default_web_root() {
            self.web_root = args.web_root.clone();
        }
        if args.first_request_timeout_s != default_timeout() {
            self.first_request_timeout_s = args.first_request_timeout_s;
        }
        if args.idle_timeout_s != default_timeout() {
            self.idle_timeout_s = args.idle_timeout_s;
        }
        if args.log_level != default_log_level() {
            self.log_level = args.log_level.clone();
        }
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::Invalid("workers must be at least 1".into()));
        }
        for listener in &self.listeners {
            if listener.bind.parse::<SocketAddr>().is_err() {
                return Err(ConfigError::Invalid(format!("invalid listen address: {}", listener.bind)));
            }
        }
        Ok(())
    }

    pub fn resolved_acls(&self) -> Vec<(SocketAddr, AclMask)> {
        self.listeners
            .iter()
            .filter_map(|l| l.bind.parse::<SocketAddr>().ok().map(|addr| (addr, AclMask::parse(&l.acl))))
            .collect()
    }

    /// UNIX listeners carry no per-socket ACL string on the wire config
    /// today, so each gets the same default feature set as a bare
    /// `--listen` entry.
    pub fn resolved_unix_acls(&self) -> Vec<(PathBuf, AclMask)> {
        self.unix_listeners
            .iter()
            .map(|path| (PathBuf::from(path), AclMask::parse(&default_acl())))
            .collect()
    }
}

/// Load config: defaults, overlaid by `--config` file (if any), overlaid by
/// explicit CLI flags.
pub fn load(args: &Args) -> Result<PipelineConfig, ConfigError> {
    let base = match &args.config {
        Some(path) => PipelineConfig::from_file(path)?,
        None => PipelineConfig::default(),
    };
    let merged = base.merge_args(args);
    merged.validate()?;
    Ok(merged)
}
