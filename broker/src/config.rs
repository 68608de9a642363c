// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! CLI flags and the broker-wide config they assemble.
//!
//! CLI flags take precedence over an optional TOML file, which in turn
//! takes precedence over the built-in defaults.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::error::{Error, ErrorKind};

const DEFAULT_IP: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 1883;
const DEFAULT_THREADS: usize = 3;
const DEFAULT_LOG_FILE: &str = "hebo.log";

#[derive(Parser, Debug)]
#[command(name = "hebo", about = "MQTT 3.1.1 broker")]
pub struct Cli {
    /// Bind IP address.
    #[arg(short = 'i', long)]
    pub ip: Option<String>,

    /// Bind port.
    #[arg(short = 'p', long)]
    pub port: Option<u16>,

    /// Number of worker threads.
    #[arg(short = 'n', long)]
    pub threads: Option<usize>,

    /// Optional TOML config file; CLI flags above override it field by field.
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BrokerConfig {
    #[serde(default = "default_ip")]
    pub ip: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_threads")]
    pub threads: usize,

    #[serde(default = "default_log_file")]
    pub log_file: PathBuf,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            ip: default_ip(),
            port: default_port(),
            threads: default_threads(),
            log_file: default_log_file(),
        }
    }
}

impl BrokerConfig {
    /// Load defaults, overlay an optional TOML file, then overlay CLI flags.
    ///
    /// # Errors
    /// Returns [`ErrorKind::ConfigError`] if a config file was given but
    /// could not be read or parsed.
    pub fn load(cli: &Cli) -> Result<Self, Error> {
        let mut config = match &cli.config {
            Some(path) => {
                let content = std::fs::read_to_string(path).map_err(|err| {
                    Error::from_string(
                        ErrorKind::ConfigError,
                        format!("failed to read config file {path:?}: {err}"),
                    )
                })?;
                toml::from_str(&content).map_err(|err| {
                    Error::from_string(
                        ErrorKind::ConfigError,
                        format!("failed to parse config file {path:?}: {err}"),
                    )
                })?
            }
            None => Self::default(),
        };

        if let Some(ip) = &cli.ip {
            config.ip.clone_from(ip);
        }
        if let Some(port) = cli.port {
            config.port = port;
        }
        if let Some(threads) = cli.threads {
            config.threads = threads;
        }

        Ok(config)
    }

    /// # Errors
    /// Returns [`ErrorKind::ConfigError`] if `ip`/`port` do not form a valid
    /// socket address.
    pub fn listen_address(&self) -> Result<SocketAddr, Error> {
        format!("{}:{}", self.ip, self.port).parse().map_err(|err| {
            Error::from_string(
                ErrorKind::ConfigError,
                format!("invalid listen address {}:{}: {err}", self.ip, self.port),
            )
        })
    }
}

fn default_ip() -> String {
    DEFAULT_IP.to_string()
}

const fn default_port() -> u16 {
    DEFAULT_PORT
}

const fn default_threads() -> usize {
    DEFAULT_THREADS
}

fn default_log_file() -> PathBuf {
    PathBuf::from(DEFAULT_LOG_FILE)
}
