// Copyright 2026 Parrot project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

#![deny(warnings)]
#![deny(clippy::all)]
#![allow(clippy::too_many_arguments, clippy::new_without_default)]

//! Configuration for the `parrot` binary (§6 of the spec): a TOML file, overridden by
//! `PARROT_*` environment variables, overridden in turn by a handful of CLI flags —
//! a much-reduced analog of the teacher's own layered `options` crate, simplified down
//! to the literal configuration surface the spec enumerates.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use serde::{Deserialize, Serialize};

pub use dispatcher::Policy;

#[derive(Debug)]
pub enum ConfigError {
    Io(String),
    Parse(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(msg) => write!(f, "could not read config file: {msg}"),
            ConfigError::Parse(msg) => write!(f, "could not parse config file: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Constants fixed by the spec rather than left configurable (§6): heartbeat
/// intervals, expiry windows, default pool sizes, and the main loop's tick interval.
pub struct Constants;

impl Constants {
    pub const VM_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
    pub const ENGINE_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(3);
    pub const VM_EXPIRE_TIME: Duration = Duration::from_secs(7);
    pub const ENGINE_EXPIRE_TIME: Duration = Duration::from_secs(7);
    pub const DEFAULT_POOL_SIZE: u32 = 4096;
    pub const OS_LOOP_INTERVAL: Duration = Duration::from_micros(100);
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OsConfig {
    pub host: String,
    pub port: u16,
    pub max_proc_num: u32,
    pub max_engines_num: u32,
}

impl Default for OsConfig {
    fn default() -> OsConfig {
        OsConfig {
            host: "127.0.0.1".to_owned(),
            port: 8080,
            max_proc_num: Constants::DEFAULT_POOL_SIZE,
            max_engines_num: Constants::DEFAULT_POOL_SIZE,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    pub policy: Policy,
    pub max_queued_per_engine: usize,
    pub ping_on_select: bool,
}

impl Default for DispatcherConfig {
    fn default() -> DispatcherConfig {
        DispatcherConfig {
            policy: Policy::Fifo,
            max_queued_per_engine: 16,
            ping_on_select: true,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub os: OsConfig,
    pub dispatcher: DispatcherConfig,
}

/// CLI entry point for the `parrot` binary. `--host`/`--port` win over both the config
/// file and `PARROT_*` environment variables; everything else is file/env only.
#[derive(Parser, Debug)]
#[command(name = "parrot", about = "The Parrot semantic-function runtime")]
pub struct Cli {
    /// Path to a TOML config file. If omitted, built-in defaults (plus env overrides)
    /// apply.
    #[arg(long)]
    pub config: Option<PathBuf>,
    #[arg(long)]
    pub host: Option<String>,
    #[arg(long)]
    pub port: Option<u16>,
}

impl Config {
    /// Loads a config file if given, applies `PARROT_HOST`/`PARROT_PORT` environment
    /// overrides, then `cli`'s flags, in that precedence order.
    pub fn load(cli: &Cli) -> Result<Config, ConfigError> {
        let mut config = match &cli.config {
            Some(path) => {
                let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
                toml::from_str(&text).map_err(|e| ConfigError::Parse(e.to_string()))?
            }
            None => Config::default(),
        };

        if let Ok(host) = std::env::var("PARROT_HOST") {
            config.os.host = host;
        }
        if let Ok(port) = std::env::var("PARROT_PORT") {
            if let Ok(port) = port.parse() {
                config.os.port = port;
            }
        }

        if let Some(host) = &cli.host {
            config.os.host = host.clone();
        }
        if let Some(port) = cli.port {
            config.os.port = port;
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests;
