// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{fs, path::Path};

use anyhow::{Context, Result, ensure};
use serde::{Deserialize, Serialize};

/// Default iSCSI listen port (IANA assigned).
pub const DEFAULT_PORT: u16 = 3260;

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct Config {
    /// TCP port the target listens on.
    #[serde(default = "default_port", rename = "Port")]
    pub port: u16,

    /// Accept key formats that deviate slightly from RFC 3720 (missing
    /// required keys, unknown session types) instead of failing login.
    #[serde(default, rename = "AllowSloppyNegotiation")]
    pub allow_sloppy_negotiation: bool,

    /// Logger sink and verbosity.
    #[serde(default, rename = "Logger")]
    pub logger: LoggerConfig,

    /// Exported targets, in declaration order.
    #[serde(rename = "TargetList")]
    pub targets: Vec<TargetConfig>,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

/// One exported target: a name in iqn.* form, an optional human alias
/// and the backing file (raw bytes, length = blocks x 512).
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct TargetConfig {
    #[serde(rename = "TargetName")]
    pub target_name: String,

    #[serde(default, rename = "TargetAlias")]
    pub target_alias: Option<String>,

    #[serde(rename = "StorageFile")]
    pub storage_file: StorageFileConfig,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct StorageFileConfig {
    #[serde(rename = "FilePath")]
    pub file_path: String,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct LoggerConfig {
    /// EnvFilter directive, e.g. "info" or "iscsi_target_rs=debug".
    #[serde(default = "default_log_level", rename = "Level")]
    pub level: String,

    #[serde(default, rename = "Output")]
    pub output: LogOutput,

    /// Log file path; required when output = file.
    #[serde(default, rename = "File")]
    pub file: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            output: LogOutput::default(),
            file: None,
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    #[default]
    Stderr,
    Stdout,
    File,
}

impl Config {
    /// Loads the configuration from YAML, validates it, and returns the
    /// ready-to-use value.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let s = fs::read_to_string(&path).with_context(|| {
            format!("failed to read config {:?}", path.as_ref())
        })?;
        let cfg: Config =
            serde_yaml::from_str(&s).context("failed to parse config YAML")?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Validates invariants that the rest of the target relies on.
    pub fn validate(&self) -> Result<()> {
        ensure!(self.port != 0, "Port must not be 0");

        for t in &self.targets {
            ensure!(
                !t.target_name.is_empty(),
                "TargetName must not be empty"
            );
            ensure!(
                t.target_name.starts_with("iqn.")
                    || t.target_name.starts_with("eui."),
                "TargetName {:?} is not in iqn./eui. form",
                t.target_name
            );
            ensure!(
                !t.storage_file.file_path.is_empty(),
                "StorageFile.FilePath must not be empty for {:?}",
                t.target_name
            );
        }

        if self.logger.output == LogOutput::File {
            ensure!(
                self.logger.file.is_some(),
                "Logger.File is required for Output=file"
            );
        }

        Ok(())
    }
}
