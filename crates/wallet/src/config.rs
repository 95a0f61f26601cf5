//! `walletd.conf` loading.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use walletd_log::{Format as LogFormat, Level as LogLevel, LogConfig};

use crate::error::WalletError;
use crate::keystore::{KdfConfig, KEY_FILE_NAME};

pub const CONF_FILE_NAME: &str = "walletd.conf";
pub const DEFAULT_INDEX_ATTEMPTS: u32 = 1024;
pub const DEFAULT_ADDRESS_VERSION: u8 = 0x1c;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct WalletConfig {
    pub data_dir: PathBuf,
    pub kdf: KdfConfig,
    /// Upper bound on regenerate-on-collision attempts for account and address indices.
    pub index_attempts: u32,
    pub address_version: u8,
    pub log: LogConfig,
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            kdf: KdfConfig::default(),
            index_attempts: DEFAULT_INDEX_ATTEMPTS,
            address_version: DEFAULT_ADDRESS_VERSION,
            log: LogConfig::default(),
        }
    }
}

impl WalletConfig {
    /// Loads `path`, falling back to defaults when the file does not exist.
    pub fn load(path: &Path) -> Result<Self, WalletError> {
        let mut config = Self::default();
        let Some(values) = load_conf(path)? else {
            return Ok(config);
        };

        if let Some(value) = last_value(&values, "datadir") {
            config.data_dir = PathBuf::from(value);
        }
        if let Some(value) = last_value(&values, "kdfmemkib") {
            config.kdf.mem_kib = parse_number("kdfmemkib", value)?;
        }
        if let Some(value) = last_value(&values, "kdfiters") {
            config.kdf.iters = parse_number("kdfiters", value)?;
        }
        if let Some(value) = last_value(&values, "kdfparallelism") {
            config.kdf.parallelism = parse_number("kdfparallelism", value)?;
        }
        if let Some(value) = last_value(&values, "indexattempts") {
            let attempts: u32 = parse_number("indexattempts", value)?;
            if attempts == 0 {
                return Err(WalletError::Config("indexattempts must be at least 1".to_string()));
            }
            config.index_attempts = attempts;
        }
        if let Some(value) = last_value(&values, "addressversion") {
            config.address_version = parse_address_version(value)?;
        }
        if let Some(value) = last_value(&values, "loglevel") {
            config.log.level = LogLevel::parse(value)
                .ok_or_else(|| WalletError::Config(format!("invalid loglevel '{value}'")))?;
        }
        if let Some(value) = last_value(&values, "logformat") {
            config.log.format = LogFormat::parse(value)
                .ok_or_else(|| WalletError::Config(format!("invalid logformat '{value}'")))?;
        }
        if let Some(value) = last_value(&values, "logtimestamps") {
            config.log.timestamps = parse_conf_bool(value)
                .ok_or_else(|| WalletError::Config(format!("invalid logtimestamps '{value}'")))?;
        }
        Ok(config)
    }

    pub fn key_file_path(&self) -> PathBuf {
        self.data_dir.join(KEY_FILE_NAME)
    }

    pub fn store_path(&self) -> PathBuf {
        self.data_dir.join("db")
    }
}

fn load_conf(path: &Path) -> Result<Option<HashMap<String, Vec<String>>>, WalletError> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };

    let mut out: HashMap<String, Vec<String>> = HashMap::new();
    for raw_line in contents.lines() {
        let mut line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        if let Some(idx) = line.find('#') {
            line = &line[..idx];
        }
        if let Some(idx) = line.find(';') {
            line = &line[..idx];
        }
        line = line.trim();
        if line.is_empty() {
            continue;
        }
        let (key, value) = match line.split_once('=') {
            Some((key, value)) => (key.trim(), value.trim()),
            None => (line, "1"),
        };
        if key.is_empty() {
            continue;
        }
        out.entry(key.to_ascii_lowercase())
            .or_default()
            .push(value.to_string());
    }
    Ok(Some(out))
}

fn last_value<'a>(values: &'a HashMap<String, Vec<String>>, key: &str) -> Option<&'a str> {
    values
        .get(key)
        .and_then(|entries| entries.last())
        .map(String::as_str)
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, WalletError> {
    value
        .parse()
        .map_err(|_| WalletError::Config(format!("invalid {key} '{value}'")))
}

fn parse_address_version(value: &str) -> Result<u8, WalletError> {
    let parsed = match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u8::from_str_radix(hex, 16).ok(),
        None => value.parse().ok(),
    };
    parsed.ok_or_else(|| WalletError::Config(format!("invalid addressversion '{value}'")))
}

fn parse_conf_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "" | "1" | "true" | "yes" => Some(true),
        "0" | "false" | "no" => Some(false),
        _ => None,
    }
}
