use std::{env, fmt::Display, path::PathBuf, str::FromStr};

use tracing::error;

const DEFAULT_PORT: u16 = 8080;
const DEFAULT_DATA_DIR: &str = "data";
const DEFAULT_ASSETS_DIR: &str = "assets";
// same default as a stock express.json() body parser
const DEFAULT_MAX_BODY_BYTES: usize = 100 * 1024;

/// Runtime settings, read once from the environment at startup.
#[derive(Debug, Clone)]
pub struct Settings {
    pub port: u16,
    pub data_dir: PathBuf,
    pub assets_dir: PathBuf,
    pub max_body_bytes: usize,
}

impl Settings {
    pub fn from_env() -> Self {
        Settings {
            port: get_port(),
            data_dir: get_data_dir(),
            assets_dir: get_assets_dir(),
            max_body_bytes: get_max_body_bytes(),
        }
    }
}

pub fn get_host_uri(port: u16) -> String {
    host_uri_from(env::var("HOST").ok(), port)
}

fn host_uri_from(host: Option<String>, port: u16) -> String {
    match host {
        Some(host) => format!("https://{host}"),
        None => format!("http://localhost:{port}"),
    }
}

pub fn get_port() -> u16 {
    parse_env_or("PORT", DEFAULT_PORT)
}

pub fn get_max_body_bytes() -> usize {
    parse_env_or("MAX_BODY_BYTES", DEFAULT_MAX_BODY_BYTES)
}

pub fn get_data_dir() -> PathBuf {
    dir_from_env("DATA_DIR", DEFAULT_DATA_DIR)
}

pub fn get_assets_dir() -> PathBuf {
    dir_from_env("ASSETS_DIR", DEFAULT_ASSETS_DIR)
}

/// Relative paths resolve against the working directory.
fn dir_from_env(key: &str, default: &str) -> PathBuf {
    let dir = match env::var(key) {
        Ok(dir) if !dir.trim().is_empty() => PathBuf::from(dir),
        _ => PathBuf::from(default),
    };

    if dir.is_absolute() {
        return dir;
    }

    match env::current_dir() {
        Ok(cwd) => cwd.join(dir),
        Err(_) => PathBuf::from("./").join(dir),
    }
}

fn parse_env_or<T>(key: &str, default: T) -> T
where
    T: FromStr + Display,
{
    let value = match env::var(key) {
        Ok(value) => value,
        _ => return default,
    };

    match value.trim().parse::<T>() {
        Ok(value) => value,
        _ => {
            error!("Failed to parse {key} env var, using default {default}");
            default
        }
    }
}
