//! Server configuration.
//!
//! Options are resolved from three sources in decreasing precedence:
//! environment variables, command-line flags, and a local `config.json`
//! file. Only the filesystem root is required; everything else has a
//! default.

use std::env;
use std::io;
use std::path::PathBuf;
use std::str::FromStr;

use clap::Parser;
use log::LevelFilter;
use serde::Deserialize;
use thiserror::Error;

/// Directory name of the working tree under the filesystem root.
pub const DEFAULT_FS_PREFIX: &str = "root";

/// Directory name of the history tree under the filesystem root.
pub const DEFAULT_VC_PREFIX: &str = "vc_root";

const CONFIG_FILE: &str = "config.json";

/// Errors that make the configuration unusable. All of them are fatal at
/// startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("file-system-path is required")]
    MissingRoot,

    #[error("unknown log level: {0}")]
    UnknownLogLevel(String),

    #[error("cache-size must be a positive integer")]
    InvalidCacheSize,

    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },

    #[error("failed to read {path}: {source}")]
    UnreadableFile { path: String, source: io::Error },

    #[error("failed to parse {path}: {source}")]
    MalformedFile {
        path: String,
        source: serde_json::Error,
    },
}

/// Fully resolved server configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Root directory holding the working and history trees.
    pub file_system_root: PathBuf,
    /// TCP port to listen on.
    pub port: u16,
    pub read_timeout_seconds: u64,
    pub write_timeout_seconds: u64,
    pub idle_timeout_seconds: u64,
    pub log_level: LevelFilter,
    /// Capacity of the repository handle cache.
    pub cache_size: usize,
}

/// WebDAV server with per-file version control.
#[derive(Parser, Debug, Default)]
#[command(name = "davvc-server", version, about)]
struct Cli {
    /// Root directory for the working and history trees
    #[arg(long = "file-system-path", short = 'f', value_name = "PATH")]
    file_system_path: Option<PathBuf>,

    /// Port to listen on
    #[arg(long)]
    port: Option<u16>,

    #[arg(long = "read-timeout-seconds", value_name = "SECONDS")]
    read_timeout_seconds: Option<u64>,

    #[arg(long = "write-timeout-seconds", value_name = "SECONDS")]
    write_timeout_seconds: Option<u64>,

    #[arg(long = "idle-timeout-seconds", value_name = "SECONDS")]
    idle_timeout_seconds: Option<u64>,

    /// One of: debug, info, warning, error
    #[arg(long = "log-level", value_name = "LEVEL")]
    log_level: Option<String>,

    /// Capacity of the repository handle cache
    #[arg(long = "cache-size", value_name = "N")]
    cache_size: Option<i64>,
}

/// One layer of partial configuration; also the shape of `config.json`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
struct Layer {
    file_system_path: Option<PathBuf>,
    port: Option<u16>,
    read_timeout_seconds: Option<u64>,
    write_timeout_seconds: Option<u64>,
    idle_timeout_seconds: Option<u64>,
    log_level: Option<String>,
    cache_size: Option<i64>,
}

impl From<Cli> for Layer {
    fn from(cli: Cli) -> Layer {
        Layer {
            file_system_path: cli.file_system_path,
            port: cli.port,
            read_timeout_seconds: cli.read_timeout_seconds,
            write_timeout_seconds: cli.write_timeout_seconds,
            idle_timeout_seconds: cli.idle_timeout_seconds,
            log_level: cli.log_level,
            cache_size: cli.cache_size,
        }
    }
}

/// Load configuration from the environment, the process arguments and the
/// optional local config file.
pub fn load() -> Result<Config, ConfigError> {
    let env = env_layer()?;
    let flags = Layer::from(Cli::parse());
    let file = file_layer(CONFIG_FILE)?;
    resolve(env, flags, file)
}

fn resolve(env: Layer, flags: Layer, file: Layer) -> Result<Config, ConfigError> {
    let file_system_root = env
        .file_system_path
        .or(flags.file_system_path)
        .or(file.file_system_path)
        .ok_or(ConfigError::MissingRoot)?;

    let log_level = parse_log_level(
        env.log_level
            .or(flags.log_level)
            .or(file.log_level)
            .as_deref()
            .unwrap_or("info"),
    )?;

    let cache_size = env
        .cache_size
        .or(flags.cache_size)
        .or(file.cache_size)
        .unwrap_or(512);
    if cache_size <= 0 {
        return Err(ConfigError::InvalidCacheSize);
    }

    Ok(Config {
        file_system_root,
        port: env.port.or(flags.port).or(file.port).unwrap_or(80),
        read_timeout_seconds: env
            .read_timeout_seconds
            .or(flags.read_timeout_seconds)
            .or(file.read_timeout_seconds)
            .unwrap_or(1),
        write_timeout_seconds: env
            .write_timeout_seconds
            .or(flags.write_timeout_seconds)
            .or(file.write_timeout_seconds)
            .unwrap_or(5),
        idle_timeout_seconds: env
            .idle_timeout_seconds
            .or(flags.idle_timeout_seconds)
            .or(file.idle_timeout_seconds)
            .unwrap_or(120),
        log_level,
        cache_size: cache_size as usize,
    })
}

fn parse_log_level(level: &str) -> Result<LevelFilter, ConfigError> {
    match level {
        "debug" => Ok(LevelFilter::Debug),
        "info" => Ok(LevelFilter::Info),
        "warning" => Ok(LevelFilter::Warn),
        "error" => Ok(LevelFilter::Error),
        other => Err(ConfigError::UnknownLogLevel(other.to_string())),
    }
}

fn env_layer() -> Result<Layer, ConfigError> {
    Ok(Layer {
        file_system_path: env::var("FILE_SYSTEM_PATH").ok().map(PathBuf::from),
        port: env_parse("PORT")?,
        read_timeout_seconds: env_parse("READ_TIMEOUT_SECONDS")?,
        write_timeout_seconds: env_parse("WRITE_TIMEOUT_SECONDS")?,
        idle_timeout_seconds: env_parse("IDLE_TIMEOUT_SECONDS")?,
        log_level: env::var("LOG_LEVEL").ok(),
        cache_size: env_parse("CACHE_SIZE")?,
    })
}

fn env_parse<T: FromStr>(key: &'static str) -> Result<Option<T>, ConfigError> {
    match env::var(key) {
        Ok(value) => value
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { key, value }),
        Err(_) => Ok(None),
    }
}

fn file_layer(path: &str) -> Result<Layer, ConfigError> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Layer::default()),
        Err(err) => {
            return Err(ConfigError::UnreadableFile {
                path: path.to_string(),
                source: err,
            })
        }
    };
    serde_json::from_str(&raw).map_err(|err| ConfigError::MalformedFile {
        path: path.to_string(),
        source: err,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn root_layer() -> Layer {
        Layer {
            file_system_path: Some(PathBuf::from("/srv/dav")),
            ..Layer::default()
        }
    }

    #[test]
    fn defaults_apply() {
        let config = resolve(Layer::default(), Layer::default(), root_layer()).unwrap();
        assert_eq!(config.port, 80);
        assert_eq!(config.read_timeout_seconds, 1);
        assert_eq!(config.write_timeout_seconds, 5);
        assert_eq!(config.idle_timeout_seconds, 120);
        assert_eq!(config.log_level, LevelFilter::Info);
        assert_eq!(config.cache_size, 512);
    }

    #[test]
    fn missing_root_is_fatal() {
        assert!(matches!(
            resolve(Layer::default(), Layer::default(), Layer::default()),
            Err(ConfigError::MissingRoot)
        ));
    }

    #[test]
    fn environment_outranks_flags_and_file() {
        let env = Layer {
            port: Some(8080),
            ..Layer::default()
        };
        let flags = Layer {
            port: Some(9090),
            ..root_layer()
        };
        let file = Layer {
            port: Some(7070),
            ..Layer::default()
        };
        let config = resolve(env, flags, file).unwrap();
        assert_eq!(config.port, 8080);
    }

    #[test]
    fn flags_outrank_file() {
        let flags = Layer {
            cache_size: Some(16),
            ..root_layer()
        };
        let file = Layer {
            cache_size: Some(32),
            ..Layer::default()
        };
        let config = resolve(Layer::default(), flags, file).unwrap();
        assert_eq!(config.cache_size, 16);
    }

    #[test]
    fn unknown_log_level_is_fatal() {
        let flags = Layer {
            log_level: Some("verbose".to_string()),
            ..root_layer()
        };
        assert!(matches!(
            resolve(Layer::default(), flags, Layer::default()),
            Err(ConfigError::UnknownLogLevel(level)) if level == "verbose"
        ));
    }

    #[test]
    fn warning_maps_to_warn() {
        assert_eq!(parse_log_level("warning").unwrap(), LevelFilter::Warn);
    }

    #[test]
    fn non_positive_cache_size_is_fatal() {
        let flags = Layer {
            cache_size: Some(0),
            ..root_layer()
        };
        assert!(matches!(
            resolve(Layer::default(), flags, Layer::default()),
            Err(ConfigError::InvalidCacheSize)
        ));
    }

    #[test]
    fn config_file_layer_parses_kebab_case() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"file-system-path": "/data", "port": 8080, "log-level": "debug"}"#,
        )
        .unwrap();
        let layer = file_layer(path.to_str().unwrap()).unwrap();
        assert_eq!(layer.file_system_path, Some(PathBuf::from("/data")));
        assert_eq!(layer.port, Some(8080));
        assert_eq!(layer.log_level, Some("debug".to_string()));
    }

    #[test]
    fn missing_config_file_is_empty_layer() {
        let layer = file_layer("definitely-not-here.json").unwrap();
        assert!(layer.file_system_path.is_none());
    }
}
