//! Command-line interface parsing for Pitwall
//!
//! This module handles parsing of CLI arguments and environment settings using
//! clap, and validates them into a `Config` before any command runs.

use chrono::{Datelike, Local};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::cache::{CacheManager, Params};
use crate::data::{RetryPolicy, OPENF1_BASE_URL};
use crate::data::endpoint::YEAR;
use crate::export::ExportFormat;
use crate::navigation::{Level, NavigationContext, NavigationError};

/// Longest accepted per-request timeout
const MAX_TIMEOUT_SECS: u64 = 300;

/// Largest accepted attempt count
const MAX_ATTEMPTS: u32 = 10;

/// Endpoint alias for this season's sessions
const CURRENT_ALIAS: &str = "current";

/// Error types for invalid configuration or arguments
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid timeout: {0}s. Expected 1 to 300 seconds")]
    InvalidTimeout(u64),

    #[error("Invalid max attempts: {0}. Expected 1 to 10")]
    InvalidMaxAttempts(u32),

    #[error("Invalid base URL: '{0}'. Expected an http:// or https:// URL")]
    InvalidBaseUrl(String),

    #[error("Could not determine a cache directory. Set PITWALL_CACHE_DIR or pass --no-cache")]
    NoCacheDir,

    #[error("Cache path {0} exists and is not a directory")]
    CacheDirNotADirectory(PathBuf),

    #[error("Invalid parameter: '{0}'. Expected KEY=VALUE")]
    InvalidParam(String),

    #[error("Invalid context: {0}")]
    InvalidContext(#[from] NavigationError),

    #[error("Invalid format: '{0}'. Valid formats: json, csv")]
    InvalidFormat(String),

    #[error("Endpoint name must not be empty")]
    EmptyEndpoint,
}

/// Pitwall - Explore and export Formula 1 data from the OpenF1 API
#[derive(Parser, Debug)]
#[command(name = "pitwall")]
#[command(about = "Explore and export Formula 1 data from the OpenF1 API")]
#[command(version)]
pub struct Cli {
    /// Timeout for each request attempt, in seconds
    #[arg(long, env = "PITWALL_TIMEOUT_SECS", default_value_t = 10, global = true)]
    pub timeout_secs: u64,

    /// Total attempts per request, including retries
    #[arg(long, env = "PITWALL_MAX_ATTEMPTS", default_value_t = 4, global = true)]
    pub max_attempts: u32,

    /// Bypass the response cache entirely
    #[arg(long, env = "PITWALL_NO_CACHE", global = true, value_parser = clap::builder::FalseyValueParser::new())]
    pub no_cache: bool,

    /// Directory for cached responses
    #[arg(long, env = "PITWALL_CACHE_DIR", value_name = "DIR", global = true)]
    pub cache_dir: Option<PathBuf>,

    /// OpenF1 API base URL
    #[arg(long, env = "PITWALL_BASE_URL", default_value = OPENF1_BASE_URL, global = true)]
    pub base_url: String,

    /// Log debug output to stderr
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(flatten)]
    pub context: ContextArgs,

    #[command(subcommand)]
    pub command: Command,
}

/// Navigation position to start from; levels must be given top-down
#[derive(Args, Debug, Default, Clone)]
pub struct ContextArgs {
    /// Season, e.g. 2024
    #[arg(long, global = true)]
    pub year: Option<String>,

    /// Meeting (Grand Prix) key
    #[arg(long, global = true)]
    pub meeting: Option<String>,

    /// Session key
    #[arg(long, global = true)]
    pub session: Option<String>,

    /// Driver number
    #[arg(long, global = true)]
    pub driver: Option<String>,
}

impl ContextArgs {
    /// Builds a navigation context by drilling down through the given levels
    ///
    /// # Returns
    /// * `Err(ConfigError::InvalidContext)` if a level is skipped, e.g. a
    ///   session without its meeting
    pub fn to_navigation(&self) -> Result<NavigationContext, ConfigError> {
        let mut context = NavigationContext::new();
        let levels = [
            (Level::Year, &self.year),
            (Level::Meeting, &self.meeting),
            (Level::Session, &self.session),
            (Level::Driver, &self.driver),
        ];
        for (level, key) in levels {
            if let Some(key) = key {
                context.push(level, key)?;
            }
        }
        Ok(context)
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Fetch an endpoint and print the JSON response
    Fetch {
        /// Endpoint name, e.g. laps, stints, sessions
        endpoint: String,

        /// Query filters such as session_key=9636
        #[arg(value_name = "KEY=VALUE")]
        params: Vec<String>,

        /// Ignore cached data and fetch from the API
        #[arg(long)]
        refresh: bool,
    },

    /// Export an endpoint to a JSON or CSV file
    ///
    /// Examples:
    ///   pitwall --year 2024 --meeting 1229 --session 9636 --driver 44 export laps --format csv
    ///   pitwall export stints session_key=9636 driver_number=44 format=csv
    ///   pitwall export meetings year=2024
    Export {
        /// Endpoint name, or `current` for this season's sessions
        endpoint: String,

        /// Query filters; `format=csv` is accepted as well
        #[arg(value_name = "KEY=VALUE")]
        params: Vec<String>,

        #[arg(long, value_enum, default_value_t = ExportFormat::Json)]
        format: ExportFormat,

        /// Ignore cached data and fetch from the API
        #[arg(long)]
        refresh: bool,

        /// Exact output file; defaults to f1-<endpoint>-<timestamp>.<ext>
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,

        /// Directory for generated file names
        #[arg(long, value_name = "DIR", default_value = ".")]
        output_dir: PathBuf,
    },

    /// Inspect or clear the response cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum CacheAction {
    /// Show entry counts and ages
    Stats,
    /// Remove cached entries, optionally for one endpoint only
    Clear { endpoint: Option<String> },
    /// Show where the cache lives and how long entries stay fresh
    Info,
}

/// Validated runtime settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Timeout for each request attempt
    pub timeout: Duration,
    pub retry: RetryPolicy,
    pub base_url: String,
    /// Cache location; `None` when caching is disabled
    pub cache_dir: Option<PathBuf>,
}

impl Config {
    /// Validates CLI and environment settings
    ///
    /// # Returns
    /// * `Ok(Config)` with appropriate settings
    /// * `Err(ConfigError)` for the first invalid value
    pub fn from_cli(cli: &Cli) -> Result<Self, ConfigError> {
        if cli.timeout_secs == 0 || cli.timeout_secs > MAX_TIMEOUT_SECS {
            return Err(ConfigError::InvalidTimeout(cli.timeout_secs));
        }
        if cli.max_attempts == 0 || cli.max_attempts > MAX_ATTEMPTS {
            return Err(ConfigError::InvalidMaxAttempts(cli.max_attempts));
        }

        let base_url = cli.base_url.trim();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(ConfigError::InvalidBaseUrl(cli.base_url.clone()));
        }

        let cache_dir = if cli.no_cache {
            None
        } else {
            let dir = match &cli.cache_dir {
                Some(dir) => dir.clone(),
                None => CacheManager::default_dir().ok_or(ConfigError::NoCacheDir)?,
            };
            if dir.exists() && !dir.is_dir() {
                return Err(ConfigError::CacheDirNotADirectory(dir));
            }
            Some(dir)
        };

        Ok(Config {
            timeout: Duration::from_secs(cli.timeout_secs),
            retry: RetryPolicy {
                max_attempts: cli.max_attempts,
                ..RetryPolicy::default()
            },
            base_url: base_url.to_string(),
            cache_dir,
        })
    }

    pub fn cache_enabled(&self) -> bool {
        self.cache_dir.is_some()
    }
}

/// Parses `KEY=VALUE` arguments into request parameters
pub fn parse_params(args: &[String]) -> Result<Params, ConfigError> {
    args.iter()
        .map(|arg| match arg.split_once('=') {
            Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
            _ => Err(ConfigError::InvalidParam(arg.clone())),
        })
        .collect()
}

/// Removes a `format=...` pseudo-parameter, returning the format it names
pub fn take_format(params: &mut Params) -> Result<Option<ExportFormat>, ConfigError> {
    match params.remove("format") {
        Some(value) => value
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidFormat(value)),
        None => Ok(None),
    }
}

/// Rejects endpoint names that cannot address an API resource
pub fn validate_endpoint(endpoint: &str) -> Result<&str, ConfigError> {
    let trimmed = endpoint.trim();
    if trimmed.is_empty() {
        return Err(ConfigError::EmptyEndpoint);
    }
    Ok(trimmed)
}

/// Expands endpoint aliases: `current` means this season's sessions
pub fn resolve_alias(endpoint: &str, mut params: Params) -> Result<(String, Params), ConfigError> {
    let endpoint = validate_endpoint(endpoint)?;
    if endpoint == CURRENT_ALIAS {
        params
            .entry(YEAR.to_string())
            .or_insert_with(|| Local::now().year().to_string());
        return Ok(("sessions".to_string(), params));
    }
    Ok((endpoint.to_string(), params))
}
