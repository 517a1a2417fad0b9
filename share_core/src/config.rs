//! Command line configuration for the `share` server.
//!
//! ```bash
//! share -h 0.0.0.0 -p 8080 -m text/html index.html
//! share --pipe-threshold 262144 --idle-timeout 30 -v big.iso
//! ```

use crate::os::MAX_EVENTS_CEILING;
use clap::{ArgAction, Parser};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_MIME_TYPE: &str = "text/plain";
/// Payloads (header + file) below this many bytes are preloaded into pipes.
pub const DEFAULT_PIPE_THRESHOLD: u64 = 1024 * 1024;
pub const DEFAULT_MAX_EVENTS: usize = 1024;

/// Immutable server configuration, resolved once before the engine starts.
#[derive(Debug, Clone, Parser)]
#[command(name = "share", version, disable_help_flag = true)]
#[command(about = "Serve one file to every client over HTTP/1.0, zero-copy")]
pub struct ServeConfig {
    /// Print help
    #[arg(long, action = ArgAction::Help)]
    help: Option<bool>,

    /// Host or IP to listen on
    #[arg(short = 'h', long, default_value = DEFAULT_HOST)]
    pub host: String,

    /// Port to listen on
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Mime type of the file
    #[arg(short, long = "mimetype", default_value = DEFAULT_MIME_TYPE)]
    pub mimetype: String,

    /// Payloads smaller than this (in bytes, header included) are broadcast from kernel pipes
    #[arg(long, default_value_t = DEFAULT_PIPE_THRESHOLD)]
    pub pipe_threshold: u64,

    /// Retire connections that make no progress for this many seconds (0 = never)
    #[arg(long, default_value_t = 0)]
    pub idle_timeout: u64,

    /// Readiness events handled per wait
    #[arg(long, default_value_t = DEFAULT_MAX_EVENTS)]
    pub max_events: usize,

    /// More logging (repeatable)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,

    /// Only log errors
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,

    /// File to serve
    #[arg(value_name = "FILE")]
    pub file: PathBuf,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("host must not be empty")]
    EmptyHost,
    #[error("mimetype must not be empty")]
    EmptyMimeType,
    #[error("mimetype {0:?} contains a line break")]
    InvalidMimeType(String),
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
    #[error("{name} must be at most {max}")]
    TooLarge { name: &'static str, max: usize },
}

impl ServeConfig {
    /// Defaults for everything but the served file.
    pub fn new(file: impl Into<PathBuf>) -> Self {
        ServeConfig {
            help: None,
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            mimetype: DEFAULT_MIME_TYPE.to_string(),
            pipe_threshold: DEFAULT_PIPE_THRESHOLD,
            idle_timeout: 0,
            max_events: DEFAULT_MAX_EVENTS,
            verbose: 0,
            quiet: false,
            file: file.into(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::EmptyHost);
        }
        if self.mimetype.trim().is_empty() {
            return Err(ConfigError::EmptyMimeType);
        }
        if self.mimetype.contains(['\r', '\n']) {
            return Err(ConfigError::InvalidMimeType(self.mimetype.clone()));
        }
        if self.max_events == 0 {
            return Err(ConfigError::Zero("max-events"));
        }
        if self.max_events > MAX_EVENTS_CEILING {
            return Err(ConfigError::TooLarge {
                name: "max-events",
                max: MAX_EVENTS_CEILING,
            });
        }
        if self.pipe_threshold == 0 {
            return Err(ConfigError::Zero("pipe-threshold"));
        }
        Ok(())
    }

    /// `host:port`, as handed to the resolver.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout > 0).then(|| Duration::from_secs(self.idle_timeout))
    }

    /// Signed verbosity: -1 with `-q`, otherwise the number of `-v` flags.
    pub fn verbosity(&self) -> i8 {
        if self.quiet {
            -1
        } else {
            self.verbose.min(i8::MAX as u8) as i8
        }
    }
}
