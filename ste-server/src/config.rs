use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use argh::FromArgs;
use figment::providers::{Env, Format, Serialized, Yaml};
use serde::{Deserialize, Serialize};
use ste_engine::blob::RetryOptions;
use ste_engine::{DEFAULT_ENGINE_BLOCK_SIZE, EngineConfig};
use tracing::level_filters::LevelFilter;

const ENV_PREFIX: &str = "STE_";

/// The blob client wiring of the server.
///
/// The transport client library is pluggable; the in-memory variant keeps
/// everything inside the process, for local runs and tests.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BlobClientKind {
    /// An in-process client without a network.
    Memory,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineSection {
    /// Chunk size for orders that let the engine choose, in bytes.
    pub block_size: u64,
    /// Worker pool size; unset picks `min(8, 4 x cpus)`.
    pub workers: Option<usize>,
    /// Per-priority chunk queue capacity.
    pub chunk_queue_capacity: usize,
    /// Seconds terminal plans are kept before the janitor deletes them.
    pub plan_ttl_secs: u64,
    /// Seconds between janitor sweeps.
    pub janitor_interval_secs: u64,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_ENGINE_BLOCK_SIZE,
            workers: None,
            chunk_queue_capacity: 1000,
            plan_ttl_secs: 24 * 60 * 60,
            janitor_interval_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Retry {
    pub max_tries: u32,
    pub try_timeout_secs: u64,
    pub retry_delay_ms: u64,
    pub max_retry_delay_ms: u64,
}

impl Default for Retry {
    fn default() -> Self {
        let defaults = RetryOptions::default();
        Self {
            max_tries: defaults.max_tries,
            try_timeout_secs: defaults.try_timeout.as_secs(),
            retry_delay_ms: defaults.retry_delay.as_millis() as u64,
            max_retry_delay_ms: defaults.max_retry_delay.as_millis() as u64,
        }
    }
}

impl Retry {
    pub fn to_options(&self) -> RetryOptions {
        RetryOptions {
            max_tries: self.max_tries,
            try_timeout: Duration::from_secs(self.try_timeout_secs),
            retry_delay: Duration::from_millis(self.retry_delay_ms),
            max_retry_delay: Duration::from_millis(self.max_retry_delay_ms),
        }
    }
}

/// How transfer log lines are rendered.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Picks [`LogFormat::Pretty`] on a TTY and [`LogFormat::Simplified`]
    /// when output is redirected, e.g. into a job log file.
    Auto,
    /// Compact colored lines for interactive runs.
    Pretty,
    /// Timestamped plain text, one line per event.
    Simplified,
    /// JSON lines, for shipping engine logs to a collector.
    Json,
}

/// The least severe event level the engine writes out.
///
/// This caps the engine's own `tracing` output; the per-order
/// `log_verbosity` carried by job part orders is recorded in the plan but
/// does not widen this cap.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// No engine logging at all.
    Off,
    /// Failed transfers, plan corruption, engine faults.
    Error,
    /// Suspicious but non-fatal conditions, e.g. a mutated source.
    Warn,
    /// Transfer lifecycle events; the default.
    Info,
    /// Per-chunk scheduling and retry detail.
    Debug,
    /// Everything, including queue internals.
    Trace,
}

impl LogLevel {
    /// The `tracing` filter equivalent of this level.
    pub fn to_filter(self) -> LevelFilter {
        match self {
            LogLevel::Off => LevelFilter::OFF,
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Trace => LevelFilter::TRACE,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Logging {
    pub level: LogLevel,
    pub format: LogFormat,
}

impl Default for Logging {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            format: LogFormat::Auto,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Address of the local control listener.
    pub control_addr: SocketAddr,

    /// Directory for plan files; unset falls back to `$AZCOPY_STATE_DIR`
    /// and then `~/.azcopy`.
    pub state_dir: Option<PathBuf>,

    pub blob_client: BlobClientKind,
    pub engine: EngineSection,
    pub retry: Retry,
    pub logging: Logging,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            control_addr: "127.0.0.1:1337".parse().unwrap(),
            state_dir: None,
            blob_client: BlobClientKind::Memory,
            engine: EngineSection::default(),
            retry: Retry::default(),
            logging: Logging::default(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let args: Args = argh::from_env();
        Self::from_args(args)
    }

    pub fn from_args(args: Args) -> Result<Self> {
        let mut figment = figment::Figment::from(Serialized::defaults(Config::default()));
        if let Some(config_path) = &args.config {
            figment = figment.merge(Yaml::file(config_path));
        }
        let config = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;

        Ok(config)
    }

    /// The resolved state directory.
    pub fn state_dir(&self) -> PathBuf {
        if let Some(dir) = &self.state_dir {
            return dir.clone();
        }
        if let Some(dir) = std::env::var_os("AZCOPY_STATE_DIR") {
            return PathBuf::from(dir);
        }
        let home = std::env::var_os("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));
        home.join(".azcopy")
    }

    /// The engine configuration derived from this server configuration.
    pub fn engine_config(&self) -> EngineConfig {
        let mut engine = EngineConfig::new(self.state_dir());
        engine.block_size = self.engine.block_size;
        if let Some(workers) = self.engine.workers {
            engine.workers = workers;
        }
        engine.chunk_queue_capacity = self.engine.chunk_queue_capacity;
        engine.plan_ttl = Duration::from_secs(self.engine.plan_ttl_secs);
        engine.janitor_interval = Duration::from_secs(self.engine.janitor_interval_secs);
        engine
    }
}

/// Command line arguments for the server.
#[derive(Debug, Default, FromArgs)]
pub struct Args {
    /// path to the yaml configuration file
    #[argh(option, short = 'c')]
    pub config: Option<PathBuf>,
}
