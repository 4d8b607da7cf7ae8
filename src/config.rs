use crate::transaction::IsolationLevel;
use clap::Args;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_ENGINE: &str = "tablespace";
pub const DEFAULT_TABLE_DEFINITION_CACHE_SIZE: usize = 256;
pub const DEFAULT_LOCK_WAIT_TIMEOUT_MS: u64 = 1000;

/// Runtime configuration shared by the registry and the engines.
///
/// Every option can be given on the command line or through a `TABLEKIT_*`
/// environment variable.
#[derive(Args, Debug, Clone)]
pub struct Config {
    /// Directory holding schemas, table definitions and engine data files.
    #[arg(long, env = "TABLEKIT_DATA_DIR", default_value_os_t = default_data_dir())]
    pub data_dir: PathBuf,

    /// Soft capacity of the table definition cache.
    #[arg(long, env = "TABLEKIT_TABLE_DEFINITION_CACHE", default_value_t = DEFAULT_TABLE_DEFINITION_CACHE_SIZE)]
    pub table_definition_cache_size: usize,

    /// How long a row lock request waits before giving up.
    #[arg(long, env = "TABLEKIT_LOCK_WAIT_TIMEOUT_MS", default_value_t = DEFAULT_LOCK_WAIT_TIMEOUT_MS)]
    pub lock_wait_timeout_ms: u64,

    /// Isolation level for new sessions.
    #[arg(long, env = "TABLEKIT_ISOLATION", value_enum, default_value_t = IsolationLevel::RepeatableRead)]
    pub default_isolation: IsolationLevel,

    /// Engine used when a table definition does not name one.
    #[arg(long, env = "TABLEKIT_DEFAULT_ENGINE", default_value = DEFAULT_ENGINE)]
    pub default_engine: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            data_dir: default_data_dir(),
            table_definition_cache_size: DEFAULT_TABLE_DEFINITION_CACHE_SIZE,
            lock_wait_timeout_ms: DEFAULT_LOCK_WAIT_TIMEOUT_MS,
            default_isolation: IsolationLevel::RepeatableRead,
            default_engine: DEFAULT_ENGINE.to_string(),
        }
    }
}

impl Config {
    /// Config rooted at `data_dir` with everything else defaulted.
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Config {
            data_dir: data_dir.into(),
            ..Config::default()
        }
    }

    pub fn lock_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_wait_timeout_ms)
    }

    pub fn lock_wait_timeout_ms(mut self, ms: u64) -> Self {
        self.lock_wait_timeout_ms = ms;
        self
    }

    pub fn default_isolation(mut self, level: IsolationLevel) -> Self {
        self.default_isolation = level;
        self
    }
}

/// `<local data dir>/tablekit`, or `./data` when the platform has none.
pub fn default_data_dir() -> PathBuf {
    match dirs::data_local_dir() {
        Some(dir) => dir.join("tablekit"),
        None => PathBuf::from("data"),
    }
}
