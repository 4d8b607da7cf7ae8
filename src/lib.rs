//! Row encoding and the pluggable storage-engine contract of a relational
//! database: column codecs, rows and keys, table definitions and their
//! cache, transactions with two-phase commit, and two engines.

#[macro_use]
pub mod errors;

pub mod autoinc;
pub mod charset;
pub mod config;
pub mod console;
pub mod definition;
pub mod definition_cache;
pub mod encoding;
pub mod engine;
pub mod field;
pub mod heap;
pub mod key;
pub mod row;
pub mod session;
pub mod tablespace;
pub mod transaction;
pub mod warnings;

pub use config::Config;
pub use engine::{Capabilities, Cursor, EngineRegistry, FindFlag, OpenTable, StorageEngine};
pub use errors::{Error, Result};
pub use session::Session;
