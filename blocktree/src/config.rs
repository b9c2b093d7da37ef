//! Engine configuration module.
//!
//! This module provides configuration loading for the blocktree binary from
//! environment variables.
//!
//! # Environment Variables
//!
//! - `BLOCKTREE_DATA_FILE`: Block file backing the tree (default: `./data/blocktree.dat`)
//! - `BLOCKTREE_MIN_DEGREE`: Minimum degree `t` of the tree (default: `3`)
//! - `BLOCKTREE_BLOCK_SIZE`: Block size in bytes (default: `4096`)
//! - `BLOCKTREE_CACHE_CAPACITY`: Page cache capacity in nodes (default: `100`)
//!
//! # Invariants
//!
//! - `min_degree >= 2`
//! - `block_size` can hold a full node of `min_degree`
//! - `cache_capacity >= 1`

use std::path::PathBuf;

use crate::btree::max_encoded_size;
use crate::storage::DEFAULT_BLOCK_SIZE;

const DATA_FILE_VAR: &str = "BLOCKTREE_DATA_FILE";
const MIN_DEGREE_VAR: &str = "BLOCKTREE_MIN_DEGREE";
const BLOCK_SIZE_VAR: &str = "BLOCKTREE_BLOCK_SIZE";
const CACHE_CAPACITY_VAR: &str = "BLOCKTREE_CACHE_CAPACITY";

/// Engine configuration.
///
/// # Post-conditions
///
/// When constructed via `from_env()` or `from_lookup()`, the values satisfy
/// every check `BTree::new` makes, so construction cannot fail on them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Block file backing the tree. Created if missing.
    pub data_file: PathBuf,
    /// Minimum degree `t`.
    pub min_degree: usize,
    /// Block size in bytes. Must match the size the file was created with.
    pub block_size: usize,
    /// Maximum number of decoded nodes kept in memory.
    pub cache_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_file: PathBuf::from(Self::DEFAULT_DATA_FILE),
            min_degree: Self::DEFAULT_MIN_DEGREE,
            block_size: DEFAULT_BLOCK_SIZE,
            cache_capacity: Self::DEFAULT_CACHE_CAPACITY,
        }
    }
}

/// Error returned when loading configuration fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    InvalidValue { name: String, message: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidValue { name, message } => {
                write!(f, "invalid value for {name}: {message}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl EngineConfig {
    /// Default block file.
    pub const DEFAULT_DATA_FILE: &'static str = "./data/blocktree.dat";
    /// Default minimum degree.
    pub const DEFAULT_MIN_DEGREE: usize = 3;
    /// Default page cache capacity.
    pub const DEFAULT_CACHE_CAPACITY: usize = 100;

    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set but not a valid number, or if
    /// the values together cannot build a tree.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through `lookup`, which maps a variable name to its
    /// value.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let data_file = lookup(DATA_FILE_VAR)
            .filter(|value| !value.is_empty())
            .map_or_else(|| PathBuf::from(Self::DEFAULT_DATA_FILE), PathBuf::from);
        let min_degree = load_number(&lookup, MIN_DEGREE_VAR, Self::DEFAULT_MIN_DEGREE)?;
        let block_size = load_number(&lookup, BLOCK_SIZE_VAR, DEFAULT_BLOCK_SIZE)?;
        let cache_capacity = load_number(&lookup, CACHE_CAPACITY_VAR, Self::DEFAULT_CACHE_CAPACITY)?;

        let config = Self {
            data_file,
            min_degree,
            block_size,
            cache_capacity,
        };
        config.validate()?;
        Ok(config)
    }

    /// Scratch file for the demo's performance run, next to `data_file`.
    #[must_use]
    pub fn perf_data_file(&self) -> PathBuf {
        self.data_file.with_extension("perf.dat")
    }

    /// Check the values against what the tree accepts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_degree < 2 {
            return Err(invalid(MIN_DEGREE_VAR, "must be at least 2"));
        }
        if self.cache_capacity == 0 {
            return Err(invalid(CACHE_CAPACITY_VAR, "must be at least 1"));
        }

        if u32::try_from(self.block_size).is_err() {
            return Err(invalid(BLOCK_SIZE_VAR, "must fit in 32 bits"));
        }
        // Bounds the size computation below.
        if self.min_degree > self.block_size {
            return Err(invalid(MIN_DEGREE_VAR, "is too large for the block size"));
        }

        let required = max_encoded_size(self.min_degree);
        if self.block_size < required {
            return Err(invalid(
                BLOCK_SIZE_VAR,
                &format!(
                    "{} bytes cannot hold a node of minimum degree {} ({required} bytes needed)",
                    self.block_size, self.min_degree
                ),
            ));
        }

        Ok(())
    }
}

/// Parse a numeric variable, returning `default` if it is unset.
fn load_number<F>(lookup: &F, name: &str, default: usize) -> Result<usize, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        Some(value) => value
            .trim()
            .parse::<usize>()
            .map_err(|_| invalid(name, &format!("'{value}' is not a valid number"))),
        None => Ok(default),
    }
}

fn invalid(name: &str, message: &str) -> ConfigError {
    ConfigError::InvalidValue {
        name: name.to_string(),
        message: message.to_string(),
    }
}
