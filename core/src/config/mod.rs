//! Pool sizing.
//!
//! Defaults can be overridden from a TOML file or from `VARPOOL_*`
//! environment variables. The process-wide configuration is read once on
//! first use.

use std::path::Path;

use anyhow::{Context, Result, bail};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::table::{DEFAULT_PRIMARY_SIZE, MAX_INITIAL_PRIMARY_SIZE};

#[cfg(test)]
mod config_test;

pub const DICT_SIZE_ENV: &str = "VARPOOL_DICT_SIZE";
pub const STEM_SIZE_ENV: &str = "VARPOOL_STEM_SIZE";
pub const SCOPE_SIZE_ENV: &str = "VARPOOL_SCOPE_SIZE";

static GLOBAL: Lazy<PoolConfig> = Lazy::new(PoolConfig::from_env);

/// Initial primary sizes of the tables the pool builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Free-standing dictionaries (activations, globals).
    pub dictionary_size: usize,
    /// Tail tables of stems.
    pub stem_size: usize,
    /// Per-scope object dictionaries.
    pub scope_size: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            dictionary_size: DEFAULT_PRIMARY_SIZE,
            stem_size: 11,
            scope_size: 7,
        }
    }
}

impl PoolConfig {
    /// The configuration shared by every table built without an explicit one.
    pub fn global() -> &'static PoolConfig {
        &GLOBAL
    }

    pub fn from_env() -> Self {
        Self::default().with_env(|key| std::env::var(key).ok())
    }

    /// Apply overrides from `lookup`. Values outside
    /// `1..=MAX_INITIAL_PRIMARY_SIZE` are ignored with a warning.
    pub fn with_env(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        for (key, field) in [
            (DICT_SIZE_ENV, &mut self.dictionary_size),
            (STEM_SIZE_ENV, &mut self.stem_size),
            (SCOPE_SIZE_ENV, &mut self.scope_size),
        ] {
            let Some(raw) = lookup(key) else { continue };
            match raw.trim().parse::<usize>() {
                Ok(size) if (1..=MAX_INITIAL_PRIMARY_SIZE).contains(&size) => *field = size,
                _ => warn!(target: "varpool::config", key, value = %raw, "config.invalid_size"),
            }
        }
        self
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: PoolConfig = toml::from_str(text).context("invalid pool configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        for (name, size) in [
            ("dictionary_size", self.dictionary_size),
            ("stem_size", self.stem_size),
            ("scope_size", self.scope_size),
        ] {
            if !(1..=MAX_INITIAL_PRIMARY_SIZE).contains(&size) {
                bail!("{} must be between 1 and {}, got {}", name, MAX_INITIAL_PRIMARY_SIZE, size);
            }
        }
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
        Self::from_toml_str(&text).with_context(|| format!("in {}", path.display()))
    }
}
