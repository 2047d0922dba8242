//! Stack configuration
//!
//! A stack root may carry an optional `stack.toml`:
//!
//! ```toml
//! id_length = 20
//!
//! [block_list]
//! cache_capacity = 1024
//! ```

use crate::core::config::BlockListOptions;
use crate::stack::error::{Result, StackError};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const CONFIG_FILE: &str = "stack.toml";

pub const DEFAULT_ID_LENGTH: usize = 16;
pub const DEFAULT_MAX_ID_ATTEMPTS: usize = 64;

const MIN_ID_LENGTH: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StackConfig {
    /// Characters in a generated bulk or level id
    pub id_length: usize,

    /// Re-rolls before id generation gives up
    pub max_id_attempts: usize,

    /// Options for the bulk, level, and metadata catalogs
    pub block_list: BlockListOptions,
}

impl Default for StackConfig {
    fn default() -> Self {
        StackConfig {
            id_length: DEFAULT_ID_LENGTH,
            max_id_attempts: DEFAULT_MAX_ID_ATTEMPTS,
            block_list: BlockListOptions::default(),
        }
    }
}

impl StackConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: StackConfig =
            toml::from_str(text).map_err(|e| StackError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load `stack.toml` from `root`, falling back to defaults when absent
    pub fn load<P: AsRef<Path>>(root: P) -> Result<Self> {
        let path = root.as_ref().join(CONFIG_FILE);
        if !path.exists() {
            return Ok(StackConfig::default());
        }
        let text = std::fs::read_to_string(&path).map_err(|e| StackError::io(&path, e))?;
        Self::from_toml_str(&text)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string(self).map_err(|e| StackError::Config(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        self.block_list
            .validate()
            .map_err(|e| StackError::Config(e.to_string()))?;

        if self.id_length < MIN_ID_LENGTH {
            return Err(StackError::Config(format!(
                "id_length must be at least {}, got {}",
                MIN_ID_LENGTH, self.id_length
            )));
        }
        if self.max_id_attempts == 0 {
            return Err(StackError::Config(
                "max_id_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
