//! Lifecycle configuration.
//!
//! Loaded from TOML:
//!
//! ```toml
//! [flush]
//! max_batch_bytes = 262144
//! max_batch_statements = 0
//! id_batch_size = 1000
//!
//! [kinds.item]
//! id_field = "itemid"
//! object_table = "items"
//! discovery_table = "item_discovery"
//! lifetime = { type = "after", duration = "7d" }
//! enabled_lifetime = { type = "immediately" }
//! ```
//!
//! Table and field names end up inside SQL text, so [`LifecycleConfig::validate`]
//! only accepts identifiers made of ASCII letters, digits and `_`.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use lapse_core::LifetimePolicy;

use crate::error::ConfigError;
use crate::kind::ObjectKind;

/// Size boundary of one batched-writer execution.
pub const DEFAULT_MAX_BATCH_BYTES: usize = 262_144;

/// Ids per id-list predicate.
pub const DEFAULT_ID_BATCH_SIZE: usize = 1000;

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleConfig {
    #[serde(default)]
    pub flush: FlushConfig,

    /// Object kinds, keyed by kind name.
    #[serde(default)]
    pub kinds: BTreeMap<String, ObjectKindConfig>,
}

/// `[flush]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlushConfig {
    /// A statement batch is executed once its SQL reaches this many bytes.
    pub max_batch_bytes: usize,
    /// A statement batch is executed once it holds this many statements.
    /// 0 disables the count boundary.
    pub max_batch_statements: usize,
    /// Largest id list in one `where <id> in (...)` predicate.
    pub id_batch_size: usize,
}

impl Default for FlushConfig {
    fn default() -> Self {
        FlushConfig {
            max_batch_bytes: DEFAULT_MAX_BATCH_BYTES,
            max_batch_statements: 0,
            id_batch_size: DEFAULT_ID_BATCH_SIZE,
        }
    }
}

/// `[kinds.<name>]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectKindConfig {
    pub id_field: String,
    /// Omit for kinds whose status is not reconciled.
    #[serde(default)]
    pub object_table: Option<String>,
    pub discovery_table: String,
    /// How long a lost object is kept before it is deleted.
    #[serde(default = "never")]
    pub lifetime: LifetimePolicy,
    /// How long a lost object stays enabled before it is disabled.
    #[serde(default = "never")]
    pub enabled_lifetime: LifetimePolicy,
}

fn never() -> LifetimePolicy {
    LifetimePolicy::never()
}

impl ObjectKindConfig {
    pub fn object_kind(&self, name: &str) -> ObjectKind {
        ObjectKind {
            name: name.to_string(),
            id_field: self.id_field.clone(),
            object_table: self.object_table.clone(),
            discovery_table: self.discovery_table.clone(),
        }
    }
}

impl LifecycleConfig {
    /// Parse and validate configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid or fails [`validate`](Self::validate).
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: LifecycleConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Table layout of the named kind.
    pub fn object_kind(&self, name: &str) -> Option<ObjectKind> {
        self.kinds.get(name).map(|k| k.object_kind(name))
    }

    /// Check limits and identifiers.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.flush.max_batch_bytes == 0 {
            return Err(ConfigError::Invalid(
                "flush.max_batch_bytes must be positive".to_string(),
            ));
        }
        if self.flush.id_batch_size == 0 {
            return Err(ConfigError::Invalid(
                "flush.id_batch_size must be positive".to_string(),
            ));
        }

        for (name, kind) in &self.kinds {
            check_identifier("kind name", name)?;
            check_identifier(&format!("kinds.{name}.id_field"), &kind.id_field)?;
            check_identifier(
                &format!("kinds.{name}.discovery_table"),
                &kind.discovery_table,
            )?;
            if let Some(table) = &kind.object_table {
                check_identifier(&format!("kinds.{name}.object_table"), table)?;
            }
        }
        Ok(())
    }
}

/// Read, parse and validate a TOML config file.
pub fn read_config(path: &Path) -> Result<LifecycleConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    LifecycleConfig::from_toml_str(&content)
}

fn check_identifier(what: &str, value: &str) -> Result<(), ConfigError> {
    if value.is_empty() {
        return Err(ConfigError::Invalid(format!("{what} must not be empty")));
    }
    if !value.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_') {
        return Err(ConfigError::Invalid(format!(
            "{what} '{value}' may only contain ASCII letters, digits and '_'"
        )));
    }
    Ok(())
}
