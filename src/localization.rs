//! Locale-keyed help text with fallback-chain resolution.
//!
//! Plugins ship a YAML resource mapping locale → key → text:
//!
//! ```yaml
//! en:
//!   help_shipment: "Track a shipment"
//!   help_shipment_long: "Track a shipment through the delivery pipeline."
//! de:
//!   help_shipment: "Eine Lieferung verfolgen"
//! ```
//!
//! Resources are merged into one process-wide table with last-writer-wins
//! semantics, so a later-loading plugin may deliberately supersede shared
//! keys such as default option translations. The table only grows; lookups
//! may run concurrently with merges.

use std::collections::HashMap;
use std::path::Path;

use dashmap::DashMap;
use tracing::debug;

use crate::error::LocalizationError;

/// Process-wide localization table, owned by the lifecycle manager.
#[derive(Default)]
pub struct LocalizationTable {
    locales: DashMap<String, HashMap<String, String>>,
}

impl LocalizationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a plugin-supplied YAML resource into the table.
    ///
    /// Existing keys are overwritten (last writer wins).
    pub fn load_resource(&self, path: &Path) -> Result<(), LocalizationError> {
        if !path.exists() {
            return Err(LocalizationError::ResourceMissing {
                path: path.to_path_buf(),
            });
        }
        let content =
            std::fs::read_to_string(path).map_err(|e| LocalizationError::InvalidResource {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        let parsed: HashMap<String, HashMap<String, String>> = serde_yaml_bw::from_str(&content)
            .map_err(|e| LocalizationError::InvalidResource {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        for (locale, entries) in parsed {
            debug!(
                locale = %locale,
                keys = entries.len(),
                path = %path.display(),
                "Merging localization resource"
            );
            let mut slot = self.locales.entry(locale).or_default();
            slot.extend(entries);
        }
        Ok(())
    }

    /// Insert a single translation, overwriting any previous value.
    pub fn insert(
        &self,
        locale: impl Into<String>,
        key: impl Into<String>,
        text: impl Into<String>,
    ) {
        self.locales
            .entry(locale.into())
            .or_default()
            .insert(key.into(), text.into());
    }

    /// Direct lookup of one key under one locale. No fallback is applied.
    pub fn get(&self, locale: &str, key: &str) -> Option<String> {
        self.locales
            .get(locale)
            .and_then(|entries| entries.get(key).cloned())
    }

    pub fn locale_count(&self) -> usize {
        self.locales.len()
    }

    /// Resolve help text for a command or one of its options.
    ///
    /// Subcommands in `command` are joined by underscores ("shipment add"
    /// becomes `shipment_add`). The fallback chain for a command is
    /// `help_{cmd}_long`, `help_{cmd}`, then the caller-supplied default;
    /// for an option it is `help_{cmd}_{opt}_long`, `help_{cmd}_{opt}`,
    /// `help_{opt}_long`, `help_{opt}`, then the default. `_long` variants
    /// are only queried when `long` is requested. A miss never falls back to
    /// a different locale; the chain advances under the requested locale
    /// only, and exhaustion without a default is `NoTranslation`.
    pub fn resolve_help(
        &self,
        locale: &str,
        command: &str,
        option: Option<&str>,
        long: bool,
        default: Option<&str>,
    ) -> Result<String, LocalizationError> {
        let cmd = command.trim().replace(' ', "_");
        let mut keys = Vec::new();
        match option {
            None => {
                if long {
                    keys.push(format!("help_{cmd}_long"));
                }
                keys.push(format!("help_{cmd}"));
            }
            Some(opt) => {
                if long {
                    keys.push(format!("help_{cmd}_{opt}_long"));
                }
                keys.push(format!("help_{cmd}_{opt}"));
                if long {
                    keys.push(format!("help_{opt}_long"));
                }
                keys.push(format!("help_{opt}"));
            }
        }
        for key in &keys {
            if let Some(text) = self.get(locale, key) {
                return Ok(text);
            }
        }
        if let Some(default) = default {
            return Ok(default.to_string());
        }
        Err(LocalizationError::NoTranslation {
            locale: locale.to_string(),
            key: keys.pop().unwrap_or_default(),
        })
    }
}
