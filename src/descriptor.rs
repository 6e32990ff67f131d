//! Plugin declaration parsing.
//!
//! Every plugin carries its identity metadata in a comment-only block at the
//! very start of its source, delimited by a start and end marker line:
//!
//! ```text
//! # PluginConfig
//! # Name: ShipmentTracker
//! # Author: Blaumeise03
//! # Depends-On: [sheet.main, members]
//! # Localization: shipment_lang.yaml
//! # End
//! ```
//!
//! Comment lines before the start marker are tolerated; any non-comment
//! content before it makes the declaration malformed. `Name` and `Depends-On`
//! are required, `Author` and `Localization` are optional. Field names are
//! case-sensitive.

use std::path::{Path, PathBuf};

use crate::error::DescriptorError;

const BLOCK_START: &str = "PluginConfig";
const BLOCK_END: &str = "End";

/// Identity metadata parsed from a plugin's declaration block.
///
/// Immutable once parsed; one descriptor exists per registered plugin.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PluginDescriptor {
    name: String,
    author: Option<String>,
    dependencies: Vec<String>,
    localization: Option<PathBuf>,
}

impl PluginDescriptor {
    /// Parse a declaration block from the leading text of a plugin source.
    pub fn parse(source: &str) -> Result<Self, DescriptorError> {
        let mut in_block = false;
        let mut saw_end = false;
        let mut name: Option<String> = None;
        let mut author: Option<String> = None;
        let mut dependencies: Option<Vec<String>> = None;
        let mut localization: Option<PathBuf> = None;

        for line in source.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            if !trimmed.starts_with('#') {
                if in_block {
                    return Err(DescriptorError::Malformed {
                        reason: "declaration block interrupted before end marker".into(),
                    });
                }
                return Err(DescriptorError::Malformed {
                    reason: "non-comment content before declaration block".into(),
                });
            }
            let body = trimmed.trim_start_matches('#').trim();
            if !in_block {
                if body == BLOCK_START {
                    in_block = true;
                }
                continue;
            }
            if body == BLOCK_END {
                saw_end = true;
                break;
            }
            let Some((field, value)) = body.split_once(':') else {
                continue;
            };
            let value = value.trim();
            match field.trim() {
                "Name" => name = Some(value.to_string()),
                "Author" => author = Some(value.to_string()),
                "Depends-On" => dependencies = Some(parse_dependency_list(value)?),
                "Localization" => localization = Some(PathBuf::from(value)),
                _ => {}
            }
        }

        if !in_block {
            return Err(DescriptorError::Malformed {
                reason: "missing start marker".into(),
            });
        }
        if !saw_end {
            return Err(DescriptorError::Malformed {
                reason: "missing end marker".into(),
            });
        }
        let name = name.ok_or_else(|| DescriptorError::Malformed {
            reason: "missing required field 'Name'".into(),
        })?;
        if name.is_empty() {
            return Err(DescriptorError::InvalidName {
                name,
                reason: "must not be empty".into(),
            });
        }
        if name.chars().any(char::is_whitespace) {
            return Err(DescriptorError::InvalidName {
                name,
                reason: "must not contain whitespace".into(),
            });
        }
        let dependencies = dependencies.ok_or_else(|| DescriptorError::Malformed {
            reason: "missing required field 'Depends-On'".into(),
        })?;

        Ok(Self {
            name,
            author,
            dependencies,
            localization,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn author(&self) -> Option<&str> {
        self.author.as_deref()
    }

    /// Declared dependencies, first occurrence wins, duplicates removed.
    pub fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    /// Localization resource path, relative to the plugin's own location.
    pub fn localization(&self) -> Option<&Path> {
        self.localization.as_deref()
    }
}

fn parse_dependency_list(value: &str) -> Result<Vec<String>, DescriptorError> {
    let Some(inner) = value
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
    else {
        return Err(DescriptorError::Malformed {
            reason: format!("'Depends-On' must be a bracketed list, got '{value}'"),
        });
    };
    let mut deps = Vec::new();
    for entry in inner.split(',') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        if !deps.iter().any(|d| d == entry) {
            deps.push(entry.to_string());
        }
    }
    Ok(deps)
}
