use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::manager::LifecycleState;

/// Error type produced by plugin-authored hooks.
pub type HookError = Box<dyn std::error::Error + Send + Sync>;

/// Result type returned by plugin-authored hooks.
pub type HookResult = Result<(), HookError>;

/// Lifecycle phase a plugin hook runs in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Load,
    Enable,
    Disable,
    Unload,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Load => write!(f, "load"),
            Phase::Enable => write!(f, "enable"),
            Phase::Disable => write!(f, "disable"),
            Phase::Unload => write!(f, "unload"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DescriptorError {
    #[error("Malformed plugin declaration: {reason}")]
    Malformed { reason: String },

    #[error("Invalid plugin name '{name}': {reason}")]
    InvalidName { name: String, reason: String },
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    #[error("Plugin '{plugin}' depends on '{dependency}' which is not available")]
    MissingDependency { plugin: String, dependency: String },

    #[error("Dependency cycle: {}", fmt_cycle(.path))]
    DependencyCycle { path: Vec<String> },
}

fn fmt_cycle(path: &[String]) -> String {
    match path.first() {
        Some(first) => format!("{} -> {}", path.join(" -> "), first),
        None => String::new(),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LocalizationError {
    #[error("Localization resource missing: {path}")]
    ResourceMissing { path: PathBuf },

    #[error("Invalid localization resource {path}: {reason}")]
    InvalidResource { path: PathBuf, reason: String },

    #[error("No translation for '{key}' in locale '{locale}'")]
    NoTranslation { locale: String, key: String },
}

#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("Plugin '{plugin}' failed during {phase}: {source}")]
    HookFailure {
        plugin: String,
        phase: Phase,
        #[source]
        source: HookError,
    },

    #[error("Plugin '{plugin}' timed out during {phase} after {timeout_secs}s")]
    HookTimeout {
        plugin: String,
        phase: Phase,
        timeout_secs: u64,
    },

    #[error("Plugin '{plugin}' requires dependency '{dependency}' in state {required}")]
    DependencyState {
        plugin: String,
        dependency: String,
        required: LifecycleState,
    },

    #[error("Plugin '{plugin}' has state {actual}, required {required}")]
    InvalidState {
        plugin: String,
        required: LifecycleState,
        actual: LifecycleState,
    },

    #[error("Plugin '{0}' is not present in the registry")]
    UnknownPlugin(String),

    #[error("Plugin '{0}' is already registered")]
    AlreadyRegistered(String),

    #[error(transparent)]
    Descriptor(#[from] DescriptorError),
}

impl LifecycleError {
    /// The plugin this error is attributed to, when one is known.
    pub fn plugin(&self) -> Option<&str> {
        match self {
            LifecycleError::HookFailure { plugin, .. }
            | LifecycleError::HookTimeout { plugin, .. }
            | LifecycleError::DependencyState { plugin, .. }
            | LifecycleError::InvalidState { plugin, .. } => Some(plugin),
            LifecycleError::UnknownPlugin(plugin) | LifecycleError::AlreadyRegistered(plugin) => {
                Some(plugin)
            }
            LifecycleError::Descriptor(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_display() {
        assert_eq!(Phase::Load.to_string(), "load");
        assert_eq!(Phase::Enable.to_string(), "enable");
        assert_eq!(Phase::Disable.to_string(), "disable");
        assert_eq!(Phase::Unload.to_string(), "unload");
    }

    #[test]
    fn test_cycle_display() {
        let err = ResolveError::DependencyCycle {
            path: vec!["a".into(), "b".into(), "c".into()],
        };
        assert_eq!(err.to_string(), "Dependency cycle: a -> b -> c -> a");

        let err = ResolveError::DependencyCycle {
            path: vec!["solo".into()],
        };
        assert_eq!(err.to_string(), "Dependency cycle: solo -> solo");
    }

    #[test]
    fn test_missing_dependency_display() {
        let err = ResolveError::MissingDependency {
            plugin: "accounting".into(),
            dependency: "sheet".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("accounting"));
        assert!(msg.contains("sheet"));
    }

    #[test]
    fn test_hook_failure_source() {
        let source: HookError = "database unreachable".into();
        let err = LifecycleError::HookFailure {
            plugin: "members".into(),
            phase: Phase::Enable,
            source,
        };
        let msg = err.to_string();
        assert!(msg.contains("members"));
        assert!(msg.contains("enable"));
        assert!(msg.contains("database unreachable"));
        assert_eq!(err.plugin(), Some("members"));
    }

    #[test]
    fn test_descriptor_error_conversion() {
        let err: LifecycleError = DescriptorError::Malformed {
            reason: "missing end marker".into(),
        }
        .into();
        assert!(matches!(err, LifecycleError::Descriptor(_)));
        assert!(err.plugin().is_none());
    }
}
