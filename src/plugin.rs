//! The plugin capability interface and the startup registry.
//!
//! Plugins implement [`Plugin`] with any subset of the four lifecycle hooks;
//! missing hooks are no-ops. Load and unload are synchronous, enable and
//! disable are asynchronous and may perform blocking calls (the manager
//! serializes them). A [`PluginRegistry`] maps each plugin module id to its
//! declaration text, base directory and a constructor, supplied at process
//! startup in place of dynamic module discovery.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;

use crate::capability::{CapabilityRegistry, CommandHandler, EventListener};
use crate::error::HookResult;
use crate::localization::LocalizationTable;

/// Lifecycle hooks a plugin may implement. All hooks default to no-ops.
///
/// Once any hook fails, the plugin is crashed and no further hook of it is
/// invoked.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Called before the host connects to its external service. Capabilities
    /// are registered here through the [`HostContext`].
    fn on_load(&mut self, host: &mut HostContext<'_>) -> HookResult {
        let _ = host;
        Ok(())
    }

    /// Called after the host's connection is established. May block on
    /// asynchronous calls; plugins are enabled one at a time.
    async fn on_enable(&mut self) -> HookResult {
        Ok(())
    }

    /// Called before the host disconnects, in reverse enable order.
    async fn on_disable(&mut self) -> HookResult {
        Ok(())
    }

    /// Called after disconnection, in reverse load order. Best-effort; must
    /// not be relied on to persist state.
    fn on_unload(&mut self) -> HookResult {
        Ok(())
    }
}

/// Registration seam handed to a plugin's load hook.
pub struct HostContext<'a> {
    plugin: &'a str,
    capabilities: &'a CapabilityRegistry,
    localization: &'a LocalizationTable,
}

impl<'a> HostContext<'a> {
    pub(crate) fn new(
        plugin: &'a str,
        capabilities: &'a CapabilityRegistry,
        localization: &'a LocalizationTable,
    ) -> Self {
        Self {
            plugin,
            capabilities,
            localization,
        }
    }

    /// Id of the plugin this context belongs to.
    pub fn plugin_id(&self) -> &str {
        self.plugin
    }

    /// Register a command handler. The registration is tracked against this
    /// plugin and withdrawn when it leaves the enabled state.
    pub fn register_command(&mut self, name: &str, handler: Arc<dyn CommandHandler>) {
        self.capabilities
            .register_command(self.plugin, name, handler);
    }

    /// Register an event listener, tracked like a command handler.
    pub fn register_listener(&mut self, event: &str, listener: Arc<dyn EventListener>) {
        self.capabilities
            .register_listener(self.plugin, event, listener);
    }

    /// The process-wide localization table, for lookups at load time.
    pub fn localization(&self) -> &LocalizationTable {
        self.localization
    }
}

type PluginFactory = Box<dyn Fn() -> Box<dyn Plugin> + Send + Sync>;

/// One registry entry: declaration text, base directory and constructor.
pub struct RegistryEntry {
    declaration: String,
    base_dir: PathBuf,
    factory: PluginFactory,
}

impl RegistryEntry {
    pub fn declaration(&self) -> &str {
        &self.declaration
    }

    /// Directory localization paths are resolved against.
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub(crate) fn instantiate(&self) -> Box<dyn Plugin> {
        (self.factory)()
    }
}

/// Mapping from plugin module id to its registry entry, in insertion order.
#[derive(Default)]
pub struct PluginRegistry {
    entries: HashMap<String, RegistryEntry>,
    order: Vec<String>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a plugin under `module_id`. A second insert under the same id
    /// replaces the first.
    pub fn insert<F>(
        &mut self,
        module_id: impl Into<String>,
        declaration: impl Into<String>,
        base_dir: impl Into<PathBuf>,
        factory: F,
    ) where
        F: Fn() -> Box<dyn Plugin> + Send + Sync + 'static,
    {
        let module_id = module_id.into();
        if !self.entries.contains_key(&module_id) {
            self.order.push(module_id.clone());
        }
        self.entries.insert(
            module_id,
            RegistryEntry {
                declaration: declaration.into(),
                base_dir: base_dir.into(),
                factory: Box::new(factory),
            },
        );
    }

    pub fn contains(&self, module_id: &str) -> bool {
        self.entries.contains_key(module_id)
    }

    pub fn get(&self, module_id: &str) -> Option<&RegistryEntry> {
        self.entries.get(module_id)
    }

    /// Module ids in insertion order.
    pub fn module_ids(&self) -> &[String] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;
    impl Plugin for Noop {}

    #[test]
    fn test_registry_insert_and_lookup() {
        let mut registry = PluginRegistry::new();
        registry.insert(
            "mod.a",
            "# PluginConfig\n# Name: A\n# Depends-On: []\n# End\n",
            "/plugins/a",
            || Box::new(Noop),
        );

        assert!(registry.contains("mod.a"));
        assert!(!registry.contains("mod.b"));
        let entry = registry.get("mod.a").unwrap();
        assert!(entry.declaration().contains("Name: A"));
        assert_eq!(entry.base_dir(), Path::new("/plugins/a"));
        let _plugin = entry.instantiate();
    }

    #[test]
    fn test_registry_preserves_insertion_order() {
        let mut registry = PluginRegistry::new();
        for id in ["z", "a", "m"] {
            registry.insert(id, "", ".", || Box::new(Noop) as Box<dyn Plugin>);
        }
        assert_eq!(registry.module_ids(), ["z", "a", "m"]);
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_registry_reinsert_keeps_position() {
        let mut registry = PluginRegistry::new();
        registry.insert("a", "first", ".", || Box::new(Noop) as Box<dyn Plugin>);
        registry.insert("b", "", ".", || Box::new(Noop) as Box<dyn Plugin>);
        registry.insert("a", "second", ".", || Box::new(Noop) as Box<dyn Plugin>);
        assert_eq!(registry.module_ids(), ["a", "b"]);
        assert_eq!(registry.get("a").unwrap().declaration(), "second");
    }

    #[tokio::test]
    async fn test_default_hooks_are_noops() {
        let mut plugin = Noop;
        let capabilities = CapabilityRegistry::new();
        let localization = LocalizationTable::new();
        let mut ctx = HostContext::new("noop", &capabilities, &localization);
        assert!(plugin.on_load(&mut ctx).is_ok());
        assert!(plugin.on_enable().await.is_ok());
        assert!(plugin.on_disable().await.is_ok());
        assert!(plugin.on_unload().is_ok());
    }
}
