//! # plugin-host
//!
//! Plugin host core for long-running service processes: descriptor parsing,
//! dependency-ordered loading, a four-phase lifecycle with failure isolation,
//! and locale-aware help text resolution.
//!
//! Plugins declare themselves through a comment block at the top of their
//! source file (`# PluginConfig` … `# End`), name the modules they depend on
//! and optionally a YAML localization resource. The host resolves a
//! deterministic load order in which every dependency precedes its
//! dependents, drives each plugin through
//! `load → enable → disable → unload`, and crashes a plugin terminally the
//! moment one of its hooks fails, without touching its siblings.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use plugin_host::{HostContext, HookResult, Plugin, PluginManager, PluginRegistry};
//!
//! struct Greeter;
//!
//! #[async_trait::async_trait]
//! impl Plugin for Greeter {
//!     fn on_load(&mut self, host: &mut HostContext<'_>) -> HookResult {
//!         println!("loading as {}", host.plugin_id());
//!         Ok(())
//!     }
//!
//!     async fn on_enable(&mut self) -> HookResult {
//!         println!("connected, ready to greet");
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let mut registry = PluginRegistry::new();
//!     registry.insert(
//!         "greeter",
//!         "# PluginConfig\n# Name: Greeter\n# Depends-On: []\n# End\n",
//!         "plugins/greeter",
//!         || Box::new(Greeter),
//!     );
//!
//!     let mut manager = PluginManager::new(registry);
//!     manager.register_all();
//!     manager.load_all();
//!     manager.enable_all().await;
//!
//!     // ... serve ...
//!
//!     manager.disable_all().await;
//!     manager.unload_all();
//! }
//! ```

#![allow(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod capability;
pub mod descriptor;
pub mod error;
pub mod localization;
pub mod manager;
pub mod plugin;
pub mod resolver;

// Re-exports for convenience
pub use capability::{CapabilityRegistry, CommandHandler, CommandInvocation, EventListener};
pub use descriptor::PluginDescriptor;
pub use error::{
    DescriptorError, HookError, HookResult, LifecycleError, LocalizationError, Phase, ResolveError,
};
pub use localization::LocalizationTable;
pub use manager::{
    ConnectionSignal, LifecycleState, ManagerConfig, PhaseReport, PluginInstance, PluginManager,
    PluginReport,
};
pub use plugin::{HostContext, Plugin, PluginRegistry, RegistryEntry};
pub use resolver::{Exclusion, Resolution};
