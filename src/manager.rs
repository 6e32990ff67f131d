//! Plugin lifecycle management: states, phase sequencing, failure isolation.
//!
//! The manager owns every plugin instance and drives the state machine
//! `UNLOADED → LOADED → ENABLED → DISABLED → UNLOADED`, with `CRASHED` as a
//! terminal state entered from anywhere when a hook fails. Phases run on the
//! manager's own control flow: load and unload are synchronous and
//! sequential, enable and disable invoke asynchronous hooks but are
//! serialized, one plugin completing before the next starts. A crashed
//! plugin never has another hook invoked and has its registered capabilities
//! force-removed; sibling plugins are unaffected.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::capability::CapabilityRegistry;
use crate::descriptor::PluginDescriptor;
use crate::error::{LifecycleError, LocalizationError, Phase};
use crate::localization::LocalizationTable;
use crate::plugin::{HostContext, Plugin, PluginRegistry};
use crate::resolver;

/// State of one plugin instance. `Crashed` is terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Unloaded,
    Loaded,
    Enabled,
    Disabled,
    Crashed,
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LifecycleState::Unloaded => write!(f, "unloaded"),
            LifecycleState::Loaded => write!(f, "loaded"),
            LifecycleState::Enabled => write!(f, "enabled"),
            LifecycleState::Disabled => write!(f, "disabled"),
            LifecycleState::Crashed => write!(f, "crashed"),
        }
    }
}

/// A registered plugin and its runtime state, owned by the manager.
pub struct PluginInstance {
    descriptor: PluginDescriptor,
    module_id: String,
    base_dir: PathBuf,
    state: LifecycleState,
    plugin: Option<Box<dyn Plugin>>,
}

impl PluginInstance {
    pub fn descriptor(&self) -> &PluginDescriptor {
        &self.descriptor
    }

    pub fn module_id(&self) -> &str {
        &self.module_id
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }
}

impl std::fmt::Debug for PluginInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginInstance")
            .field("module_id", &self.module_id)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

/// Manager configuration.
///
/// The bounded-wait policy for asynchronous hooks defaults to 60 seconds; a
/// hook exceeding it is treated as a failure and crashes its plugin. The
/// bound can be changed or removed entirely.
#[derive(Clone, Debug)]
pub struct ManagerConfig {
    hook_timeout: Option<Duration>,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            hook_timeout: Some(Duration::from_secs(60)),
        }
    }
}

impl ManagerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_hook_timeout(mut self, timeout: Duration) -> Self {
        self.hook_timeout = Some(timeout);
        self
    }

    /// Remove the bound entirely; a hung hook then stalls its phase.
    pub fn without_hook_timeout(mut self) -> Self {
        self.hook_timeout = None;
        self
    }
}

/// Host-side handle signalling connection state to the manager.
pub struct ConnectionSignal {
    tx: watch::Sender<bool>,
}

impl ConnectionSignal {
    pub fn connected(&self) {
        let _ = self.tx.send(true);
    }

    pub fn disconnected(&self) {
        let _ = self.tx.send(false);
    }
}

/// Per-plugin outcome of one lifecycle phase.
#[derive(Clone, Debug, Serialize)]
pub struct PluginReport {
    pub plugin: String,
    pub state: LifecycleState,
    pub detail: Option<String>,
}

/// Operator-visible status report produced after each phase.
#[derive(Clone, Debug, Serialize)]
pub struct PhaseReport {
    pub phase: Phase,
    pub entries: Vec<PluginReport>,
}

impl PhaseReport {
    fn new(phase: Phase) -> Self {
        Self {
            phase,
            entries: Vec::new(),
        }
    }

    fn push(&mut self, plugin: String, state: LifecycleState, detail: Option<String>) {
        self.entries.push(PluginReport {
            plugin,
            state,
            detail,
        });
    }

    pub fn entry(&self, plugin: &str) -> Option<&PluginReport> {
        self.entries.iter().find(|e| e.plugin == plugin)
    }

    pub fn crashed_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.state == LifecycleState::Crashed)
            .count()
    }
}

/// Owns all plugin instances and the shared capability/localization state.
pub struct PluginManager {
    registry: PluginRegistry,
    plugins: Vec<PluginInstance>,
    by_module: HashMap<String, usize>,
    load_order: Vec<usize>,
    enable_order: Vec<usize>,
    capabilities: Arc<CapabilityRegistry>,
    localization: Arc<LocalizationTable>,
    config: ManagerConfig,
    connection: Option<watch::Receiver<bool>>,
}

impl PluginManager {
    pub fn new(registry: PluginRegistry) -> Self {
        Self::with_config(registry, ManagerConfig::default())
    }

    pub fn with_config(registry: PluginRegistry, config: ManagerConfig) -> Self {
        Self {
            registry,
            plugins: Vec::new(),
            by_module: HashMap::new(),
            load_order: Vec::new(),
            enable_order: Vec::new(),
            capabilities: Arc::new(CapabilityRegistry::new()),
            localization: Arc::new(LocalizationTable::new()),
            config,
            connection: None,
        }
    }

    /// Create the connection gate. The enable phase waits until the host
    /// reports the connection established through the returned signal.
    pub fn connection_signal(&mut self) -> ConnectionSignal {
        let (tx, rx) = watch::channel(false);
        self.connection = Some(rx);
        ConnectionSignal { tx }
    }

    /// Register a plugin from the startup registry, parsing its descriptor.
    ///
    /// Registration order is the discovery order used to break ties in the
    /// load order.
    pub fn register(&mut self, module_id: &str) -> Result<(), LifecycleError> {
        let entry = self
            .registry
            .get(module_id)
            .ok_or_else(|| LifecycleError::UnknownPlugin(module_id.to_string()))?;
        if self.by_module.contains_key(module_id) {
            return Err(LifecycleError::AlreadyRegistered(module_id.to_string()));
        }
        let descriptor = PluginDescriptor::parse(entry.declaration())?;
        let base_dir = entry.base_dir().to_path_buf();
        debug!(plugin = %module_id, name = %descriptor.name(), "Registered plugin");
        self.by_module
            .insert(module_id.to_string(), self.plugins.len());
        self.plugins.push(PluginInstance {
            descriptor,
            module_id: module_id.to_string(),
            base_dir,
            state: LifecycleState::Unloaded,
            plugin: None,
        });
        Ok(())
    }

    /// Register every plugin present in the startup registry, in insertion
    /// order. Descriptor failures abort only the affected plugin.
    pub fn register_all(&mut self) -> Vec<(String, LifecycleError)> {
        let ids: Vec<String> = self.registry.module_ids().to_vec();
        let mut failures = Vec::new();
        for id in ids {
            if let Err(e) = self.register(&id) {
                error!(plugin = %id, error = %e, "Failed to register plugin");
                failures.push((id, e));
            }
        }
        failures
    }

    /// Load phase. Runs before the host connects: resolves the dependency
    /// order, merges localization resources and invokes load hooks
    /// strictly in that order.
    pub fn load_all(&mut self) -> PhaseReport {
        let mut report = PhaseReport::new(Phase::Load);
        let inputs: Vec<(String, Vec<String>)> = self
            .plugins
            .iter()
            .map(|p| (p.module_id.clone(), p.descriptor.dependencies().to_vec()))
            .collect();
        let resolution = resolver::resolve(&inputs);

        for exclusion in &resolution.excluded {
            warn!(
                plugin = %exclusion.plugin,
                reason = %exclusion.reason,
                "Plugin excluded from load order"
            );
            report.push(
                exclusion.plugin.clone(),
                LifecycleState::Unloaded,
                Some(exclusion.reason.to_string()),
            );
        }

        for id in &resolution.order {
            let Some(&idx) = self.by_module.get(id.as_str()) else {
                continue;
            };
            if self.plugins[idx].state != LifecycleState::Unloaded {
                let state = self.plugins[idx].state;
                report.push(id.clone(), state, Some("not in unloaded state".into()));
                continue;
            }

            // A dependency already enabled (re-entrant load) satisfies the
            // load requirement too.
            let blocked = self.plugins[idx]
                .descriptor
                .dependencies()
                .iter()
                .find(|dep| {
                    self.by_module
                        .get(dep.as_str())
                        .map(|&j| {
                            !matches!(
                                self.plugins[j].state,
                                LifecycleState::Loaded | LifecycleState::Enabled
                            )
                        })
                        .unwrap_or(true)
                })
                .cloned();
            if let Some(dep) = blocked {
                let reason = LifecycleError::DependencyState {
                    plugin: id.clone(),
                    dependency: dep,
                    required: LifecycleState::Loaded,
                };
                warn!(plugin = %id, error = %reason, "Skipping load");
                report.push(id.clone(), LifecycleState::Unloaded, Some(reason.to_string()));
                continue;
            }

            let mut detail = None;
            if let Some(rel) = self.plugins[idx].descriptor.localization() {
                let path = self.plugins[idx].base_dir.join(rel);
                match self.localization.load_resource(&path) {
                    Ok(()) => {
                        debug!(plugin = %id, path = %path.display(), "Localization resource merged");
                    }
                    Err(e) => {
                        warn!(plugin = %id, error = %e, "Localization resource not loaded");
                        detail = Some(e.to_string());
                    }
                }
            }

            let Some(entry) = self.registry.get(id.as_str()) else {
                continue;
            };
            let mut plugin = entry.instantiate();
            let mut ctx = HostContext::new(id, &self.capabilities, &self.localization);
            match plugin.on_load(&mut ctx) {
                Ok(()) => {
                    self.plugins[idx].plugin = Some(plugin);
                    self.plugins[idx].state = LifecycleState::Loaded;
                    self.load_order.push(idx);
                    info!(plugin = %id, "Plugin loaded");
                    report.push(id.clone(), LifecycleState::Loaded, detail);
                }
                Err(source) => {
                    let failure = LifecycleError::HookFailure {
                        plugin: id.clone(),
                        phase: Phase::Load,
                        source,
                    };
                    self.crash(idx, &failure);
                    report.push(id.clone(), LifecycleState::Crashed, Some(failure.to_string()));
                }
            }
        }
        report
    }

    /// Enable phase. Waits for the connection gate when one is attached,
    /// then enables plugins in load order, one hook completing before the
    /// next starts.
    pub async fn enable_all(&mut self) -> PhaseReport {
        if let Some(gate) = &self.connection {
            let mut gate = gate.clone();
            if gate.wait_for(|connected| *connected).await.is_err() {
                warn!("Connection signal dropped before connect, enabling anyway");
            }
        }

        let mut report = PhaseReport::new(Phase::Enable);
        let order = self.load_order.clone();
        for idx in order {
            let id = self.plugins[idx].module_id.clone();
            if self.plugins[idx].state != LifecycleState::Loaded {
                let state = self.plugins[idx].state;
                report.push(id, state, Some("not in loaded state".into()));
                continue;
            }

            let blocked = self.plugins[idx]
                .descriptor
                .dependencies()
                .iter()
                .find(|dep| {
                    self.by_module
                        .get(dep.as_str())
                        .map(|&j| self.plugins[j].state != LifecycleState::Enabled)
                        .unwrap_or(true)
                })
                .cloned();
            if let Some(dep) = blocked {
                let reason = LifecycleError::DependencyState {
                    plugin: id.clone(),
                    dependency: dep,
                    required: LifecycleState::Enabled,
                };
                warn!(plugin = %id, error = %reason, "Skipping enable");
                report.push(id, LifecycleState::Loaded, Some(reason.to_string()));
                continue;
            }

            info!(plugin = %id, "Enabling plugin");
            match self.run_async_hook(idx, Phase::Enable).await {
                Ok(()) => {
                    self.plugins[idx].state = LifecycleState::Enabled;
                    self.enable_order.push(idx);
                    info!(plugin = %id, "Plugin enabled");
                    report.push(id, LifecycleState::Enabled, None);
                }
                Err(failure) => {
                    self.crash(idx, &failure);
                    report.push(id, LifecycleState::Crashed, Some(failure.to_string()));
                }
            }
        }
        report
    }

    /// Disable phase. Runs before the host disconnects, in reverse of the
    /// achieved enable order. Capabilities are withdrawn immediately after
    /// each disable hook returns, regardless of its outcome.
    pub async fn disable_all(&mut self) -> PhaseReport {
        let mut report = PhaseReport::new(Phase::Disable);
        let order: Vec<usize> = self.enable_order.iter().rev().copied().collect();
        for idx in order {
            let id = self.plugins[idx].module_id.clone();
            if self.plugins[idx].state != LifecycleState::Enabled {
                let state = self.plugins[idx].state;
                report.push(id, state, Some("not in enabled state".into()));
                continue;
            }

            info!(plugin = %id, "Disabling plugin");
            let result = self.run_async_hook(idx, Phase::Disable).await;
            self.capabilities.remove_plugin(&id);
            match result {
                Ok(()) => {
                    self.plugins[idx].state = LifecycleState::Disabled;
                    info!(plugin = %id, "Plugin disabled");
                    report.push(id, LifecycleState::Disabled, None);
                }
                Err(failure) => {
                    self.crash(idx, &failure);
                    report.push(id, LifecycleState::Crashed, Some(failure.to_string()));
                }
            }
        }
        self.enable_order.clear();
        report
    }

    /// Unload phase. Runs after disconnection, in reverse of load order.
    /// Failures are logged and crash the plugin but never block the rest of
    /// the phase.
    pub fn unload_all(&mut self) -> PhaseReport {
        let mut report = PhaseReport::new(Phase::Unload);
        let order: Vec<usize> = self.load_order.iter().rev().copied().collect();
        for idx in order {
            let id = self.plugins[idx].module_id.clone();
            match self.plugins[idx].state {
                LifecycleState::Loaded | LifecycleState::Disabled => {
                    let result = match self.plugins[idx].plugin.as_mut() {
                        Some(plugin) => plugin.on_unload(),
                        None => Ok(()),
                    };
                    match result {
                        Ok(()) => {
                            self.plugins[idx].plugin = None;
                            self.plugins[idx].state = LifecycleState::Unloaded;
                            debug!(plugin = %id, "Plugin unloaded");
                            report.push(id, LifecycleState::Unloaded, None);
                        }
                        Err(source) => {
                            let failure = LifecycleError::HookFailure {
                                plugin: id.clone(),
                                phase: Phase::Unload,
                                source,
                            };
                            self.crash(idx, &failure);
                            report.push(id, LifecycleState::Crashed, Some(failure.to_string()));
                        }
                    }
                }
                state => {
                    report.push(id, state, Some("skipped".into()));
                }
            }
        }
        self.load_order.clear();
        report
    }

    /// Reload a single plugin: disable if enabled, unload, construct a fresh
    /// instance, load and enable it again. A crashed plugin is reset and
    /// reloaded from its factory. With `force`, disable/unload failures are
    /// logged and the reload proceeds anyway.
    ///
    /// Only capabilities tracked by the manager are guaranteed released;
    /// plugins holding unmanaged external resources get no hot-reload
    /// correctness guarantee.
    pub async fn reload(&mut self, module_id: &str, force: bool) -> Result<(), LifecycleError> {
        let &idx = self
            .by_module
            .get(module_id)
            .ok_or_else(|| LifecycleError::UnknownPlugin(module_id.to_string()))?;
        info!(plugin = %module_id, "Reloading plugin");

        // Crash recovery: the crashed instance is already dropped and its
        // capabilities withdrawn, and the factory supplies a fresh instance,
        // so no hook of the crashed one can run again.
        if self.plugins[idx].state == LifecycleState::Crashed {
            self.plugins[idx].state = LifecycleState::Unloaded;
            self.enable_order.retain(|&i| i != idx);
            self.load_order.retain(|&i| i != idx);
        }

        if self.plugins[idx].state == LifecycleState::Enabled {
            let result = self.run_async_hook(idx, Phase::Disable).await;
            self.capabilities.remove_plugin(module_id);
            match result {
                Ok(()) => self.plugins[idx].state = LifecycleState::Disabled,
                Err(failure) if !force => {
                    self.crash(idx, &failure);
                    return Err(failure);
                }
                Err(failure) => {
                    warn!(plugin = %module_id, error = %failure, "Ignoring disable failure");
                    self.plugins[idx].state = LifecycleState::Disabled;
                }
            }
            self.enable_order.retain(|&i| i != idx);
        }

        if matches!(
            self.plugins[idx].state,
            LifecycleState::Loaded | LifecycleState::Disabled
        ) {
            let result = match self.plugins[idx].plugin.as_mut() {
                Some(plugin) => plugin.on_unload(),
                None => Ok(()),
            };
            if let Err(source) = result {
                let failure = LifecycleError::HookFailure {
                    plugin: module_id.to_string(),
                    phase: Phase::Unload,
                    source,
                };
                if !force {
                    self.crash(idx, &failure);
                    return Err(failure);
                }
                warn!(plugin = %module_id, error = %failure, "Ignoring unload failure");
            }
            self.plugins[idx].plugin = None;
            self.plugins[idx].state = LifecycleState::Unloaded;
            self.load_order.retain(|&i| i != idx);
        }

        if self.plugins[idx].state != LifecycleState::Unloaded {
            return Err(LifecycleError::InvalidState {
                plugin: module_id.to_string(),
                required: LifecycleState::Unloaded,
                actual: self.plugins[idx].state,
            });
        }

        // Load again from the factory.
        if let Some(dep) = self.blocked_dependency(idx, LifecycleState::Enabled) {
            return Err(LifecycleError::DependencyState {
                plugin: module_id.to_string(),
                dependency: dep,
                required: LifecycleState::Enabled,
            });
        }
        if let Some(rel) = self.plugins[idx].descriptor.localization() {
            let path = self.plugins[idx].base_dir.join(rel);
            if let Err(e) = self.localization.load_resource(&path) {
                warn!(plugin = %module_id, error = %e, "Localization resource not loaded");
            }
        }
        let entry = self
            .registry
            .get(module_id)
            .ok_or_else(|| LifecycleError::UnknownPlugin(module_id.to_string()))?;
        let mut plugin = entry.instantiate();
        let mut ctx = HostContext::new(module_id, &self.capabilities, &self.localization);
        if let Err(source) = plugin.on_load(&mut ctx) {
            let failure = LifecycleError::HookFailure {
                plugin: module_id.to_string(),
                phase: Phase::Load,
                source,
            };
            self.crash(idx, &failure);
            return Err(failure);
        }
        self.plugins[idx].plugin = Some(plugin);
        self.plugins[idx].state = LifecycleState::Loaded;
        self.load_order.push(idx);

        match self.run_async_hook(idx, Phase::Enable).await {
            Ok(()) => {
                self.plugins[idx].state = LifecycleState::Enabled;
                self.enable_order.push(idx);
                info!(plugin = %module_id, "Plugin reloaded");
                Ok(())
            }
            Err(failure) => {
                self.crash(idx, &failure);
                Err(failure)
            }
        }
    }

    /// Resolve help text through the process-wide localization table.
    pub fn resolve_help(
        &self,
        locale: &str,
        command: &str,
        option: Option<&str>,
        long: bool,
        default: Option<&str>,
    ) -> Result<String, LocalizationError> {
        self.localization
            .resolve_help(locale, command, option, long, default)
    }

    /// Shared capability registry for the host's dispatch loop.
    pub fn capabilities(&self) -> Arc<CapabilityRegistry> {
        self.capabilities.clone()
    }

    /// Shared localization table.
    pub fn localization(&self) -> Arc<LocalizationTable> {
        self.localization.clone()
    }

    pub fn instances(&self) -> &[PluginInstance] {
        &self.plugins
    }

    pub fn plugin_state(&self, module_id: &str) -> Option<LifecycleState> {
        self.by_module
            .get(module_id)
            .map(|&idx| self.plugins[idx].state)
    }

    pub fn has_plugin(&self, module_id: &str) -> bool {
        self.by_module.contains_key(module_id)
    }

    /// Current state of every registered plugin, in discovery order.
    pub fn status(&self) -> Vec<PluginReport> {
        self.plugins
            .iter()
            .map(|p| PluginReport {
                plugin: p.module_id.clone(),
                state: p.state,
                detail: None,
            })
            .collect()
    }

    pub fn state_counts(&self) -> HashMap<LifecycleState, usize> {
        let mut counts = HashMap::new();
        for plugin in &self.plugins {
            *counts.entry(plugin.state).or_insert(0) += 1;
        }
        counts
    }

    fn blocked_dependency(&self, idx: usize, required: LifecycleState) -> Option<String> {
        self.plugins[idx]
            .descriptor
            .dependencies()
            .iter()
            .find(|dep| {
                self.by_module
                    .get(dep.as_str())
                    .map(|&j| self.plugins[j].state != required)
                    .unwrap_or(true)
            })
            .cloned()
    }

    /// Run an asynchronous hook under the configured bounded wait.
    async fn run_async_hook(&mut self, idx: usize, phase: Phase) -> Result<(), LifecycleError> {
        let id = self.plugins[idx].module_id.clone();
        let limit = self.config.hook_timeout;
        let Some(plugin) = self.plugins[idx].plugin.as_mut() else {
            return Err(LifecycleError::InvalidState {
                plugin: id,
                required: LifecycleState::Loaded,
                actual: LifecycleState::Unloaded,
            });
        };
        let hook = match phase {
            Phase::Enable => plugin.on_enable(),
            Phase::Disable => plugin.on_disable(),
            Phase::Load | Phase::Unload => return Ok(()),
        };
        let outcome = match limit {
            Some(limit) => match timeout(limit, hook).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    return Err(LifecycleError::HookTimeout {
                        plugin: id,
                        phase,
                        timeout_secs: limit.as_secs(),
                    });
                }
            },
            None => hook.await,
        };
        outcome.map_err(|source| LifecycleError::HookFailure {
            plugin: id,
            phase,
            source,
        })
    }

    /// Terminal transition: drop the instance, withdraw its capabilities.
    fn crash(&mut self, idx: usize, failure: &LifecycleError) {
        let id = self.plugins[idx].module_id.clone();
        error!(plugin = %id, error = %failure, "Plugin crashed");
        self.plugins[idx].state = LifecycleState::Crashed;
        self.plugins[idx].plugin = None;
        self.capabilities.remove_plugin(&id);
    }
}
