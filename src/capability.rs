//! Capabilities plugins register with the host: command handlers and event
//! listeners.
//!
//! Registration happens during a plugin's load hook via [`HostContext`]; the
//! registry tracks every capability per owning plugin and force-removes them
//! when that plugin leaves the enabled state for any reason, crash included.
//! Dispatch reads may run concurrently with registration; removal is a single
//! map operation, so a withdrawn handler is never returned afterwards.
//!
//! [`HostContext`]: crate::plugin::HostContext

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::HookError;

/// One invocation of a registered command.
#[derive(Clone, Debug)]
pub struct CommandInvocation {
    pub command: String,
    pub args: Vec<String>,
    pub locale: String,
}

impl CommandInvocation {
    pub fn new(command: impl Into<String>, locale: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            locale: locale.into(),
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }
}

/// A command handler contributed by a plugin.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn handle(&self, invocation: CommandInvocation) -> Result<String, HookError>;
}

/// An event listener contributed by a plugin.
#[async_trait]
pub trait EventListener: Send + Sync {
    async fn on_event(&self, event: &str, payload: &Value);
}

struct RegisteredCommand {
    plugin: String,
    handler: Arc<dyn CommandHandler>,
}

struct RegisteredListener {
    plugin: String,
    listener: Arc<dyn EventListener>,
}

/// Host-side capability sink, shared between the lifecycle manager and the
/// host's dispatch loop.
#[derive(Default)]
pub struct CapabilityRegistry {
    commands: DashMap<String, RegisteredCommand>,
    listeners: DashMap<String, Vec<RegisteredListener>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn register_command(
        &self,
        plugin: &str,
        name: &str,
        handler: Arc<dyn CommandHandler>,
    ) {
        let previous = self.commands.insert(
            name.to_string(),
            RegisteredCommand {
                plugin: plugin.to_string(),
                handler,
            },
        );
        if let Some(previous) = previous
            && previous.plugin != plugin
        {
            warn!(
                command = %name,
                plugin = %plugin,
                superseded = %previous.plugin,
                "Command handler replaced"
            );
        }
        debug!(plugin = %plugin, command = %name, "Registered command handler");
    }

    pub(crate) fn register_listener(
        &self,
        plugin: &str,
        event: &str,
        listener: Arc<dyn EventListener>,
    ) {
        self.listeners
            .entry(event.to_string())
            .or_default()
            .push(RegisteredListener {
                plugin: plugin.to_string(),
                listener,
            });
        debug!(plugin = %plugin, event = %event, "Registered event listener");
    }

    /// Look up the handler for a command, if its owning plugin still holds it.
    pub fn command(&self, name: &str) -> Option<Arc<dyn CommandHandler>> {
        self.commands.get(name).map(|c| c.handler.clone())
    }

    /// The plugin currently owning a command.
    pub fn command_owner(&self, name: &str) -> Option<String> {
        self.commands.get(name).map(|c| c.plugin.clone())
    }

    pub fn command_names(&self) -> Vec<String> {
        self.commands.iter().map(|e| e.key().clone()).collect()
    }

    /// Invoke every listener registered for `event`, sequentially.
    pub async fn dispatch_event(&self, event: &str, payload: &Value) {
        let listeners: Vec<Arc<dyn EventListener>> = self
            .listeners
            .get(event)
            .map(|ls| ls.iter().map(|l| l.listener.clone()).collect())
            .unwrap_or_default();
        for listener in listeners {
            listener.on_event(event, payload).await;
        }
    }

    /// Withdraw every capability owned by `plugin`.
    pub(crate) fn remove_plugin(&self, plugin: &str) {
        self.commands.retain(|_, c| c.plugin != plugin);
        self.listeners.retain(|_, ls| {
            ls.retain(|l| l.plugin != plugin);
            !ls.is_empty()
        });
    }

    /// Number of capabilities currently held by `plugin`.
    pub fn plugin_capability_count(&self, plugin: &str) -> usize {
        let commands = self
            .commands
            .iter()
            .filter(|c| c.plugin == plugin)
            .count();
        let listeners: usize = self
            .listeners
            .iter()
            .map(|ls| ls.iter().filter(|l| l.plugin == plugin).count())
            .sum();
        commands + listeners
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct EchoHandler;

    #[async_trait]
    impl CommandHandler for EchoHandler {
        async fn handle(&self, invocation: CommandInvocation) -> Result<String, HookError> {
            Ok(invocation.args.join(" "))
        }
    }

    struct RecordingListener {
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl EventListener for RecordingListener {
        async fn on_event(&self, event: &str, _payload: &Value) {
            self.seen.lock().unwrap().push(event.to_string());
        }
    }

    #[tokio::test]
    async fn test_command_registration_and_dispatch() {
        let registry = CapabilityRegistry::new();
        registry.register_command("shipment", "track", Arc::new(EchoHandler));

        let handler = registry.command("track").unwrap();
        let result = handler
            .handle(CommandInvocation::new("track", "en").with_args(vec!["abc".into()]))
            .await
            .unwrap();
        assert_eq!(result, "abc");
        assert_eq!(registry.command_owner("track").as_deref(), Some("shipment"));
    }

    #[tokio::test]
    async fn test_event_dispatch() {
        let registry = CapabilityRegistry::new();
        let listener = Arc::new(RecordingListener {
            seen: Mutex::new(Vec::new()),
        });
        registry.register_listener("audit", "message", listener.clone());

        registry
            .dispatch_event("message", &serde_json::json!({"id": 1}))
            .await;
        registry.dispatch_event("unrelated", &Value::Null).await;

        assert_eq!(*listener.seen.lock().unwrap(), ["message"]);
    }

    #[tokio::test]
    async fn test_remove_plugin_withdraws_everything() {
        let registry = CapabilityRegistry::new();
        registry.register_command("a", "cmd-a", Arc::new(EchoHandler));
        registry.register_command("b", "cmd-b", Arc::new(EchoHandler));
        let listener = Arc::new(RecordingListener {
            seen: Mutex::new(Vec::new()),
        });
        registry.register_listener("a", "tick", listener.clone());

        assert_eq!(registry.plugin_capability_count("a"), 2);
        registry.remove_plugin("a");
        assert_eq!(registry.plugin_capability_count("a"), 0);
        assert!(registry.command("cmd-a").is_none());
        assert!(registry.command("cmd-b").is_some());

        registry.dispatch_event("tick", &Value::Null).await;
        assert!(listener.seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_last_registration_wins_for_commands() {
        let registry = CapabilityRegistry::new();
        registry.register_command("first", "status", Arc::new(EchoHandler));
        registry.register_command("second", "status", Arc::new(EchoHandler));
        assert_eq!(registry.command_owner("status").as_deref(), Some("second"));
        assert_eq!(registry.command_names(), ["status"]);
    }
}
