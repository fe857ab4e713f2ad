//! Local registry of what this worker serves.

use std::collections::HashMap;

use serde_json::Value;
use tracing::debug;

/// A method implementation. Runs inline on the connection's driver task, so
/// it must return promptly; its `Ok` value becomes the response `data`, its
/// `Err` string travels back as a task error.
pub type MethodHandler = Box<dyn Fn(Option<Value>) -> Result<Value, String> + Send + Sync>;

/// An event callback, invoked for every broadcast of a subscribed event.
pub type EventHandler = Box<dyn Fn(Option<Value>) + Send + Sync>;

/// Methods this node provides and events it subscribes to.
///
/// Populated before the upstream loop starts; announced to the host after
/// every successful authentication.
#[derive(Default)]
pub struct Service {
    methods: HashMap<String, MethodHandler>,
    events: HashMap<String, EventHandler>,
}

impl Service {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a method implementation under `name`.
    pub fn provide<F>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Option<Value>) -> Result<Value, String> + Send + Sync + 'static,
    {
        self.methods.insert(name.into(), Box::new(handler));
        self
    }

    /// Subscribes to `event`, running `handler` on every broadcast.
    pub fn subscribe<F>(mut self, event: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Option<Value>) + Send + Sync + 'static,
    {
        self.events.insert(event.into(), Box::new(handler));
        self
    }

    pub fn method_names(&self) -> impl Iterator<Item = &str> {
        self.methods.keys().map(String::as_str)
    }

    pub fn event_names(&self) -> impl Iterator<Item = &str> {
        self.events.keys().map(String::as_str)
    }

    /// Invokes a provided method. `None` if this node does not serve it.
    pub fn call(&self, method: &str, args: Option<Value>) -> Option<Result<Value, String>> {
        self.methods.get(method).map(|handler| handler(args))
    }

    /// Delivers a broadcast event to its local callback, if any.
    pub fn deliver_event(&self, event: &str, data: Option<Value>) {
        match self.events.get(event) {
            Some(handler) => handler(data),
            None => debug!(event, "broadcast for an event without a local handler"),
        }
    }
}
