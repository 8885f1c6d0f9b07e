pub mod ast;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod interpreter;
pub mod markup;
pub mod parser;
pub mod path;
pub mod registry;
pub mod state;
pub mod template;
pub mod tree;

use std::collections::BTreeMap;

use serde_json::Value;

pub use config::Config;
pub use error::{BindError, Diagnostic, Diagnostics, MarkupError, StateError};
pub use events::{ClickEvent, Handler, HandlerArg, HandlerScope};
pub use path::Path;
pub use state::{Identity, Mutation, Store, SubscriptionId};
pub use tree::{Document, NodeId};

use events::Listeners;
use markup::{inner_html, outer_html};
use registry::Registry;

// ── Core API ───────────────────────────────────────────────────────

/// A state graph bound to a document subtree.
///
/// Every operation that changes state (through [`DataHandle`], a handler,
/// or a host event) dispatches all resulting mutations before it returns.
pub struct App {
    store: Store,
    doc: Document,
    mount: Option<NodeId>,
    registry: Registry,
    config: Config,
    handlers: BTreeMap<String, Handler>,
    listeners: Listeners,
    diagnostics: Diagnostics,
}

impl App {
    pub fn new(state: Value) -> Self {
        Self::with_config(state, Config::default())
    }

    pub fn with_config(state: Value, config: Config) -> Self {
        let store = if config.identity {
            Store::with_identity(state, Identity::new(config.identity_key.clone()))
        } else {
            Store::new(state)
        };
        App {
            store,
            doc: Document::new(),
            mount: None,
            registry: Registry::new(),
            config,
            handlers: BTreeMap::new(),
            listeners: Listeners::default(),
            diagnostics: Diagnostics::default(),
        }
    }

    /// Bind to the subtree below `root` of `document` and render it.
    pub fn mount(&mut self, document: Document, root: NodeId) -> Result<(), BindError> {
        if document.kind(root).is_none() {
            return Err(BindError::UnknownNode(root.0));
        }
        self.doc = document;
        self.mount = Some(root);
        self.registry = Registry::new();
        self.listeners = Listeners::default();
        // Mutations queued before mounting are covered by the full render.
        self.store.clear_pending();

        let outcome = self.registry.scan(
            &mut self.doc,
            root,
            None,
            None,
            &self.config,
            &mut self.diagnostics,
        );
        tracing::debug!(
            entries = outcome.entries.len(),
            templates = outcome.templates.len(),
            "mount"
        );
        for id in outcome.templates {
            self.expand_template(id, "init");
        }
        self.refresh(&outcome.entries);
        self.bind_listeners();
        self.flush();
        Ok(())
    }

    /// Parse `markup` and mount its whole document.
    pub fn mount_markup(&mut self, markup: &str) -> Result<(), BindError> {
        let document = Document::parse(markup)?;
        let root = document.root();
        self.mount(document, root)
    }

    /// Live access to the state graph.
    pub fn get_data(&mut self) -> DataHandle<'_> {
        DataHandle { app: self }
    }

    /// Read the value at `path`; `None` when it does not resolve.
    pub fn get_path_data(&self, path: &str) -> Option<Value> {
        self.store.get(&Path::parse(path).ok()?).cloned()
    }

    pub fn add_handler(
        &mut self,
        name: impl Into<String>,
        handler: impl FnMut(&mut HandlerScope<'_>, &[HandlerArg]) + 'static,
    ) {
        self.handlers.insert(name.into(), Box::new(handler));
    }

    /// Toggle `{{ ... }}` scanning for subsequent scans.
    pub fn enable_interpolation(&mut self, enabled: bool) {
        self.config.interpolation = enabled;
    }

    pub fn subscribe(
        &mut self,
        prefix: &str,
        callback: impl FnMut(&Mutation) + 'static,
    ) -> Result<SubscriptionId, BindError> {
        Ok(self.store.subscribe(Path::parse(prefix)?, callback))
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.store.unsubscribe(id)
    }

    pub fn document(&self) -> &Document {
        &self.doc
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Serialized markup of the mounted subtree.
    pub fn render(&self) -> Result<String, BindError> {
        let root = self.mount.ok_or(BindError::NotMounted)?;
        Ok(if root == self.doc.root() {
            inner_html(&self.doc, root)
        } else {
            outer_html(&self.doc, root)
        })
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        self.diagnostics.as_slice()
    }

    pub fn take_diagnostics(&mut self) -> Vec<Diagnostic> {
        self.diagnostics.take()
    }

    /// Every node of the state graph keyed by its path.
    pub fn flatten(&self) -> BTreeMap<String, Value> {
        self.store.flatten()
    }

    /// Drain queued mutations, dispatching each in order.
    pub(crate) fn flush(&mut self) {
        if self.mount.is_none() {
            self.store.clear_pending();
            return;
        }
        let mut dispatched = 0;
        while let Some(mutation) = self.store.next_pending() {
            if dispatched == self.config.max_dispatch {
                let dropped = self.store.clear_pending() + 1;
                self.diagnostics.push(
                    "dispatch-overflow",
                    format!(
                        "stopped after {} mutations in one operation; {} dropped starting at {}",
                        dispatched, dropped, mutation.path
                    ),
                );
                return;
            }
            self.dispatch(&mutation);
            dispatched += 1;
        }
    }
}

/// Path-addressed read/write access to a mounted instance's state.
pub struct DataHandle<'a> {
    app: &'a mut App,
}

impl DataHandle<'_> {
    pub fn get(&self, path: &str) -> Option<Value> {
        self.app.get_path_data(path)
    }

    /// Write `value` at `path`. Returns whether anything changed.
    pub fn set(&mut self, path: &str, value: Value) -> Result<bool, BindError> {
        let changed = self.app.store.set(&Path::parse(path)?, value)?;
        self.app.flush();
        Ok(changed)
    }

    pub fn push(&mut self, path: &str, values: Vec<Value>) -> Result<usize, BindError> {
        let len = self.app.store.push(&Path::parse(path)?, values)?;
        self.app.flush();
        Ok(len)
    }

    pub fn pop(&mut self, path: &str) -> Result<Option<Value>, BindError> {
        let removed = self.app.store.pop(&Path::parse(path)?)?;
        self.app.flush();
        Ok(removed)
    }

    pub fn shift(&mut self, path: &str) -> Result<Option<Value>, BindError> {
        let removed = self.app.store.shift(&Path::parse(path)?)?;
        self.app.flush();
        Ok(removed)
    }

    pub fn unshift(&mut self, path: &str, values: Vec<Value>) -> Result<usize, BindError> {
        let len = self.app.store.unshift(&Path::parse(path)?, values)?;
        self.app.flush();
        Ok(len)
    }

    pub fn splice(
        &mut self,
        path: &str,
        start: usize,
        delete_count: usize,
        insert: Vec<Value>,
    ) -> Result<Vec<Value>, BindError> {
        let removed = self
            .app
            .store
            .splice(&Path::parse(path)?, start, delete_count, insert)?;
        self.app.flush();
        Ok(removed)
    }
}

#[cfg(test)]
mod tests;
