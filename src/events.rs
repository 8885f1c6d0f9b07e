//! Listeners that turn document events into state writes or handler calls.
//!
//! Listeners are attached once per element and kind; the element keeps a
//! bound flag, so rescanning a subtree never attaches a second listener.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

use crate::error::{BindError, StateError};
use crate::interpreter::ItemContext;
use crate::path::Path;
use crate::registry::DirectiveKind;
use crate::state::Store;
use crate::tree::{Document, NodeId};
use crate::App;

/// A click delivered to a handler through the `event` argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClickEvent {
    pub target: NodeId,
}

/// One argument passed to a registered handler.
#[derive(Debug, Clone, PartialEq)]
pub enum HandlerArg {
    Event(ClickEvent),
    /// A state value; `None` when the path does not resolve.
    Value(Option<Value>),
    /// The operation of a bind handler: `SET_UI` or `SET_DATA`.
    Text(String),
    Node(NodeId),
    Path(Path),
}

/// What a handler may touch while it runs.
///
/// Writes made through the scope are dispatched once the handler returns.
pub struct HandlerScope<'a> {
    store: &'a mut Store,
    doc: &'a mut Document,
}

impl HandlerScope<'_> {
    pub fn get(&self, path: &str) -> Option<&Value> {
        self.store.get(&Path::parse(path).ok()?)
    }

    pub fn set(&mut self, path: &str, value: Value) -> Result<bool, StateError> {
        self.store.set(&Path::parse(path)?, value)
    }

    /// Full access to the state graph, including array operations.
    pub fn store(&mut self) -> &mut Store {
        &mut *self.store
    }

    pub fn document(&self) -> &Document {
        &*self.doc
    }

    pub fn document_mut(&mut self) -> &mut Document {
        &mut *self.doc
    }
}

pub type Handler = Box<dyn FnMut(&mut HandlerScope<'_>, &[HandlerArg])>;

#[derive(Debug, Clone)]
struct ClickListener {
    function: String,
    args: Vec<String>,
    context: Option<ItemContext>,
}

#[derive(Debug, Clone)]
struct InputListener {
    path: String,
}

#[derive(Debug, Default)]
pub(crate) struct Listeners {
    clicks: BTreeMap<NodeId, ClickListener>,
    inputs: BTreeMap<NodeId, InputListener>,
}

impl Listeners {
    /// Forget listeners of nodes that left the document.
    pub(crate) fn prune(&mut self, doc: &Document) {
        self.clicks.retain(|node, _| doc.is_attached(*node));
        self.inputs.retain(|node, _| doc.is_attached(*node));
    }

    pub(crate) fn len(&self) -> usize {
        self.clicks.len() + self.inputs.len()
    }
}

fn click_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\w+)\((.*?)\)$").expect("static regex"))
}

/// Split `name(a, b)` into the function name and trimmed arguments.
pub fn parse_click(expr: &str) -> Option<(String, Vec<String>)> {
    let caps = click_regex().captures(expr.trim())?;
    let args = caps[2]
        .split(',')
        .map(str::trim)
        .filter(|a| !a.is_empty())
        .map(str::to_string)
        .collect();
    Some((caps[1].to_string(), args))
}

/// Handler name of a `bind-handler` attribute; `fmt(x)` names `fmt`.
pub fn handler_name(attr: &str) -> String {
    attr.split('(').next().unwrap_or_default().trim().to_string()
}

impl App {
    /// Attach listeners for every entry that has none yet.
    pub(crate) fn bind_listeners(&mut self) {
        let pending: Vec<_> = self
            .registry
            .entries()
            .filter(|e| !e.consumed && matches!(e.kind, DirectiveKind::Bind | DirectiveKind::Click))
            .map(|e| (e.id, e.kind, e.target, e.path.clone(), e.expressions.clone(), e.context.clone()))
            .collect();

        for (id, kind, target, path, expressions, context) in pending {
            if let Some(entry) = self.registry.entry_mut(id) {
                entry.consumed = true;
            }
            if kind == DirectiveKind::Bind {
                if self.doc.mark_bound(target, "input") {
                    self.listeners.inputs.insert(target, InputListener { path });
                }
                continue;
            }
            if self.doc.is_bound(target, "click") {
                continue;
            }
            let expr = expressions.first().cloned().unwrap_or_default();
            match parse_click(&expr) {
                Some((function, args)) => {
                    self.doc.mark_bound(target, "click");
                    self.listeners.clicks.insert(
                        target,
                        ClickListener {
                            function,
                            args,
                            context,
                        },
                    );
                }
                None => self.diagnostics.push(
                    "invalid-click",
                    format!("invalid {} expression: {}", self.config.attr("click"), expr),
                ),
            }
        }
        tracing::debug!(listeners = self.listeners.len(), "listeners bound");
    }

    /// Run handler `name` with `args`. Returns false if it is not registered.
    pub(crate) fn call_handler(&mut self, name: &str, args: &[HandlerArg]) -> bool {
        let Some(mut handler) = self.handlers.remove(name) else {
            self.diagnostics
                .push("handler-not-found", format!("handler function '{}' not found", name));
            return false;
        };
        tracing::debug!(handler = name, args = args.len(), "calling handler");
        let mut scope = HandlerScope {
            store: &mut self.store,
            doc: &mut self.doc,
        };
        handler(&mut scope, args);
        self.handlers.entry(name.to_string()).or_insert(handler);
        true
    }

    fn check_node(&self, node: NodeId) -> Result<(), BindError> {
        if self.doc.is_element(node) && self.doc.is_attached(node) {
            Ok(())
        } else {
            Err(BindError::UnknownNode(node.0))
        }
    }

    /// The host typed `text` into `node`.
    pub fn input(&mut self, node: NodeId, text: &str) -> Result<(), BindError> {
        self.check_node(node)?;
        self.doc.set_value(node, text);
        self.fire_input(node)
    }

    /// The host toggled `node`.
    pub fn set_checked(&mut self, node: NodeId, checked: bool) -> Result<(), BindError> {
        self.check_node(node)?;
        self.doc.set_checked(node, checked);
        self.fire_input(node)
    }

    fn fire_input(&mut self, node: NodeId) -> Result<(), BindError> {
        let Some(listener) = self.listeners.inputs.get(&node).cloned() else {
            return Ok(());
        };
        let path = Path::parse(&listener.path)?;

        let handler_attr = self.config.attr("bind-handler");
        if let Some(handler) = self.doc.attribute(node, &handler_attr) {
            let name = handler_name(handler);
            let args = vec![
                HandlerArg::Text("SET_DATA".to_string()),
                HandlerArg::Node(node),
                HandlerArg::Path(path),
            ];
            self.call_handler(&name, &args);
            self.flush();
            return Ok(());
        }

        let value = match self.doc.input_type(node).as_str() {
            "checkbox" => Some(Value::Bool(self.doc.checked(node))),
            "radio" => self
                .doc
                .checked(node)
                .then(|| Value::String(self.doc.value(node))),
            _ => Some(Value::String(self.doc.value(node))),
        };
        if let Some(value) = value {
            tracing::debug!(path = %path, "input");
            self.store.set(&path, value)?;
            self.flush();
        }
        Ok(())
    }

    /// The host clicked `node`.
    pub fn click(&mut self, node: NodeId) -> Result<(), BindError> {
        self.check_node(node)?;
        let Some(listener) = self.listeners.clicks.get(&node).cloned() else {
            return Ok(());
        };
        let args: Vec<HandlerArg> = listener
            .args
            .iter()
            .map(|arg| self.resolve_click_arg(arg, node, listener.context.as_ref(), &listener.function))
            .collect();
        self.call_handler(&listener.function, &args);
        self.flush();
        Ok(())
    }

    fn resolve_click_arg(
        &mut self,
        arg: &str,
        node: NodeId,
        context: Option<&ItemContext>,
        function: &str,
    ) -> HandlerArg {
        if arg == "event" {
            return HandlerArg::Event(ClickEvent { target: node });
        }
        let path = match context {
            Some(ctx) => {
                let rest = arg.strip_prefix(ctx.var.as_str()).filter(|r| {
                    r.is_empty() || r.starts_with('.') || r.starts_with('[')
                });
                match rest {
                    Some(rest) => format!("{}{}", ctx.path, rest),
                    None => {
                        self.diagnostics.push(
                            "click-argument-mismatch",
                            format!(
                                "argument '{}' of {} does not match the iteration variable '{}'",
                                arg, function, ctx.var
                            ),
                        );
                        ctx.path.clone()
                    }
                }
            }
            None => arg.to_string(),
        };
        let value = Path::parse(&path)
            .ok()
            .and_then(|p| self.store.get(&p))
            .cloned();
        HandlerArg::Value(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn click_expressions() {
        assert_eq!(
            parse_click("remove(item, event)"),
            Some(("remove".to_string(), vec!["item".to_string(), "event".to_string()]))
        );
        assert_eq!(parse_click(" reset() "), Some(("reset".to_string(), vec![])));
        assert_eq!(parse_click("reset"), None);
        assert_eq!(parse_click("a.b(x)"), None);
    }

    #[test]
    fn handler_names() {
        assert_eq!(handler_name("fmt(x)"), "fmt");
        assert_eq!(handler_name(" fmt "), "fmt");
    }
}
