//! Routing of state mutations to the document.
//!
//! One mutation is handled in a fixed order: templates bound at or beneath
//! the mutated path are expanded first, then bind entries, then show/hide
//! entries, then interpolated text. An entry matches when one of its
//! dependency paths is the mutated path, an ancestor of it, or beneath it,
//! so a composite write reaches every leaf bound under it. Every document
//! write is skipped when the property already holds the new value.

use serde_json::Value;

use crate::events::{handler_name, HandlerArg};
use crate::interpreter::{self, format_number, Val};
use crate::path::strip_root_prefix;
use crate::registry::{BindingEntry, DirectiveKind, EntryId};
use crate::state::Mutation;
use crate::App;

/// Text a bound form control shows for `value`. Falsy values show as empty.
pub fn bind_text(value: &Value) -> String {
    match value {
        Value::Null | Value::Bool(false) => String::new(),
        Value::Bool(true) => "true".to_string(),
        Value::Number(n) => match n.as_f64() {
            Some(f) if f == 0.0 => String::new(),
            Some(f) => format_number(f),
            None => n.to_string(),
        },
        Value::String(s) => s.clone(),
        composite => composite.to_string(),
    }
}

fn phase(kind: DirectiveKind) -> Option<u8> {
    match kind {
        DirectiveKind::Bind => Some(0),
        DirectiveKind::Show | DirectiveKind::Hide => Some(1),
        DirectiveKind::Interpolation => Some(2),
        DirectiveKind::Click | DirectiveKind::Template => None,
    }
}

impl App {
    pub(crate) fn dispatch(&mut self, mutation: &Mutation) {
        tracing::debug!(path = %mutation.path, key = %mutation.key, "dispatch");
        self.expand(&mutation.path, &mutation.key);

        let mut targets: Vec<(u8, EntryId)> = self
            .registry
            .entries()
            .filter(|e| e.dependencies.iter().any(|d| d.is_related(&mutation.path)))
            .filter_map(|e| Some((phase(e.kind)?, e.id)))
            .collect();
        targets.sort();
        for (_, id) in targets {
            self.apply_entry(id, false);
        }
    }

    /// Apply the current state to freshly scanned entries.
    pub(crate) fn refresh(&mut self, entries: &[EntryId]) {
        let mut ordered: Vec<(u8, EntryId)> = entries
            .iter()
            .filter_map(|id| {
                let entry = self.registry.entry(*id)?;
                Some((phase(entry.kind)?, *id))
            })
            .collect();
        ordered.sort();
        for (_, id) in ordered {
            self.apply_entry(id, true);
        }
    }

    /// Bring one entry's document target in line with the state.
    /// `initial` reports expression diagnostics even when nothing changed.
    fn apply_entry(&mut self, id: EntryId, initial: bool) {
        let Some(entry) = self.registry.entry(id).cloned() else {
            return;
        };
        match entry.kind {
            DirectiveKind::Bind => self.apply_bind(&entry),
            DirectiveKind::Show | DirectiveKind::Hide => {
                let truthy = interpreter::evaluate(strip_root_prefix(&entry.path), self.store.root())
                    .map(|v| v.truthy())
                    .unwrap_or(false);
                let hidden = if entry.kind == DirectiveKind::Hide { truthy } else { !truthy };
                if self.doc.set_hidden(entry.target, hidden) {
                    tracing::trace!(entry = id.0, hidden, "display");
                }
            }
            DirectiveKind::Interpolation => {
                let Some(text) = entry.text else {
                    return;
                };
                let out = interpreter::interpolate(
                    &entry.template_markup,
                    self.store.root(),
                    entry.context.as_ref(),
                );
                let changed = self.doc.set_text(text, &out.text);
                if changed {
                    tracing::trace!(entry = id.0, text = %out.text, "interpolation");
                }
                if changed || initial {
                    self.diagnostics.extend(out.diagnostics);
                }
            }
            DirectiveKind::Click | DirectiveKind::Template => {}
        }
    }

    fn apply_bind(&mut self, entry: &BindingEntry) {
        let target = entry.target;
        let value = entry
            .state_path()
            .and_then(|p| self.store.get(&p))
            .cloned();

        let handler_attr = self.config.attr("bind-handler");
        if let Some(handler) = self.doc.attribute(target, &handler_attr) {
            let name = handler_name(handler);
            let args = vec![
                HandlerArg::Text("SET_UI".to_string()),
                HandlerArg::Node(target),
                HandlerArg::Value(value),
            ];
            self.call_handler(&name, &args);
            return;
        }

        let changed = match self.doc.input_type(target).as_str() {
            "checkbox" => {
                let on = value.as_ref().is_some_and(|v| Val::from_json(v).truthy());
                self.doc.set_checked(target, on)
            }
            "radio" => {
                // Only a string equal to the control's value selects it.
                let on = matches!(&value, Some(Value::String(s)) if *s == self.doc.value(target));
                self.doc.set_checked(target, on)
            }
            _ => {
                let text = value.as_ref().map(bind_text).unwrap_or_default();
                self.doc.set_value(target, &text)
            }
        };
        if changed {
            tracing::trace!(entry = entry.id.0, path = %entry.path, "bind");
        }
    }
}
