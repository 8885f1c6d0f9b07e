//! The binding registry: an index from directives to document locations.
//!
//! Entries and template records live in id-keyed arenas. Everything created
//! while scanning a generated template item records the owning template, so
//! a rebuild can drop exactly the rows it invalidates.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;

use crate::config::Config;
use crate::error::Diagnostics;
use crate::interpreter::{self, ItemContext};
use crate::markup::inner_html;
use crate::path::Path;
use crate::tree::{Document, NodeId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TemplateId(pub usize);

impl std::fmt::Display for TemplateId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DirectiveKind {
    Bind,
    Show,
    Hide,
    Click,
    /// A repeating marker. Its row is the [`TemplateRecord`] itself.
    Template,
    Interpolation,
}

impl DirectiveKind {
    /// Directive name without prefix.
    pub fn directive(self) -> &'static str {
        match self {
            DirectiveKind::Bind => "bind",
            DirectiveKind::Show => "show",
            DirectiveKind::Hide => "hide",
            DirectiveKind::Click => "click",
            DirectiveKind::Template => "foreach",
            DirectiveKind::Interpolation => "interpolation",
        }
    }
}

#[derive(Debug, Clone)]
pub struct BindingEntry {
    pub id: EntryId,
    /// Template whose generated item contains the target.
    pub template_id: Option<TemplateId>,
    pub kind: DirectiveKind,
    /// The element carrying the directive, or the parent of an
    /// interpolated text node.
    pub target: NodeId,
    /// The interpolated text node.
    pub text: Option<NodeId>,
    /// Attribute value as written (after template rewriting).
    pub path: String,
    pub expressions: Vec<String>,
    /// Static state paths the entry reads; empty for clicks.
    pub dependencies: Vec<Path>,
    /// Original text of an interpolation node.
    pub template_markup: String,
    pub context: Option<ItemContext>,
    /// Set once a listener has been attached for the entry.
    pub consumed: bool,
}

impl BindingEntry {
    pub fn state_path(&self) -> Option<Path> {
        Path::parse(&self.path).ok()
    }
}

#[derive(Debug, Clone)]
pub struct TemplateRecord {
    pub id: TemplateId,
    /// Template whose generated item contained this marker.
    pub owner: Option<TemplateId>,
    /// Element the generated items are appended to.
    pub parent: NodeId,
    pub tag: String,
    /// Normalized inner markup of the marker element.
    pub markup: String,
    pub iteration_var: String,
    /// Array path as written, e.g. `items` or `root.groups[1].items`.
    pub source_path: String,
    pub context: Option<ItemContext>,
    /// Live generated item roots, in order.
    pub generated: Vec<NodeId>,
}

impl TemplateRecord {
    pub fn state_path(&self) -> Option<Path> {
        Path::parse(&self.source_path).ok()
    }
}

/// Rows created by one scan.
#[derive(Debug, Default)]
pub struct ScanOutcome {
    pub entries: Vec<EntryId>,
    pub templates: Vec<TemplateId>,
}

#[derive(Debug, Default)]
pub struct Registry {
    entries: BTreeMap<EntryId, BindingEntry>,
    templates: BTreeMap<TemplateId, TemplateRecord>,
    next_entry: usize,
    next_template: usize,
}

fn between_tags() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r">\s+<").expect("static regex"))
}

fn space_runs() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\S)\s{2,}(\S)").expect("static regex"))
}

/// Trim and collapse insignificant whitespace in template markup.
pub fn normalize_markup(markup: &str) -> String {
    let collapsed = between_tags().replace_all(markup.trim(), "><");
    space_runs().replace_all(&collapsed, "${1} ${2}").into_owned()
}

/// Split `item in items` into the variable and the array path.
pub fn parse_foreach(expr: &str) -> Option<(String, String)> {
    let (var, path) = expr.split_once(" in ")?;
    let (var, path) = (var.trim(), path.trim());
    let is_ident = var
        .chars()
        .enumerate()
        .all(|(i, c)| c == '_' || c == '$' || c.is_alphabetic() || (i > 0 && c.is_alphanumeric()));
    if var.is_empty() || path.is_empty() || !is_ident {
        return None;
    }
    Some((var.to_string(), path.to_string()))
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index every directive below `root` (excluding `root` itself).
    ///
    /// Repeating markers become template records and are detached from the
    /// document; their contents are not indexed until they are expanded.
    pub fn scan(
        &mut self,
        doc: &mut Document,
        root: NodeId,
        owner: Option<TemplateId>,
        context: Option<&ItemContext>,
        config: &Config,
        diagnostics: &mut Diagnostics,
    ) -> ScanOutcome {
        let mut outcome = ScanOutcome::default();
        let foreach_attr = config.attr("foreach");

        let nodes = doc.descendants(root);
        let mut excluded = Vec::new();
        for node in &nodes {
            if doc.has_attribute(*node, &foreach_attr) {
                excluded.extend(doc.descendants(*node));
            }
        }

        let directives = [
            (DirectiveKind::Bind, config.attr("bind")),
            (DirectiveKind::Show, config.attr("show")),
            (DirectiveKind::Hide, config.attr("hide")),
            (DirectiveKind::Click, config.attr("click")),
        ];

        for node in nodes {
            if !doc.is_element(node) || excluded.contains(&node) {
                continue;
            }
            for (kind, attr) in &directives {
                let Some(value) = doc.attribute(node, attr).map(str::to_string) else {
                    continue;
                };
                let (path, dependencies) = match kind {
                    DirectiveKind::Click => (String::new(), Vec::new()),
                    DirectiveKind::Bind => (value.clone(), Path::parse(&value).into_iter().collect()),
                    _ => (value.clone(), interpreter::dependencies(&value)),
                };
                if let Some(id) = self.insert(BindingEntry {
                    id: EntryId(0),
                    template_id: owner,
                    kind: *kind,
                    target: node,
                    text: None,
                    path,
                    expressions: vec![value],
                    dependencies,
                    template_markup: String::new(),
                    context: context.cloned(),
                    consumed: false,
                }) {
                    outcome.entries.push(id);
                }
            }

            if let Some(expr) = doc.attribute(node, &foreach_attr).map(str::to_string) {
                match (parse_foreach(&expr), doc.parent(node), doc.tag(node).map(str::to_string)) {
                    (Some((var, source)), Some(parent), Some(tag)) => {
                        let record = TemplateRecord {
                            id: TemplateId(self.next_template),
                            owner,
                            parent,
                            tag,
                            markup: normalize_markup(&inner_html(doc, node)),
                            iteration_var: var,
                            source_path: source,
                            context: context.cloned(),
                            generated: Vec::new(),
                        };
                        self.next_template += 1;
                        tracing::debug!(id = record.id.0, path = %record.source_path, "template captured");
                        outcome.templates.push(record.id);
                        self.templates.insert(record.id, record);
                        doc.remove(node);
                    }
                    _ => diagnostics.push(
                        "invalid-foreach",
                        format!("{}=\"{}\" is not of the form '<item> in <array>'", foreach_attr, expr),
                    ),
                }
            }
        }

        if config.interpolation {
            for node in doc.descendants(root) {
                let Some(text) = doc.text(node) else {
                    continue;
                };
                if !(text.contains("{{") && text.contains("}}")) {
                    continue;
                }
                let expressions = interpreter::expressions(text);
                let dependencies = expressions
                    .iter()
                    .flat_map(|e| interpreter::dependencies(e))
                    .collect();
                let entry = BindingEntry {
                    id: EntryId(0),
                    template_id: owner,
                    kind: DirectiveKind::Interpolation,
                    target: doc.parent(node).unwrap_or(root),
                    text: Some(node),
                    path: String::new(),
                    expressions,
                    dependencies,
                    template_markup: text.to_string(),
                    context: context.cloned(),
                    consumed: false,
                };
                if let Some(id) = self.insert(entry) {
                    outcome.entries.push(id);
                }
            }
        }

        tracing::debug!(
            entries = outcome.entries.len(),
            templates = outcome.templates.len(),
            owner = ?owner.map(|t| t.0),
            "scan"
        );
        outcome
    }

    /// Insert unless an entry with the same target, kind and path exists.
    fn insert(&mut self, mut entry: BindingEntry) -> Option<EntryId> {
        let node = entry.text.unwrap_or(entry.target);
        let duplicate = self.entries.values().any(|e| {
            e.text.unwrap_or(e.target) == node && e.kind == entry.kind && e.path == entry.path
        });
        if duplicate {
            return None;
        }
        let id = EntryId(self.next_entry);
        self.next_entry += 1;
        entry.id = id;
        self.entries.insert(id, entry);
        Some(id)
    }

    /// Drop every row owned by `template`, recursing into nested templates.
    /// The record itself is kept. Returns the number of rows removed.
    pub fn purge(&mut self, template: TemplateId) -> usize {
        let before = self.entries.len() + self.templates.len();
        let mut pending = vec![template];
        while let Some(t) = pending.pop() {
            self.entries.retain(|_, e| e.template_id != Some(t));
            let nested: Vec<TemplateId> = self
                .templates
                .values()
                .filter(|r| r.owner == Some(t))
                .map(|r| r.id)
                .collect();
            for id in nested {
                self.templates.remove(&id);
                pending.push(id);
            }
        }
        let removed = before - (self.entries.len() + self.templates.len());
        tracing::debug!(template = template.0, removed, "purge");
        removed
    }

    pub fn entry(&self, id: EntryId) -> Option<&BindingEntry> {
        self.entries.get(&id)
    }

    pub fn entry_mut(&mut self, id: EntryId) -> Option<&mut BindingEntry> {
        self.entries.get_mut(&id)
    }

    /// All entries in id order.
    pub fn entries(&self) -> impl Iterator<Item = &BindingEntry> {
        self.entries.values()
    }

    pub fn entries_for_node(&self, node: NodeId) -> Vec<&BindingEntry> {
        self.entries.values().filter(|e| e.target == node).collect()
    }

    pub fn template(&self, id: TemplateId) -> Option<&TemplateRecord> {
        self.templates.get(&id)
    }

    pub fn template_mut(&mut self, id: TemplateId) -> Option<&mut TemplateRecord> {
        self.templates.get_mut(&id)
    }

    pub fn templates(&self) -> impl Iterator<Item = &TemplateRecord> {
        self.templates.values()
    }

    /// Templates whose array path is `path`.
    pub fn templates_for_path(&self, path: &Path) -> Vec<TemplateId> {
        self.templates
            .values()
            .filter(|r| r.state_path().as_ref() == Some(path))
            .map(|r| r.id)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
