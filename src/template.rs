//! Expansion of repeating markers into generated items.
//!
//! Each generated item is an element of the marker's tag holding a copy of
//! the captured markup, with every reference to the iteration variable
//! rewritten to the concrete item path (`items[2]`). The item is then
//! scanned like any other subtree, with an explicit [`ItemContext`].

use serde_json::Value;

use crate::config::Config;
use crate::error::{Diagnostics, MarkupError};
use crate::interpreter::{token_regex, ItemContext};
use crate::markup::set_inner_html;
use crate::path::Path;
use crate::registry::{parse_foreach, TemplateId, TemplateRecord};
use crate::tree::{Document, NodeId};
use crate::App;

fn is_ident_char(ch: char) -> bool {
    ch.is_alphanumeric() || ch == '_' || ch == '$'
}

/// Replace whole-word occurrences of `var` that are not a member name
/// (`.var`) and not inside a string literal. Returns the text and the
/// number of replacements.
pub fn replace_var(text: &str, var: &str, with: &str, first_only: bool) -> (String, usize) {
    let mut out = String::with_capacity(text.len());
    let mut count = 0;
    let mut quote: Option<char> = None;
    let mut prev: Option<char> = None;
    let mut i = 0;

    while let Some(ch) = text[i..].chars().next() {
        if let Some(q) = quote {
            if ch == q && prev != Some('\\') {
                quote = None;
            }
        } else if ch == '"' || ch == '\'' {
            quote = Some(ch);
        } else if !(first_only && count > 0)
            && !prev.is_some_and(|p| is_ident_char(p) || p == '.')
            && text[i..].starts_with(var)
            && !text[i + var.len()..].chars().next().is_some_and(is_ident_char)
        {
            out.push_str(with);
            count += 1;
            prev = var.chars().last();
            i += var.len();
            continue;
        }
        out.push(ch);
        prev = Some(ch);
        i += ch.len_utf8();
    }
    (out, count)
}

/// Rewrite the iteration variable inside every `{{ ... }}` token.
pub fn rewrite_tokens(markup: &str, var: &str, item_path: &str) -> String {
    token_regex()
        .replace_all(markup, |caps: &regex::Captures| {
            format!("{{{{{}}}}}", replace_var(&caps[1], var, item_path, false).0)
        })
        .into_owned()
}

/// Build the detached item for `record` at `index`.
pub fn render_item(
    doc: &mut Document,
    record: &TemplateRecord,
    index: usize,
    config: &Config,
    diagnostics: &mut Diagnostics,
) -> Result<(NodeId, ItemContext), MarkupError> {
    let var = record.iteration_var.as_str();
    let item_path = format!("{}[{}]", record.source_path, index);
    let context = ItemContext {
        var: var.to_string(),
        path: item_path.clone(),
        index,
    };

    let item = doc.create_element(&record.tag);
    if let Err(err) = set_inner_html(doc, item, &rewrite_tokens(&record.markup, var, &item_path)) {
        doc.remove(item);
        return Err(err);
    }
    stamp(doc, item, config, &context);
    doc.set_attribute(item, "id", &format!("{}-{}-{}", record.id, var, index));

    let bind = config.attr("bind");
    let click = config.attr("click");
    let foreach = config.attr("foreach");
    let one_way = [config.attr("show"), config.attr("hide")];

    let descendants = doc.descendants(item);
    let mut nested = Vec::new();
    for node in &descendants {
        if doc.has_attribute(*node, &foreach) {
            nested.extend(doc.descendants(*node));
        }
    }

    for node in descendants {
        if !doc.is_element(node) {
            continue;
        }
        let inside_nested = nested.contains(&node);

        if let Some(path) = doc.attribute(node, &bind).map(str::to_string) {
            let (rewritten, hits) = replace_var(&path, var, &item_path, true);
            if hits == 0 && !inside_nested {
                diagnostics.push(
                    "bind-outside-iteration",
                    format!(
                        "{}=\"{}\" inside '{} in {}' does not use '{}'",
                        bind, path, var, record.source_path, var
                    ),
                );
            }
            doc.set_attribute(node, &bind, &rewritten);
        }
        for attr in &one_way {
            if let Some(path) = doc.attribute(node, attr).map(str::to_string) {
                let (rewritten, _) = replace_var(&path, var, &item_path, true);
                doc.set_attribute(node, attr, &rewritten);
            }
        }
        if !inside_nested && (doc.has_attribute(node, &bind) || doc.has_attribute(node, &click)) {
            stamp(doc, node, config, &context);
        }
        if let Some(expr) = doc.attribute(node, &foreach).map(str::to_string) {
            if let Some((inner_var, source)) = parse_foreach(&expr) {
                let (source, _) = replace_var(&source, var, &item_path, true);
                doc.set_attribute(node, &foreach, &format!("{} in {}", inner_var, source));
            }
        }

        let id = match doc.attribute(node, "id") {
            Some(id) => format!("{}-{}", id, index),
            None => format!("{}-{}", var, index),
        };
        doc.set_attribute(node, "id", &id);
        if let Some(target) = doc.attribute(node, "for").map(str::to_string) {
            doc.set_attribute(node, "for", &format!("{}-{}", target, index));
        }
    }

    Ok((item, context))
}

/// Attach the synthetic context attributes.
fn stamp(doc: &mut Document, node: NodeId, config: &Config, context: &ItemContext) {
    doc.set_attribute(node, &config.attr("varname"), &context.var);
    doc.set_attribute(node, &config.attr("path"), &context.path);
    doc.set_attribute(node, &config.attr("index"), &context.index.to_string());
}

impl App {
    /// Re-render every template whose array lies at or beneath `path`.
    ///
    /// `operation` applies to templates bound exactly to `path`; deeper
    /// templates are fully rebuilt.
    pub(crate) fn expand(&mut self, path: &Path, operation: &str) {
        let targets: Vec<(TemplateId, bool)> = self
            .registry
            .templates()
            .filter_map(|r| {
                let p = r.state_path()?;
                p.starts_with(path).then(|| (r.id, p == *path))
            })
            .collect();
        for (id, exact) in targets {
            self.expand_template(id, if exact { operation } else { "init" });
        }
    }

    pub(crate) fn expand_template(&mut self, id: TemplateId, operation: &str) {
        // Purged by an outer rebuild earlier in this pass.
        let Some(record) = self.registry.template(id).cloned() else {
            return;
        };
        let Some(Value::Array(items)) = record.state_path().and_then(|p| self.store.get(&p)) else {
            return;
        };
        let len = items.len();

        let single = operation == "push" && len > 0 && record.generated.len() == len - 1;
        let (start, mut generated) = if single {
            (len - 1, record.generated.clone())
        } else {
            self.registry.purge(id);
            for node in &record.generated {
                self.doc.remove(*node);
            }
            self.listeners.prune(&self.doc);
            (0, Vec::new())
        };
        tracing::debug!(
            template = id.0,
            path = %record.source_path,
            operation,
            from = start,
            to = len,
            "expand"
        );

        let mut entries = Vec::new();
        let mut nested = Vec::new();
        for index in start..len {
            let rendered = render_item(&mut self.doc, &record, index, &self.config, &mut self.diagnostics);
            let (item, context) = match rendered {
                Ok(r) => r,
                Err(e) => {
                    self.diagnostics.push(
                        "invalid-template",
                        format!("template '{}' item {}: {}", record.source_path, index, e),
                    );
                    continue;
                }
            };
            self.doc.append_child(record.parent, item);
            generated.push(item);
            let outcome = self.registry.scan(
                &mut self.doc,
                item,
                Some(id),
                Some(&context),
                &self.config,
                &mut self.diagnostics,
            );
            entries.extend(outcome.entries);
            nested.extend(outcome.templates);
        }
        if let Some(r) = self.registry.template_mut(id) {
            r.generated = generated;
        }

        self.refresh(&entries);
        self.bind_listeners();
        for t in nested {
            self.expand_template(t, "init");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::markup::inner_html;

    #[test]
    fn replaces_whole_words_only() {
        let (out, n) = replace_var("item.name + items.length + x.item + 'item'", "item", "list[0]", false);
        assert_eq!(out, "list[0].name + items.length + x.item + 'item'");
        assert_eq!(n, 1);
        let (out, n) = replace_var("item.a == item.b", "item", "l[1]", true);
        assert_eq!(out, "l[1].a == item.b");
        assert_eq!(n, 1);
    }

    #[test]
    fn token_rewrite_leaves_plain_text_alone() {
        assert_eq!(
            rewrite_tokens("item: {{ item.name }} {{index}}", "item", "items[3]"),
            "item: {{ items[3].name }} {{index}}"
        );
    }

    #[test]
    fn renders_an_item_with_context() {
        let mut doc = Document::new();
        let parent = doc.create_element("ul");
        let record = TemplateRecord {
            id: TemplateId(4),
            owner: None,
            parent,
            tag: "li".into(),
            markup: r#"<label for="n">{{item.name}}</label><input id="n" ba-bind="item.name"><b ba-click="pick(item)">x</b><span ba-bind="other">y</span>"#.into(),
            iteration_var: "item".into(),
            source_path: "items".into(),
            context: None,
            generated: Vec::new(),
        };
        let mut diags = Diagnostics::default();
        let (item, ctx) = render_item(&mut doc, &record, 2, &Config::default(), &mut diags).unwrap();
        assert_eq!(ctx.path, "items[2]");
        assert_eq!(doc.attribute(item, "id"), Some("4-item-2"));
        assert_eq!(doc.attribute(item, "ba-index"), Some("2"));
        assert_eq!(
            inner_html(&doc, item),
            concat!(
                r#"<label for="n-2" id="item-2">{{items[2].name}}</label>"#,
                r#"<input id="n-2" ba-bind="items[2].name" ba-varname="item" ba-path="items[2]" ba-index="2">"#,
                r#"<b ba-click="pick(item)" ba-varname="item" ba-path="items[2]" ba-index="2" id="item-2">x</b>"#,
                r#"<span ba-bind="other" ba-varname="item" ba-path="items[2]" ba-index="2" id="item-2">y</span>"#
            )
        );
        assert_eq!(diags.as_slice().len(), 1);
        assert_eq!(diags.as_slice()[0].code, "bind-outside-iteration");
    }
}
