//! Evaluation of `{{ ... }}` interpolation tokens against the state graph.
//!
//! Expressions are parsed by [`crate::parser`] into a restricted AST and
//! evaluated here against the graph's top-level keys. Nothing an expression
//! does can write to the graph.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

use crate::ast::*;
use crate::error::{Diagnostic, EvalError};
use crate::parser;
use crate::path::{strip_root_prefix, Path, Segment, ROOT};

/// Reserved token resolving to the nearest enclosing iteration index.
pub const INDEX_TOKEN: &str = "index";

/// Explicit render context of a generated template item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemContext {
    /// Iteration variable name from `<var> in <array>`.
    pub var: String,
    /// Resolved item path as written in the markup, e.g. `items[2]`.
    pub path: String,
    pub index: usize,
}

/// Result of interpolating one text node.
#[derive(Debug, Clone, PartialEq)]
pub struct Interpolated {
    pub text: String,
    pub diagnostics: Vec<Diagnostic>,
}

pub(crate) fn token_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{(.*?)\}\}").expect("static regex"))
}

/// The trimmed expressions of every `{{ ... }}` token in `text`.
pub fn expressions(text: &str) -> Vec<String> {
    token_regex()
        .captures_iter(text)
        .map(|c| c[1].trim().to_string())
        .collect()
}

/// Replace every token in `raw` with its evaluated value.
///
/// Evaluation failures never escape: the failing token is written back as
/// `{{root.<expr>}}` and a diagnostic is returned alongside the text.
pub fn interpolate(raw: &str, state: &Value, context: Option<&ItemContext>) -> Interpolated {
    let mut diagnostics = Vec::new();
    let text = token_regex()
        .replace_all(raw, |caps: &regex::Captures| {
            let expr = caps[1].trim();
            match evaluate_token(expr, state, context) {
                Ok(s) => s,
                Err((code, message)) => {
                    diagnostics.push(Diagnostic {
                        code,
                        message: format!("{{{{{}}}}}: {}", expr, message),
                    });
                    unresolved(expr)
                }
            }
        })
        .into_owned();
    Interpolated { text, diagnostics }
}

fn unresolved(expr: &str) -> String {
    let stripped = strip_root_prefix(expr);
    if stripped.eq_ignore_ascii_case(ROOT) {
        format!("{{{{{}}}}}", ROOT)
    } else {
        format!("{{{{{}.{}}}}}", ROOT, stripped)
    }
}

fn evaluate_token(
    expr: &str,
    state: &Value,
    context: Option<&ItemContext>,
) -> Result<String, (&'static str, String)> {
    if expr.eq_ignore_ascii_case(ROOT) {
        return Ok(state.to_string());
    }
    if expr.eq_ignore_ascii_case(INDEX_TOKEN) {
        return context.map(|c| c.index.to_string()).ok_or((
            "index-outside-iteration",
            "index used outside of a foreach item".to_string(),
        ));
    }
    let value = evaluate(strip_root_prefix(expr), state)
        .map_err(|e| ("expression-failed", e.to_string()))?;
    Ok(value.display())
}

/// Parse and evaluate one expression against the state graph.
pub fn evaluate(expr: &str, state: &Value) -> Result<Val, EvalError> {
    let ast = parser::parse(expr)?;
    eval(&ast, state)
}

/// Static state paths read by `expr`. Computed indices end the chain.
pub fn dependencies(expr: &str) -> Vec<Path> {
    let stripped = strip_root_prefix(expr);
    if expr.trim().eq_ignore_ascii_case(ROOT) {
        return vec![Path::root()];
    }
    match parser::parse(stripped) {
        Ok(ast) => {
            let mut out = Vec::new();
            collect_paths(&ast, &mut out);
            out
        }
        Err(_) => Vec::new(),
    }
}

fn collect_paths(expr: &Expr, out: &mut Vec<Path>) {
    if let Some(segments) = static_chain(expr) {
        out.push(Path::from_segments(segments));
        return;
    }
    match expr {
        Expr::Literal(_) | Expr::Identifier(_) => {}
        Expr::Member { object, .. } => collect_paths(object, out),
        Expr::Index { object, index } => {
            collect_paths(object, out);
            collect_paths(index, out);
        }
        Expr::Unary { operand, .. } => collect_paths(operand, out),
        Expr::Binary { left, right, .. } => {
            collect_paths(left, out);
            collect_paths(right, out);
        }
        Expr::Conditional {
            test,
            consequent,
            alternate,
        } => {
            collect_paths(test, out);
            collect_paths(consequent, out);
            collect_paths(alternate, out);
        }
    }
}

/// The path of a pure `a.b[0]` chain, if `expr` is one.
fn static_chain(expr: &Expr) -> Option<Vec<Segment>> {
    match expr {
        Expr::Identifier(name) if name.eq_ignore_ascii_case(ROOT) => Some(Vec::new()),
        Expr::Identifier(name) => Some(vec![Segment::Key(name.clone())]),
        Expr::Member { object, property } => {
            let mut segs = static_chain(object)?;
            segs.push(Segment::Key(property.clone()));
            Some(segs)
        }
        Expr::Index { object, index } => {
            let mut segs = static_chain(object)?;
            match index.as_ref() {
                Expr::Literal(Literal::Number(n)) if *n >= 0.0 && n.fract() == 0.0 => {
                    segs.push(Segment::Index(*n as usize))
                }
                Expr::Literal(Literal::String(s)) => segs.push(Segment::Key(s.clone())),
                _ => return None,
            }
            Some(segs)
        }
        _ => None,
    }
}

// ── Values ──────────────────────────────────────────────────────────

/// An evaluated value. Composites keep their JSON form.
#[derive(Debug, Clone, PartialEq)]
pub enum Val {
    Undefined,
    Null,
    Bool(bool),
    Num(f64),
    Str(String),
    Composite(Value),
}

impl Val {
    pub fn from_json(value: &Value) -> Val {
        match value {
            Value::Null => Val::Null,
            Value::Bool(b) => Val::Bool(*b),
            Value::Number(n) => Val::Num(n.as_f64().unwrap_or(f64::NAN)),
            Value::String(s) => Val::Str(s.clone()),
            other => Val::Composite(other.clone()),
        }
    }

    pub fn truthy(&self) -> bool {
        match self {
            Val::Undefined | Val::Null => false,
            Val::Bool(b) => *b,
            Val::Num(n) => *n != 0.0 && !n.is_nan(),
            Val::Str(s) => !s.is_empty(),
            Val::Composite(_) => true,
        }
    }

    fn to_number(&self) -> f64 {
        match self {
            Val::Undefined => f64::NAN,
            Val::Null => 0.0,
            Val::Bool(b) => f64::from(u8::from(*b)),
            Val::Num(n) => *n,
            Val::Str(s) if s.trim().is_empty() => 0.0,
            Val::Str(s) => s.trim().parse().unwrap_or(f64::NAN),
            Val::Composite(_) => f64::NAN,
        }
    }

    /// The form substituted into text. `null` and `undefined` render empty.
    pub fn display(&self) -> String {
        match self {
            Val::Undefined | Val::Null => String::new(),
            other => other.to_text(),
        }
    }

    /// String conversion used by `+` concatenation.
    fn to_text(&self) -> String {
        match self {
            Val::Undefined => "undefined".to_string(),
            Val::Null => "null".to_string(),
            Val::Bool(b) => b.to_string(),
            Val::Num(n) => format_number(*n),
            Val::Str(s) => s.clone(),
            Val::Composite(v) => v.to_string(),
        }
    }
}

/// Format a number the way the markup's authors expect: `2`, not `2.0`.
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        let sign = if n > 0.0 { "" } else { "-" };
        format!("{}Infinity", sign)
    } else if n == 0.0 {
        "0".to_string()
    } else if n.fract() == 0.0 && n.abs() < 1e21 {
        format!("{:.0}", n)
    } else {
        format!("{}", n)
    }
}

fn eval(expr: &Expr, state: &Value) -> Result<Val, EvalError> {
    match expr {
        Expr::Literal(lit) => Ok(match lit {
            Literal::Number(n) => Val::Num(*n),
            Literal::String(s) => Val::Str(s.clone()),
            Literal::Boolean(b) => Val::Bool(*b),
            Literal::Null => Val::Null,
            Literal::Undefined => Val::Undefined,
        }),
        Expr::Identifier(name) => {
            if name.eq_ignore_ascii_case(ROOT) {
                return Ok(Val::from_json(state));
            }
            state
                .get(name.as_str())
                .map(Val::from_json)
                .ok_or_else(|| EvalError::UnknownIdentifier(name.clone()))
        }
        Expr::Member { object, property } => {
            let target = eval(object, state)?;
            member(&target, property)
        }
        Expr::Index { object, index } => {
            let target = eval(object, state)?;
            let key = match eval(index, state)? {
                Val::Num(n) if n >= 0.0 && n.fract() == 0.0 => format_number(n),
                other => other.to_text(),
            };
            member(&target, &key)
        }
        Expr::Unary { op, operand } => {
            let v = eval(operand, state)?;
            Ok(match op {
                UnaryOp::Not => Val::Bool(!v.truthy()),
                UnaryOp::Neg => Val::Num(-v.to_number()),
                UnaryOp::Plus => Val::Num(v.to_number()),
            })
        }
        Expr::Binary { op, left, right } => {
            let l = eval(left, state)?;
            // Short-circuit operators return an operand.
            match op {
                BinaryOp::And => return if l.truthy() { eval(right, state) } else { Ok(l) },
                BinaryOp::Or => return if l.truthy() { Ok(l) } else { eval(right, state) },
                _ => {}
            }
            let r = eval(right, state)?;
            Ok(binary(*op, &l, &r))
        }
        Expr::Conditional {
            test,
            consequent,
            alternate,
        } => {
            if eval(test, state)?.truthy() {
                eval(consequent, state)
            } else {
                eval(alternate, state)
            }
        }
    }
}

fn member(target: &Val, property: &str) -> Result<Val, EvalError> {
    match target {
        Val::Undefined | Val::Null => Err(EvalError::NullAccess {
            property: property.to_string(),
            target: if matches!(target, Val::Null) { "null" } else { "undefined" },
        }),
        Val::Str(s) if property == "length" => Ok(Val::Num(s.chars().count() as f64)),
        Val::Composite(Value::Array(items)) => {
            if property == "length" {
                return Ok(Val::Num(items.len() as f64));
            }
            Ok(property
                .parse::<usize>()
                .ok()
                .and_then(|i| items.get(i))
                .map_or(Val::Undefined, Val::from_json))
        }
        Val::Composite(Value::Object(map)) => {
            Ok(map.get(property).map_or(Val::Undefined, Val::from_json))
        }
        _ => Ok(Val::Undefined),
    }
}

fn binary(op: BinaryOp, l: &Val, r: &Val) -> Val {
    match op {
        BinaryOp::Add => {
            let stringy = |v: &Val| matches!(v, Val::Str(_) | Val::Composite(_));
            if stringy(l) || stringy(r) {
                Val::Str(format!("{}{}", l.to_text(), r.to_text()))
            } else {
                Val::Num(l.to_number() + r.to_number())
            }
        }
        BinaryOp::Sub => Val::Num(l.to_number() - r.to_number()),
        BinaryOp::Mul => Val::Num(l.to_number() * r.to_number()),
        BinaryOp::Div => Val::Num(l.to_number() / r.to_number()),
        BinaryOp::Rem => Val::Num(l.to_number() % r.to_number()),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ord = match (l, r) {
                (Val::Str(a), Val::Str(b)) => Some(a.cmp(b)),
                _ => l.to_number().partial_cmp(&r.to_number()),
            };
            let Some(ord) = ord else {
                return Val::Bool(false);
            };
            Val::Bool(match op {
                BinaryOp::Lt => ord.is_lt(),
                BinaryOp::Le => ord.is_le(),
                BinaryOp::Gt => ord.is_gt(),
                _ => ord.is_ge(),
            })
        }
        BinaryOp::StrictEq => Val::Bool(strict_eq(l, r)),
        BinaryOp::StrictNe => Val::Bool(!strict_eq(l, r)),
        BinaryOp::Eq => Val::Bool(loose_eq(l, r)),
        BinaryOp::Ne => Val::Bool(!loose_eq(l, r)),
        // Handled with short-circuiting in `eval`.
        BinaryOp::And | BinaryOp::Or => Val::Undefined,
    }
}

fn strict_eq(l: &Val, r: &Val) -> bool {
    match (l, r) {
        (Val::Num(a), Val::Num(b)) => a == b,
        _ => l == r,
    }
}

fn loose_eq(l: &Val, r: &Val) -> bool {
    match (l, r) {
        (Val::Null | Val::Undefined, Val::Null | Val::Undefined) => true,
        (Val::Null | Val::Undefined, _) | (_, Val::Null | Val::Undefined) => false,
        (Val::Str(a), Val::Str(b)) => a == b,
        (Val::Composite(a), Val::Composite(b)) => a == b,
        _ => l.to_number() == r.to_number(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn state() -> Value {
        json!({"user": {"name": "Ada", "age": 36}, "items": ["a", "b"], "n": 0})
    }

    #[test]
    fn arithmetic_and_literals() {
        assert_eq!(interpolate("{{1+1}}", &state(), None).text, "2");
        assert_eq!(interpolate("{{ 7 / 2 }}", &state(), None).text, "3.5");
        assert_eq!(interpolate("{{'a' + 1}}", &state(), None).text, "a1");
    }

    #[test]
    fn large_whole_numbers_keep_their_digits() {
        let s = json!({"n": 1e20, "neg": -1e20});
        assert_eq!(interpolate("{{1e20}}|{{n}}", &s, None).text, "100000000000000000000|100000000000000000000");
        assert_eq!(interpolate("{{neg}}", &s, None).text, "-100000000000000000000");
        assert_eq!(format_number(-0.0), "0");
        assert_eq!(format_number(0.5), "0.5");
    }

    #[test]
    fn paths_with_and_without_root() {
        let s = state();
        assert_eq!(interpolate("Hi {{user.name}}!", &s, None).text, "Hi Ada!");
        assert_eq!(interpolate("{{root.user.name}}", &s, None).text, "Ada");
        assert_eq!(interpolate("{{items[1]}}", &s, None).text, "b");
        assert_eq!(interpolate("{{items.length}}", &s, None).text, "2");
        assert_eq!(
            interpolate("{{user.age > 18 ? 'adult' : 'minor'}}", &s, None).text,
            "adult"
        );
    }

    #[test]
    fn composites_serialize() {
        let s = state();
        assert_eq!(interpolate("{{items}}", &s, None).text, r#"["a","b"]"#);
        assert_eq!(interpolate("{{root}}", &s, None).text, s.to_string());
    }

    #[test]
    fn failures_leave_the_token_unexpanded() {
        let out = interpolate("x {{unknownPath.x}} y", &state(), None);
        assert_eq!(out.text, "x {{root.unknownPath.x}} y");
        assert_eq!(out.diagnostics.len(), 1);
        assert_eq!(out.diagnostics[0].code, "expression-failed");

        let out = interpolate("{{1 +}}", &state(), None);
        assert_eq!(out.text, "{{root.1 +}}");
        assert_eq!(out.diagnostics.len(), 1);
    }

    #[test]
    fn index_uses_the_render_context() {
        let ctx = ItemContext {
            var: "item".into(),
            path: "items[1]".into(),
            index: 1,
        };
        assert_eq!(interpolate("#{{index}}", &state(), Some(&ctx)).text, "#1");
        let out = interpolate("#{{index}}", &state(), None);
        assert_eq!(out.text, "#{{root.index}}");
        assert_eq!(out.diagnostics.len(), 1);
        assert_eq!(out.diagnostics[0].code, "index-outside-iteration");
    }

    #[test]
    fn missing_members_render_empty() {
        assert_eq!(interpolate("[{{user.nickname}}]", &state(), None).text, "[]");
        assert_eq!(interpolate("[{{n}}]", &state(), None).text, "[0]");
    }

    #[test]
    fn dependency_extraction() {
        let deps = dependencies("user.name + ' ' + items[0]");
        assert_eq!(
            deps,
            vec![
                Path::parse("user.name").unwrap(),
                Path::parse("items[0]").unwrap()
            ]
        );
        assert_eq!(dependencies("root"), vec![Path::root()]);
        assert_eq!(dependencies("items[n]"), vec![Path::parse("items").unwrap(), Path::parse("n").unwrap()]);
        assert!(dependencies("1 + 1").is_empty());
    }
}
