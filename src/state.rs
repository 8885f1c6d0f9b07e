//! The observable state graph.
//!
//! [`Store`] owns a `serde_json::Value` tree and is the only way to change
//! it. Every effective write produces a [`Mutation`], which is queued for the
//! owning instance's dispatcher and handed synchronously to any subscriber
//! whose prefix covers the mutated path.
//!
//! # Invariants
//!
//! 1. Writing a value equal to the current one is a no-op: no mutation.
//! 2. Array surgery (`push`, `pop`, `splice`, `shift`, `unshift`) emits exactly
//!    one mutation for the array's own path, keyed by the operation name.
//! 3. Length changes never emit. A write to `<array>.length` resizes quietly.
//! 4. Identity stamping (when enabled) never emits.

use std::collections::{BTreeMap, VecDeque};

use serde_json::Value;

use crate::error::StateError;
use crate::path::{Path, Segment};

/// Largest length a write to `<array>.length` may set.
pub const MAX_ARRAY_LENGTH: usize = 1 << 20;

/// One effective change to the state graph.
#[derive(Debug, Clone, PartialEq)]
pub struct Mutation {
    pub path: Path,
    /// Post-mutation value at `path`.
    pub value: Value,
    /// The written key, or the array operation name.
    pub key: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Subscriber {
    id: SubscriptionId,
    prefix: Path,
    callback: Box<dyn FnMut(&Mutation)>,
}

/// Identity stamping settings.
#[derive(Debug, Clone)]
pub struct Identity {
    pub key: String,
    next: u64,
}

impl Identity {
    pub fn new(key: impl Into<String>) -> Self {
        Identity {
            key: key.into(),
            next: 0,
        }
    }

    /// Stamp every plain object in `value` that has no identity yet.
    fn stamp(&mut self, value: &mut Value) {
        match value {
            Value::Object(map) => {
                if !map.contains_key(&self.key) {
                    self.next += 1;
                    map.insert(self.key.clone(), Value::from(self.next));
                }
                for (_, child) in map.iter_mut() {
                    self.stamp(child);
                }
            }
            Value::Array(items) => {
                for item in items {
                    self.stamp(item);
                }
            }
            _ => {}
        }
    }
}

pub struct Store {
    root: Value,
    pending: VecDeque<Mutation>,
    identity: Option<Identity>,
    subscribers: Vec<Subscriber>,
    next_subscription: u64,
}

impl Store {
    pub fn new(root: Value) -> Self {
        Store {
            root,
            pending: VecDeque::new(),
            identity: None,
            subscribers: Vec::new(),
            next_subscription: 0,
        }
    }

    /// Wrap `root`, stamping every plain object with an ascending identity.
    pub fn with_identity(mut root: Value, identity: Identity) -> Self {
        let mut identity = identity;
        identity.stamp(&mut root);
        let mut store = Store::new(root);
        store.identity = Some(identity);
        store
    }

    pub fn root(&self) -> &Value {
        &self.root
    }

    /// Read the node at `path`. Unresolvable paths yield `None`.
    pub fn get(&self, path: &Path) -> Option<&Value> {
        let mut current = &self.root;
        for seg in path.segments() {
            current = child(current, seg)?;
        }
        Some(current)
    }

    /// Write `value` at `path`. Returns `Ok(false)` when nothing changed.
    pub fn set(&mut self, path: &Path, mut value: Value) -> Result<bool, StateError> {
        let parent_path = path.parent().ok_or(StateError::RootWrite)?;
        let last = path.last().cloned().ok_or(StateError::RootWrite)?;

        // Array length: resize silently.
        if let Segment::Key(k) = &last {
            if k == "length" {
                if matches!(self.get(&parent_path), Some(Value::Array(_))) {
                    let requested = value
                        .as_u64()
                        .ok_or_else(|| StateError::InvalidPath(path.to_string()))?;
                    let len = usize::try_from(requested)
                        .ok()
                        .filter(|len| *len <= MAX_ARRAY_LENGTH)
                        .ok_or_else(|| StateError::LengthTooLarge {
                            path: path.to_string(),
                            len: requested,
                            max: MAX_ARRAY_LENGTH,
                        })?;
                    let items = self.array_mut(&parent_path)?;
                    if items.len() == len {
                        return Ok(false);
                    }
                    items.resize(len, Value::Null);
                    return Ok(true);
                }
            }
        }

        if self.get(path) == Some(&value) {
            return Ok(false);
        }
        if let Some(identity) = self.identity.as_mut() {
            identity.stamp(&mut value);
        }

        let parent = self.get_mut(&parent_path)?;
        match (parent, &last) {
            (Value::Object(map), seg) => {
                map.insert(seg.as_key(), value.clone());
            }
            (Value::Array(items), seg) => {
                let index = array_index(seg)
                    .ok_or_else(|| StateError::InvalidPath(path.to_string()))?;
                let len = items.len();
                match items.get_mut(index) {
                    Some(slot) => *slot = value.clone(),
                    None if index == len => items.push(value.clone()),
                    None => {
                        return Err(StateError::IndexOutOfRange {
                            path: parent_path.to_string(),
                            index,
                            len,
                        })
                    }
                }
            }
            _ => return Err(StateError::NotContainer(parent_path.to_string())),
        }

        tracing::debug!(path = %path, key = %last.as_key(), "state write");
        self.emit(Mutation {
            path: path.clone(),
            value,
            key: last.as_key(),
        });
        Ok(true)
    }

    /// Append `values`, returning the new length.
    pub fn push(&mut self, path: &Path, values: Vec<Value>) -> Result<usize, StateError> {
        let values = self.stamped(values);
        let items = self.array_mut(path)?;
        items.extend(values);
        let len = items.len();
        self.emit_array(path, "push");
        Ok(len)
    }

    pub fn pop(&mut self, path: &Path) -> Result<Option<Value>, StateError> {
        let removed = self.array_mut(path)?.pop();
        self.emit_array(path, "pop");
        Ok(removed)
    }

    pub fn shift(&mut self, path: &Path) -> Result<Option<Value>, StateError> {
        let items = self.array_mut(path)?;
        let removed = if items.is_empty() {
            None
        } else {
            Some(items.remove(0))
        };
        self.emit_array(path, "shift");
        Ok(removed)
    }

    /// Prepend `values`, returning the new length.
    pub fn unshift(&mut self, path: &Path, values: Vec<Value>) -> Result<usize, StateError> {
        let values = self.stamped(values);
        let items = self.array_mut(path)?;
        items.splice(0..0, values);
        let len = items.len();
        self.emit_array(path, "unshift");
        Ok(len)
    }

    /// Remove `delete_count` items at `start` and insert `insert` there.
    /// `start` and `delete_count` are clamped to the array bounds.
    pub fn splice(
        &mut self,
        path: &Path,
        start: usize,
        delete_count: usize,
        insert: Vec<Value>,
    ) -> Result<Vec<Value>, StateError> {
        let insert = self.stamped(insert);
        let items = self.array_mut(path)?;
        let start = start.min(items.len());
        let end = start.saturating_add(delete_count).min(items.len());
        let removed: Vec<Value> = items.splice(start..end, insert).collect();
        self.emit_array(path, "splice");
        Ok(removed)
    }

    /// Observe mutations at or beneath `prefix`.
    pub fn subscribe(
        &mut self,
        prefix: Path,
        callback: impl FnMut(&Mutation) + 'static,
    ) -> SubscriptionId {
        self.next_subscription += 1;
        let id = SubscriptionId(self.next_subscription);
        self.subscribers.push(Subscriber {
            id,
            prefix,
            callback: Box::new(callback),
        });
        id
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|s| s.id != id);
        self.subscribers.len() != before
    }

    /// A flat `path -> value` dictionary of every node below the root.
    pub fn flatten(&self) -> BTreeMap<String, Value> {
        let mut out = BTreeMap::new();
        flatten_into(&self.root, &Path::root(), &mut out);
        out
    }

    pub(crate) fn next_pending(&mut self) -> Option<Mutation> {
        self.pending.pop_front()
    }

    pub(crate) fn clear_pending(&mut self) -> usize {
        let n = self.pending.len();
        self.pending.clear();
        n
    }

    // ── Internals ────────────────────────────────────────────────────

    fn stamped(&mut self, mut values: Vec<Value>) -> Vec<Value> {
        if let Some(identity) = self.identity.as_mut() {
            for v in &mut values {
                identity.stamp(v);
            }
        }
        values
    }

    fn get_mut(&mut self, path: &Path) -> Result<&mut Value, StateError> {
        let mut current = &mut self.root;
        for seg in path.segments() {
            current = child_mut(current, seg).ok_or_else(|| StateError::NotFound(path.to_string()))?;
        }
        Ok(current)
    }

    fn array_mut(&mut self, path: &Path) -> Result<&mut Vec<Value>, StateError> {
        match self.get_mut(path)? {
            Value::Array(items) => Ok(items),
            _ => Err(StateError::NotAnArray(path.to_string())),
        }
    }

    fn emit_array(&mut self, path: &Path, operation: &str) {
        let value = self.get(path).cloned().unwrap_or(Value::Null);
        tracing::debug!(path = %path, operation, "array surgery");
        self.emit(Mutation {
            path: path.clone(),
            value,
            key: operation.to_string(),
        });
    }

    fn emit(&mut self, mutation: Mutation) {
        for sub in &mut self.subscribers {
            if mutation.path.starts_with(&sub.prefix) {
                (sub.callback)(&mutation);
            }
        }
        self.pending.push_back(mutation);
    }
}

fn array_index(seg: &Segment) -> Option<usize> {
    match seg {
        Segment::Index(i) => Some(*i),
        Segment::Key(k) => k.parse().ok(),
    }
}

fn child<'a>(value: &'a Value, seg: &Segment) -> Option<&'a Value> {
    match value {
        Value::Object(map) => map.get(&seg.as_key()),
        Value::Array(items) => items.get(array_index(seg)?),
        _ => None,
    }
}

fn child_mut<'a>(value: &'a mut Value, seg: &Segment) -> Option<&'a mut Value> {
    match value {
        Value::Object(map) => map.get_mut(&seg.as_key()),
        Value::Array(items) => items.get_mut(array_index(seg)?),
        _ => None,
    }
}

fn flatten_into(value: &Value, path: &Path, out: &mut BTreeMap<String, Value>) {
    match value {
        Value::Object(map) => {
            for (k, v) in map {
                let p = path.key(k.clone());
                out.insert(p.to_string(), v.clone());
                flatten_into(v, &p, out);
            }
        }
        Value::Array(items) => {
            for (i, v) in items.iter().enumerate() {
                let p = path.index(i);
                out.insert(p.to_string(), v.clone());
                flatten_into(v, &p, out);
            }
        }
        _ => {}
    }
}

/// Child entries of a composite value, paired with their paths.
pub fn children(path: &Path, value: &Value) -> Vec<(Path, String, Value)> {
    match value {
        Value::Object(map) => map
            .iter()
            .map(|(k, v)| (path.key(k.clone()), k.clone(), v.clone()))
            .collect(),
        Value::Array(items) => items
            .iter()
            .enumerate()
            .map(|(i, v)| (path.index(i), i.to_string(), v.clone()))
            .collect(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn p(s: &str) -> Path {
        Path::parse(s).unwrap()
    }

    #[test]
    fn equal_write_is_a_no_op() {
        let mut store = Store::new(json!({"a": 1}));
        assert_eq!(store.set(&p("root.a"), json!(1)), Ok(false));
        assert!(store.next_pending().is_none());
        assert_eq!(store.set(&p("root.a"), json!(2)), Ok(true));
        let m = store.next_pending().unwrap();
        assert_eq!(m.path, p("root.a"));
        assert_eq!(m.key, "a");
        assert_eq!(m.value, json!(2));
    }

    #[test]
    fn array_surgery_emits_once_with_operation_key() {
        let mut store = Store::new(json!({"items": ["a", "b"]}));
        assert_eq!(store.push(&p("items"), vec![json!("c")]), Ok(3));
        let m = store.next_pending().unwrap();
        assert_eq!(m.key, "push");
        assert_eq!(m.path, p("root.items"));
        assert_eq!(m.value, json!(["a", "b", "c"]));
        assert!(store.next_pending().is_none());

        let removed = store.splice(&p("items"), 0, 1, vec![]).unwrap();
        assert_eq!(removed, vec![json!("a")]);
        assert_eq!(store.next_pending().unwrap().key, "splice");
    }

    #[test]
    fn length_write_resizes_silently() {
        let mut store = Store::new(json!({"items": [1, 2, 3]}));
        assert_eq!(store.set(&p("items.length"), json!(1)), Ok(true));
        assert_eq!(store.get(&p("items")), Some(&json!([1])));
        assert!(store.next_pending().is_none());
    }

    #[test]
    fn length_write_is_bounded() {
        let mut store = Store::new(json!({"items": [1]}));
        assert!(matches!(
            store.set(&p("items.length"), json!(1e18 as u64)),
            Err(StateError::LengthTooLarge { len: 1_000_000_000_000_000_000, .. })
        ));
        assert!(matches!(
            store.set(&p("items.length"), json!(-1)),
            Err(StateError::InvalidPath(_))
        ));
        assert_eq!(store.get(&p("items")), Some(&json!([1])));
        assert_eq!(store.set(&p("items.length"), json!(MAX_ARRAY_LENGTH)), Ok(true));
        assert_eq!(store.get(&p("items")).and_then(Value::as_array).map(Vec::len), Some(MAX_ARRAY_LENGTH));
    }

    #[test]
    fn identity_stamps_objects_not_arrays() {
        let store = Store::with_identity(
            json!({"user": {"name": "A"}, "list": [{"x": 1}]}),
            Identity::new("baId"),
        );
        assert_eq!(store.get(&p("baId")), Some(&json!(1)));
        assert_eq!(store.get(&p("user.baId")), Some(&json!(2)));
        assert_eq!(store.get(&p("list[0].baId")), Some(&json!(3)));
        assert!(store.get(&p("list.baId")).is_none());
    }

    #[test]
    fn subscribers_see_mutations_under_their_prefix() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut store = Store::new(json!({"user": {"name": "A"}, "n": 0}));
        let sink = Rc::clone(&seen);
        let id = store.subscribe(p("user"), move |m| sink.borrow_mut().push(m.path.to_string()));
        store.set(&p("user.name"), json!("B")).unwrap();
        store.set(&p("n"), json!(1)).unwrap();
        assert_eq!(*seen.borrow(), vec!["root.user.name".to_string()]);
        assert!(store.unsubscribe(id));
        store.set(&p("user.name"), json!("C")).unwrap();
        assert_eq!(seen.borrow().len(), 1);
    }

    #[test]
    fn writes_need_an_existing_parent() {
        let mut store = Store::new(json!({"items": []}));
        assert!(matches!(
            store.set(&p("missing.x"), json!(1)),
            Err(StateError::NotFound(_))
        ));
        assert!(matches!(
            store.set(&p("items[3]"), json!(1)),
            Err(StateError::IndexOutOfRange { .. })
        ));
        assert!(matches!(store.push(&p("missing"), vec![]), Err(StateError::NotFound(_))));
    }

    #[test]
    fn flatten_lists_every_node() {
        let store = Store::new(json!({"a": {"b": [1]}}));
        let flat = store.flatten();
        assert_eq!(flat.get("root.a.b[0]"), Some(&json!(1)));
        assert_eq!(flat.get("root.a.b"), Some(&json!([1])));
        assert_eq!(flat.len(), 3);
    }
}
