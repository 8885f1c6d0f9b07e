//! Paths into the state graph.
//!
//! A path is written `root.items[2].name`: a chain of `.key` and `[index]`
//! segments starting at the fixed root alias. The alias is optional when
//! parsing and always present when displaying, so `items[2]` and
//! `root.items[2]` name the same node.

use std::fmt;

use crate::error::StateError;

/// The alias under which the whole state graph is addressed.
pub const ROOT: &str = "root";

/// A segment in a path: either a named property or an array index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Segment {
    Key(String),
    Index(usize),
}

impl Segment {
    /// The segment as a mutation key (`name` or `2`).
    pub fn as_key(&self) -> String {
        match self {
            Segment::Key(k) => k.clone(),
            Segment::Index(i) => i.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Path {
    segments: Vec<Segment>,
}

impl Path {
    /// The path of the graph root itself.
    pub fn root() -> Self {
        Path::default()
    }

    pub fn from_segments(segments: Vec<Segment>) -> Self {
        Path { segments }
    }

    /// Parse `root.a.b[0]`, `a.b[0]` or `root`.
    pub fn parse(input: &str) -> Result<Path, StateError> {
        let invalid = || StateError::InvalidPath(input.to_string());
        let text = input.trim();
        let bytes = text.as_bytes();
        let mut segments = Vec::new();
        let mut pos = 0;
        let mut expect_name = true;

        while pos < bytes.len() {
            match bytes[pos] {
                b'.' => {
                    if expect_name {
                        return Err(invalid());
                    }
                    pos += 1;
                    expect_name = true;
                }
                b'[' => {
                    let close = text[pos..].find(']').ok_or_else(invalid)? + pos;
                    let inner = text[pos + 1..close].trim();
                    let inner = inner.trim_matches(|c| c == '"' || c == '\'');
                    match inner.parse::<usize>() {
                        Ok(i) => segments.push(Segment::Index(i)),
                        Err(_) if !inner.is_empty() => segments.push(Segment::Key(inner.to_string())),
                        Err(_) => return Err(invalid()),
                    }
                    pos = close + 1;
                    expect_name = false;
                }
                _ => {
                    if !expect_name {
                        return Err(invalid());
                    }
                    let end = text[pos..]
                        .find(|c| c == '.' || c == '[')
                        .map_or(text.len(), |i| i + pos);
                    let name = text[pos..end].trim();
                    if name.is_empty() {
                        return Err(invalid());
                    }
                    segments.push(Segment::Key(name.to_string()));
                    pos = end;
                    expect_name = false;
                }
            }
        }
        if expect_name && !segments.is_empty() {
            return Err(invalid());
        }

        // Strip the root alias only when it is the first segment.
        if let Some(Segment::Key(first)) = segments.first() {
            if first.eq_ignore_ascii_case(ROOT) {
                segments.remove(0);
            }
        }
        Ok(Path { segments })
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn last(&self) -> Option<&Segment> {
        self.segments.last()
    }

    pub fn parent(&self) -> Option<Path> {
        if self.segments.is_empty() {
            return None;
        }
        Some(Path {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }

    pub fn key(&self, key: impl Into<String>) -> Path {
        let mut segments = self.segments.clone();
        segments.push(Segment::Key(key.into()));
        Path { segments }
    }

    pub fn index(&self, index: usize) -> Path {
        let mut segments = self.segments.clone();
        segments.push(Segment::Index(index));
        Path { segments }
    }

    /// True when `self` equals `prefix` or lies beneath it.
    pub fn starts_with(&self, prefix: &Path) -> bool {
        self.segments.len() >= prefix.segments.len()
            && self.segments.iter().zip(&prefix.segments).all(|(a, b)| a == b)
    }

    /// True when one path is an ancestor-or-self of the other.
    pub fn is_related(&self, other: &Path) -> bool {
        self.starts_with(other) || other.starts_with(self)
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(ROOT)?;
        for seg in &self.segments {
            match seg {
                Segment::Key(k) => write!(f, ".{}", k)?,
                Segment::Index(i) => write!(f, "[{}]", i)?,
            }
        }
        Ok(())
    }
}

/// Strip a leading `root.` (or a bare `root`) from expression text.
pub fn strip_root_prefix(expr: &str) -> &str {
    let trimmed = expr.trim_start();
    if trimmed.len() >= ROOT.len() && trimmed[..ROOT.len()].eq_ignore_ascii_case(ROOT) {
        let rest = &trimmed[ROOT.len()..];
        if let Some(stripped) = rest.strip_prefix('.') {
            return stripped;
        }
    }
    trimmed
}
