//! Turns a picked node's raw path into a compact selector.
//!
//! The walk runs leaf to root. Entries are copied verbatim until the first
//! unique entry (the anchor) is copied; after that, runs of non-unique entries
//! collapse into `*` (one entry) or `**` (two or more). Unique entries and the
//! window header are always kept.

use serde::de::{Deserialize, Deserializer};
use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::Value;

pub const UNKNOWN_LABEL: &str = "<unknown>";
pub const SINGLE_WILDCARD: &str = "*";
pub const MULTI_WILDCARD: &str = "**";

/// Upper bound on keep/elide combinations explored for alternatives.
pub const MAX_ALTERNATIVES: usize = 256;

/// One hop of a raw node path.
#[derive(Debug, Clone, PartialEq)]
pub enum PathEntry {
    /// Top-level window or container, rendered as `{title}`.
    Window { title: String },
    Node(NodeEntry),
}

#[derive(Debug, Clone, PartialEq)]
pub struct NodeEntry {
    /// Candidate labels in wire order.
    pub attributes: Vec<(String, String)>,
    /// Tokens asserted to disambiguate this node among its siblings.
    pub unique_tokens: Vec<String>,
    /// Literal override text.
    pub text: Option<String>,
    /// `false` for synthetic entries such as wildcards.
    pub has_info: bool,
}

impl Default for NodeEntry {
    fn default() -> Self {
        Self {
            attributes: Vec::new(),
            unique_tokens: Vec::new(),
            text: None,
            has_info: true,
        }
    }
}

impl NodeEntry {
    pub fn new<K, V>(attributes: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            attributes: attributes
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            ..Self::default()
        }
    }

    pub fn with_unique_tokens<T: Into<String>>(mut self, tokens: impl IntoIterator<Item = T>) -> Self {
        self.unique_tokens = tokens.into_iter().map(Into::into).collect();
        self
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// A token counts when it names a non-empty attribute or equals one of
    /// the attribute values.
    pub fn is_unique(&self) -> bool {
        self.unique_tokens.iter().any(|token| {
            self.attributes
                .iter()
                .any(|(k, v)| v == token || (k == token && !v.is_empty()))
        })
    }

    fn label(&self) -> String {
        if let Some(text) = self.text.as_deref().filter(|t| !t.is_empty()) {
            return text.to_string();
        }
        if let Some(token) = self
            .unique_tokens
            .iter()
            .find(|t| self.attribute(t).is_some_and(|v| !v.is_empty()))
        {
            return token.clone();
        }
        self.attributes
            .iter()
            .map(|(_, v)| v)
            .find(|v| !v.is_empty())
            .cloned()
            .unwrap_or_else(|| UNKNOWN_LABEL.to_string())
    }
}

impl PathEntry {
    pub fn window(title: impl Into<String>) -> Self {
        PathEntry::Window {
            title: title.into(),
        }
    }

    /// Synthetic entry standing in for elided hops.
    pub fn wildcard(marker: &str) -> Self {
        PathEntry::Node(NodeEntry {
            text: Some(marker.to_string()),
            has_info: false,
            ..NodeEntry::default()
        })
    }

    pub fn is_window(&self) -> bool {
        matches!(self, PathEntry::Window { .. })
    }

    pub fn is_wildcard(&self) -> bool {
        match self {
            PathEntry::Node(n) => {
                !n.has_info && matches!(n.text.as_deref(), Some(SINGLE_WILDCARD | MULTI_WILDCARD))
            }
            PathEntry::Window { .. } => false,
        }
    }

    pub fn is_unique(&self) -> bool {
        match self {
            PathEntry::Node(n) => n.is_unique(),
            PathEntry::Window { .. } => false,
        }
    }

    /// Never empty: falls back to [`UNKNOWN_LABEL`].
    pub fn label(&self) -> String {
        match self {
            PathEntry::Window { title } => format!("{{{title}}}"),
            PathEntry::Node(n) => n.label(),
        }
    }

    /// Lenient conversion from an agent `PathInfo` item. Never fails.
    pub fn from_value(value: &Value) -> PathEntry {
        let Some(obj) = value.as_object() else {
            return PathEntry::Node(NodeEntry {
                has_info: false,
                ..NodeEntry::default()
            });
        };

        if obj.get("type").and_then(Value::as_str) == Some("window") {
            let title = obj
                .get("title")
                .and_then(Value::as_str)
                .unwrap_or_default();
            return PathEntry::window(title);
        }

        let mut node = NodeEntry::default();
        for (key, val) in obj {
            match (key.as_str(), val) {
                ("uniqueTokens", Value::Array(tokens)) => {
                    node.unique_tokens = tokens
                        .iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string)
                        .collect();
                }
                ("text", Value::String(s)) => node.text = Some(s.clone()),
                ("hasInfo", Value::Bool(b)) => node.has_info = *b,
                ("uniqueTokens" | "text" | "hasInfo", _) => {}
                (_, Value::String(s)) => node.attributes.push((key.clone(), s.clone())),
                _ => {}
            }
        }
        PathEntry::Node(node)
    }
}

impl<'de> Deserialize<'de> for PathEntry {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Ok(PathEntry::from_value(&value))
    }
}

impl Serialize for PathEntry {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            PathEntry::Window { title } => {
                let mut map = serializer.serialize_map(Some(2))?;
                map.serialize_entry("type", "window")?;
                map.serialize_entry("title", title)?;
                map.end()
            }
            PathEntry::Node(node) => {
                let mut map = serializer.serialize_map(None)?;
                for (k, v) in &node.attributes {
                    map.serialize_entry(k, v)?;
                }
                if !node.unique_tokens.is_empty() {
                    map.serialize_entry("uniqueTokens", &node.unique_tokens)?;
                }
                if let Some(text) = &node.text {
                    map.serialize_entry("text", text)?;
                }
                if !node.has_info {
                    map.serialize_entry("hasInfo", &false)?;
                }
                map.end()
            }
        }
    }
}

/// Root-to-leaf sequence of hops, optionally headed by a window entry.
pub type SelectorPath = Vec<PathEntry>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Run {
    #[default]
    None,
    Single,
    Multi,
}

/// Fold state for one leaf-to-root walk. `tokens` is in leaf-to-root order.
#[derive(Debug, Clone, Default)]
struct Walk {
    seen_unique: bool,
    run: Run,
    tokens: Vec<PathEntry>,
}

impl Walk {
    fn keep(&mut self, entry: &PathEntry) {
        self.tokens.push(entry.clone());
        self.run = Run::None;
        if entry.is_unique() {
            self.seen_unique = true;
        }
    }

    fn elide(&mut self) {
        match self.run {
            Run::None => {
                self.tokens.push(PathEntry::wildcard(SINGLE_WILDCARD));
                self.run = Run::Single;
            }
            Run::Single => {
                if let Some(last) = self.tokens.last_mut() {
                    *last = PathEntry::wildcard(MULTI_WILDCARD);
                }
                self.run = Run::Multi;
            }
            Run::Multi => {}
        }
    }

    fn step(&mut self, entry: &PathEntry) {
        if entry.is_window() || !self.seen_unique || entry.is_unique() {
            self.keep(entry);
        } else {
            self.elide();
        }
    }

    /// Unique entries past the first anchor may go either way.
    fn can_branch(&self, entry: &PathEntry) -> bool {
        self.seen_unique && entry.is_unique()
    }

    fn finish(mut self) -> Vec<PathEntry> {
        self.tokens.reverse();
        self.tokens
    }
}

/// The most compact selector that keeps every unique entry.
pub fn primary_selector(path: &[PathEntry]) -> Vec<PathEntry> {
    path.iter()
        .rev()
        .fold(Walk::default(), |mut walk, entry| {
            walk.step(entry);
            walk
        })
        .finish()
}

/// Ranked alternatives: the verbatim path first, then every keep/elide
/// combination over the non-essential unique anchors (keep before elide),
/// without duplicates.
pub fn alternatives(path: &[PathEntry]) -> Vec<Vec<PathEntry>> {
    let mut frontier = vec![Walk::default()];

    for entry in path.iter().rev() {
        let mut budget = MAX_ALTERNATIVES.saturating_sub(frontier.len());
        let mut next = Vec::with_capacity(frontier.len());
        for mut walk in frontier {
            if budget > 0 && walk.can_branch(entry) {
                budget -= 1;
                let mut kept = walk.clone();
                kept.keep(entry);
                walk.elide();
                next.push(kept);
                next.push(walk);
            } else {
                walk.step(entry);
                next.push(walk);
            }
        }
        frontier = next;
    }

    let mut out: Vec<Vec<PathEntry>> = Vec::with_capacity(frontier.len() + 1);
    let mut seen: Vec<String> = Vec::with_capacity(frontier.len() + 1);
    let candidates = std::iter::once(path.to_vec()).chain(frontier.into_iter().map(Walk::finish));
    for candidate in candidates {
        let text = render(&candidate);
        if !seen.contains(&text) {
            seen.push(text);
            out.push(candidate);
        }
    }
    out
}

/// Joins entry labels with `/`; a window header is not followed by a separator.
pub fn render(entries: &[PathEntry]) -> String {
    let mut out = String::new();
    for (i, entry) in entries.iter().enumerate() {
        out.push_str(&entry.label());
        if !entry.is_window() && i + 1 < entries.len() {
            out.push('/');
        }
    }
    out
}

/// Closes an unterminated window header (`{Title` → `{Title}*`).
pub fn normalize_raw_path(raw: &str) -> String {
    match raw.strip_prefix('{') {
        Some(rest) if !rest.is_empty() && !rest.contains('}') => format!("{raw}}}*"),
        _ => raw.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub primary: Vec<PathEntry>,
    pub alternatives: Vec<Vec<PathEntry>>,
}

impl Resolution {
    pub fn primary_text(&self) -> String {
        render(&self.primary)
    }

    pub fn alternative_texts(&self) -> Vec<String> {
        self.alternatives.iter().map(|a| render(a)).collect()
    }
}

pub fn resolve(path: &[PathEntry]) -> Resolution {
    let resolution = Resolution {
        primary: primary_selector(path),
        alternatives: alternatives(path),
    };
    tracing::debug!(
        hops = path.len(),
        primary = %resolution.primary_text(),
        alternatives = resolution.alternatives.len(),
        "Resolved selector"
    );
    resolution
}
