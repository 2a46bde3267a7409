use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeSet;

/// Segment-local document ordinal.
pub type DocId = u32;

/// Knobs that apply to one search request.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SearchOptions {
    /// Remember per-document predicate results inside a segment matcher.
    pub cache_matches: bool,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self { cache_matches: true }
    }
}

/// Planning-time context of a search request. Script factories are bound
/// against it before any segment is visited.
#[derive(Debug, Clone, Default)]
pub struct QueryContext {
    index: String,
    options: SearchOptions,
}

impl QueryContext {
    pub fn new(index: impl Into<String>) -> Self {
        Self { index: index.into(), options: SearchOptions::default() }
    }

    pub fn with_options(mut self, options: SearchOptions) -> Self {
        self.options = options;
        self
    }

    pub fn index(&self) -> &str {
        &self.index
    }

    pub fn options(&self) -> &SearchOptions {
        &self.options
    }
}

/// An immutable batch of documents with its own ordinal space.
///
/// A segment without a declared schema is dynamic: every field counts as
/// mapped and documents that lack it simply have no values.
#[derive(Debug, Clone)]
pub struct Segment {
    ord: usize,
    docs: Vec<Value>,
    fields: Option<BTreeSet<String>>,
}

impl Segment {
    pub fn new(ord: usize, docs: Vec<Value>) -> Self {
        Self { ord, docs, fields: None }
    }

    /// Declare the mapped fields. Fields outside this set are unmapped,
    /// whether or not a document happens to carry them.
    pub fn with_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    pub fn ord(&self) -> usize {
        self.ord
    }

    pub fn max_doc(&self) -> DocId {
        self.docs.len() as DocId
    }

    pub fn is_mapped(&self, name: &str) -> bool {
        self.fields.as_ref().map_or(true, |f| f.contains(name))
    }

    pub fn doc(&self, doc: DocId) -> Option<&Value> {
        self.docs.get(doc as usize)
    }
}
