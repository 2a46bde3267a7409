//! Queries over script-computed keyword values.
//!
//! Each query holds a [`LeafFactory`] bound at planning time. Per segment it
//! asks the factory for a fresh [`LeafEvaluator`] and tests the evaluator's
//! values for every candidate document.

use itertools::Itertools;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use tracing::trace;

use crate::context::{DocId, Segment};
use crate::errors::Result;
use crate::script::{LeafEvaluator, LeafFactory, ScriptDefinition};

/// A per-segment predicate executor.
pub trait Matcher {
    fn matches(&mut self, doc: DocId) -> Result<bool>;
}

pub trait Query: Send + Sync + fmt::Debug + fmt::Display {
    /// Name of the field this query targets.
    fn field(&self) -> &str;

    /// Bind to `segment`. Binding failures are returned, never treated as "no match".
    fn matcher<'a>(&'a self, segment: &'a Segment) -> Result<Box<dyn Matcher + 'a>>;

    /// Matching `(segment ord, doc)` pairs across all segments, in order.
    fn search(&self, segments: &[Segment]) -> Result<Vec<(usize, DocId)>> {
        let mut hits = Vec::new();
        for segment in segments {
            // One matcher per segment: ordinals are only meaningful inside it.
            let mut matcher = self.matcher(segment)?;
            // Visit every document; the matcher decides.
            for doc in 0..segment.max_doc() {
                if matcher.matches(doc)? {
                    hits.push((segment.ord(), doc));
                }
            }
        }
        Ok(hits)
    }
}

/// The value test a script query applies to one document's values.
trait ValueTest: Send + Sync {
    fn test(&self, values: &[String]) -> bool;
}

/// State shared by every script-backed query.
#[derive(Clone)]
struct ScriptQuery {
    script: ScriptDefinition,
    leaf_factory: Arc<dyn LeafFactory>,
    field: String,
    cache_matches: bool,
}

impl ScriptQuery {
    fn matcher<'a, T: ValueTest>(
        &'a self,
        test: &'a T,
        segment: &'a Segment,
    ) -> Result<Box<dyn Matcher + 'a>> {
        // Bind the script to this segment; a failure aborts the search.
        let leaf = self.leaf_factory.for_segment(segment)?;
        trace!(field = %self.field, segment = segment.ord(), "script matcher created");
        Ok(Box::new(ScriptMatcher {
            test,
            leaf,
            // A fresh cache per matcher, so nothing leaks across segments.
            cache: self.cache_matches.then(HashMap::new),
        }))
    }

    /// Same field, same script. Separately bound factories of one script are equal.
    fn same_script(&self, other: &Self) -> bool {
        self.field == other.field && self.script == other.script
    }
}

impl fmt::Debug for ScriptQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptQuery")
            .field("field", &self.field)
            .field("script", &self.script.id_or_code())
            .field("leaf_factory", &self.leaf_factory)
            .finish()
    }
}

/// Results are remembered per document for the lifetime of the matcher,
/// which never outlives its segment.
struct ScriptMatcher<'a, T> {
    test: &'a T,
    leaf: Box<dyn LeafEvaluator + 'a>,
    cache: Option<HashMap<DocId, bool>>,
}

impl<T: ValueTest> Matcher for ScriptMatcher<'_, T> {
    fn matches(&mut self, doc: DocId) -> Result<bool> {
        // Seen this document already?
        if let Some(hit) = self.cache.as_ref().and_then(|c| c.get(&doc)) {
            return Ok(*hit);
        }
        // Run the script; its errors belong to the caller.
        let values = self.leaf.values_for(doc)?;
        let hit = self.test.test(&values);
        // Remember the answer if caching is on.
        if let Some(cache) = self.cache.as_mut() {
            cache.insert(doc, hit);
        }
        Ok(hit)
    }
}

/// Matches documents for which the script yields at least one value.
#[derive(Debug, Clone)]
pub struct ScriptExistsQuery {
    base: ScriptQuery,
}

impl ScriptExistsQuery {
    pub fn new(
        script: ScriptDefinition,
        leaf_factory: Arc<dyn LeafFactory>,
        field: impl Into<String>,
        cache_matches: bool,
    ) -> Self {
        Self { base: ScriptQuery { script, leaf_factory, field: field.into(), cache_matches } }
    }
}

impl ValueTest for ScriptExistsQuery {
    fn test(&self, values: &[String]) -> bool {
        !values.is_empty()
    }
}

impl Query for ScriptExistsQuery {
    fn field(&self) -> &str {
        &self.base.field
    }

    fn matcher<'a>(&'a self, segment: &'a Segment) -> Result<Box<dyn Matcher + 'a>> {
        self.base.matcher(self, segment)
    }
}

impl fmt::Display for ScriptExistsQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:exists", self.base.field)
    }
}

impl PartialEq for ScriptExistsQuery {
    fn eq(&self, other: &Self) -> bool {
        self.base.same_script(&other.base)
    }
}

/// Matches documents for which the script yields `term`.
#[derive(Debug, Clone)]
pub struct ScriptTermQuery {
    base: ScriptQuery,
    term: String,
}

impl ScriptTermQuery {
    pub fn new(
        script: ScriptDefinition,
        leaf_factory: Arc<dyn LeafFactory>,
        field: impl Into<String>,
        term: impl Into<String>,
        cache_matches: bool,
    ) -> Self {
        Self {
            base: ScriptQuery { script, leaf_factory, field: field.into(), cache_matches },
            term: term.into(),
        }
    }

    pub fn term(&self) -> &str {
        &self.term
    }
}

impl ValueTest for ScriptTermQuery {
    fn test(&self, values: &[String]) -> bool {
        // duplicates in `values` count once
        values.iter().any(|v| *v == self.term)
    }
}

impl Query for ScriptTermQuery {
    fn field(&self) -> &str {
        &self.base.field
    }

    fn matcher<'a>(&'a self, segment: &'a Segment) -> Result<Box<dyn Matcher + 'a>> {
        self.base.matcher(self, segment)
    }
}

impl fmt::Display for ScriptTermQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.base.field, self.term)
    }
}

impl PartialEq for ScriptTermQuery {
    fn eq(&self, other: &Self) -> bool {
        self.base.same_script(&other.base) && self.term == other.term
    }
}

/// Matches documents for which the script yields any of `terms`.
#[derive(Debug, Clone)]
pub struct ScriptTermsQuery {
    base: ScriptQuery,
    terms: BTreeSet<String>,
}

impl ScriptTermsQuery {
    pub fn new(
        script: ScriptDefinition,
        leaf_factory: Arc<dyn LeafFactory>,
        field: impl Into<String>,
        terms: BTreeSet<String>,
        cache_matches: bool,
    ) -> Self {
        Self { base: ScriptQuery { script, leaf_factory, field: field.into(), cache_matches }, terms }
    }

    pub fn terms(&self) -> &BTreeSet<String> {
        &self.terms
    }
}

impl ValueTest for ScriptTermsQuery {
    fn test(&self, values: &[String]) -> bool {
        values.iter().any(|v| self.terms.contains(v))
    }
}

impl Query for ScriptTermsQuery {
    fn field(&self) -> &str {
        &self.base.field
    }

    fn matcher<'a>(&'a self, segment: &'a Segment) -> Result<Box<dyn Matcher + 'a>> {
        self.base.matcher(self, segment)
    }
}

impl fmt::Display for ScriptTermsQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{{{}}}", self.base.field, self.terms.iter().join(","))
    }
}

impl PartialEq for ScriptTermsQuery {
    fn eq(&self, other: &Self) -> bool {
        self.base.same_script(&other.base) && self.terms == other.terms
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::FieldError;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Yields `doc` ordinal-specific values and counts evaluations.
    #[derive(Debug, Default)]
    struct Counting {
        calls: Arc<AtomicUsize>,
    }

    struct CountingLeaf {
        calls: Arc<AtomicUsize>,
    }

    impl LeafFactory for Counting {
        fn for_segment<'a>(&self, segment: &'a Segment) -> Result<Box<dyn LeafEvaluator + 'a>> {
            if !segment.is_mapped("ok") {
                return Err(FieldError::ScriptBinding("no [ok]".into()));
            }
            Ok(Box::new(CountingLeaf { calls: Arc::clone(&self.calls) }))
        }
    }

    impl LeafEvaluator for CountingLeaf {
        fn values_for(&mut self, doc: DocId) -> Result<Vec<String>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(match doc {
                0 => vec![],
                1 => vec!["x".into()],
                _ => vec!["x".into(), "y".into(), "x".into()],
            })
        }
    }

    fn script() -> ScriptDefinition {
        ScriptDefinition::inline("doc('ok')")
    }

    fn segment(ord: usize) -> Segment {
        Segment::new(ord, vec![json!({"ok": 1}); 3])
    }

    #[test]
    fn predicates_over_values() {
        let f: Arc<dyn LeafFactory> = Arc::new(Counting::default());
        let segs = [segment(0), segment(1)];

        let exists = ScriptExistsQuery::new(script(), Arc::clone(&f), "k", true);
        assert_eq!(exists.search(&segs).unwrap(), vec![(0, 1), (0, 2), (1, 1), (1, 2)]);

        let term = ScriptTermQuery::new(script(), Arc::clone(&f), "k", "y", true);
        assert_eq!(term.search(&segs).unwrap(), vec![(0, 2), (1, 2)]);

        let terms: BTreeSet<String> = ["z".to_string(), "x".to_string()].into();
        let terms = ScriptTermsQuery::new(script(), f, "k", terms, true);
        assert_eq!(terms.search(&segs).unwrap(), vec![(0, 1), (0, 2), (1, 1), (1, 2)]);
    }

    #[test]
    fn matcher_caches_within_segment() {
        let counting = Counting::default();
        let calls = Arc::clone(&counting.calls);
        let q = ScriptTermQuery::new(script(), Arc::new(counting), "k", "x", true);
        let seg = segment(0);
        let mut m = q.matcher(&seg).unwrap();
        assert!(m.matches(1).unwrap());
        assert!(m.matches(1).unwrap());
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // a new segment starts with an empty cache
        let seg = segment(1);
        let mut m = q.matcher(&seg).unwrap();
        assert!(m.matches(1).unwrap());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn uncached_matcher_reevaluates() {
        let counting = Counting::default();
        let calls = Arc::clone(&counting.calls);
        let q = ScriptExistsQuery::new(script(), Arc::new(counting), "k", false);
        let seg = segment(0);
        let mut m = q.matcher(&seg).unwrap();
        assert!(!m.matches(0).unwrap());
        assert!(!m.matches(0).unwrap());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn binding_failure_propagates() {
        let q = ScriptExistsQuery::new(script(), Arc::new(Counting::default()), "k", true);
        let segs = [segment(0), Segment::new(1, vec![json!({"other": 1})]).with_fields(["other"])];
        assert!(matches!(q.search(&segs), Err(FieldError::ScriptBinding(_))));
    }

    #[test]
    fn display_and_equality() {
        let f: Arc<dyn LeafFactory> = Arc::new(Counting::default());
        let terms: BTreeSet<String> = ["b".to_string(), "a".to_string()].into();
        assert_eq!(ScriptExistsQuery::new(script(), Arc::clone(&f), "k", true).to_string(), "k:exists");
        assert_eq!(ScriptTermQuery::new(script(), Arc::clone(&f), "k", "v", true).to_string(), "k:v");
        assert_eq!(
            ScriptTermsQuery::new(script(), Arc::clone(&f), "k", terms, true).to_string(),
            "k:{a,b}"
        );

        let a = ScriptTermQuery::new(script(), Arc::clone(&f), "k", "v", true);
        assert_eq!(a, ScriptTermQuery::new(script(), Arc::clone(&f), "k", "v", false));
        assert_ne!(a, ScriptTermQuery::new(script(), Arc::clone(&f), "k", "w", true));
        assert_ne!(a, ScriptTermQuery::new(script(), Arc::clone(&f), "j", "v", true));
        let other = ScriptDefinition::inline("doc('other')");
        assert_ne!(a, ScriptTermQuery::new(other, Arc::clone(&f), "k", "v", true));
    }

    #[test]
    fn separately_bound_queries_are_equal() {
        let exists = |f: Arc<dyn LeafFactory>| ScriptExistsQuery::new(script(), f, "k", true);
        assert_eq!(
            exists(Arc::new(Counting::default())),
            exists(Arc::new(Counting::default()))
        );
    }
}
