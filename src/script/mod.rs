//! Script definitions and the contract between the field type and whatever
//! engine compiles and runs scripts.
//!
//! Evaluation happens in two stages. A [`StringScriptFactory`] is bound to a
//! [`QueryContext`] at planning time and yields a [`LeafFactory`]; the leaf
//! factory is then bound to each [`Segment`] at execution time and yields a
//! [`LeafEvaluator`] that maps document ordinals to values.

pub mod cache;
pub mod expression;
mod parser;

use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::Arc;

use crate::context::{DocId, QueryContext, Segment};
use crate::errors::Result;

pub use cache::ScriptCache;
pub use expression::ExpressionCompiler;

/// Where the script body lives.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ScriptSource {
    Inline(String),
    Stored(String),
}

/// Immutable script reference from a mapping entry: source or stored id, plus params.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "RawScript")]
pub struct ScriptDefinition {
    source: ScriptSource,
    params: BTreeMap<String, Value>,
}

impl ScriptDefinition {
    pub fn inline(source: impl Into<String>) -> Self {
        Self { source: ScriptSource::Inline(source.into()), params: BTreeMap::new() }
    }

    pub fn stored(id: impl Into<String>) -> Self {
        Self { source: ScriptSource::Stored(id.into()), params: BTreeMap::new() }
    }

    pub fn with_param(mut self, name: impl Into<String>, value: Value) -> Self {
        self.params.insert(name.into(), value);
        self
    }

    pub fn source(&self) -> &ScriptSource {
        &self.source
    }

    /// The stored id, or the inline code.
    pub fn id_or_code(&self) -> &str {
        match &self.source {
            ScriptSource::Inline(code) => code,
            ScriptSource::Stored(id) => id,
        }
    }

    pub fn params(&self) -> &BTreeMap<String, Value> {
        &self.params
    }
}

/// Accepted mapping shapes: `"code"`, `{"source": "code", "params": {..}}`
/// or `{"id": "name", "params": {..}}`.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawScript {
    Inline(String),
    Object {
        #[serde(default)]
        source: Option<String>,
        #[serde(default)]
        id: Option<String>,
        #[serde(default)]
        params: BTreeMap<String, Value>,
    },
}

impl TryFrom<RawScript> for ScriptDefinition {
    type Error = String;

    fn try_from(raw: RawScript) -> std::result::Result<Self, Self::Error> {
        match raw {
            RawScript::Inline(code) => Ok(Self::inline(code)),
            RawScript::Object { source, id, params } => {
                let source = match (source, id) {
                    (Some(code), None) => ScriptSource::Inline(code),
                    (None, Some(id)) => ScriptSource::Stored(id),
                    (Some(_), Some(_)) => {
                        return Err("script must not set both [source] and [id]".into())
                    }
                    (None, None) => return Err("script must set [source] or [id]".into()),
                };
                Ok(Self { source, params })
            }
        }
    }
}

/// Turns a script definition into a reusable factory. Runs once per mapping load.
pub trait ScriptCompiler: Send + Sync {
    fn compile(&self, script: &ScriptDefinition) -> Result<Arc<dyn StringScriptFactory>>;
}

/// A compiled script that produces string values.
pub trait StringScriptFactory: Send + Sync + Debug {
    /// Bind to one search request.
    fn new_factory(
        &self,
        params: &BTreeMap<String, Value>,
        ctx: &QueryContext,
    ) -> Result<Arc<dyn LeafFactory>>;
}

/// A script bound to one search request. Must not hold per-document state.
pub trait LeafFactory: Send + Sync + Debug {
    /// Bind to one segment. Fails with `ScriptBinding` if the segment cannot
    /// satisfy what the script reads.
    fn for_segment<'a>(&self, segment: &'a Segment) -> Result<Box<dyn LeafEvaluator + 'a>>;
}

/// A script bound to one segment.
pub trait LeafEvaluator: Send {
    /// Values for `doc`, possibly empty, possibly repeated. Calling twice with
    /// the same ordinal yields the same sequence.
    fn values_for(&mut self, doc: DocId) -> Result<Vec<String>>;
}
