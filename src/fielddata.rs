//! Exposes script values as sorted binary doc values for sorting and aggregations.

use itertools::Itertools;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

use crate::context::{DocId, QueryContext, Segment};
use crate::errors::Result;
use crate::script::{LeafEvaluator, LeafFactory, StringScriptFactory};

/// Deferred field data: holds the compiled script until a search request binds it.
#[derive(Debug, Clone)]
pub struct FieldDataBuilder {
    field: String,
    index: String,
    factory: Arc<dyn StringScriptFactory>,
    params: BTreeMap<String, Value>,
}

impl FieldDataBuilder {
    pub(crate) fn new(
        field: impl Into<String>,
        index: impl Into<String>,
        factory: Arc<dyn StringScriptFactory>,
        params: BTreeMap<String, Value>,
    ) -> Self {
        Self { field: field.into(), index: index.into(), factory, params }
    }

    pub fn index(&self) -> &str {
        &self.index
    }

    pub fn build(&self, ctx: &QueryContext) -> Result<ScriptBinaryFieldData> {
        let leaf_factory = self.factory.new_factory(&self.params, ctx)?;
        debug!(field = %self.field, index = %self.index, "built script field data");
        Ok(ScriptBinaryFieldData { field: self.field.clone(), leaf_factory })
    }
}

/// Field data bound to one search request.
#[derive(Debug, Clone)]
pub struct ScriptBinaryFieldData {
    field: String,
    leaf_factory: Arc<dyn LeafFactory>,
}

impl ScriptBinaryFieldData {
    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn load<'a>(&self, segment: &'a Segment) -> Result<ScriptBinaryDocValues<'a>> {
        Ok(ScriptBinaryDocValues {
            leaf: self.leaf_factory.for_segment(segment)?,
            values: Vec::new(),
            cursor: 0,
        })
    }
}

/// Per-segment cursor. Values of the current document are sorted by their
/// UTF-8 bytes; duplicates are kept.
pub struct ScriptBinaryDocValues<'a> {
    leaf: Box<dyn LeafEvaluator + 'a>,
    values: Vec<String>,
    cursor: usize,
}

impl ScriptBinaryDocValues<'_> {
    /// Position on `doc`; true if it has at least one value.
    pub fn advance_exact(&mut self, doc: DocId) -> Result<bool> {
        self.values = self.leaf.values_for(doc)?.into_iter().sorted().collect();
        self.cursor = 0;
        Ok(!self.values.is_empty())
    }

    pub fn doc_value_count(&self) -> usize {
        self.values.len()
    }

    pub fn next_value(&mut self) -> Option<&[u8]> {
        let v = self.values.get(self.cursor)?;
        self.cursor += 1;
        Some(v.as_bytes())
    }
}
