use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Debug;
use std::sync::Arc;
use tracing::debug;

use crate::context::QueryContext;
use crate::errors::{FieldError, Result};
use crate::fielddata::FieldDataBuilder;
use crate::query::{Query, ScriptExistsQuery, ScriptTermQuery, ScriptTermsQuery};
use crate::script::{LeafFactory, ScriptDefinition, StringScriptFactory};
use crate::value::FieldValue;

/// Mapping type name shared by all script-backed runtime fields.
pub const CONTENT_TYPE: &str = "runtime_script";

/// The `runtime_type` this field type handles.
pub const RUNTIME_TYPE: &str = "keyword";

/// What the query layer needs from any kind of field.
pub trait FieldType: Send + Sync + Debug {
    fn name(&self) -> &str;

    fn type_name(&self) -> &'static str;

    fn meta(&self) -> &BTreeMap<String, String>;

    /// Human-readable form of a raw value; `Null` stays absent.
    fn value_for_display(&self, value: &FieldValue) -> Result<Option<String>>;

    fn exists_query(&self, ctx: &QueryContext) -> Result<Box<dyn Query>>;

    fn term_query(&self, value: &FieldValue, ctx: &QueryContext) -> Result<Box<dyn Query>>;

    fn terms_query(&self, values: &[FieldValue], ctx: &QueryContext) -> Result<Box<dyn Query>>;

    /// Write the type-specific attributes of the field's mapping.
    fn serialize_mapping_body(&self, sink: &mut Map<String, Value>);
}

/// A keyword field whose values come from a script at search time.
///
/// Immutable after construction, so one instance can serve concurrent searches.
#[derive(Debug, Clone)]
pub struct RuntimeKeywordFieldType {
    name: String,
    script: ScriptDefinition,
    factory: Arc<dyn StringScriptFactory>,
    meta: BTreeMap<String, String>,
}

impl RuntimeKeywordFieldType {
    pub fn new(
        name: impl Into<String>,
        script: ScriptDefinition,
        factory: Arc<dyn StringScriptFactory>,
        meta: BTreeMap<String, String>,
    ) -> Result<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(FieldError::Mapping("field name must not be empty".into()));
        }
        Ok(Self { name, script, factory, meta })
    }

    pub fn script(&self) -> &ScriptDefinition {
        &self.script
    }

    /// Field data is bound lazily; nothing runs until the builder is built.
    pub fn fielddata_builder(&self, index: &str) -> FieldDataBuilder {
        FieldDataBuilder::new(
            self.name.clone(),
            index,
            Arc::clone(&self.factory),
            self.script.params().clone(),
        )
    }

    fn leaf_factory(&self, ctx: &QueryContext) -> Result<Arc<dyn LeafFactory>> {
        debug!(field = %self.name, index = ctx.index(), "binding script for query");
        self.factory.new_factory(self.script.params(), ctx)
    }
}

impl FieldType for RuntimeKeywordFieldType {
    fn name(&self) -> &str {
        &self.name
    }

    fn type_name(&self) -> &'static str {
        CONTENT_TYPE
    }

    fn meta(&self) -> &BTreeMap<String, String> {
        &self.meta
    }

    fn value_for_display(&self, value: &FieldValue) -> Result<Option<String>> {
        match value {
            FieldValue::Null => Ok(None),
            // keywords are carried as utf8 bytes
            FieldValue::Bytes(b) => Ok(Some(String::from_utf8_lossy(b).into_owned())),
            other => Err(FieldError::InvalidValue(format!(
                "expected binary keyword value for [{}], got {other:?}",
                self.name
            ))),
        }
    }

    fn exists_query(&self, ctx: &QueryContext) -> Result<Box<dyn Query>> {
        let cache = ctx.options().cache_matches;
        Ok(Box::new(ScriptExistsQuery::new(self.script.clone(), self.leaf_factory(ctx)?, self.name.clone(), cache)))
    }

    fn term_query(&self, value: &FieldValue, ctx: &QueryContext) -> Result<Box<dyn Query>> {
        let term = value.to_term_string()?;
        let cache = ctx.options().cache_matches;
        Ok(Box::new(ScriptTermQuery::new(self.script.clone(), self.leaf_factory(ctx)?, self.name.clone(), term, cache)))
    }

    fn terms_query(&self, values: &[FieldValue], ctx: &QueryContext) -> Result<Box<dyn Query>> {
        let terms = values
            .iter()
            .map(FieldValue::to_term_string)
            .collect::<Result<BTreeSet<_>>>()?;
        let cache = ctx.options().cache_matches;
        Ok(Box::new(ScriptTermsQuery::new(self.script.clone(), self.leaf_factory(ctx)?, self.name.clone(), terms, cache)))
    }

    // TODO: emit the full script object once params need to survive a round trip.
    fn serialize_mapping_body(&self, sink: &mut Map<String, Value>) {
        sink.insert("runtime_type".into(), Value::from(RUNTIME_TYPE));
        sink.insert("script".into(), Value::from(self.script.id_or_code()));
    }
}
