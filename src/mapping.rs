//! Reading runtime field entries out of a mapping and writing them back.

use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::debug;

use crate::errors::{FieldError, Result};
use crate::field_type::{FieldType, RuntimeKeywordFieldType, CONTENT_TYPE, RUNTIME_TYPE};
use crate::script::{ScriptCache, ScriptDefinition};

/// One runtime field entry as it appears in a mapping.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuntimeFieldMapping {
    #[serde(rename = "type", default)]
    pub type_name: Option<String>,
    pub runtime_type: String,
    pub script: ScriptDefinition,
    #[serde(default)]
    pub meta: BTreeMap<String, String>,
}

/// Parse and compile one field. The script is compiled (or fetched from
/// `cache`) here, so a broken script fails the mapping, not the first query.
pub fn parse_field(name: &str, entry: &Value, cache: &ScriptCache) -> Result<RuntimeKeywordFieldType> {
    let mapping: RuntimeFieldMapping = serde_json::from_value(entry.clone())
        .map_err(|e| FieldError::Mapping(format!("failed to parse mapping for [{name}]: {e}")))?;
    if let Some(t) = mapping.type_name.as_deref().filter(|t| *t != CONTENT_TYPE) {
        return Err(FieldError::Mapping(format!(
            "field [{name}] has type [{t}], expected [{CONTENT_TYPE}]"
        )));
    }
    if mapping.runtime_type != RUNTIME_TYPE {
        return Err(FieldError::Mapping(format!(
            "runtime_type [{}] is not supported for field [{name}]",
            mapping.runtime_type
        )));
    }
    let factory = cache.get_or_compile(&mapping.script)?;
    debug!(field = name, script = mapping.script.id_or_code(), "parsed runtime keyword field");
    RuntimeKeywordFieldType::new(name, mapping.script, factory, mapping.meta)
}

/// Parse every entry of a `{name: entry, ..}` object, in key order.
pub fn parse_fields(mappings: &Value, cache: &ScriptCache) -> Result<Vec<RuntimeKeywordFieldType>> {
    let obj = mappings
        .as_object()
        .ok_or_else(|| FieldError::Mapping("mappings must be a JSON object".into()))?;
    obj.iter().map(|(name, entry)| parse_field(name, entry, cache)).collect()
}

/// Full mapping entry for a field: the type, the body and any meta.
pub fn to_mapping(field: &dyn FieldType) -> Value {
    let mut out = Map::new();
    out.insert("type".into(), Value::from(field.type_name()));
    field.serialize_mapping_body(&mut out);
    if !field.meta().is_empty() {
        let meta = field
            .meta()
            .iter()
            .map(|(k, v)| (k.clone(), Value::from(v.as_str())))
            .collect::<Map<_, _>>();
        out.insert("meta".into(), Value::Object(meta));
    }
    Value::Object(out)
}

/// Script definition back out of a serialized body.
pub fn script_from_body(body: &Map<String, Value>) -> Result<ScriptDefinition> {
    let script = body
        .get("script")
        .ok_or_else(|| FieldError::Mapping("mapping body has no [script]".into()))?;
    serde_json::from_value(script.clone()).map_err(|e| FieldError::Mapping(e.to_string()))
}
