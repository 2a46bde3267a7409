//! Keyword fields whose values are computed by a script at search time and
//! queried as if they had been indexed.

pub mod context;
pub mod errors;
pub mod field_type;
pub mod fielddata;
pub mod mapping;
pub mod query;
pub mod script;
pub mod value;

pub use context::{DocId, QueryContext, SearchOptions, Segment};
pub use errors::{FieldError, Result};
pub use field_type::{FieldType, RuntimeKeywordFieldType};
pub use fielddata::{FieldDataBuilder, ScriptBinaryDocValues, ScriptBinaryFieldData};
pub use mapping::{parse_field, parse_fields, to_mapping};
pub use query::{Matcher, Query, ScriptExistsQuery, ScriptTermQuery, ScriptTermsQuery};
pub use script::{
    ExpressionCompiler, LeafEvaluator, LeafFactory, ScriptCache, ScriptCompiler, ScriptDefinition,
    StringScriptFactory,
};
pub use value::FieldValue;
