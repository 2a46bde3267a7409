//! A small expression language that produces keyword values.
//!
//! ```text
//! emit(lower(doc('color')), 'fallback')
//! concat(param('prefix'), split(doc('tags'), ','))
//! ```
//!
//! Every expression evaluates to a sequence of strings; the sequence of the
//! outermost expression is the field's values for the document.

use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, trace};

use super::parser::{ParseError, Parser};
use super::{LeafEvaluator, LeafFactory, ScriptCompiler, ScriptDefinition, ScriptSource, StringScriptFactory};
use crate::context::{DocId, QueryContext, Segment};
use crate::errors::{FieldError, Result};

#[derive(Debug, Clone, PartialEq)]
pub enum ENode {
    Call { name: String, args: Vec<ENode> },
    Str(String),
}

pub fn parse_expr(input: &str) -> std::result::Result<ENode, ParseError> {
    let mut p = EParser::new(input);
    let node = p.parse_node()?;
    p.skip_ws();
    if !p.eof() {
        return Err(ParseError::InvalidSyntax("trailing input".into()));
    }
    Ok(node)
}

/// Deepest call nesting a script may use.
const MAX_DEPTH: usize = 64;

struct EParser<'a> {
    parser: Parser<'a>,
    depth: usize,
}

impl<'a> EParser<'a> {
    fn new(s: &'a str) -> Self {
        Self { parser: Parser::new(s), depth: 0 }
    }

    fn parse_node(&mut self) -> std::result::Result<ENode, ParseError> {
        self.parser.skip_ws();
        if self.parser.peek_char() == Some('"') || self.parser.peek_char() == Some('\'') {
            return Ok(ENode::Str(self.parser.parse_quoted_string()?));
        }
        let name = self.parser.parse_identifier()?;
        self.parser.skip_ws();
        self.parser.expect('(')?;
        if self.depth == MAX_DEPTH {
            return Err(ParseError::InvalidSyntax(format!("calls nested deeper than {MAX_DEPTH}")));
        }
        self.depth += 1;
        let args = self.parse_args()?;
        self.depth -= 1;
        self.parser.expect(')')?;
        Ok(ENode::Call { name, args })
    }

    fn parse_args(&mut self) -> std::result::Result<Vec<ENode>, ParseError> {
        let mut out = Vec::new();
        self.parser.skip_ws();
        if self.parser.peek_char() == Some(')') {
            return Ok(out);
        }
        loop {
            out.push(self.parse_node()?);
            self.parser.skip_ws();
            if self.parser.consume_char(',') {
                continue;
            }
            break;
        }
        Ok(out)
    }

    fn skip_ws(&mut self) {
        self.parser.skip_ws();
    }

    fn eof(&self) -> bool {
        self.parser.eof()
    }
}

/// Accepted argument counts per function; `None` means variadic.
fn arity(name: &str) -> Option<Option<usize>> {
    match name {
        "emit" => Some(None),
        "doc" | "param" | "lower" | "upper" | "trim" => Some(Some(1)),
        "concat" | "split" => Some(Some(2)),
        _ => None,
    }
}

fn validate(node: &ENode) -> Result<()> {
    let ENode::Call { name, args } = node else {
        return Ok(());
    };
    match arity(name) {
        None => {
            return Err(FieldError::ScriptCompilation(format!("unknown function [{name}]")))
        }
        Some(Some(n)) if n != args.len() => {
            return Err(FieldError::ScriptCompilation(format!(
                "[{name}] takes {n} argument(s), got {}",
                args.len()
            )))
        }
        _ => {}
    }
    if matches!(name.as_str(), "doc" | "param") && !matches!(args[0], ENode::Str(_)) {
        return Err(FieldError::ScriptCompilation(format!(
            "[{name}] expects a string literal"
        )));
    }
    if name == "split" && !matches!(args[1], ENode::Str(_)) {
        return Err(FieldError::ScriptCompilation(
            "[split] separator must be a string literal".into(),
        ));
    }
    args.iter().try_for_each(validate)
}

/// Names passed to `doc(..)` or `param(..)` anywhere in the tree.
fn references(node: &ENode, func: &str, out: &mut BTreeSet<String>) {
    if let ENode::Call { name, args } = node {
        if name == func {
            if let Some(ENode::Str(s)) = args.first() {
                out.insert(s.clone());
            }
        }
        for a in args {
            references(a, func, out);
        }
    }
}

/// Flatten a JSON value into keyword strings. Nulls vanish, arrays spread.
fn json_strings(v: &Value, out: &mut Vec<String>) {
    match v {
        Value::Null => {}
        Value::String(s) => out.push(s.clone()),
        Value::Bool(b) => out.push(b.to_string()),
        Value::Number(n) => out.push(n.to_string()),
        Value::Array(arr) => arr.iter().for_each(|e| json_strings(e, out)),
        Value::Object(_) => out.push(v.to_string()),
    }
}

/// Compiles expression scripts, resolving stored ids from its own table.
#[derive(Debug, Clone, Default)]
pub struct ExpressionCompiler {
    stored: HashMap<String, String>,
}

impl ExpressionCompiler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stored(mut self, id: impl Into<String>, source: impl Into<String>) -> Self {
        self.stored.insert(id.into(), source.into());
        self
    }
}

impl ScriptCompiler for ExpressionCompiler {
    fn compile(&self, script: &ScriptDefinition) -> Result<Arc<dyn StringScriptFactory>> {
        let code = match script.source() {
            ScriptSource::Inline(code) => code.as_str(),
            ScriptSource::Stored(id) => self.stored.get(id).map(String::as_str).ok_or_else(|| {
                FieldError::ScriptCompilation(format!("unable to find stored script [{id}]"))
            })?,
        };
        let ast = parse_expr(code)?;
        validate(&ast)?;
        Ok(Arc::new(ExpressionScript { ast: Arc::new(ast) }))
    }
}

#[derive(Debug)]
pub struct ExpressionScript {
    ast: Arc<ENode>,
}

impl StringScriptFactory for ExpressionScript {
    fn new_factory(
        &self,
        params: &BTreeMap<String, Value>,
        ctx: &QueryContext,
    ) -> Result<Arc<dyn LeafFactory>> {
        let mut wanted = BTreeSet::new();
        references(&self.ast, "param", &mut wanted);
        let mut bound = HashMap::new();
        for name in wanted {
            let value = params.get(&name).ok_or_else(|| {
                FieldError::ScriptBinding(format!("missing script parameter [{name}]"))
            })?;
            let mut values = Vec::new();
            json_strings(value, &mut values);
            bound.insert(name, values);
        }
        let mut fields = BTreeSet::new();
        references(&self.ast, "doc", &mut fields);
        debug!(index = ctx.index(), ?fields, "bound expression script");
        Ok(Arc::new(ExpressionLeafFactory {
            ast: Arc::clone(&self.ast),
            params: Arc::new(bound),
            fields,
        }))
    }
}

#[derive(Debug)]
pub struct ExpressionLeafFactory {
    ast: Arc<ENode>,
    params: Arc<HashMap<String, Vec<String>>>,
    fields: BTreeSet<String>,
}

impl LeafFactory for ExpressionLeafFactory {
    fn for_segment<'a>(&self, segment: &'a Segment) -> Result<Box<dyn LeafEvaluator + 'a>> {
        if let Some(missing) = self.fields.iter().find(|f| !segment.is_mapped(f)) {
            return Err(FieldError::ScriptBinding(format!(
                "field [{missing}] is not mapped in segment {}",
                segment.ord()
            )));
        }
        trace!(segment = segment.ord(), "expression leaf created");
        Ok(Box::new(ExpressionLeaf {
            segment,
            ast: Arc::clone(&self.ast),
            params: Arc::clone(&self.params),
        }))
    }
}

struct ExpressionLeaf<'a> {
    segment: &'a Segment,
    ast: Arc<ENode>,
    params: Arc<HashMap<String, Vec<String>>>,
}

impl ExpressionLeaf<'_> {
    fn eval(&self, node: &ENode, doc: &Value) -> Result<Vec<String>> {
        let (name, args) = match node {
            ENode::Str(s) => return Ok(vec![s.clone()]),
            ENode::Call { name, args } => (name.as_str(), args),
        };
        let literal = |i: usize| match &args[i] {
            ENode::Str(s) => s.as_str(),
            ENode::Call { .. } => "",
        };
        Ok(match name {
            "doc" => {
                let mut out = Vec::new();
                if let Some(v) = doc.get(literal(0)) {
                    json_strings(v, &mut out);
                }
                out
            }
            "param" => self.params.get(literal(0)).cloned().unwrap_or_default(),
            "emit" => {
                let mut out = Vec::new();
                for a in args {
                    out.extend(self.eval(a, doc)?);
                }
                out
            }
            "lower" => self.eval(&args[0], doc)?.iter().map(|s| s.to_lowercase()).collect(),
            "upper" => self.eval(&args[0], doc)?.iter().map(|s| s.to_uppercase()).collect(),
            "trim" => self.eval(&args[0], doc)?.iter().map(|s| s.trim().to_string()).collect(),
            "concat" => {
                let left = self.eval(&args[0], doc)?;
                let right = self.eval(&args[1], doc)?;
                left.iter()
                    .flat_map(|l| right.iter().map(move |r| format!("{l}{r}")))
                    .collect()
            }
            "split" => {
                let sep = literal(1);
                if sep.is_empty() {
                    return Err(FieldError::ScriptRuntime("[split] separator is empty".into()));
                }
                self.eval(&args[0], doc)?
                    .iter()
                    .flat_map(|s| s.split(sep).map(str::to_string).collect::<Vec<_>>())
                    .collect()
            }
            other => {
                return Err(FieldError::ScriptRuntime(format!("unknown function [{other}]")))
            }
        })
    }
}

impl LeafEvaluator for ExpressionLeaf<'_> {
    fn values_for(&mut self, doc: DocId) -> Result<Vec<String>> {
        let source = self.segment.doc(doc).ok_or_else(|| {
            FieldError::ScriptRuntime(format!(
                "doc {doc} out of range for segment {} (max_doc {})",
                self.segment.ord(),
                self.segment.max_doc()
            ))
        })?;
        self.eval(&self.ast, source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn values(code: &str, params: &[(&str, Value)], docs: Vec<Value>) -> Vec<Vec<String>> {
        let mut script = ScriptDefinition::inline(code);
        for (k, v) in params {
            script = script.with_param(*k, v.clone());
        }
        let factory = ExpressionCompiler::new().compile(&script).unwrap();
        let leaf_factory = factory.new_factory(script.params(), &QueryContext::new("t")).unwrap();
        let segment = Segment::new(0, docs);
        let mut leaf = leaf_factory.for_segment(&segment).unwrap();
        (0..segment.max_doc()).map(|d| leaf.values_for(d).unwrap()).collect()
    }

    #[test]
    fn parses_nested_calls() {
        let ast = parse_expr("emit(lower(doc('a')), 'x')").unwrap();
        assert_eq!(
            ast,
            ENode::Call {
                name: "emit".into(),
                args: vec![
                    ENode::Call {
                        name: "lower".into(),
                        args: vec![ENode::Call {
                            name: "doc".into(),
                            args: vec![ENode::Str("a".into())]
                        }]
                    },
                    ENode::Str("x".into()),
                ]
            }
        );
    }

    #[test]
    fn doc_values_flatten() {
        let out = values(
            "doc('c')",
            &[],
            vec![json!({"c": ["Red", 1, null, true]}), json!({"c": null}), json!({"d": 1})],
        );
        assert_eq!(out, vec![vec!["Red", "1", "true"], vec![], vec![]]);
    }

    #[test]
    fn functions_compose() {
        let out = values(
            "emit(upper(split(doc('t'), ',')), concat(param('p'), trim(doc('n'))))",
            &[("p", json!("id-"))],
            vec![json!({"t": "a,b", "n": " 7 "})],
        );
        assert_eq!(out, vec![vec!["A", "B", "id-7"]]);
    }

    #[test]
    fn compile_errors() {
        let c = ExpressionCompiler::new();
        for bad in ["", "emit('a'", "nope()", "lower()", "doc(lower('a'))", "'a' 'b'"] {
            let err = c.compile(&ScriptDefinition::inline(bad)).unwrap_err();
            assert!(matches!(err, FieldError::ScriptCompilation(_)), "{bad}: {err}");
        }
        let err = c.compile(&ScriptDefinition::stored("missing")).unwrap_err();
        assert!(matches!(err, FieldError::ScriptCompilation(_)));
    }

    #[test]
    fn nesting_is_capped() {
        let c = ExpressionCompiler::new();
        let deep = "emit(".repeat(10_000);
        let err = c.compile(&ScriptDefinition::inline(deep)).unwrap_err();
        assert!(matches!(err, FieldError::ScriptCompilation(_)), "{err}");

        let ok = format!("{}'x'{}", "lower(".repeat(MAX_DEPTH), ")".repeat(MAX_DEPTH));
        assert!(c.compile(&ScriptDefinition::inline(ok.as_str())).is_ok());
        let over = format!("{}'x'{}", "lower(".repeat(MAX_DEPTH + 1), ")".repeat(MAX_DEPTH + 1));
        assert!(c.compile(&ScriptDefinition::inline(over.as_str())).is_err());
    }

    #[test]
    fn stored_scripts_resolve() {
        let c = ExpressionCompiler::new().with_stored("colors", "emit('red')");
        assert!(c.compile(&ScriptDefinition::stored("colors")).is_ok());
    }

    #[test]
    fn binding_errors() {
        let ctx = QueryContext::new("t");
        let c = ExpressionCompiler::new();
        let factory = c.compile(&ScriptDefinition::inline("param('p')")).unwrap();
        let err = factory.new_factory(&BTreeMap::new(), &ctx).unwrap_err();
        assert!(matches!(err, FieldError::ScriptBinding(_)));

        let factory = c.compile(&ScriptDefinition::inline("doc('a')")).unwrap();
        let leaf_factory = factory.new_factory(&BTreeMap::new(), &ctx).unwrap();
        let segment = Segment::new(3, vec![json!({"b": 1})]).with_fields(["b"]);
        let err = leaf_factory.for_segment(&segment).err().unwrap();
        assert!(matches!(err, FieldError::ScriptBinding(_)));
    }

    #[test]
    fn out_of_range_doc_is_runtime_error() {
        let factory = ExpressionCompiler::new().compile(&ScriptDefinition::inline("'a'")).unwrap();
        let leaf_factory = factory.new_factory(&BTreeMap::new(), &QueryContext::new("t")).unwrap();
        let segment = Segment::new(0, vec![json!({})]);
        let mut leaf = leaf_factory.for_segment(&segment).unwrap();
        assert!(matches!(leaf.values_for(1), Err(FieldError::ScriptRuntime(_))));
    }
}
