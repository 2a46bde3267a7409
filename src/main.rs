use clap::{Parser, Subcommand};
use runtime_keyword_field::{
    parse_fields, to_mapping, ExpressionCompiler, FieldType, FieldValue, QueryContext,
    RuntimeKeywordFieldType, ScriptCache, SearchOptions, Segment,
};
use serde_json::{json, Value};
use std::error::Error;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

/// Query script-computed keyword fields over JSON documents.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// JSON object of runtime field mappings, keyed by field name.
    #[arg(long)]
    mapping: PathBuf,
    /// JSON array of segments, each an array of documents. A flat array of
    /// documents is read as a single segment.
    #[arg(long)]
    docs: PathBuf,
    /// Field to query; optional when the mapping has exactly one field.
    #[arg(long)]
    field: Option<String>,
    /// Index name reported to scripts.
    #[arg(long, default_value = "cli")]
    index: String,
    /// Re-run the script on every predicate check.
    #[arg(long)]
    no_cache: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Documents with at least one value.
    Exists,
    /// Documents with the given value (JSON literal or bare string).
    Term { value: String },
    /// Documents with any of the given values.
    Terms { values: Vec<String> },
    /// Computed values of every document.
    Values,
    /// The field's serialized mapping.
    Describe,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    // parse args
    let args = Args::parse();
    match run(&args) {
        Ok(out) => match serde_json::to_string_pretty(&out) {
            Ok(s) => println!("{s}"),
            Err(e) => {
                eprintln!("{e}");
                std::process::exit(1);
            }
        },
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    }
}

fn read_json(path: &Path) -> Result<Value, Box<dyn Error>> {
    let text = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}

/// `[[doc, ..], ..]` is one segment per inner array; `[doc, ..]` is a single segment.
fn segments(docs: Value) -> Result<Vec<Segment>, Box<dyn Error>> {
    let Value::Array(items) = docs else {
        return Err("documents must be a JSON array".into());
    };
    if items.iter().all(Value::is_array) && !items.is_empty() {
        Ok(items
            .into_iter()
            .enumerate()
            .map(|(ord, seg)| match seg {
                Value::Array(docs) => Segment::new(ord, docs),
                other => Segment::new(ord, vec![other]),
            })
            .collect())
    } else {
        Ok(vec![Segment::new(0, items)])
    }
}

/// Bare words are taken as strings, anything else as JSON.
fn term_value(raw: &str) -> FieldValue {
    match serde_json::from_str::<Value>(raw) {
        Ok(v) => FieldValue::from(&v),
        Err(_) => FieldValue::from(raw),
    }
}

fn pick_field(fields: Vec<RuntimeKeywordFieldType>, name: Option<&str>) -> Result<RuntimeKeywordFieldType, Box<dyn Error>> {
    match name {
        Some(name) => fields
            .into_iter()
            .find(|f| f.name() == name)
            .ok_or_else(|| format!("no runtime field named [{name}]").into()),
        None if fields.len() == 1 => Ok(fields.into_iter().next().ok_or("no runtime fields")?),
        None => Err("--field is required when the mapping has several fields".into()),
    }
}

fn run(args: &Args) -> Result<Value, Box<dyn Error>> {
    // compile every mapped script once
    let cache = ScriptCache::new(ExpressionCompiler::new());
    let fields = parse_fields(&read_json(&args.mapping)?, &cache)?;
    let field = pick_field(fields, args.field.as_deref())?;
    // planning context shared by all commands
    let ctx = QueryContext::new(args.index.clone())
        .with_options(SearchOptions { cache_matches: !args.no_cache });

    // build the query, or answer directly for describe/values
    let query = match &args.command {
        Command::Describe => {
            let mut out = serde_json::Map::new();
            out.insert(field.name().to_string(), to_mapping(&field));
            return Ok(Value::Object(out));
        }
        Command::Values => return computed_values(&field, &ctx, &segments(read_json(&args.docs)?)?),
        Command::Exists => field.exists_query(&ctx)?,
        Command::Term { value } => field.term_query(&term_value(value), &ctx)?,
        Command::Terms { values } => {
            let values: Vec<FieldValue> = values.iter().map(|v| term_value(v)).collect();
            field.terms_query(&values, &ctx)?
        }
    };
    tracing::debug!(%query, "running query");
    // hits are (segment, doc) pairs
    let hits = query.search(&segments(read_json(&args.docs)?)?)?;
    Ok(json!(hits))
}

fn computed_values(field: &RuntimeKeywordFieldType, ctx: &QueryContext, segs: &[Segment]) -> Result<Value, Box<dyn Error>> {
    let fielddata = field.fielddata_builder(ctx.index()).build(ctx)?;
    let mut out = Vec::new();
    for seg in segs {
        let mut dv = fielddata.load(seg)?;
        for doc in 0..seg.max_doc() {
            // raw bytes back to display strings
            let mut shown = Vec::new();
            if dv.advance_exact(doc)? {
                while let Some(raw) = dv.next_value() {
                    let raw = FieldValue::Bytes(raw.to_vec());
                    shown.extend(field.value_for_display(&raw)?);
                }
            }
            out.push(json!({ "segment": seg.ord(), "doc": doc, "values": shown }));
        }
    }
    Ok(Value::Array(out))
}
