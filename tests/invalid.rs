use runtime_keyword_field as rkf;
use rkf::{FieldError, FieldType, FieldValue};
use serde_json::json;

fn cache() -> rkf::ScriptCache {
    rkf::ScriptCache::new(rkf::ExpressionCompiler::new())
}

#[test]
fn test_null_term_is_invalid_argument() {
    let ft = rkf::parse_field("f", &json!({"runtime_type": "keyword", "script": "'a'"}), &cache()).unwrap();
    let ctx = rkf::QueryContext::new("idx");
    assert!(matches!(ft.term_query(&FieldValue::Null, &ctx), Err(FieldError::InvalidArgument(_))));
    let values = [FieldValue::from("a"), FieldValue::Null];
    assert!(matches!(ft.terms_query(&values, &ctx), Err(FieldError::InvalidArgument(_))));
}

#[test]
fn test_broken_script_fails_mapping() {
    let err = rkf::parse_field("f", &json!({"runtime_type": "keyword", "script": "emit("}), &cache()).unwrap_err();
    assert!(matches!(err, FieldError::ScriptCompilation(_)), "{err}");
}

#[test]
fn test_missing_param_fails_at_query_planning() {
    let ft = rkf::parse_field("f", &json!({"runtime_type": "keyword", "script": "param('p')"}), &cache()).unwrap();
    let err = ft.exists_query(&rkf::QueryContext::new("idx")).unwrap_err();
    assert!(matches!(err, FieldError::ScriptBinding(_)), "{err}");
}

#[test]
fn test_unmapped_field_fails_per_segment() {
    let ft = rkf::parse_field("f", &json!({"runtime_type": "keyword", "script": "doc('a')"}), &cache()).unwrap();
    let q = ft.exists_query(&rkf::QueryContext::new("idx")).unwrap();
    let good = rkf::Segment::new(0, vec![json!({"a": 1})]);
    let bad = rkf::Segment::new(1, vec![json!({"b": 1})]).with_fields(["b"]);
    assert!(q.search(std::slice::from_ref(&good)).is_ok());
    assert!(matches!(q.search(&[good, bad]), Err(FieldError::ScriptBinding(_))));

    // declaring the field in the schema turns absence into "no values"
    let declared = rkf::Segment::new(2, vec![json!({"b": 1})]).with_fields(["a", "b"]);
    assert!(q.search(&[declared]).unwrap().is_empty());
}

#[test]
fn test_script_runtime_error_propagates() {
    let ft = rkf::parse_field("f", &json!({"runtime_type": "keyword", "script": "doc('a')"}), &cache()).unwrap();
    let q = ft.exists_query(&rkf::QueryContext::new("idx")).unwrap();
    let seg = rkf::Segment::new(0, vec![json!({"a": 1})]);
    let mut m = q.matcher(&seg).unwrap();
    assert!(m.matches(0).unwrap());
    assert!(matches!(m.matches(9), Err(FieldError::ScriptRuntime(_))));
}

#[test]
fn test_display_rejects_non_binary() {
    let ft = rkf::parse_field("f", &json!({"runtime_type": "keyword", "script": "'a'"}), &cache()).unwrap();
    assert!(matches!(ft.value_for_display(&FieldValue::Text("a".into())), Err(FieldError::InvalidValue(_))));
    assert_eq!(ft.value_for_display(&FieldValue::Null).unwrap(), None);
}
