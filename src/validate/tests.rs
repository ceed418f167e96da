use super::{CheckOutcome, ErrorCollection, ValidationEngine};
use crate::table::Route;
use http::Method;
use serde_json::{json, Value};

fn engine_with(schema: Value) -> ValidationEngine {
    let route = Route::new(Method::POST, "/notes", "post_note").entity_schema(schema);
    ValidationEngine::from_routes(&[route]).unwrap()
}

fn note_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "title": {"type": "string", "maxLength": 10},
            "rank": {"type": "integer"},
            "hrid": {"type": "string", "readOnly": true},
            "metadata": {
                "type": "object",
                "properties": {
                    "createdDate": {"type": "string", "readOnly": true}
                }
            }
        },
        "required": ["title"]
    })
}

#[test]
fn clean_entity_passes() {
    let engine = engine_with(note_schema());
    let mut entity = json!({"title": "short", "rank": 3});
    assert!(engine.check("post_note", &mut entity, &[]).is_clean());
}

#[test]
fn handler_without_schema_is_always_clean() {
    let engine = engine_with(note_schema());
    let mut entity = json!({"anything": true});
    assert!(engine.check("other_handler", &mut entity, &[]).is_clean());
}

#[test]
fn violations_become_structured_records() {
    let engine = engine_with(note_schema());
    let mut entity = json!({"title": "far too long a title", "rank": "three"});
    let CheckOutcome::Invalid(collection) = engine.check("post_note", &mut entity, &[]) else {
        panic!("expected invalid outcome");
    };
    assert_eq!(collection.total_records, 2);
    let keys: Vec<&str> = collection.errors.iter().map(|e| e.key.as_str()).collect();
    assert!(keys.contains(&"title"));
    assert!(keys.contains(&"rank"));
    for record in &collection.errors {
        assert_eq!(record.kind, "validation_field_error");
        assert!(!record.code.is_empty());
    }
}

#[test]
fn read_only_fields_are_stripped_not_reported() {
    let engine = engine_with(note_schema());
    let mut entity = json!({
        "title": "ok",
        "hrid": "forged-1",
        "metadata": {"createdDate": "2020-01-01"}
    });
    assert!(engine.check("post_note", &mut entity, &[]).is_clean());
    assert!(entity.get("hrid").is_none());
    assert!(entity["metadata"].get("createdDate").is_none());
}

#[test]
fn read_only_fields_inside_arrays_are_stripped_from_every_element() {
    let schema = json!({
        "type": "object",
        "properties": {
            "title": {"type": "string"},
            "links": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "target": {"type": "string"},
                        "resolvedId": {"type": "string", "readOnly": true}
                    }
                }
            }
        }
    });
    let engine = engine_with(schema);
    let mut entity = json!({
        "title": "ok",
        "links": [
            {"target": "a", "resolvedId": "forged-1"},
            {"target": "b"},
            {"target": "c", "resolvedId": "forged-2"}
        ]
    });
    assert!(engine.check("post_note", &mut entity, &[]).is_clean());
    for link in entity["links"].as_array().unwrap() {
        assert!(link.get("resolvedId").is_none());
        assert!(link.get("target").is_some());
    }
}

#[test]
fn read_only_strip_keeps_other_violations() {
    let engine = engine_with(note_schema());
    let mut entity = json!({"hrid": "forged-1", "rank": "three"});
    let CheckOutcome::Invalid(collection) = engine.check("post_note", &mut entity, &[]) else {
        panic!("expected invalid outcome");
    };
    assert!(entity.get("hrid").is_none());
    let keys: Vec<&str> = collection.errors.iter().map(|e| e.key.as_str()).collect();
    assert!(keys.contains(&"rank"));
    // title missing is a root-level required violation.
    assert!(keys.contains(&""));
    assert!(!keys.contains(&"hrid"));
}

#[test]
fn field_filter_narrows_reported_errors() {
    let engine = engine_with(note_schema());
    let mut entity = json!({"title": "far too long a title", "rank": "three"});
    let outcome = engine.check("post_note", &mut entity, &["rank".to_string()]);
    let CheckOutcome::Invalid(collection) = outcome else {
        panic!("expected invalid outcome");
    };
    assert_eq!(collection.total_records, 1);
    assert_eq!(collection.errors[0].key, "rank");

    // A filter that matches nothing reports clean.
    let mut entity = json!({"title": "far too long a title"});
    assert!(engine
        .check("post_note", &mut entity, &["rank".to_string()])
        .is_clean());
}

#[test]
fn nested_violations_use_dotted_keys() {
    let schema = json!({
        "type": "object",
        "properties": {
            "metadata": {
                "type": "object",
                "properties": {"revision": {"type": "integer"}}
            }
        }
    });
    let engine = engine_with(schema);
    let mut entity = json!({"metadata": {"revision": "one"}});
    let CheckOutcome::Invalid(collection) = engine.check("post_note", &mut entity, &[]) else {
        panic!("expected invalid outcome");
    };
    assert_eq!(collection.errors[0].key, "metadata.revision");
}

#[test]
fn invalid_schema_fails_engine_construction() {
    let route = Route::new(Method::POST, "/notes", "post_note")
        .entity_schema(json!({"type": "not-a-type"}));
    assert!(ValidationEngine::from_routes(&[route]).is_err());
}

#[test]
fn collection_serializes_with_wire_field_names() {
    let payload = ErrorCollection::single("title", "\"x\"", "boom");
    let value: Value = serde_json::from_str(&payload.to_json()).unwrap();
    assert_eq!(value["total_records"], 1);
    assert_eq!(value["errors"][0]["type"], "validation_field_error");
    assert_eq!(value["errors"][0]["message"], "boom");
}
