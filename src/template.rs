//! Compiled module templates.
//!
//! Module definitions are authored as JSON. They are compiled once into a
//! [`Template`] tree so expansion never re-inspects raw JSON: back-tick
//! interpolation is split into segments up front, and the reserved `for` / `if`
//! keys of array elements become [`ArrayItem::ForLoop`] and
//! [`ArrayItem::Conditional`] nodes.

use serde_json::{Number, Value};

use crate::error::ExpansionError;

pub const FOR_KEY: &str = "for";
pub const IF_KEY: &str = "if";

#[derive(Debug, Clone, PartialEq)]
pub enum Template {
    Text(TextTemplate),
    Number(Number),
    Bool(bool),
    Null,
    Object(ObjectTemplate),
    Array(Vec<ArrayItem>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum TextTemplate {
    /// No back-ticks at all.
    Literal(String),
    /// The whole string is one `` `expr` ``; expands to the typed result.
    Expression(String),
    /// Literal text mixed with expressions; expands to a string.
    Interpolated(Vec<Segment>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    Literal(String),
    Expression(String),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ObjectTemplate {
    pub fields: Vec<(String, Template)>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ArrayItem {
    Plain(Template),
    ForLoop {
        ranges: Vec<String>,
        condition: Option<String>,
        body: ObjectTemplate,
    },
    Conditional {
        condition: String,
        body: ObjectTemplate,
    },
}

impl Template {
    pub fn compile(value: &Value) -> Result<Self, ExpansionError> {
        compile_value(value, "$")
    }
}

impl ObjectTemplate {
    /// Compile a JSON object; `for` / `if` keys are dropped.
    pub fn compile(value: &Value) -> Result<Self, ExpansionError> {
        match value {
            Value::Object(_) => compile_object(value, "$"),
            other => Err(ExpansionError::invalid_template(
                "$",
                format!("expected an object, found {}", kind_name(other)),
            )),
        }
    }
}

/// Compile a JSON array into array items.
pub fn compile_array(value: &Value) -> Result<Vec<ArrayItem>, ExpansionError> {
    match value {
        Value::Array(items) => compile_items(items, "$"),
        other => Err(ExpansionError::invalid_template(
            "$",
            format!("expected an array, found {}", kind_name(other)),
        )),
    }
}

fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn compile_value(value: &Value, path: &str) -> Result<Template, ExpansionError> {
    Ok(match value {
        Value::Null => Template::Null,
        Value::Bool(b) => Template::Bool(*b),
        Value::Number(n) => Template::Number(n.clone()),
        Value::String(s) => Template::Text(compile_text(s, path)?),
        Value::Array(items) => Template::Array(compile_items(items, path)?),
        Value::Object(_) => Template::Object(compile_object(value, path)?),
    })
}

fn compile_object(value: &Value, path: &str) -> Result<ObjectTemplate, ExpansionError> {
    let mut fields = Vec::new();
    if let Value::Object(map) = value {
        for (key, field) in map {
            if key == FOR_KEY || key == IF_KEY {
                continue;
            }
            let field_path = format!("{}.{}", path, key);
            fields.push((key.clone(), compile_value(field, &field_path)?));
        }
    }
    Ok(ObjectTemplate { fields })
}

fn compile_items(items: &[Value], path: &str) -> Result<Vec<ArrayItem>, ExpansionError> {
    items
        .iter()
        .enumerate()
        .map(|(i, item)| compile_item(item, &format!("{}[{}]", path, i)))
        .collect()
}

fn compile_item(value: &Value, path: &str) -> Result<ArrayItem, ExpansionError> {
    let Value::Object(map) = value else {
        return Ok(ArrayItem::Plain(compile_value(value, path)?));
    };

    let condition = match map.get(IF_KEY) {
        None => None,
        Some(Value::String(expr)) => Some(strip_ticks(expr)),
        Some(other) => {
            return Err(ExpansionError::invalid_template(
                format!("{}.{}", path, IF_KEY),
                format!("`if` must be a string, found {}", kind_name(other)),
            ))
        }
    };

    let ranges = match map.get(FOR_KEY) {
        None => None,
        Some(Value::String(descriptor)) => Some(vec![strip_ticks(descriptor)]),
        Some(Value::Array(descriptors)) => Some(
            descriptors
                .iter()
                .enumerate()
                .map(|(i, d)| match d {
                    Value::String(s) => Ok(strip_ticks(s)),
                    other => Err(ExpansionError::invalid_template(
                        format!("{}.{}[{}]", path, FOR_KEY, i),
                        format!("range descriptor must be a string, found {}", kind_name(other)),
                    )),
                })
                .collect::<Result<Vec<_>, _>>()?,
        ),
        Some(other) => {
            return Err(ExpansionError::invalid_template(
                format!("{}.{}", path, FOR_KEY),
                format!(
                    "`for` must be a string or an array of strings, found {}",
                    kind_name(other)
                ),
            ))
        }
    };

    let body = compile_object(value, path)?;
    Ok(match (ranges, condition) {
        (Some(ranges), condition) => ArrayItem::ForLoop {
            ranges,
            condition,
            body,
        },
        (None, Some(condition)) => ArrayItem::Conditional { condition, body },
        (None, None) => ArrayItem::Plain(Template::Object(body)),
    })
}

/// Control expressions may be written with or without surrounding back-ticks.
fn strip_ticks(expr: &str) -> String {
    let trimmed = expr.trim();
    trimmed
        .strip_prefix('`')
        .and_then(|s| s.strip_suffix('`'))
        .unwrap_or(trimmed)
        .to_string()
}

fn compile_text(text: &str, path: &str) -> Result<TextTemplate, ExpansionError> {
    let parts: Vec<&str> = text.split('`').collect();
    if parts.len() == 1 {
        return Ok(TextTemplate::Literal(text.to_string()));
    }
    if parts.len() % 2 == 0 {
        return Err(ExpansionError::invalid_template(
            path,
            format!("unbalanced back-tick in {:?}", text),
        ));
    }
    if parts.iter().skip(1).step_by(2).any(|expr| expr.trim().is_empty()) {
        return Err(ExpansionError::invalid_template(
            path,
            format!("empty expression in {:?}", text),
        ));
    }
    if parts.len() == 3 && parts[0].is_empty() && parts[2].is_empty() {
        return Ok(TextTemplate::Expression(parts[1].to_string()));
    }

    let segments = parts
        .iter()
        .enumerate()
        .filter(|(i, part)| i % 2 == 1 || !part.is_empty())
        .map(|(i, part)| {
            if i % 2 == 0 {
                Segment::Literal(part.to_string())
            } else {
                Segment::Expression(part.to_string())
            }
        })
        .collect();
    Ok(TextTemplate::Interpolated(segments))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_text_forms() {
        assert_eq!(
            compile_text("plain", "$").unwrap(),
            TextTemplate::Literal("plain".into())
        );
        assert_eq!(
            compile_text("`2+3`", "$").unwrap(),
            TextTemplate::Expression("2+3".into())
        );
        assert_eq!(
            compile_text("v=`2+3`", "$").unwrap(),
            TextTemplate::Interpolated(vec![
                Segment::Literal("v=".into()),
                Segment::Expression("2+3".into()),
            ])
        );
    }

    #[test]
    fn test_unbalanced_ticks_rejected() {
        let err = compile_text("a`b", "$.name").unwrap_err();
        assert!(matches!(err, ExpansionError::InvalidTemplate { ref path, .. } if path == "$.name"));
    }

    #[test]
    fn test_empty_expressions_rejected() {
        for text in ["``", "a` `b", "`1`-``"] {
            let err = compile_text(text, "$.x").unwrap_err();
            assert!(matches!(err, ExpansionError::InvalidTemplate { ref path, .. } if path == "$.x"), "{}", text);
        }
        let err = ObjectTemplate::compile(&json!({"p1": {"x": "``"}})).unwrap_err();
        assert!(matches!(err, ExpansionError::InvalidTemplate { ref path, .. } if path == "$.p1.x"));
    }

    #[test]
    fn test_for_and_if_become_control_nodes() {
        let items = compile_array(&json!([
            {"for": "i=0:1:2", "if": "i!=1", "type": "Blocker"},
            {"if": "`show`", "type": "TextLabel"},
            {"type": "Blocker"},
            "`x`"
        ]))
        .unwrap();

        match &items[0] {
            ArrayItem::ForLoop { ranges, condition, body } => {
                assert_eq!(ranges, &vec!["i=0:1:2".to_string()]);
                assert_eq!(condition.as_deref(), Some("i!=1"));
                assert_eq!(body.fields.len(), 1);
            }
            other => panic!("expected loop, got {:?}", other),
        }
        assert!(matches!(&items[1], ArrayItem::Conditional { condition, .. } if condition == "show"));
        assert!(matches!(&items[2], ArrayItem::Plain(Template::Object(_))));
        assert!(matches!(&items[3], ArrayItem::Plain(Template::Text(_))));
    }

    #[test]
    fn test_nested_ranges() {
        let items = compile_array(&json!([{"for": ["i=0:1:1", "j=0:1:2"]}])).unwrap();
        match &items[0] {
            ArrayItem::ForLoop { ranges, .. } => assert_eq!(ranges.len(), 2),
            other => panic!("expected loop, got {:?}", other),
        }
    }

    #[test]
    fn test_control_keys_outside_arrays_are_dropped() {
        let t = ObjectTemplate::compile(&json!({"for": "i=0:1:2", "a": 1})).unwrap();
        assert_eq!(t.fields.len(), 1);
        assert_eq!(t.fields[0].0, "a");
    }

    #[test]
    fn test_bad_for_type_reports_path() {
        let err = compile_array(&json!([{"type": "x"}, {"for": 3}])).unwrap_err();
        match err {
            ExpansionError::InvalidTemplate { path, .. } => assert_eq!(path, "$[1].for"),
            other => panic!("unexpected {:?}", other),
        }
    }
}
