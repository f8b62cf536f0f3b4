//! Structural validation of request bodies against a [`Shape`].

use serde_json::{Map, Number, Value};

use crate::shape::{Shape, Validator};

/// How the candidate body was encoded on the wire.
///
/// Form encodings (url-encoded and multipart) only carry text, so scalar
/// fields are coerced from their string form. JSON bodies are never coerced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Json,
    Form,
}

/// First mismatch found by a [`StructuralValidator`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct Mismatch {
    /// Top-level key at fault; `None` when the candidate is not an object.
    pub field: Option<String>,
    pub message: String,
}

impl Mismatch {
    fn structural(message: impl Into<String>) -> Self {
        Self {
            field: None,
            message: message.into(),
        }
    }

    fn at(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: Some(field.to_string()),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ValidationOutcome {
    /// The normalised body: declared keys only, coerced values.
    Accepted(Map<String, Value>),
    Rejected {
        field: Option<String>,
        message: String,
    },
}

impl ValidationOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, ValidationOutcome::Accepted(_))
    }
}

/// Pluggable structural validator.
pub trait StructuralValidator: Send + Sync {
    /// Check `candidate` against `shape`, returning the normalised object on
    /// success. Undeclared keys must be rejected.
    fn check(
        &self,
        shape: &Shape,
        candidate: &Value,
        encoding: Encoding,
    ) -> Result<Map<String, Value>, Mismatch>;
}

/// Run `validator` and fold the result into a [`ValidationOutcome`].
pub fn validate(
    validator: &dyn StructuralValidator,
    shape: &Shape,
    candidate: &Value,
    encoding: Encoding,
) -> ValidationOutcome {
    match validator.check(shape, candidate, encoding) {
        Ok(normalized) => ValidationOutcome::Accepted(normalized),
        Err(Mismatch { field, message }) => ValidationOutcome::Rejected { field, message },
    }
}

/// Closed matching over the [`Validator`] algebra.
///
/// Each object is checked in three passes and the first mismatch wins:
/// missing required fields, then declared field values in declaration order,
/// then undeclared keys. Integral floats such as `2.0` are accepted for
/// [`Validator::Integer`] and normalised to `2`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExactValidator;

impl StructuralValidator for ExactValidator {
    fn check(
        &self,
        shape: &Shape,
        candidate: &Value,
        encoding: Encoding,
    ) -> Result<Map<String, Value>, Mismatch> {
        let Value::Object(object) = candidate else {
            return Err(Mismatch::structural(format!(
                "expected an object, received {}",
                kind_of(candidate)
            )));
        };

        check_object("", shape, object, encoding).map_err(|(top, message)| match top {
            Some(field) => Mismatch::at(&field, message),
            None => Mismatch::structural(message),
        })
    }
}

type NestedMismatch = (Option<String>, String);

fn check_object(
    prefix: &str,
    shape: &Shape,
    object: &Map<String, Value>,
    encoding: Encoding,
) -> Result<Map<String, Value>, NestedMismatch> {
    if let Some((name, _)) = shape
        .iter()
        .find(|(name, field)| !field.optional && !object.contains_key(*name))
    {
        let path = join_path(prefix, name);
        return Err((Some(name.to_string()), format!("`{path}`: missing required field")));
    }

    let mut normalized = Map::with_capacity(shape.len());
    for (name, field) in shape.iter() {
        match object.get(name) {
            None => {}
            Some(Value::Null) if field.optional => {}
            Some(value) => {
                let path = join_path(prefix, name);
                let value = check_value(&path, &field.validator, value, encoding)
                    .map_err(|message| (Some(name.to_string()), message))?;
                normalized.insert(name.to_string(), value);
            }
        }
    }

    if let Some(extra) = object.keys().find(|k| !shape.contains(k)) {
        let path = join_path(prefix, extra);
        return Err((Some(extra.clone()), format!("`{path}`: unexpected field")));
    }

    Ok(normalized)
}

fn check_value(
    path: &str,
    validator: &Validator,
    value: &Value,
    encoding: Encoding,
) -> Result<Value, String> {
    let coerce = encoding == Encoding::Form;
    let mismatch = || {
        format!(
            "`{path}`: expected {}, received {}",
            validator.type_name(),
            kind_of(value)
        )
    };

    match (validator, value) {
        (Validator::Any, v) => Ok(v.clone()),
        (Validator::String, Value::String(_)) => Ok(value.clone()),
        (Validator::Number, Value::Number(_)) => Ok(value.clone()),
        (Validator::Number, Value::String(s)) if coerce => parse_number(s).ok_or_else(mismatch),
        (Validator::Integer, Value::Number(n)) => integral(n).ok_or_else(mismatch),
        (Validator::Integer, Value::String(s)) if coerce => parse_number(s)
            .as_ref()
            .and_then(Value::as_number)
            .and_then(integral)
            .ok_or_else(mismatch),
        (Validator::Boolean, Value::Bool(_)) => Ok(value.clone()),
        (Validator::Boolean, Value::String(s)) if coerce => match s.trim() {
            "true" => Ok(Value::Bool(true)),
            "false" => Ok(Value::Bool(false)),
            _ => Err(mismatch()),
        },
        (Validator::OneOf(variants), Value::String(s)) => {
            if variants.iter().any(|v| v == s) {
                Ok(value.clone())
            } else {
                Err(format!(
                    "`{path}`: expected one of {}, received \"{s}\"",
                    validator.type_name()
                ))
            }
        }
        (Validator::Array(item), Value::Array(items)) => items
            .iter()
            .enumerate()
            .map(|(i, v)| check_value(&format!("{path}[{i}]"), item, v, encoding))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        // A form field sent once arrives as a scalar.
        (Validator::Array(item), scalar) if coerce => {
            check_value(&format!("{path}[0]"), item, scalar, encoding).map(|v| Value::Array(vec![v]))
        }
        (Validator::Object(shape), Value::Object(object)) => check_object(path, shape, object, encoding)
            .map(Value::Object)
            .map_err(|(_, message)| message),
        _ => Err(mismatch()),
    }
}

fn parse_number(s: &str) -> Option<Value> {
    let s = s.trim();
    if let Ok(i) = s.parse::<i64>() {
        return Some(Value::from(i));
    }
    s.parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map(Value::Number)
}

// 2^63 and 2^64, exactly representable as f64.
const I64_BOUND: f64 = 9_223_372_036_854_775_808.0;
const U64_BOUND: f64 = 18_446_744_073_709_551_616.0;

/// `n` as an integer-typed JSON number, or `None` when it has a fraction or
/// does not fit in 64 bits.
fn integral(n: &Number) -> Option<Value> {
    if n.is_i64() || n.is_u64() {
        return Some(Value::Number(n.clone()));
    }
    let f = n.as_f64()?;
    if f.fract() != 0.0 {
        return None;
    }
    if (-I64_BOUND..I64_BOUND).contains(&f) {
        Some(Value::from(f as i64))
    } else if (0.0..U64_BOUND).contains(&f) {
        Some(Value::from(f as u64))
    } else {
        None
    }
}

fn join_path(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}.{name}")
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn user_shape() -> Shape {
        Shape::new()
            .required("username", Validator::String)
            .optional("age", Validator::Integer)
    }

    fn run(shape: &Shape, candidate: Value) -> ValidationOutcome {
        validate(&ExactValidator, shape, &candidate, Encoding::Json)
    }

    #[test]
    fn accepts_exact_match_and_keeps_declared_keys_only() {
        let out = run(&user_shape(), json!({"username": "bob"}));
        let ValidationOutcome::Accepted(body) = out else {
            panic!("expected acceptance, got {out:?}");
        };
        assert_eq!(Value::Object(body), json!({"username": "bob"}));

        let out = run(&user_shape(), json!({"username": "bob", "age": 30}));
        assert!(out.is_accepted());
    }

    #[test]
    fn optional_null_is_treated_as_absent() {
        let out = run(&user_shape(), json!({"username": "bob", "age": null}));
        assert_eq!(
            out,
            ValidationOutcome::Accepted(json!({"username": "bob"}).as_object().unwrap().clone())
        );
    }

    #[test]
    fn rejects_undeclared_field() {
        let out = run(&user_shape(), json!({"username": "bob", "extra": 1}));
        assert_eq!(
            out,
            ValidationOutcome::Rejected {
                field: Some("extra".into()),
                message: "`extra`: unexpected field".into(),
            }
        );
    }

    #[test]
    fn rejects_missing_required_field_naming_it() {
        let ValidationOutcome::Rejected { field, message } = run(&user_shape(), json!({})) else {
            panic!("expected rejection");
        };
        assert_eq!(field.as_deref(), Some("username"));
        assert!(message.contains("username"), "{message}");
    }

    #[test]
    fn declared_fields_are_checked_before_extras() {
        let ValidationOutcome::Rejected { field, .. } =
            run(&user_shape(), json!({"zzz": 1, "username": 5}))
        else {
            panic!("expected rejection");
        };
        assert_eq!(field.as_deref(), Some("username"));
    }

    #[test]
    fn non_object_is_structural() {
        let out = run(&user_shape(), json!(["bob"]));
        assert_eq!(
            out,
            ValidationOutcome::Rejected {
                field: None,
                message: "expected an object, received array".into(),
            }
        );
    }

    #[test]
    fn nested_paths_are_reported_with_top_level_field() {
        let shape = Shape::new().required(
            "tags",
            Validator::array(Validator::Object(
                Shape::new().required("name", Validator::String),
            )),
        );

        let ValidationOutcome::Rejected { field, message } =
            run(&shape, json!({"tags": [{"name": "a"}, {"name": 1}]}))
        else {
            panic!("expected rejection");
        };
        assert_eq!(field.as_deref(), Some("tags"));
        assert_eq!(message, "`tags[1].name`: expected string, received number");

        let ValidationOutcome::Rejected { message, .. } =
            run(&shape, json!({"tags": [{"name": "a", "x": true}]}))
        else {
            panic!("expected rejection");
        };
        assert_eq!(message, "`tags[0].x`: unexpected field");
    }

    #[test]
    fn form_values_are_coerced_json_values_are_not() {
        let shape = Shape::new()
            .required("count", Validator::Integer)
            .required("ratio", Validator::Number)
            .required("on", Validator::Boolean)
            .required("ids", Validator::array(Validator::Integer));
        let candidate = json!({"count": "3", "ratio": "0.5", "on": "true", "ids": "7"});

        let out = validate(&ExactValidator, &shape, &candidate, Encoding::Form);
        let ValidationOutcome::Accepted(body) = out else {
            panic!("expected acceptance, got {out:?}");
        };
        assert_eq!(
            Value::Object(body),
            json!({"count": 3, "ratio": 0.5, "on": true, "ids": [7]})
        );

        let out = validate(&ExactValidator, &shape, &candidate, Encoding::Json);
        assert!(!out.is_accepted());
    }

    #[test]
    fn one_of_and_integer_rules() {
        let shape = Shape::new()
            .required("colour", Validator::one_of(["red", "blue"]))
            .required("n", Validator::Integer);

        assert!(run(&shape, json!({"colour": "red", "n": 2})).is_accepted());
        assert!(!run(&shape, json!({"colour": "red", "n": 2.5})).is_accepted());
        let ValidationOutcome::Rejected { message, .. } =
            run(&shape, json!({"colour": "green", "n": 1}))
        else {
            panic!("expected rejection");
        };
        assert!(message.contains("\"red\" | \"blue\""), "{message}");
    }

    #[test]
    fn integral_floats_normalize_to_integers() {
        let shape = Shape::new().required("n", Validator::Integer);

        for (candidate, encoding) in [
            (json!({"n": 2.0}), Encoding::Json),
            (json!({"n": "2.0"}), Encoding::Form),
            (json!({"n": "2"}), Encoding::Form),
        ] {
            let out = validate(&ExactValidator, &shape, &candidate, encoding);
            let ValidationOutcome::Accepted(body) = out else {
                panic!("expected acceptance for {candidate}, got {out:?}");
            };
            assert_eq!(body["n"].as_i64(), Some(2), "{candidate}");
            assert_eq!(Value::Object(body), json!({"n": 2}));
        }

        let out = validate(&ExactValidator, &shape, &json!({"n": "2.5"}), Encoding::Form);
        assert!(!out.is_accepted());
        assert!(!run(&shape, json!({"n": 1e300})).is_accepted());
    }

    #[test]
    fn missing_required_field_is_reported_before_type_errors() {
        let shape = Shape::new()
            .required("a", Validator::String)
            .required("b", Validator::String);

        let out = run(&shape, json!({"a": 1}));
        assert_eq!(
            out,
            ValidationOutcome::Rejected {
                field: Some("b".into()),
                message: "`b`: missing required field".into(),
            }
        );
    }
}
