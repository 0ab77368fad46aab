//! Schema validation of harvested payloads.
//!
//! [`Schema`] validates arbitrary JSON against a declarative description and
//! reports *every* violation as an [`Invalid`] carrying the path of the
//! offending value. [`validate`] and [`validate_model`] turn those reports
//! (or the `validator` crate's) into a single [`HarvestError::Validation`]
//! whose lines read `[dotted.path] message: value`.

use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};
use validator::{Validate, ValidationErrors, ValidationErrorsKind};

use crate::harvest::traits::HarvestError;

// ============================================================================
// Paths and errors
// ============================================================================

/// One step into a JSON document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathSegment::Key(key) => f.write_str(key),
            PathSegment::Index(index) => write!(f, "{}", index),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidKind {
    /// A required key is absent
    Required,
    /// The value has the wrong type
    Type,
    /// The value has the right type but is rejected
    Value,
    /// The key is not declared by the schema
    Extra,
}

/// A single schema violation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invalid {
    pub path: Vec<PathSegment>,
    pub message: String,
    pub kind: InvalidKind,
}

impl Invalid {
    fn new(path: &[PathSegment], kind: InvalidKind, message: impl Into<String>) -> Self {
        Self {
            path: path.to_vec(),
            message: message.into(),
            kind,
        }
    }

    /// Dotted representation of the path (`nested.0.key`).
    pub fn dotted_path(&self) -> String {
        self.path
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(".")
    }
}

impl fmt::Display for Invalid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_empty() {
            f.write_str(&self.message)
        } else {
            write!(f, "[{}] {}", self.dotted_path(), self.message)
        }
    }
}

// ============================================================================
// Schema
// ============================================================================

/// Policy for keys an object schema does not declare.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExtraKeys {
    /// Undeclared keys are errors
    #[default]
    Prevent,
    /// Undeclared keys are kept as-is
    Allow,
    /// Undeclared keys are dropped from the output
    Remove,
}

/// Named validation closure returning the normalized value or a message.
#[derive(Clone)]
pub struct CustomValidator {
    name: String,
    check: Arc<dyn Fn(&Value) -> Result<Value, String> + Send + Sync>,
}

impl fmt::Debug for CustomValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomValidator")
            .field("name", &self.name)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct Field {
    key: String,
    schema: Schema,
    /// Overrides the object-wide requirement when set
    required: Option<bool>,
    default: Option<Value>,
}

/// Schema of a JSON object.
#[derive(Debug, Clone, Default)]
pub struct ObjectSchema {
    fields: Vec<Field>,
    required: bool,
    extra: ExtraKeys,
}

impl ObjectSchema {
    /// Declares a key following the object-wide requirement.
    pub fn field(mut self, key: impl Into<String>, schema: impl Into<Schema>) -> Self {
        self.fields.push(Field {
            key: key.into(),
            schema: schema.into(),
            required: None,
            default: None,
        });
        self
    }

    /// Declares a key that must be present.
    pub fn required_field(mut self, key: impl Into<String>, schema: impl Into<Schema>) -> Self {
        self.fields.push(Field {
            key: key.into(),
            schema: schema.into(),
            required: Some(true),
            default: None,
        });
        self
    }

    /// Declares an optional key, filled with `default` when absent.
    pub fn optional_field(
        mut self,
        key: impl Into<String>,
        schema: impl Into<Schema>,
        default: Option<Value>,
    ) -> Self {
        self.fields.push(Field {
            key: key.into(),
            schema: schema.into(),
            required: Some(false),
            default,
        });
        self
    }

    /// Makes every key without explicit marker required.
    pub fn required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }

    pub fn extra(mut self, extra: ExtraKeys) -> Self {
        self.extra = extra;
        self
    }

    fn walk(&self, value: &Value, path: &[PathSegment], errors: &mut Vec<Invalid>) -> Value {
        let Some(object) = value.as_object() else {
            errors.push(Invalid::new(path, InvalidKind::Type, "expected a dictionary"));
            return value.clone();
        };

        let mut output = Map::new();

        for field in &self.fields {
            let field_path = child(path, PathSegment::Key(field.key.clone()));
            match object.get(&field.key) {
                Some(inner) => {
                    let normalized = field.schema.walk(inner, &field_path, errors);
                    output.insert(field.key.clone(), normalized);
                }
                None => {
                    if let Some(default) = &field.default {
                        output.insert(field.key.clone(), default.clone());
                    } else if field.required.unwrap_or(self.required) {
                        errors.push(Invalid::new(
                            &field_path,
                            InvalidKind::Required,
                            "required key not provided",
                        ));
                    }
                }
            }
        }

        for (key, inner) in object {
            if self.fields.iter().any(|f| &f.key == key) {
                continue;
            }
            match self.extra {
                ExtraKeys::Prevent => errors.push(Invalid::new(
                    &child(path, PathSegment::Key(key.clone())),
                    InvalidKind::Extra,
                    "extra keys not allowed",
                )),
                ExtraKeys::Allow => {
                    output.insert(key.clone(), inner.clone());
                }
                ExtraKeys::Remove => {}
            }
        }

        Value::Object(output)
    }
}

impl From<ObjectSchema> for Schema {
    fn from(object: ObjectSchema) -> Self {
        Schema::Object(object)
    }
}

/// Declarative description of an expected JSON value.
#[derive(Debug, Clone)]
pub enum Schema {
    /// Any value
    Any,
    Str,
    Int,
    /// Any number
    Float,
    Bool,
    Null,
    /// Exactly this value
    Literal(Value),
    Object(ObjectSchema),
    /// An array whose elements each match one of the alternatives
    List(Vec<Schema>),
    /// The first matching alternative
    AnyOf(Vec<Schema>),
    Custom(CustomValidator),
}

impl Schema {
    pub fn object() -> ObjectSchema {
        ObjectSchema::default()
    }

    pub fn list(item: impl Into<Schema>) -> Self {
        Schema::List(vec![item.into()])
    }

    pub fn any_of(alternatives: Vec<Schema>) -> Self {
        Schema::AnyOf(alternatives)
    }

    pub fn custom<F>(name: impl Into<String>, check: F) -> Self
    where
        F: Fn(&Value) -> Result<Value, String> + Send + Sync + 'static,
    {
        Schema::Custom(CustomValidator {
            name: name.into(),
            check: Arc::new(check),
        })
    }

    /// Validates `data`, returning the normalized value or every violation.
    pub fn validate(&self, data: &Value) -> Result<Value, Vec<Invalid>> {
        let mut errors = Vec::new();
        let normalized = self.walk(data, &[], &mut errors);
        if errors.is_empty() {
            Ok(normalized)
        } else {
            Err(errors)
        }
    }

    fn walk(&self, value: &Value, path: &[PathSegment], errors: &mut Vec<Invalid>) -> Value {
        match self {
            Schema::Any => value.clone(),
            Schema::Str => expect(value.is_string(), value, path, "expected str", errors),
            Schema::Int => expect(
                value.is_i64() || value.is_u64(),
                value,
                path,
                "expected int",
                errors,
            ),
            Schema::Float => expect(value.is_number(), value, path, "expected float", errors),
            Schema::Bool => expect(value.is_boolean(), value, path, "expected bool", errors),
            Schema::Null => expect(value.is_null(), value, path, "expected null", errors),
            Schema::Literal(expected) => {
                if value != expected {
                    errors.push(Invalid::new(path, InvalidKind::Value, "not a valid value"));
                }
                value.clone()
            }
            Schema::Object(object) => object.walk(value, path, errors),
            Schema::List(alternatives) => walk_list(alternatives, value, path, errors),
            Schema::AnyOf(alternatives) => {
                for alternative in alternatives {
                    if let Ok(normalized) = alternative.validate(value) {
                        return normalized;
                    }
                }
                errors.push(Invalid::new(path, InvalidKind::Value, "no valid value found"));
                value.clone()
            }
            Schema::Custom(custom) => match (custom.check)(value) {
                Ok(normalized) => normalized,
                Err(message) => {
                    errors.push(Invalid::new(path, InvalidKind::Value, message));
                    value.clone()
                }
            },
        }
    }
}

fn child(path: &[PathSegment], segment: PathSegment) -> Vec<PathSegment> {
    let mut path = path.to_vec();
    path.push(segment);
    path
}

fn expect(
    ok: bool,
    value: &Value,
    path: &[PathSegment],
    message: &str,
    errors: &mut Vec<Invalid>,
) -> Value {
    if !ok {
        errors.push(Invalid::new(path, InvalidKind::Type, message));
    }
    value.clone()
}

fn walk_list(
    alternatives: &[Schema],
    value: &Value,
    path: &[PathSegment],
    errors: &mut Vec<Invalid>,
) -> Value {
    let Some(items) = value.as_array() else {
        errors.push(Invalid::new(path, InvalidKind::Type, "expected a list"));
        return value.clone();
    };

    if alternatives.is_empty() {
        return value.clone();
    }

    let mut output = Vec::with_capacity(items.len());
    for (index, item) in items.iter().enumerate() {
        let item_path = child(path, PathSegment::Index(index));
        let mut attempts = Vec::new();
        let mut matched = None;

        for alternative in alternatives {
            let mut item_errors = Vec::new();
            let normalized = alternative.walk(item, &item_path, &mut item_errors);
            if item_errors.is_empty() {
                matched = Some(normalized);
                break;
            }
            attempts.push(item_errors);
        }

        match matched {
            Some(normalized) => output.push(normalized),
            None if alternatives.len() == 1 => {
                errors.extend(attempts.into_iter().flatten());
                output.push(item.clone());
            }
            None => {
                errors.push(Invalid::new(&item_path, InvalidKind::Value, "invalid list value"));
                output.push(item.clone());
            }
        }
    }

    Value::Array(output)
}

// ============================================================================
// Error rewriting
// ============================================================================

/// Validates `data` against `schema`.
///
/// Returns the normalized data, or a [`HarvestError::Validation`] listing
/// every violation as `[dotted.path] message: value`. Missing required keys
/// are reported without value.
pub fn validate(data: &Value, schema: &Schema) -> Result<Value, HarvestError> {
    schema.validate(data).map_err(|errors| {
        HarvestError::validation(
            errors
                .iter()
                .map(|error| describe(data, error))
                .collect(),
        )
    })
}

fn describe(data: &Value, error: &Invalid) -> String {
    if error.path.is_empty() {
        return error.message.clone();
    }
    if error.kind == InvalidKind::Required {
        return error.to_string();
    }
    let value = lookup(data, &error.path).unwrap_or(&Value::Null);
    format!("{}: {}", error, display_value(value))
}

fn lookup<'a>(data: &'a Value, path: &[PathSegment]) -> Option<&'a Value> {
    path.iter().try_fold(data, |value, segment| match segment {
        PathSegment::Key(key) => value.get(key.as_str()),
        PathSegment::Index(index) => value.get(*index),
    })
}

/// Strings are shown without quotes, everything else as JSON.
pub(crate) fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Validates a model deriving [`Validate`], with the same error rewriting as
/// [`validate`].
pub fn validate_model<T: Validate>(model: &T) -> Result<(), HarvestError> {
    model.validate().map_err(|errors| {
        let mut lines = Vec::new();
        flatten_errors(&errors, &mut Vec::new(), &mut lines);
        lines.sort();
        HarvestError::validation(lines)
    })
}

fn flatten_errors(errors: &ValidationErrors, path: &mut Vec<String>, lines: &mut Vec<String>) {
    for (field, kind) in errors.errors() {
        path.push(field.to_string());
        match kind {
            ValidationErrorsKind::Field(field_errors) => {
                for error in field_errors {
                    let message = error
                        .message
                        .as_ref()
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| error.code.to_string());
                    let line = match error.params.get("value") {
                        Some(value) => {
                            format!("[{}] {}: {}", path.join("."), message, display_value(value))
                        }
                        None => format!("[{}] {}", path.join("."), message),
                    };
                    lines.push(line);
                }
            }
            ValidationErrorsKind::Struct(inner) => flatten_errors(inner, path, lines),
            ValidationErrorsKind::List(items) => {
                for (index, inner) in items {
                    path.push(index.to_string());
                    flatten_errors(inner, path, lines);
                    path.pop();
                }
            }
        }
        path.pop();
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FilterConfig, HarvestSource, SourceConfig};
    use serde_json::json;

    fn message(result: Result<Value, HarvestError>) -> String {
        result.unwrap_err().to_string()
    }

    #[test]
    fn test_valid_data() {
        let schema: Schema = Schema::object().field("key", Schema::Str).into();
        let data = json!({"key": "value"});
        assert_eq!(validate(&data, &schema).unwrap(), data);
    }

    #[test]
    fn test_handle_basic_error() {
        let schema: Schema = Schema::object().field("bad-value", Schema::Str).into();
        let msg = message(validate(&json!({"bad-value": 42}), &schema));
        assert!(msg.contains("[bad-value] expected str: 42"));
    }

    #[test]
    fn test_handle_required_values() {
        let schema: Schema = Schema::object()
            .field("missing", Schema::Str)
            .required(true)
            .into();
        let msg = message(validate(&json!({}), &schema));
        assert!(msg.contains("[missing] required key not provided"));
        assert!(!msg.contains("[missing] required key not provided:"));
    }

    #[test]
    fn test_keys_optional_by_default() {
        let schema: Schema = Schema::object().field("missing", Schema::Str).into();
        assert_eq!(validate(&json!({}), &schema).unwrap(), json!({}));
    }

    #[test]
    fn test_handle_multiple_errors_on_object() {
        let schema: Schema = Schema::object()
            .field("bad-value", Schema::Str)
            .field("other-bad-value", Schema::Int)
            .into();
        let data = json!({"bad-value": 42, "other-bad-value": "wrong"});
        let msg = message(validate(&data, &schema));
        assert!(msg.contains("[bad-value] expected str: 42"));
        assert!(msg.contains("[other-bad-value] expected int: wrong"));
    }

    #[test]
    fn test_handle_multiple_error_on_nested_object() {
        let schema: Schema = Schema::object()
            .field(
                "nested",
                Schema::object()
                    .field("bad-value", Schema::Str)
                    .field("other-bad-value", Schema::Int),
            )
            .into();
        let data = json!({"nested": {"bad-value": 42, "other-bad-value": "wrong"}});
        let msg = message(validate(&data, &schema));
        assert!(msg.contains("[nested.bad-value] expected str: 42"));
        assert!(msg.contains("[nested.other-bad-value] expected int: wrong"));
    }

    #[test]
    fn test_handle_multiple_error_on_nested_list() {
        let schema: Schema = Schema::object()
            .field(
                "nested",
                Schema::list(
                    Schema::object()
                        .field("bad-value", Schema::Str)
                        .field("other-bad-value", Schema::Int),
                ),
            )
            .into();
        let data = json!({"nested": [{"bad-value": 42, "other-bad-value": "wrong"}]});
        let msg = message(validate(&data, &schema));
        assert!(msg.contains("[nested.0.bad-value] expected str: 42"));
        assert!(msg.contains("[nested.0.other-bad-value] expected int: wrong"));
    }

    #[test]
    fn test_handle_multiple_error_on_nested_list_items() {
        let schema: Schema = Schema::object()
            .field(
                "nested",
                Schema::list(
                    Schema::object()
                        .field("bad-value", Schema::Str)
                        .field("other-bad-value", Schema::Int),
                ),
            )
            .into();
        let data = json!({"nested": [
            {"bad-value": 42, "other-bad-value": "wrong"},
            {"bad-value": 43, "other-bad-value": "bad"},
        ]});
        let msg = message(validate(&data, &schema));
        assert!(msg.contains("[nested.0.bad-value] expected str: 42"));
        assert!(msg.contains("[nested.0.other-bad-value] expected int: wrong"));
        assert!(msg.contains("[nested.1.bad-value] expected str: 43"));
        assert!(msg.contains("[nested.1.other-bad-value] expected int: bad"));
    }

    #[test]
    fn test_message_header_and_line_per_error() {
        let schema: Schema = Schema::object()
            .field("a", Schema::Str)
            .field("b", Schema::Str)
            .into();
        let msg = message(validate(&json!({"a": 1, "b": 2}), &schema));
        assert!(msg.starts_with("Validation error:\n- "));
        assert_eq!(msg.lines().count(), 3);
    }

    #[test]
    fn test_root_error_has_no_path() {
        let msg = message(validate(&json!(42), &Schema::Str));
        assert!(msg.contains("- expected str"));
        assert!(!msg.contains('['));
    }

    #[test]
    fn test_extra_keys() {
        let strict: Schema = Schema::object().field("a", Schema::Int).into();
        let msg = message(validate(&json!({"a": 1, "b": true}), &strict));
        assert!(msg.contains("[b] extra keys not allowed: true"));

        let allow: Schema = Schema::object()
            .field("a", Schema::Int)
            .extra(ExtraKeys::Allow)
            .into();
        assert_eq!(
            validate(&json!({"a": 1, "b": true}), &allow).unwrap(),
            json!({"a": 1, "b": true})
        );

        let remove: Schema = Schema::object()
            .field("a", Schema::Int)
            .extra(ExtraKeys::Remove)
            .into();
        assert_eq!(
            validate(&json!({"a": 1, "b": true}), &remove).unwrap(),
            json!({"a": 1})
        );
    }

    #[test]
    fn test_defaults_and_markers() {
        let schema: Schema = Schema::object()
            .required(true)
            .optional_field("page", Schema::Int, Some(json!(1)))
            .optional_field("q", Schema::Str, None)
            .required_field("id", Schema::Str)
            .into();

        assert_eq!(
            validate(&json!({"id": "x"}), &schema).unwrap(),
            json!({"id": "x", "page": 1})
        );
        let msg = message(validate(&json!({}), &schema));
        assert!(msg.contains("[id] required key not provided"));
        assert!(!msg.contains("[q]"));
    }

    #[test]
    fn test_any_of_and_literal() {
        let schema: Schema = Schema::object()
            .field("value", Schema::any_of(vec![Schema::Null, Schema::Str]))
            .field("kind", Schema::Literal(json!("dataset")))
            .into();

        assert!(validate(&json!({"value": null, "kind": "dataset"}), &schema).is_ok());
        let msg = message(validate(&json!({"value": 3, "kind": "reuse"}), &schema));
        assert!(msg.contains("[value] no valid value found: 3"));
        assert!(msg.contains("[kind] not a valid value: reuse"));
    }

    #[test]
    fn test_custom_validator_normalizes() {
        let lower = Schema::custom("lowercase", |value| {
            value
                .as_str()
                .map(|s| Value::String(s.to_lowercase()))
                .ok_or_else(|| "expected str".to_string())
        });
        let schema: Schema = Schema::object().field("tag", lower).into();

        assert_eq!(
            validate(&json!({"tag": "OpenData"}), &schema).unwrap(),
            json!({"tag": "opendata"})
        );
        let msg = message(validate(&json!({"tag": 1}), &schema));
        assert!(msg.contains("[tag] expected str: 1"));
    }

    #[test]
    fn test_list_with_alternatives() {
        let schema = Schema::List(vec![Schema::Int, Schema::Str]);
        assert!(validate(&json!([1, "two"]), &schema).is_ok());

        let msg = message(validate(&json!([1, true]), &schema));
        assert!(msg.contains("[1] invalid list value: true"));
    }

    #[test]
    fn test_validate_model_flattens_nested_errors() {
        let mut source = HarvestSource::new("", "not a url", "fake");
        source.config = SourceConfig {
            filters: vec![FilterConfig::include("", "x")],
            ..SourceConfig::default()
        };

        let msg = validate_model(&source).unwrap_err().to_string();
        assert!(msg.contains("[name] must not be empty"));
        assert!(msg.contains("[url] invalid url"));
        assert!(msg.contains("[config.filters.0.key] must not be empty"));
    }

    #[test]
    fn test_validate_model_ok() {
        let source = HarvestSource::new("Source", "https://data.example.org", "fake");
        assert!(validate_model(&source).is_ok());
    }
}
