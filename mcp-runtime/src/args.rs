use serde_json::{Map, Value};

use crate::error::{GatewayError, GatewayResult};

/// Absent, `null` and blank strings all count as "not provided".
pub fn is_present(args: &Map<String, Value>, key: &str) -> bool {
    match args.get(key) {
        None | Some(Value::Null) => false,
        Some(Value::String(v)) => !v.trim().is_empty(),
        Some(_) => true,
    }
}

pub fn require_present(args: &Map<String, Value>, fields: &[&str]) -> GatewayResult<()> {
    match fields.iter().find(|field| !is_present(args, field)) {
        Some(field) => Err(GatewayError::missing_field(field)),
        None => Ok(()),
    }
}

/// Numeric identifier; numeric strings are accepted since some clients
/// stringify every argument.
pub fn required_id(args: &Map<String, Value>, key: &str) -> GatewayResult<i64> {
    let value = args
        .get(key)
        .filter(|v| !v.is_null())
        .ok_or_else(|| GatewayError::missing_field(key))?;
    let id = match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    };
    id.ok_or_else(|| GatewayError::invalid_argument(key, format!("'{key}' must be an integer id")))
}

pub fn required_string(args: &Map<String, Value>, key: &str) -> GatewayResult<String> {
    match args.get(key) {
        None | Some(Value::Null) => Err(GatewayError::missing_field(key)),
        Some(Value::String(v)) if !v.trim().is_empty() => Ok(v.clone()),
        Some(Value::String(_)) => Err(GatewayError::invalid_argument(
            key,
            format!("'{key}' must not be empty"),
        )),
        Some(_) => Err(GatewayError::invalid_argument(
            key,
            format!("'{key}' must be a string"),
        )),
    }
}

pub fn required_array(args: &Map<String, Value>, key: &str) -> GatewayResult<Vec<Value>> {
    match args.get(key) {
        None | Some(Value::Null) => Err(GatewayError::missing_field(key)),
        Some(Value::Array(items)) => Ok(items.clone()),
        Some(_) => Err(GatewayError::invalid_argument(
            key,
            format!("'{key}' must be an array"),
        )),
    }
}

pub fn arg_bool(args: &Map<String, Value>, key: &str, default: bool) -> GatewayResult<bool> {
    Ok(optional_bool(args, key)?.unwrap_or(default))
}

pub fn optional_bool(args: &Map<String, Value>, key: &str) -> GatewayResult<Option<bool>> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(v)) => Ok(Some(*v)),
        Some(_) => Err(GatewayError::invalid_argument(
            key,
            format!("'{key}' must be a boolean"),
        )),
    }
}

pub fn optional_u64(args: &Map<String, Value>, key: &str) -> GatewayResult<Option<u64>> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n.as_u64().map(Some).ok_or_else(|| {
            GatewayError::invalid_argument(key, format!("'{key}' must be a non-negative integer"))
        }),
        Some(_) => Err(GatewayError::invalid_argument(
            key,
            format!("'{key}' must be a non-negative integer"),
        )),
    }
}

pub fn optional_string_array(
    args: &Map<String, Value>,
    key: &str,
) -> GatewayResult<Option<Vec<String>>> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| scalar_to_string(item, key))
            .collect::<GatewayResult<Vec<_>>>()
            .map(Some),
        Some(_) => Err(GatewayError::invalid_argument(
            key,
            format!("'{key}' must be an array"),
        )),
    }
}

pub fn scalar_to_string(value: &Value, field: &str) -> GatewayResult<String> {
    match value {
        Value::String(v) => Ok(v.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        _ => Err(GatewayError::invalid_argument(
            field,
            format!("'{field}' must be a string, number or boolean"),
        )),
    }
}

/// Copies the listed fields that are present (including explicit `null`,
/// which some endpoints use to move items to the root).
pub fn pick_fields(args: &Map<String, Value>, fields: &[&str]) -> Map<String, Value> {
    fields
        .iter()
        .filter_map(|field| args.get(*field).map(|v| (field.to_string(), v.clone())))
        .collect()
}

/// Everything except `excluded`.
pub fn remaining_fields(args: &Map<String, Value>, excluded: &[&str]) -> Map<String, Value> {
    args.iter()
        .filter(|(key, _)| !excluded.contains(&key.as_str()))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn require_present_reports_first_missing_field() {
        let args = map(json!({ "a": 1, "c": "" }));
        let err = require_present(&args, &["a", "b", "c"]).unwrap_err();
        assert_eq!(err, GatewayError::missing_field("b"));
        assert!(require_present(&args, &["a"]).is_ok());
    }

    #[test]
    fn required_id_accepts_numbers_and_numeric_strings() {
        let args = map(json!({ "n": 7, "s": " 12 ", "bad": "x", "f": true }));
        assert_eq!(required_id(&args, "n").unwrap(), 7);
        assert_eq!(required_id(&args, "s").unwrap(), 12);
        assert!(matches!(
            required_id(&args, "bad"),
            Err(GatewayError::InvalidArguments { .. })
        ));
        assert!(required_id(&args, "f").is_err());
        assert_eq!(required_id(&args, "missing").unwrap_err(), GatewayError::missing_field("missing"));
    }

    #[test]
    fn optional_helpers_reject_wrong_types() {
        let args = map(json!({ "flag": "yes", "limit": -1, "models": ["card", 2] }));
        assert!(optional_bool(&args, "flag").is_err());
        assert!(optional_u64(&args, "limit").is_err());
        assert_eq!(
            optional_string_array(&args, "models").unwrap(),
            Some(vec!["card".to_string(), "2".to_string()])
        );
        assert!(arg_bool(&args, "absent", true).unwrap());
    }

    #[test]
    fn field_selection_keeps_explicit_nulls() {
        let args = map(json!({ "id": 1, "name": "x", "parent_id": null }));
        assert_eq!(
            Value::Object(pick_fields(&args, &["name", "parent_id", "color"])),
            json!({ "name": "x", "parent_id": null })
        );
        assert_eq!(
            Value::Object(remaining_fields(&args, &["id"])),
            json!({ "name": "x", "parent_id": null })
        );
    }
}
