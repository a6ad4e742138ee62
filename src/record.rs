//! Record helpers: parameter normalisation and response inspection.
//!
//! Requests and responses are `serde_json` values. A record is an ordered
//! JSON object; leaf XML text is a string, repeated elements are arrays,
//! attributes are keys prefixed with `@` and mixed text content lives
//! under `$value`.

use crate::error::TransportError;
use serde::Serialize;
use serde_json::{Map, Value};

/// Ordered field name → value mapping.
pub type Record = Map<String, Value>;

/// Key holding the text content of an element that also has attributes.
pub const TEXT_KEY: &str = "$value";

/// Key used when a bare scalar has to be presented as a record.
pub const VALUE_KEY: &str = "_value_1";

/// Convert a response value into a plain record.
///
/// Null becomes an empty record; a non-object value is placed under
/// [`VALUE_KEY`], arrays are keyed by index.
pub fn to_record(value: &Value) -> Record {
    match value {
        Value::Null => Record::new(),
        Value::Object(map) => map.clone(),
        Value::Array(items) => items
            .iter()
            .enumerate()
            .map(|(i, item)| (i.to_string(), item.clone()))
            .collect(),
        other => {
            let mut record = Record::new();
            record.insert(VALUE_KEY.to_string(), other.clone());
            record
        }
    }
}

/// Shape call parameters into the record sent on the wire.
///
/// `params` may be a serde struct, a JSON map, `()` or `None`. A bare scalar
/// is accepted only when the operation declares exactly one input field, and
/// is wrapped under that field. Null-valued fields are dropped so that a
/// zero-valued record with a few fields set matches the equivalent sparse
/// mapping.
pub fn normalize_params<P: Serialize>(
    params: P,
    input_fields: Option<&[String]>,
) -> Result<Record, TransportError> {
    let value = serde_json::to_value(params)
        .map_err(|e| TransportError::InvalidParameters(e.to_string()))?;

    match strip_nulls(value) {
        Value::Null => Ok(Record::new()),
        Value::Object(map) => Ok(map),
        scalar => match input_fields {
            Some([field]) => {
                let mut record = Record::new();
                record.insert(field.clone(), scalar);
                Ok(record)
            }
            _ => Err(TransportError::InvalidParameters(format!(
                "expected a record, got {}",
                type_name(&scalar)
            ))),
        },
    }
}

/// Remove null members from objects and arrays, recursively.
pub fn strip_nulls(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k, strip_nulls(v)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .filter(|v| !v.is_null())
                .map(strip_nulls)
                .collect(),
        ),
        other => other,
    }
}

/// Follow a path of field names. Matching ignores ASCII case.
pub fn get_path<'a>(value: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter().try_fold(value, |current, key| field(current, key))
}

/// Look up one field, exact match first, then ignoring ASCII case.
pub fn field<'a>(value: &'a Value, key: &str) -> Option<&'a Value> {
    let map = value.as_object()?;
    map.get(key).or_else(|| {
        map.iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v)
    })
}

/// Text content of a leaf, including elements that carry attributes.
pub fn text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Object(map) => map
            .get(TEXT_KEY)
            .or_else(|| map.get(VALUE_KEY))
            .and_then(text),
        _ => None,
    }
}

/// Elements of a field that may repeat.
///
/// Responses decode a repeated element to an array and a single occurrence
/// to the bare value, so list-typed results should be read through this.
pub fn items(value: &Value) -> Vec<&Value> {
    match value {
        Value::Null => Vec::new(),
        Value::Array(values) => values.iter().collect(),
        other => vec![other],
    }
}

/// Integer value of a leaf, accepting numeric strings.
pub fn integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        other => text(other)?.parse().ok(),
    }
}

fn type_name(value: &Value) -> &'static str {
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

    #[derive(Serialize)]
    #[serde(rename_all = "PascalCase")]
    struct SetHostname {
        name: String,
        from_dhcp: Option<bool>,
    }

    #[test]
    fn test_to_record_null_is_empty() {
        assert!(to_record(&Value::Null).is_empty());
    }

    #[test]
    fn test_to_record_preserves_order() {
        let value = json!({"Zeta": "1", "Alpha": "2", "Mid": {"X": "3"}});
        let keys: Vec<_> = to_record(&value).keys().cloned().collect();
        assert_eq!(keys, vec!["Zeta", "Alpha", "Mid"]);
    }

    #[test]
    fn test_to_record_scalar() {
        let record = to_record(&json!("camera-1"));
        assert_eq!(record.get(VALUE_KEY), Some(&json!("camera-1")));
    }

    #[test]
    fn test_normalize_empty_params() {
        assert!(normalize_params((), None).unwrap().is_empty());
        assert!(normalize_params(None::<Record>, None).unwrap().is_empty());
        assert!(normalize_params(json!({}), None).unwrap().is_empty());
    }

    #[test]
    fn test_normalize_struct_matches_mapping() {
        let from_struct = normalize_params(
            SetHostname {
                name: "x".to_string(),
                from_dhcp: None,
            },
            None,
        )
        .unwrap();
        let from_map = normalize_params(json!({"Name": "x"}), None).unwrap();
        assert_eq!(from_struct, from_map);
    }

    #[test]
    fn test_normalize_scalar_wrapped_for_single_field() {
        let fields = vec!["Category".to_string()];
        let record = normalize_params("All", Some(fields.as_slice())).unwrap();
        assert_eq!(record.get("Category"), Some(&json!("All")));
    }

    #[test]
    fn test_normalize_scalar_rejected_otherwise() {
        let fields = vec!["A".to_string(), "B".to_string()];
        let err = normalize_params(42, Some(fields.as_slice())).unwrap_err();
        assert!(matches!(err, TransportError::InvalidParameters(_)));
        assert!(normalize_params(true, None).is_err());
    }

    #[test]
    fn test_strip_nulls_nested() {
        let value = json!({"A": null, "B": {"C": null, "D": "1"}, "E": [null, "2"]});
        assert_eq!(strip_nulls(value), json!({"B": {"D": "1"}, "E": ["2"]}));
    }

    #[test]
    fn test_get_path_and_text() {
        let value = json!({
            "SubscriptionReference": {
                "Address": {"@xmlns": "http://www.w3.org/2005/08/addressing", "$value": " http://cam/pull "}
            }
        });
        let address = get_path(&value, &["SubscriptionReference", "Address"]).unwrap();
        assert_eq!(text(address).as_deref(), Some("http://cam/pull"));
        assert!(get_path(&value, &["subscriptionreference", "address"]).is_some());
        assert!(get_path(&value, &["Missing"]).is_none());
    }

    #[test]
    fn test_integer_accepts_strings() {
        assert_eq!(integer(&json!("2024")), Some(2024));
        assert_eq!(integer(&json!(7)), Some(7));
        assert_eq!(integer(&json!("x")), None);
    }

    #[test]
    fn test_items_of_single_and_repeated_fields() {
        assert!(items(&Value::Null).is_empty());
        assert_eq!(items(&json!({"token": "p0"})), vec![&json!({"token": "p0"})]);
        assert_eq!(items(&json!(["a", "b"])).len(), 2);
    }
}
