use serde_json::{Map, Value};

/// Parameter map handed to a node.
pub type Params = Map<String, Value>;

/// Convenience accessors over dynamic JSON values
pub trait ValueExt {
    /// Render for places that need plain text (headers, action labels).
    /// Strings come out unquoted, everything else as compact JSON.
    fn to_display_string(&self) -> String;

    /// Walk a dotted path (`a.b.0.c`) through objects and arrays.
    fn lookup_path(&self, path: &[&str]) -> Option<&Value>;
}

impl ValueExt for Value {
    fn to_display_string(&self) -> String {
        match self {
            Value::String(s) => s.clone(),
            Value::Null => String::new(),
            other => other.to_string(),
        }
    }

    fn lookup_path(&self, path: &[&str]) -> Option<&Value> {
        path.iter().try_fold(self, |current, segment| match current {
            Value::Object(map) => map.get(*segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        })
    }
}

/// Read a string parameter, treating other types as absent.
pub fn param_str<'a>(params: &'a Params, name: &str) -> Option<&'a str> {
    params.get(name).and_then(Value::as_str)
}

/// Read a required string parameter.
pub fn require_str<'a>(params: &'a Params, name: &str) -> Result<&'a str, crate::NodeError> {
    param_str(params, name)
        .ok_or_else(|| crate::NodeError::configuration(format!("{} parameter is required", name)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn display_string_unquotes_strings() {
        assert_eq!(json!("go").to_display_string(), "go");
        assert_eq!(json!(42).to_display_string(), "42");
        assert_eq!(json!({"a": 1}).to_display_string(), r#"{"a":1}"#);
    }

    #[test]
    fn lookup_walks_objects_and_arrays() {
        let v = json!({"items": [{"id": "x"}, {"id": "y"}]});
        assert_eq!(v.lookup_path(&["items", "1", "id"]), Some(&json!("y")));
        assert_eq!(v.lookup_path(&["items", "7"]), None);
        assert_eq!(v.lookup_path(&["missing"]), None);
    }
}
