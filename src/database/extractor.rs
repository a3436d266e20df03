//! Index key extraction from stored records.

use serde_json::Value;

use crate::error::Result;

/// Produces the index keys for one record.
///
/// A record may file under any number of keys, including none.
pub trait KeyExtractor: Send + Sync {
    fn extract(&self, record: &[u8]) -> Result<Vec<Vec<u8>>>;
}

impl<F> KeyExtractor for F
where
    F: Fn(&[u8]) -> Vec<Vec<u8>> + Send + Sync,
{
    fn extract(&self, record: &[u8]) -> Result<Vec<Vec<u8>>> {
        Ok(self(record))
    }
}

/// Keys from a top-level field of a JSON object record.
///
/// Strings index as their UTF-8 bytes, numbers and booleans as their JSON
/// text, arrays as one key per scalar element. Missing fields, nulls and
/// nested objects give no keys.
#[derive(Debug, Clone)]
pub struct JsonFieldExtractor {
    field: String,
}

impl JsonFieldExtractor {
    pub fn new<S: Into<String>>(field: S) -> Self {
        JsonFieldExtractor {
            field: field.into(),
        }
    }

    pub fn field(&self) -> &str {
        &self.field
    }
}

fn scalar_key(value: &Value) -> Option<Vec<u8>> {
    match value {
        Value::String(text) => Some(text.as_bytes().to_vec()),
        Value::Number(number) => Some(number.to_string().into_bytes()),
        Value::Bool(flag) => Some(flag.to_string().into_bytes()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

impl KeyExtractor for JsonFieldExtractor {
    fn extract(&self, record: &[u8]) -> Result<Vec<Vec<u8>>> {
        let value: Value = serde_json::from_slice(record)?;
        let mut keys: Vec<Vec<u8>> = match value.get(&self.field) {
            Some(Value::Array(items)) => items.iter().filter_map(scalar_key).collect(),
            Some(other) => scalar_key(other).into_iter().collect(),
            None => Vec::new(),
        };
        keys.sort_unstable();
        keys.dedup();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_scalars() {
        let extractor = JsonFieldExtractor::new("v");
        assert_eq!(extractor.extract(br#"{"v":"red"}"#).unwrap(), vec![b"red".to_vec()]);
        assert_eq!(extractor.extract(br#"{"v":true}"#).unwrap(), vec![b"true".to_vec()]);
        assert_eq!(extractor.extract(br#"{"v":12}"#).unwrap(), vec![b"12".to_vec()]);
        assert!(extractor.extract(br#"{"v":null}"#).unwrap().is_empty());
        assert!(extractor.extract(br#"{"w":1}"#).unwrap().is_empty());
    }

    #[test]
    fn test_json_arrays_dedup() {
        let extractor = JsonFieldExtractor::new("tags");
        assert_eq!(
            extractor.extract(br#"{"tags":["b","a","b",{"x":1}]}"#).unwrap(),
            vec![b"a".to_vec(), b"b".to_vec()]
        );
    }

    #[test]
    fn test_invalid_json_is_an_error() {
        assert!(JsonFieldExtractor::new("v").extract(b"not json").is_err());
    }

    #[test]
    fn test_closure_extractor() {
        let first_byte =
            |record: &[u8]| -> Vec<Vec<u8>> { record.first().map(|b| vec![*b]).into_iter().collect() };
        assert_eq!(first_byte.extract(b"xyz").unwrap(), vec![b"x".to_vec()]);
    }
}
