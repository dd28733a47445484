use serde_json::Value;

/// Combines the stored value with an incoming one under the merge strategy.
pub trait ValueMerger: Send + Sync {
    fn merge(&self, current: &Value, incoming: &Value) -> Value;
}

impl<F> ValueMerger for F
where
    F: Fn(&Value, &Value) -> Value + Send + Sync,
{
    fn merge(&self, current: &Value, incoming: &Value) -> Value {
        self(current, incoming)
    }
}

/// Default combinator, see [`merge_json`].
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonMerger;

impl ValueMerger for JsonMerger {
    fn merge(&self, current: &Value, incoming: &Value) -> Value {
        merge_json(current, incoming)
    }
}

/// Objects merge shallowly with incoming keys winning; arrays concatenate;
/// anything else is replaced by `incoming`.
pub fn merge_json(current: &Value, incoming: &Value) -> Value {
    match (current, incoming) {
        (Value::Object(old), Value::Object(new)) => {
            let mut merged = old.clone();
            for (key, value) in new {
                merged.insert(key.clone(), value.clone());
            }
            Value::Object(merged)
        }
        (Value::Array(old), Value::Array(new)) => {
            let mut merged = old.clone();
            merged.extend(new.iter().cloned());
            Value::Array(merged)
        }
        _ => incoming.clone(),
    }
}
