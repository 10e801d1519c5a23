use serde_json::Value;

/// Structural payload equality used for duplicate suppression.
///
/// Mapping keys are compared as a set, so field order never matters. Numbers
/// compare by value: `1` and `1.0` are the same sample.
pub fn payload_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            if x == y {
                return true;
            }
            if !x.is_f64() && !y.is_f64() {
                return false;
            }
            match (x.as_f64(), y.as_f64()) {
                (Some(x), Some(y)) => x == y,
                _ => false,
            }
        }
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| payload_eq(x, y))
        }
        (Value::Object(xs), Value::Object(ys)) => {
            xs.len() == ys.len()
                && xs
                    .iter()
                    .all(|(key, x)| ys.get(key).is_some_and(|y| payload_eq(x, y)))
        }
        _ => a == b,
    }
}
