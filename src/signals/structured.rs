use serde_json::Value;

const IMAGE_KEYS: &[&str] = &["image", "thumbnail", "url"];

/// Parse one linked-data block and collect every string stored under an
/// image-like key, at any depth, in document order.
pub fn image_urls(block: &str) -> Result<Vec<String>, serde_json::Error> {
    let value: Value = serde_json::from_str(block)?;
    let mut out = Vec::new();
    walk(&value, &mut out);
    Ok(out)
}

fn walk(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::Array(items) => items.iter().for_each(|v| walk(v, out)),
        Value::Object(map) => {
            for (key, v) in map {
                match v {
                    Value::String(s) if IMAGE_KEYS.contains(&key.as_str()) => out.push(s.clone()),
                    Value::Array(_) | Value::Object(_) => walk(v, out),
                    _ => {}
                }
            }
        }
        _ => {}
    }
}
