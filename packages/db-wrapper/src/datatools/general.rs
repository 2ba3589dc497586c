use serde_json::Value;

/// Walk `path` through nested objects (by key) and arrays (by numeric index).
///
/// Returns `None` as soon as a segment is missing, out of range, or the
/// current value is a scalar.
pub fn get_in<'a, S: AsRef<str>>(root: &'a Value, path: &[S]) -> Option<&'a Value> {
    path.iter().try_fold(root, |current, key| {
        let key = key.as_ref();
        match current {
            Value::Object(map) => map.get(key),
            Value::Array(items) => key.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        }
    })
}
