//! Dotted-path lookup over nested JSON maps.
//!
//! `"M1.conf"` looks up `M1` in the top-level map, then `conf` inside it.
//! A missing segment, or a segment applied to something that is not an
//! object, resolves to `None`. `null` also resolves to `None`: absent and
//! null are indistinguishable to the assembler and validator.

use serde_json::{Map, Value};

/// Resolve a dotted path against a map.
pub fn resolve<'a>(root: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let first = segments.next()?;
    let mut current = root.get(first)?;

    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }

    if current.is_null() {
        None
    } else {
        Some(current)
    }
}
