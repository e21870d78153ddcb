//! Structural leak scanning for payloads leaving the kernel.
//!
//! Anything bound for a log, certificate export or network message is pushed
//! through [`assert_no_leaks_in`] first. The authority's `Serialize` impl fails
//! with a message carrying [`LEAK_SENTINEL`], so embedding it anywhere in a
//! payload turns serialization into a detectable leak.

use serde::Serialize;
use serde_json::Value;

/// Marker carried by every authority serialization failure.
pub const LEAK_SENTINEL: &str = "__actuation_authority__";

/// Raised when the actuation authority (or its secret) is about to escape.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("actuation authority leak at {path}: {detail}")]
pub struct ActuationAuthorityLeakError {
    /// JSON path of the offending value (`$` for the root).
    pub path: String,
    /// What was found.
    pub detail: String,
}

/// Fail if `obj` embeds the actuation authority anywhere in its structure.
///
/// # Errors
///
/// Returns [`ActuationAuthorityLeakError`] when the authority is embedded or
/// the payload cannot be inspected.
pub fn assert_no_leaks_in<T: Serialize + ?Sized>(obj: &T) -> Result<(), ActuationAuthorityLeakError> {
    let value = to_scannable(obj)?;
    scan_value(&value, |s| s.contains(LEAK_SENTINEL), "authority marker")
}

/// Serialize into a JSON tree, mapping authority serialization to a leak.
pub(crate) fn to_scannable<T: Serialize + ?Sized>(
    obj: &T,
) -> Result<Value, ActuationAuthorityLeakError> {
    serde_json::to_value(obj).map_err(|e| {
        let text = e.to_string();
        let detail = if text.contains(LEAK_SENTINEL) {
            "actuation authority embedded in payload".to_owned()
        } else {
            format!("payload cannot be inspected: {text}")
        };
        ActuationAuthorityLeakError {
            path: "$".to_owned(),
            detail,
        }
    })
}

/// Walk `value`, failing on the first key or string matching `hit`.
pub(crate) fn scan_value(
    value: &Value,
    hit: impl Fn(&str) -> bool,
    what: &str,
) -> Result<(), ActuationAuthorityLeakError> {
    let mut stack: Vec<(String, &Value)> = vec![("$".to_owned(), value)];
    while let Some((path, node)) = stack.pop() {
        match node {
            Value::String(s) if hit(s) => {
                return Err(ActuationAuthorityLeakError {
                    path,
                    detail: format!("{what} found in string value"),
                });
            }
            Value::Array(items) => {
                for (i, item) in items.iter().enumerate().rev() {
                    stack.push((format!("{path}[{i}]"), item));
                }
            }
            Value::Object(map) => {
                for (key, item) in map.iter().rev() {
                    let child = format!("{path}.{key}");
                    if hit(key) {
                        return Err(ActuationAuthorityLeakError {
                            path: child,
                            detail: format!("{what} found in object key"),
                        });
                    }
                    stack.push((child, item));
                }
            }
            _ => {}
        }
    }
    Ok(())
}
