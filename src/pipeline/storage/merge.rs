//! The merge rule for records that share a business key.
//!
//! The first record stored for a key defines the entity's shape: later
//! records only contribute values for fields the entity already has, and
//! fields that only a later record carries are ignored. For a shared field:
//!
//! - an incoming null never changes anything;
//! - a stored null is filled by the first non-null value;
//! - a differing non-null value promotes the stored value to a set of
//!   distinct values and adds the incoming one.
//!
//! A set never turns back into a scalar and only grows, so applying the same
//! record twice is a no-op and the final set of values for a field does not
//! depend on arrival order.

use crate::types::{Record, Value};
use std::collections::BTreeSet;

fn members(value: &Value) -> BTreeSet<Value> {
    match value {
        Value::Set(values) => values.iter().filter(|v| !v.is_null()).cloned().collect(),
        Value::Null => BTreeSet::new(),
        scalar => BTreeSet::from([scalar.clone()]),
    }
}

/// Merges `incoming` into `stored`. Returns whether `stored` changed.
pub fn merge_values(stored: &mut Value, incoming: &Value) -> bool {
    if incoming.is_null() || stored == incoming {
        return false;
    }
    if stored.is_null() {
        *stored = incoming.clone();
        return true;
    }

    let current = members(stored);
    let mut union = current.clone();
    union.extend(members(incoming));
    if union == current {
        return false;
    }
    *stored = Value::Set(union);
    true
}

/// Merges every field `stored` already has. Returns whether anything changed.
pub fn merge_records(stored: &mut Record, incoming: &Record) -> bool {
    let mut changed = false;
    for (field, value) in stored.iter_mut() {
        if let Some(incoming_value) = incoming.get(field) {
            changed |= merge_values(value, incoming_value);
        }
    }
    changed
}
