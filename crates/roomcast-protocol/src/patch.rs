//! Structural diff/patch over the JSON form of the session document.
//!
//! The sync loop serializes the document, diffs it against the last
//! broadcast snapshot, and ships the resulting op list as a
//! `delta-state-update`. Clients apply the ops to their held snapshot.
//! The contract both sides rely on:
//!
//! ```text
//! apply(diff(S0, S1), S0) == S1
//! ```
//!
//! Ops are the add/replace/remove subset of JSON Patch (RFC 6902), with
//! JSON-Pointer paths, in application order. Objects diff per key; arrays
//! diff per index, with shrinking handled by removes from the tail so
//! earlier indices stay valid while the patch is applied.

use serde_json::{Map, Value};

use crate::ProtocolError;

// ---------------------------------------------------------------------------
// Patch operations
// ---------------------------------------------------------------------------

/// One structural patch operation.
///
/// Serialized in the RFC 6902 shape clients expect:
/// `{"op": "add", "path": "/clients/a1", "value": {...}}`.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum PatchOp {
    Add { path: String, value: Value },
    Replace { path: String, value: Value },
    Remove { path: String },
}

impl PatchOp {
    /// The JSON-Pointer path this op targets.
    pub fn path(&self) -> &str {
        match self {
            Self::Add { path, .. }
            | Self::Replace { path, .. }
            | Self::Remove { path } => path,
        }
    }
}

/// Escapes one path segment per the JSON-Pointer rules
/// (`~` → `~0`, `/` → `~1`).
fn escape_segment(segment: &str) -> String {
    segment.replace('~', "~0").replace('/', "~1")
}

/// Reverses [`escape_segment`].
fn unescape_segment(segment: &str) -> String {
    segment.replace("~1", "/").replace("~0", "~")
}

fn child_path(parent: &str, segment: &str) -> String {
    format!("{parent}/{}", escape_segment(segment))
}

// ---------------------------------------------------------------------------
// Diff
// ---------------------------------------------------------------------------

/// Computes the ordered op list that turns `old` into `new`.
///
/// An empty result means the documents are equal — the sync loop uses that
/// to skip the broadcast entirely.
pub fn diff(old: &Value, new: &Value) -> Vec<PatchOp> {
    let mut ops = Vec::new();
    diff_at("", old, new, &mut ops);
    ops
}

fn diff_at(path: &str, old: &Value, new: &Value, ops: &mut Vec<PatchOp>) {
    match (old, new) {
        (Value::Object(old_map), Value::Object(new_map)) => {
            // Removed keys first (mirrors the order clients were written
            // against), then changed, then added.
            for key in old_map.keys() {
                if !new_map.contains_key(key) {
                    ops.push(PatchOp::Remove {
                        path: child_path(path, key),
                    });
                }
            }
            for (key, old_value) in old_map {
                if let Some(new_value) = new_map.get(key) {
                    diff_at(
                        &child_path(path, key),
                        old_value,
                        new_value,
                        ops,
                    );
                }
            }
            for (key, new_value) in new_map {
                if !old_map.contains_key(key) {
                    ops.push(PatchOp::Add {
                        path: child_path(path, key),
                        value: new_value.clone(),
                    });
                }
            }
        }
        (Value::Array(old_items), Value::Array(new_items)) => {
            let common = old_items.len().min(new_items.len());
            for index in 0..common {
                diff_at(
                    &child_path(path, &index.to_string()),
                    &old_items[index],
                    &new_items[index],
                    ops,
                );
            }
            // Tail removes run highest-index-first so each path is valid
            // at the moment it is applied.
            for index in (new_items.len()..old_items.len()).rev() {
                ops.push(PatchOp::Remove {
                    path: child_path(path, &index.to_string()),
                });
            }
            for index in old_items.len()..new_items.len() {
                ops.push(PatchOp::Add {
                    path: child_path(path, &index.to_string()),
                    value: new_items[index].clone(),
                });
            }
        }
        _ => {
            if old != new {
                ops.push(PatchOp::Replace {
                    path: path.to_string(),
                    value: new.clone(),
                });
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Apply
// ---------------------------------------------------------------------------

/// Applies an op list to a document in place.
///
/// # Errors
/// [`ProtocolError::Patch`] if a path does not resolve or an op is invalid
/// against the current document. The document may be partially patched at
/// that point; callers treat the held snapshot as lost and wait for a full
/// update.
pub fn apply(doc: &mut Value, ops: &[PatchOp]) -> Result<(), ProtocolError> {
    for op in ops {
        apply_one(doc, op)?;
    }
    Ok(())
}

fn apply_one(doc: &mut Value, op: &PatchOp) -> Result<(), ProtocolError> {
    let path = op.path();

    // Whole-document ops have an empty path.
    if path.is_empty() {
        return match op {
            PatchOp::Add { value, .. } | PatchOp::Replace { value, .. } => {
                *doc = value.clone();
                Ok(())
            }
            PatchOp::Remove { .. } => Err(ProtocolError::Patch(
                "cannot remove the document root".into(),
            )),
        };
    }

    let Some(rest) = path.strip_prefix('/') else {
        return Err(ProtocolError::Patch(format!(
            "path {path:?} does not start with '/'"
        )));
    };

    let segments: Vec<String> =
        rest.split('/').map(unescape_segment).collect();
    let (last, parents) =
        segments.split_last().expect("split on non-empty string");

    // Walk down to the parent container.
    let mut target = doc;
    for segment in parents {
        target = match target {
            Value::Object(map) => map.get_mut(segment).ok_or_else(|| {
                ProtocolError::Patch(format!(
                    "path {path:?}: no key {segment:?}"
                ))
            })?,
            Value::Array(items) => {
                let index = parse_index(segment, path)?;
                items.get_mut(index).ok_or_else(|| {
                    ProtocolError::Patch(format!(
                        "path {path:?}: index {index} out of bounds"
                    ))
                })?
            }
            _ => {
                return Err(ProtocolError::Patch(format!(
                    "path {path:?}: {segment:?} is not a container"
                )));
            }
        };
    }

    match target {
        Value::Object(map) => apply_to_object(map, last, op, path),
        Value::Array(items) => apply_to_array(items, last, op, path),
        _ => Err(ProtocolError::Patch(format!(
            "path {path:?}: parent is not a container"
        ))),
    }
}

fn apply_to_object(
    map: &mut Map<String, Value>,
    key: &str,
    op: &PatchOp,
    path: &str,
) -> Result<(), ProtocolError> {
    match op {
        PatchOp::Add { value, .. } => {
            map.insert(key.to_string(), value.clone());
            Ok(())
        }
        PatchOp::Replace { value, .. } => {
            let slot = map.get_mut(key).ok_or_else(|| {
                ProtocolError::Patch(format!(
                    "replace at {path:?}: no key {key:?}"
                ))
            })?;
            *slot = value.clone();
            Ok(())
        }
        PatchOp::Remove { .. } => {
            map.remove(key).ok_or_else(|| {
                ProtocolError::Patch(format!(
                    "remove at {path:?}: no key {key:?}"
                ))
            })?;
            Ok(())
        }
    }
}

fn apply_to_array(
    items: &mut Vec<Value>,
    segment: &str,
    op: &PatchOp,
    path: &str,
) -> Result<(), ProtocolError> {
    let index = parse_index(segment, path)?;
    match op {
        PatchOp::Add { value, .. } => {
            if index > items.len() {
                return Err(ProtocolError::Patch(format!(
                    "add at {path:?}: index {index} past end"
                )));
            }
            items.insert(index, value.clone());
            Ok(())
        }
        PatchOp::Replace { value, .. } => {
            let slot = items.get_mut(index).ok_or_else(|| {
                ProtocolError::Patch(format!(
                    "replace at {path:?}: index {index} out of bounds"
                ))
            })?;
            *slot = value.clone();
            Ok(())
        }
        PatchOp::Remove { .. } => {
            if index >= items.len() {
                return Err(ProtocolError::Patch(format!(
                    "remove at {path:?}: index {index} out of bounds"
                )));
            }
            items.remove(index);
            Ok(())
        }
    }
}

fn parse_index(segment: &str, path: &str) -> Result<usize, ProtocolError> {
    segment.parse().map_err(|_| {
        ProtocolError::Patch(format!(
            "path {path:?}: {segment:?} is not an array index"
        ))
    })
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    /// Asserts the round-trip law for one pair of documents.
    fn assert_round_trip(old: Value, new: Value) {
        let ops = diff(&old, &new);
        let mut patched = old.clone();
        apply(&mut patched, &ops).expect("patch should apply");
        assert_eq!(
            patched, new,
            "apply(diff(old, new), old) != new\nops: {ops:?}"
        );
    }

    // =====================================================================
    // diff
    // =====================================================================

    #[test]
    fn test_diff_equal_documents_is_empty() {
        let doc = json!({"a": 1, "b": {"c": [1, 2, 3]}});
        assert!(diff(&doc, &doc.clone()).is_empty());
    }

    #[test]
    fn test_diff_scalar_change_is_single_replace() {
        let ops = diff(&json!({"ping": 12}), &json!({"ping": 48}));
        assert_eq!(
            ops,
            vec![PatchOp::Replace {
                path: "/ping".into(),
                value: json!(48),
            }]
        );
    }

    #[test]
    fn test_diff_added_key_is_add() {
        let ops = diff(&json!({}), &json!({"hostClientId": "h1"}));
        assert_eq!(
            ops,
            vec![PatchOp::Add {
                path: "/hostClientId".into(),
                value: json!("h1"),
            }]
        );
    }

    #[test]
    fn test_diff_removed_key_is_remove() {
        let ops = diff(&json!({"controllerClientId": "c2"}), &json!({}));
        assert_eq!(
            ops,
            vec![PatchOp::Remove {
                path: "/controllerClientId".into(),
            }]
        );
    }

    #[test]
    fn test_diff_nested_change_has_deep_path() {
        let old = json!({"clients": {"c1": {"pingMillis": 0}}});
        let new = json!({"clients": {"c1": {"pingMillis": 34}}});
        let ops = diff(&old, &new);
        assert_eq!(
            ops,
            vec![PatchOp::Replace {
                path: "/clients/c1/pingMillis".into(),
                value: json!(34),
            }]
        );
    }

    #[test]
    fn test_diff_type_change_is_replace() {
        let ops = diff(&json!({"gameState": null}), &json!({"gameState": {"round": 1}}));
        assert_eq!(
            ops,
            vec![PatchOp::Replace {
                path: "/gameState".into(),
                value: json!({"round": 1}),
            }]
        );
    }

    #[test]
    fn test_diff_array_tail_removes_are_reverse_ordered() {
        let ops = diff(&json!([1, 2, 3, 4]), &json!([1]));
        assert_eq!(
            ops,
            vec![
                PatchOp::Remove { path: "/3".into() },
                PatchOp::Remove { path: "/2".into() },
                PatchOp::Remove { path: "/1".into() },
            ]
        );
    }

    // =====================================================================
    // apply
    // =====================================================================

    #[test]
    fn test_apply_add_to_object() {
        let mut doc = json!({"clients": {}});
        apply(
            &mut doc,
            &[PatchOp::Add {
                path: "/clients/c1".into(),
                value: json!({"displayName": "Ann"}),
            }],
        )
        .unwrap();
        assert_eq!(doc["clients"]["c1"]["displayName"], "Ann");
    }

    #[test]
    fn test_apply_replace_missing_key_is_error() {
        let mut doc = json!({});
        let result = apply(
            &mut doc,
            &[PatchOp::Replace {
                path: "/nope".into(),
                value: json!(1),
            }],
        );
        assert!(matches!(result, Err(ProtocolError::Patch(_))));
    }

    #[test]
    fn test_apply_remove_missing_key_is_error() {
        let mut doc = json!({});
        let result =
            apply(&mut doc, &[PatchOp::Remove { path: "/nope".into() }]);
        assert!(matches!(result, Err(ProtocolError::Patch(_))));
    }

    #[test]
    fn test_apply_remove_root_is_error() {
        let mut doc = json!({"a": 1});
        let result = apply(&mut doc, &[PatchOp::Remove { path: "".into() }]);
        assert!(matches!(result, Err(ProtocolError::Patch(_))));
    }

    #[test]
    fn test_apply_escaped_segments() {
        let mut doc = json!({"a/b": {"c~d": 1}});
        apply(
            &mut doc,
            &[PatchOp::Replace {
                path: "/a~1b/c~0d".into(),
                value: json!(2),
            }],
        )
        .unwrap();
        assert_eq!(doc["a/b"]["c~d"], 2);
    }

    // =====================================================================
    // Round-trip law — the property the sync protocol stands on
    // =====================================================================

    #[test]
    fn test_round_trip_roster_add() {
        assert_round_trip(
            json!({"clients": {}, "createdAt": 100}),
            json!({
                "clients": {"c1": {"displayName": "Ann", "pingMillis": 0}},
                "createdAt": 100,
                "controllerClientId": "c1",
            }),
        );
    }

    #[test]
    fn test_round_trip_roster_remove_and_promote() {
        assert_round_trip(
            json!({
                "clients": {
                    "h1": {"displayName": "Host"},
                    "c1": {"displayName": "Ann"},
                    "c2": {"displayName": "Bob"},
                },
                "hostClientId": "h1",
                "controllerClientId": "c1",
            }),
            json!({
                "clients": {
                    "h1": {"displayName": "Host"},
                    "c2": {"displayName": "Bob"},
                },
                "hostClientId": "h1",
                "controllerClientId": "c2",
            }),
        );
    }

    #[test]
    fn test_round_trip_controller_cleared() {
        assert_round_trip(
            json!({"controllerClientId": "c1", "clients": {}}),
            json!({"clients": {}}),
        );
    }

    #[test]
    fn test_round_trip_nested_game_state() {
        assert_round_trip(
            json!({"gameState": {"round": 1, "scores": [0, 0]}}),
            json!({"gameState": {"round": 2, "scores": [10, 0], "winner": null}}),
        );
    }

    #[test]
    fn test_round_trip_array_growth_and_shrink() {
        assert_round_trip(json!([1, 2]), json!([1, 2, 3, 4]));
        assert_round_trip(json!([1, 2, 3, 4]), json!([9]));
        assert_round_trip(json!([[1], [2, 3]]), json!([[1, 5], []]));
    }

    #[test]
    fn test_round_trip_document_root_type_change() {
        assert_round_trip(json!({"a": 1}), json!([1, 2]));
    }

    #[test]
    fn test_patch_op_wire_shape() {
        let op = PatchOp::Add {
            path: "/clients/c1".into(),
            value: json!({"displayName": "Ann"}),
        };
        let json = serde_json::to_value(&op).unwrap();
        assert_eq!(json["op"], "add");
        assert_eq!(json["path"], "/clients/c1");
        assert_eq!(json["value"]["displayName"], "Ann");

        let remove = PatchOp::Remove { path: "/x".into() };
        let json = serde_json::to_value(&remove).unwrap();
        assert_eq!(json["op"], "remove");
        assert!(json.get("value").is_none());
    }
}
