//! Structural diff and filtered patching.
//!
//! Differences between the two projections of an object are expressed as an
//! RFC 6902 patch. Rule filters restrict which operations round-trip: a
//! filter is a JSON-pointer prefix, and an operation survives when its path
//! equals the filter or sits lexically underneath it.

use json_patch::{Patch, PatchOperation};
use serde_json::Value;

use crate::error::{Result, SyncError};
use crate::object::Object;

/// Computes the patch transforming `original` into `current`.
pub fn diff(original: &Value, current: &Value) -> Patch {
    json_patch::diff(original, current)
}

/// The target path of an operation.
pub fn operation_path(operation: &PatchOperation) -> &str {
    match operation {
        PatchOperation::Add(op) => &op.path,
        PatchOperation::Remove(op) => &op.path,
        PatchOperation::Replace(op) => &op.path,
        PatchOperation::Move(op) => &op.path,
        PatchOperation::Copy(op) => &op.path,
        PatchOperation::Test(op) => &op.path,
    }
}

/// Whether `path` equals `filter` or lies underneath it, treating `/` as
/// the separator. `/metadata` covers `/metadata/labels/foo` but not
/// `/metadata2`.
pub fn path_within(filter: &str, path: &str) -> bool {
    path == filter
        || path
            .strip_prefix(filter)
            .is_some_and(|rest| rest.starts_with('/'))
}

/// Whether the operation survives the filter list. An empty list keeps
/// everything.
pub fn operation_matches(operation: &PatchOperation, filters: &[String]) -> bool {
    filters.is_empty()
        || filters
            .iter()
            .any(|filter| path_within(filter, operation_path(operation)))
}

/// Keeps only operations whose path falls under some filter.
pub fn filtered(patch: &Patch, filters: &[String]) -> Patch {
    Patch(
        patch
            .0
            .iter()
            .filter(|op| operation_matches(op, filters))
            .cloned()
            .collect(),
    )
}

/// Whether any operation of `patch` survives the filter list.
pub fn any_operation_matches(patch: &Patch, filters: &[String]) -> bool {
    patch.0.iter().any(|op| operation_matches(op, filters))
}

/// Applies the filtered diff between `original` and `current` to
/// `original`, restoring the original's resourceVersion afterwards so the
/// result can be written back to the side it came from. With an empty
/// filtered patch the result equals `original`.
pub fn patch_object(original: &Object, current: &Object, filters: &[String]) -> Result<Object> {
    let full = diff(original.value(), current.value());
    let kept = filtered(&full, filters);

    let mut value = original.value().clone();
    json_patch::patch(&mut value, &kept.0).map_err(|e| SyncError::Patch(e.to_string()))?;

    let mut patched = Object::from_value(value)?;
    patched.set_resource_version(original.resource_version());
    Ok(patched)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(value: Value) -> Object {
        Object::from_value(value).unwrap()
    }

    #[test]
    fn test_path_within() {
        assert!(path_within("/metadata", "/metadata"));
        assert!(path_within("/metadata", "/metadata/labels/foo"));
        assert!(!path_within("/metadata", "/metadata2"));
        assert!(!path_within("/spec", "/metadata/labels"));
    }

    #[test]
    fn test_diff_empty_for_equal_values() {
        let value = json!({"a": 1, "b": {"c": 2}});
        assert!(diff(&value, &value).0.is_empty());
    }

    #[test]
    fn test_filtered_keeps_matching_operations() {
        let original = json!({"metadata": {"labels": {"a": "1"}}, "spec": {"x": 1}});
        let current = json!({"metadata": {"labels": {"a": "2"}}, "spec": {"x": 2}});
        let full = diff(&original, &current);
        assert_eq!(full.0.len(), 2);

        let kept = filtered(&full, &["/metadata/labels".to_string()]);
        assert_eq!(kept.0.len(), 1);
        assert_eq!(operation_path(&kept.0[0]), "/metadata/labels/a");

        let all = filtered(&full, &[]);
        assert_eq!(all.0.len(), 2);
    }

    #[test]
    fn test_patch_object_applies_only_filtered_changes() {
        let original = object(json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {"name": "cm", "annotations": {"an": "annotation"}},
        }));
        let current = object(json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {"name": "cm", "labels": {"a": "label"}},
        }));

        let patched =
            patch_object(&original, &current, &["/metadata/labels".to_string()]).unwrap();

        // The label change is applied, the annotation removal is not.
        assert_eq!(patched.labels().get("a"), Some(&"label".to_string()));
        assert_eq!(
            patched.annotations().get("an"),
            Some(&"annotation".to_string())
        );
    }

    #[test]
    fn test_patch_object_restores_original_resource_version() {
        let original = object(json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {"name": "cm", "resourceVersion": "7"},
            "data": {"k": "old"},
        }));
        let current = object(json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {"name": "cm"},
            "data": {"k": "new"},
        }));

        let patched = patch_object(&original, &current, &[]).unwrap();
        assert_eq!(patched.resource_version(), Some("7".to_string()));
        assert_eq!(
            patched.value().pointer("/data/k"),
            Some(&Value::String("new".to_string()))
        );
    }

    #[test]
    fn test_empty_filtered_patch_is_noop() {
        let original = object(json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {"name": "cm"},
            "data": {"k": "old"},
        }));
        let current = object(json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {"name": "cm"},
            "data": {"k": "new"},
        }));

        let patched =
            patch_object(&original, &current, &["/metadata/labels".to_string()]).unwrap();
        assert_eq!(patched, original);
    }
}
