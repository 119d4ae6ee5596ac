//! Manifest codec.
//!
//! Decodes multi-document YAML (JSON documents are accepted on input) into
//! [`Object`]s and encodes objects back to canonical YAML. Server-populated
//! metadata never survives encoding, so manifests written to the repository
//! stay free of cluster-local noise.

use serde::Deserialize;
use serde_json::Value;

use crate::error::{Result, SyncError};
use crate::object::Object;

/// Written between documents, never before the first one.
pub const DOCUMENT_SEPARATOR: &str = "---\n";

/// Metadata fields the API server owns. Cleared on every encode.
const SERVER_FIELDS: [&str; 5] = [
    "resourceVersion",
    "uid",
    "selfLink",
    "generation",
    "creationTimestamp",
];

const LAST_APPLIED_ANNOTATION: &str = "kubectl.kubernetes.io/last-applied-configuration";

/// Parses every document of a multi-document manifest stream.
///
/// Empty and null documents are skipped. A malformed document fails the
/// whole load with a [`SyncError::Decode`] naming `path`.
pub fn decode_documents(text: &str, path: &str) -> Result<Vec<Object>> {
    let mut objects = Vec::new();

    for document in serde_yaml::Deserializer::from_str(text) {
        let value = Value::deserialize(document).map_err(|e| SyncError::Decode {
            path: path.to_string(),
            message: e.to_string(),
        })?;

        if value.is_null() {
            continue;
        }

        let object = Object::from_value(value).map_err(|e| match e {
            SyncError::Decode { message, .. } => SyncError::Decode {
                path: path.to_string(),
                message,
            },
            other => other,
        })?;
        objects.push(object);
    }

    Ok(objects)
}

/// Serializes one object to a YAML document, stripping server-populated
/// metadata first. The output ends with a newline and carries no leading
/// document separator.
pub fn encode_document(object: &Object) -> Result<String> {
    let mut clean = object.clone();
    strip_server_metadata(&mut clean);
    let text = serde_yaml::to_string(clean.value())?;
    Ok(text)
}

/// Removes resourceVersion, uid, selfLink, generation, creationTimestamp,
/// the whole `status` subtree and the kubectl last-applied annotation.
pub fn strip_server_metadata(object: &mut Object) {
    let Some(root) = object.value_mut().as_object_mut() else {
        return;
    };

    root.remove("status");

    if let Some(metadata) = root.get_mut("metadata").and_then(Value::as_object_mut) {
        for field in SERVER_FIELDS {
            metadata.remove(field);
        }
        let annotations_empty = match metadata
            .get_mut("annotations")
            .and_then(Value::as_object_mut)
        {
            Some(annotations) => {
                annotations.remove(LAST_APPLIED_ANNOTATION);
                annotations.is_empty()
            }
            None => false,
        };
        if annotations_empty {
            metadata.remove("annotations");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn manifest() -> &'static str {
        r#"apiVersion: extensions/v1beta1
kind: Deployment
metadata:
  name: test
  namespace: hello
---
apiVersion: v1
kind: ConfigMap
metadata:
  name: settings
  namespace: hello
data:
  key: value
"#
    }

    #[test]
    fn test_decode_multi_document() {
        let objects = decode_documents(manifest(), "hello/all.yaml").unwrap();
        assert_eq!(objects.len(), 2);
        assert_eq!(objects[0].kind(), "Deployment");
        assert_eq!(objects[1].kind(), "ConfigMap");
        assert_eq!(objects[1].name(), "settings");
    }

    #[test]
    fn test_decode_accepts_json() {
        let text = r#"{"apiVersion": "v1", "kind": "ConfigMap", "metadata": {"name": "cm"}}"#;
        let objects = decode_documents(text, "cm.json").unwrap();
        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0].kind(), "ConfigMap");
    }

    #[test]
    fn test_decode_skips_empty_documents() {
        let text = "---\n# comment only\n---\napiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: cm\n";
        let objects = decode_documents(text, "cm.yaml").unwrap();
        assert_eq!(objects.len(), 1);
    }

    #[test]
    fn test_decode_error_carries_path() {
        let err = decode_documents("kind: [unclosed", "bad.yaml").unwrap_err();
        match err {
            SyncError::Decode { path, .. } => assert_eq!(path, "bad.yaml"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_encode_strips_server_fields() {
        let object = Object::from_value(json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {
                "name": "cm",
                "namespace": "hello",
                "resourceVersion": "42",
                "uid": "abc-123",
                "selfLink": "/api/v1/namespaces/hello/configmaps/cm",
                "generation": 7,
                "creationTimestamp": "2024-01-01T00:00:00Z",
                "annotations": {
                    "kubectl.kubernetes.io/last-applied-configuration": "{}",
                    "keep": "me",
                },
            },
            "data": {"key": "value"},
            "status": {"phase": "Active"},
        }))
        .unwrap();

        let text = encode_document(&object).unwrap();
        assert!(!text.contains("resourceVersion"));
        assert!(!text.contains("uid"));
        assert!(!text.contains("selfLink"));
        assert!(!text.contains("generation"));
        assert!(!text.contains("creationTimestamp"));
        assert!(!text.contains("status"));
        assert!(!text.contains("last-applied-configuration"));
        assert!(text.contains("keep: me"));
    }

    #[test]
    fn test_encode_drops_emptied_annotations() {
        let object = Object::from_value(json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {
                "name": "cm",
                "annotations": {
                    "kubectl.kubernetes.io/last-applied-configuration": "{}",
                },
            },
        }))
        .unwrap();

        let text = encode_document(&object).unwrap();
        assert!(!text.contains("annotations"));
    }

    #[test]
    fn test_round_trip_is_stable() {
        let objects = decode_documents(manifest(), "all.yaml").unwrap();
        let first = encode_document(&objects[0]).unwrap();
        let reparsed = decode_documents(&first, "all.yaml").unwrap();
        let second = encode_document(&reparsed[0]).unwrap();
        assert_eq!(first, second);
    }
}
