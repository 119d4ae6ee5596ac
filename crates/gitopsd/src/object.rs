//! Dynamic object model.
//!
//! The reconciler manipulates resource schemas it does not know at compile
//! time, so an [`Object`] is an untyped `serde_json::Value` tree with typed
//! accessors for the handful of fields the sync logic cares about: the
//! identity and the standard metadata map.

use std::collections::BTreeMap;
use std::fmt;

use serde_json::Value;

use crate::error::{Result, SyncError};

/// Addresses one object across both backing stores.
///
/// Matching between the repository and the cluster ignores `version` and
/// compares kinds case-insensitively; the API server reports a preferred
/// version while a manifest may pin an older one, and both still name the
/// same object.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identity {
    pub group: String,
    pub version: String,
    pub kind: String,
    /// Empty for cluster-scoped kinds.
    pub namespace: String,
    pub name: String,
}

impl Identity {
    pub fn new(
        group: impl Into<String>,
        version: impl Into<String>,
        kind: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            group: group.into(),
            version: version.into(),
            kind: kind.into(),
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Whether two identities address the same object.
    pub fn matches(&self, other: &Identity) -> bool {
        self.kind.eq_ignore_ascii_case(&other.kind)
            && self.group == other.group
            && self.namespace == other.namespace
            && self.name == other.name
    }

    /// The `group/version` string used in manifests. Core-group objects
    /// carry the bare version.
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.kind, self.namespace, self.name)
    }
}

/// An untyped manifest value.
#[derive(Debug, Clone, PartialEq)]
pub struct Object {
    value: Value,
}

impl Object {
    /// Wraps a decoded document. The value must be a mapping with a
    /// non-empty `kind`; anything else is not an object manifest.
    pub fn from_value(value: Value) -> Result<Self> {
        if !value.is_object() {
            return Err(SyncError::Decode {
                path: String::new(),
                message: "document is not a mapping".to_string(),
            });
        }
        let object = Self { value };
        if object.kind().is_empty() {
            return Err(SyncError::Decode {
                path: String::new(),
                message: "document has no kind".to_string(),
            });
        }
        Ok(object)
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub(crate) fn value_mut(&mut self) -> &mut Value {
        &mut self.value
    }

    pub fn into_value(self) -> Value {
        self.value
    }

    pub fn api_version(&self) -> &str {
        self.str_at(&["apiVersion"])
    }

    /// API group half of `apiVersion`; empty for the core group.
    pub fn group(&self) -> &str {
        match self.api_version().split_once('/') {
            Some((group, _)) => group,
            None => "",
        }
    }

    pub fn version(&self) -> &str {
        match self.api_version().split_once('/') {
            Some((_, version)) => version,
            None => self.api_version(),
        }
    }

    pub fn kind(&self) -> &str {
        self.str_at(&["kind"])
    }

    pub fn name(&self) -> &str {
        self.str_at(&["metadata", "name"])
    }

    pub fn namespace(&self) -> &str {
        self.str_at(&["metadata", "namespace"])
    }

    pub fn identity(&self) -> Identity {
        Identity::new(
            self.group(),
            self.version(),
            self.kind(),
            self.namespace(),
            self.name(),
        )
    }

    pub fn labels(&self) -> BTreeMap<String, String> {
        self.string_map(&["metadata", "labels"])
    }

    pub fn annotations(&self) -> BTreeMap<String, String> {
        self.string_map(&["metadata", "annotations"])
    }

    pub fn resource_version(&self) -> Option<String> {
        match self.str_at(&["metadata", "resourceVersion"]) {
            "" => None,
            version => Some(version.to_string()),
        }
    }

    /// Overwrites `metadata.resourceVersion`; `None` removes the field.
    pub fn set_resource_version(&mut self, version: Option<String>) {
        let Some(metadata) = self
            .value
            .get_mut("metadata")
            .and_then(Value::as_object_mut)
        else {
            return;
        };
        match version {
            Some(version) => {
                metadata.insert("resourceVersion".to_string(), Value::String(version));
            }
            None => {
                metadata.remove("resourceVersion");
            }
        }
    }

    fn str_at(&self, path: &[&str]) -> &str {
        let mut current = &self.value;
        for segment in path {
            match current.get(segment) {
                Some(next) => current = next,
                None => return "",
            }
        }
        current.as_str().unwrap_or("")
    }

    fn string_map(&self, path: &[&str]) -> BTreeMap<String, String> {
        let mut current = &self.value;
        for segment in path {
            match current.get(segment) {
                Some(next) => current = next,
                None => return BTreeMap::new(),
            }
        }
        match current.as_object() {
            Some(map) => map
                .iter()
                .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                .collect(),
            None => BTreeMap::new(),
        }
    }
}
