//! Manifest files.
//!
//! A [`ManifestFile`] is one workspace path holding an ordered sequence of
//! objects. Objects can be added, replaced and removed individually without
//! disturbing the rest of the file; a file that ends up empty is deleted on
//! dump rather than left behind as a zero-document stub.

use crate::codec::{self, DOCUMENT_SEPARATOR};
use crate::error::Result;
use crate::object::{Identity, Object};
use crate::workspace::Workspace;

/// The objects of one manifest file, in document order.
#[derive(Debug, Clone)]
pub struct ManifestFile {
    path: String,
    objects: Vec<Object>,
}

impl ManifestFile {
    /// An empty file that does not exist in the workspace yet.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            objects: Vec::new(),
        }
    }

    /// Parses every document at `path`. Fails with a decode error when any
    /// document is malformed.
    pub fn load(workspace: &Workspace, path: &str) -> Result<Self> {
        let contents = workspace.read(path)?;
        let text = String::from_utf8_lossy(contents);
        let objects = codec::decode_documents(&text, path)?;
        Ok(Self {
            path: path.to_string(),
            objects,
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn objects(&self) -> &[Object] {
        &self.objects
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Appends an object unless one with the same identity is already
    /// present. Returns whether the object was added.
    pub fn add(&mut self, object: Object) -> bool {
        let identity = object.identity();
        if self.index_of(&identity).is_some() {
            return false;
        }
        self.objects.push(object);
        true
    }

    /// Replaces the object with the same identity in place, preserving its
    /// position; appends when no match exists.
    pub fn upsert(&mut self, object: Object) {
        match self.index_of(&object.identity()) {
            Some(index) => self.objects[index] = object,
            None => self.objects.push(object),
        }
    }

    /// Removes the object with the given identity. Silent when absent;
    /// returns whether anything was removed.
    pub fn remove(&mut self, identity: &Identity) -> bool {
        match self.index_of(identity) {
            Some(index) => {
                self.objects.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn find(&self, identity: &Identity) -> Option<&Object> {
        self.index_of(identity).map(|index| &self.objects[index])
    }

    /// Serializes the sequence, separator between documents only.
    pub fn render(&self) -> Result<Vec<u8>> {
        let mut out = String::new();
        for (index, object) in self.objects.iter().enumerate() {
            if index != 0 {
                out.push_str(DOCUMENT_SEPARATOR);
            }
            out.push_str(&codec::encode_document(object)?);
        }
        Ok(out.into_bytes())
    }

    /// Writes the file back to the workspace. An empty sequence deletes the
    /// file when it exists (parents stay) and no-ops when it does not.
    pub fn dump(&self, workspace: &mut Workspace) -> Result<()> {
        if self.objects.is_empty() {
            if workspace.exists(&self.path) {
                log::debug!("removing empty manifest {}", self.path);
                workspace.remove(&self.path)?;
            }
            return Ok(());
        }
        workspace.write(&self.path, &self.render()?)
    }

    fn index_of(&self, identity: &Identity) -> Option<usize> {
        self.objects
            .iter()
            .position(|object| object.identity().matches(identity))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(kind: &str, namespace: &str, name: &str) -> Object {
        Object::from_value(json!({
            "apiVersion": "v1",
            "kind": kind,
            "metadata": {"name": name, "namespace": namespace},
        }))
        .unwrap()
    }

    #[test]
    fn test_add_dedupes_by_identity() {
        let mut file = ManifestFile::new("hello/all.yaml");
        assert!(file.add(object("ConfigMap", "hello", "a")));
        assert!(file.add(object("ConfigMap", "hello", "b")));
        assert!(!file.add(object("ConfigMap", "hello", "a")));
        assert_eq!(file.objects().len(), 2);
        assert_eq!(file.objects()[0].name(), "a");
    }

    #[test]
    fn test_upsert_replaces_in_place() {
        let mut file = ManifestFile::new("hello/all.yaml");
        file.add(object("ConfigMap", "hello", "a"));
        file.add(object("ConfigMap", "hello", "b"));

        let replacement = Object::from_value(json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {"name": "a", "namespace": "hello", "labels": {"x": "y"}},
        }))
        .unwrap();
        file.upsert(replacement);

        assert_eq!(file.objects().len(), 2);
        assert_eq!(file.objects()[0].name(), "a");
        assert_eq!(file.objects()[0].labels().get("x"), Some(&"y".to_string()));
    }

    #[test]
    fn test_remove_silent_when_absent() {
        let mut file = ManifestFile::new("hello/all.yaml");
        file.add(object("ConfigMap", "hello", "a"));
        assert!(file.remove(&object("ConfigMap", "hello", "a").identity()));
        assert!(!file.remove(&object("ConfigMap", "hello", "a").identity()));
        assert!(file.is_empty());
    }

    #[test]
    fn test_dump_separator_between_documents_only() {
        let mut workspace = Workspace::new();
        let mut file = ManifestFile::new("all.yaml");
        file.add(object("ConfigMap", "hello", "a"));
        file.add(object("ConfigMap", "hello", "b"));
        file.dump(&mut workspace).unwrap();

        let text = String::from_utf8(workspace.read("all.yaml").unwrap().to_vec()).unwrap();
        assert!(!text.starts_with("---"));
        assert_eq!(text.matches("---\n").count(), 1);
    }

    #[test]
    fn test_dump_empty_deletes_file_keeps_parents() {
        let mut workspace = Workspace::new();
        let mut file = ManifestFile::new("hello/ConfigMap/a.yaml");
        file.add(object("ConfigMap", "hello", "a"));
        file.dump(&mut workspace).unwrap();
        assert!(workspace.exists("hello/ConfigMap/a.yaml"));

        file.remove(&object("ConfigMap", "hello", "a").identity());
        file.dump(&mut workspace).unwrap();
        assert!(!workspace.exists("hello/ConfigMap/a.yaml"));
        assert!(workspace.exists("hello/ConfigMap"));
    }

    #[test]
    fn test_dump_empty_noop_when_file_never_existed() {
        let mut workspace = Workspace::new();
        let file = ManifestFile::new("missing.yaml");
        file.dump(&mut workspace).unwrap();
        assert!(!workspace.exists("missing.yaml"));
    }

    #[test]
    fn test_load_dump_cycle_is_byte_stable() {
        let mut workspace = Workspace::new();
        let mut file = ManifestFile::new("all.yaml");
        file.add(object("ConfigMap", "hello", "a"));
        file.add(object("Secret", "hello", "b"));
        file.dump(&mut workspace).unwrap();
        let first = workspace.read("all.yaml").unwrap().to_vec();

        let reloaded = ManifestFile::load(&workspace, "all.yaml").unwrap();
        reloaded.dump(&mut workspace).unwrap();
        let second = workspace.read("all.yaml").unwrap().to_vec();
        assert_eq!(first, second);
    }
}
