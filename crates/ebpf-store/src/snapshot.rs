//! Deterministic dumps of everything under the Store root.
//!
//! A [`StoreSnapshot`] is an ordered tree of keys and values. Two stores
//! hold the same observable state exactly when their snapshots compare
//! equal, which is also when their [`fingerprint`](StoreSnapshot::fingerprint)s
//! match.
//!
//! # Determinism
//!
//! Children and values are kept in `BTreeMap`s, so iteration order depends
//! on names only. The fingerprint hashes a length-prefixed walk of that
//! order and never depends on the hive backend or the root path.

use std::collections::BTreeMap;
use std::fmt::Write;

use serde::Serialize;

use crate::context::{ExecutionContext, RegistryKey};
use crate::error::StoreError;
use crate::hive::{join_path, KEY_SEPARATOR};
use crate::store::Store;

/// One key of a snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SnapshotNode {
    pub values: BTreeMap<String, Vec<u8>>,
    pub children: BTreeMap<String, SnapshotNode>,
}

/// The keys and values below the Store root at one point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreSnapshot {
    pub root_path: String,
    pub root: SnapshotNode,
}

impl StoreSnapshot {
    /// blake3 hash of the tree below the root.
    pub fn fingerprint(&self) -> blake3::Hash {
        let mut hasher = blake3::Hasher::new();
        hash_node(&mut hasher, &self.root);
        hasher.finalize()
    }

    /// Number of keys below the root.
    pub fn key_count(&self) -> usize {
        fn count(node: &SnapshotNode) -> usize {
            node.children.values().map(|child| 1 + count(child)).sum()
        }
        count(&self.root)
    }

    /// Paths of all keys below the root, relative to it, depth first.
    pub fn key_paths(&self) -> Vec<String> {
        fn walk(node: &SnapshotNode, prefix: &str, out: &mut Vec<String>) {
            for (name, child) in &node.children {
                let path = join_path(prefix, name);
                out.push(path.clone());
                walk(child, &path, out);
            }
        }
        let mut out = Vec::new();
        walk(&self.root, "", &mut out);
        out
    }

    /// Looks up a value by key path relative to the root.
    pub fn value(&self, path: &str, name: &str) -> Option<&[u8]> {
        let mut node = &self.root;
        if !path.is_empty() {
            for segment in path.split(KEY_SEPARATOR) {
                node = node.children.get(segment)?;
            }
        }
        node.values.get(name).map(Vec::as_slice)
    }

    /// Indented listing of keys with value sizes.
    pub fn render_tree(&self) -> String {
        fn render(node: &SnapshotNode, depth: usize, out: &mut String) {
            let indent = "  ".repeat(depth);
            for (name, data) in &node.values {
                let _ = writeln!(out, "{indent}{name} ({} bytes)", data.len());
            }
            for (name, child) in &node.children {
                let _ = writeln!(out, "{indent}{name}/");
                render(child, depth + 1, out);
            }
        }
        let mut out = format!("{}/\n", self.root_path);
        render(&self.root, 1, &mut out);
        out
    }
}

fn hash_node(hasher: &mut blake3::Hasher, node: &SnapshotNode) {
    hasher.update(&(node.values.len() as u64).to_le_bytes());
    for (name, data) in &node.values {
        hash_bytes(hasher, name.as_bytes());
        hash_bytes(hasher, data);
    }
    hasher.update(&(node.children.len() as u64).to_le_bytes());
    for (name, child) in &node.children {
        hash_bytes(hasher, name.as_bytes());
        hash_node(hasher, child);
    }
}

fn hash_bytes(hasher: &mut blake3::Hasher, bytes: &[u8]) {
    hasher.update(&(bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}

impl<C: ExecutionContext> Store<C> {
    /// Captures every key and value below the Store root.
    ///
    /// A store whose root does not exist yet yields an empty snapshot.
    pub fn snapshot(&self) -> Result<StoreSnapshot, StoreError> {
        let root = match self.ctx.existing_root()? {
            Some(root) => self.capture(&root)?,
            None => SnapshotNode::default(),
        };
        Ok(StoreSnapshot {
            root_path: self.ctx.root_path().to_string(),
            root,
        })
    }

    fn capture(&self, key: &RegistryKey<C::Hive>) -> Result<SnapshotNode, StoreError> {
        let mut node = SnapshotNode {
            values: self.ctx.values(key)?.into_iter().collect(),
            children: BTreeMap::new(),
        };
        for name in self.ctx.subkeys(key)? {
            if let Some(child) = self.ctx.open_key(Some(key), &name)? {
                node.children.insert(name, self.capture(&child)?);
            }
        }
        Ok(node)
    }
}
