//! Structural checksums for field trees
//!
//! Two candidates of the same identity key whose trees hash equal are the
//! same schema and collapse before the linker scores them.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::model::FieldNode;

/// SHA256 checksum of a field tree
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Checksum(String);

impl Checksum {
    /// Compute checksum from raw bytes
    pub fn from_bytes(data: &[u8]) -> Self {
        let hash = Sha256::digest(data);
        Self(format!("{:x}", hash))
    }

    /// Checksum of a tree's shape: names, occurs and child order.
    /// Ordinals and levels are derived data and do not participate.
    pub fn of_tree(root: &FieldNode) -> Self {
        let mut hasher = Sha256::new();
        Self::feed(&mut hasher, root);
        Self(format!("{:x}", hasher.finalize()))
    }

    fn feed(hasher: &mut Sha256, node: &FieldNode) {
        hasher.update(node.name.as_bytes());
        hasher.update([0u8]);
        hasher.update(node.namespace.as_deref().unwrap_or("").as_bytes());
        hasher.update([0u8]);
        hasher.update(node.min_occurs.to_le_bytes());
        hasher.update(format!("{:?}", node.max_occurs).as_bytes());
        hasher.update(node.type_tag.as_deref().unwrap_or("").as_bytes());
        hasher.update([node.nillable as u8, node.is_attribute as u8]);
        hasher.update((node.children.len() as u64).to_le_bytes());
        for child in &node.children {
            Self::feed(hasher, child);
        }
    }

    /// Get the hex string representation
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
