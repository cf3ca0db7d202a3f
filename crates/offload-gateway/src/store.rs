//! Persistent backing for the node status table.

use std::path::{Path, PathBuf};

use offload_common::protocol::error::{OffloadError, Result};

use crate::node::ComputeNode;

/// Storage for the node table. The pool calls `save` inside its critical
/// section after every status change, so implementations need no locking.
pub trait NodeStore: Send {
    fn load(&mut self) -> Result<Vec<ComputeNode>>;
    fn save(&mut self, nodes: &[ComputeNode]) -> Result<()>;
}

/// In-memory store, for static inventories and tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    nodes: Vec<ComputeNode>,
}

impl MemoryStore {
    pub fn new(nodes: Vec<ComputeNode>) -> Self {
        Self { nodes }
    }
}

impl NodeStore for MemoryStore {
    fn load(&mut self) -> Result<Vec<ComputeNode>> {
        Ok(self.nodes.clone())
    }

    fn save(&mut self, nodes: &[ComputeNode]) -> Result<()> {
        self.nodes = nodes.to_vec();
        Ok(())
    }
}

/// Node table kept as a JSON array on disk.
///
/// Writes go to a sibling temporary file which is then renamed over the
/// original, so a crash never leaves a half-written table.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl NodeStore for JsonFileStore {
    fn load(&mut self) -> Result<Vec<ComputeNode>> {
        let data = std::fs::read(&self.path).map_err(|e| {
            OffloadError::Store(format!("Failed to read {}: {}", self.path.display(), e))
        })?;
        serde_json::from_slice(&data).map_err(|e| {
            OffloadError::Store(format!("Invalid node table {}: {}", self.path.display(), e))
        })
    }

    fn save(&mut self, nodes: &[ComputeNode]) -> Result<()> {
        let data = serde_json::to_vec_pretty(nodes)?;
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, data)
            .and_then(|_| std::fs::rename(&tmp, &self.path))
            .map_err(|e| {
                OffloadError::Store(format!("Failed to write {}: {}", self.path.display(), e))
            })
    }
}
