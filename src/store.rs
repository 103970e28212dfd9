//! Persistent node store.
//!
//! The controller looks nodes up here before creating new ones, and saves a
//! node once its interview is complete.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::codec::MsgPackCodec;
use crate::error::Result;
use crate::node::NodeRecord;
use crate::protocol::NodeId;

/// Load/save of node metadata.
pub trait PersistentStore: Send {
    /// Record for a node, if one was saved.
    fn get_node(&self, node_id: NodeId) -> Result<Option<NodeRecord>>;

    /// Insert or replace the record for `record.node_id()`.
    fn save_node(&mut self, record: NodeRecord) -> Result<()>;

    /// Release underlying resources. Later calls may fail.
    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Store that lives only as long as the process.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    nodes: BTreeMap<NodeId, NodeRecord>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populated store.
    pub fn with_records(records: impl IntoIterator<Item = NodeRecord>) -> Self {
        Self {
            nodes: records.into_iter().map(|r| (r.node_id(), r)).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

impl PersistentStore for MemoryStore {
    fn get_node(&self, node_id: NodeId) -> Result<Option<NodeRecord>> {
        Ok(self.nodes.get(&node_id).cloned())
    }

    fn save_node(&mut self, record: NodeRecord) -> Result<()> {
        self.nodes.insert(record.node_id(), record);
        Ok(())
    }
}

/// Store backed by a single MessagePack file.
///
/// The whole table is rewritten on every save, through a sibling temporary
/// file renamed over the original.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    nodes: BTreeMap<NodeId, NodeRecord>,
    closed: bool,
}

impl FileStore {
    /// Open the store at `path`, loading existing records. A missing file
    /// is an empty store.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let nodes = match std::fs::read(&path) {
            Ok(bytes) => MsgPackCodec::decode(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        tracing::debug!(path = %path.display(), nodes = nodes.len(), "opened node store");
        Ok(Self {
            path,
            nodes,
            closed: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Node ids with a saved record, ascending.
    pub fn node_ids(&self) -> Vec<NodeId> {
        self.nodes.keys().copied().collect()
    }

    fn flush(&self) -> Result<()> {
        let bytes = MsgPackCodec::encode(&self.nodes)?;
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        std::fs::write(&tmp, &bytes)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl PersistentStore for FileStore {
    fn get_node(&self, node_id: NodeId) -> Result<Option<NodeRecord>> {
        Ok(self.nodes.get(&node_id).cloned())
    }

    fn save_node(&mut self, record: NodeRecord) -> Result<()> {
        if self.closed {
            return Err(std::io::Error::new(std::io::ErrorKind::Other, "node store is closed").into());
        }
        tracing::debug!(node = record.node_id(), "saving node");
        self.nodes.insert(record.node_id(), record);
        self.flush()
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ZWaveError;
    use crate::protocol::NodeInfo;

    fn record(node_id: NodeId, kind: &str) -> NodeRecord {
        NodeRecord {
            info: NodeInfo::new(node_id, 0x04, 0x10, 0x01),
            is_listening: node_id % 2 == 0,
            kind: kind.into(),
        }
    }

    #[test]
    fn test_memory_store_replaces() {
        let mut store = MemoryStore::with_records([record(3, "generic")]);
        assert_eq!(store.get_node(3).unwrap(), Some(record(3, "generic")));
        assert_eq!(store.get_node(4).unwrap(), None);

        store.save_node(record(3, "switch")).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.get_node(3).unwrap().unwrap().kind, "switch");
    }

    #[test]
    fn test_file_store_persists_across_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nodes.msgpack");

        let mut store = FileStore::open(&path).unwrap();
        assert!(store.node_ids().is_empty());
        store.save_node(record(2, "generic")).unwrap();
        store.save_node(record(5, "generic")).unwrap();
        store.close().unwrap();

        let reopened = FileStore::open(&path).unwrap();
        assert_eq!(reopened.node_ids(), vec![2, 5]);
        assert_eq!(reopened.get_node(5).unwrap(), Some(record(5, "generic")));
    }

    #[test]
    fn test_file_store_rejects_save_after_close() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FileStore::open(dir.path().join("nodes.msgpack")).unwrap();
        store.close().unwrap();
        assert!(matches!(store.save_node(record(2, "generic")), Err(ZWaveError::Io(_))));
    }

    #[test]
    fn test_file_store_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nodes.msgpack");
        std::fs::write(&path, [0xC1]).unwrap();
        assert!(matches!(FileStore::open(&path), Err(ZWaveError::MsgPackDecode(_))));
    }
}
