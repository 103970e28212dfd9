//! Node factory keyed by device class.
//!
//! Lookup order: exact (basic, generic, specific) tuple, then generic
//! device class alone, then the fallback kind.

use std::collections::HashMap;
use std::sync::Arc;

use super::generic::GenericKind;
use super::{NodeCreationError, NodeFactory, NodeRecord, ZWaveNode};
use crate::protocol::{NodeInfo, MAX_NODE_ID};

/// A family of node objects the factory can build.
pub trait NodeKind: Send + Sync {
    /// Stable name stored in [`NodeRecord::kind`].
    fn name(&self) -> &'static str;

    fn create(&self, info: &NodeInfo, is_listening: bool) -> Result<Box<dyn ZWaveNode>, NodeCreationError>;

    fn restore(&self, record: &NodeRecord) -> Result<Box<dyn ZWaveNode>, NodeCreationError>;
}

/// [`NodeFactory`] selecting a [`NodeKind`] by device class.
pub struct DeviceClassFactory {
    specific: HashMap<(u8, u8, u8), Arc<dyn NodeKind>>,
    generic: HashMap<u8, Arc<dyn NodeKind>>,
    fallback: Option<Arc<dyn NodeKind>>,
}

impl DeviceClassFactory {
    /// Factory that builds [`GenericNode`](super::GenericNode)s for every class.
    pub fn new() -> Self {
        Self {
            specific: HashMap::new(),
            generic: HashMap::new(),
            fallback: Some(Arc::new(GenericKind)),
        }
    }

    /// Factory that refuses device classes it has no kind for.
    pub fn without_fallback() -> Self {
        Self {
            fallback: None,
            ..Self::new()
        }
    }

    /// Register a kind for an exact (basic, generic, specific) tuple.
    pub fn with_device_class(mut self, class: (u8, u8, u8), kind: impl NodeKind + 'static) -> Self {
        self.specific.insert(class, Arc::new(kind));
        self
    }

    /// Register a kind for every device of a generic class.
    pub fn with_generic_class(mut self, generic: u8, kind: impl NodeKind + 'static) -> Self {
        self.generic.insert(generic, Arc::new(kind));
        self
    }

    fn kind_for(&self, info: &NodeInfo) -> Result<&Arc<dyn NodeKind>, NodeCreationError> {
        if info.node_id == 0 || info.node_id > MAX_NODE_ID {
            return Err(NodeCreationError::InvalidNodeId(info.node_id));
        }
        let (basic, generic, specific) = info.device_class();
        self.specific
            .get(&(basic, generic, specific))
            .or_else(|| self.generic.get(&generic))
            .or(self.fallback.as_ref())
            .ok_or(NodeCreationError::UnsupportedDeviceClass {
                basic,
                generic,
                specific,
            })
    }
}

impl Default for DeviceClassFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeFactory for DeviceClassFactory {
    fn create_node(&self, info: &NodeInfo, is_listening: bool) -> Result<Box<dyn ZWaveNode>, NodeCreationError> {
        let kind = self.kind_for(info)?;
        tracing::debug!(node = info.node_id, kind = kind.name(), "creating node");
        kind.create(info, is_listening)
    }

    fn restore_node(&self, record: &NodeRecord) -> Result<Box<dyn ZWaveNode>, NodeCreationError> {
        let kind = self.kind_for(&record.info)?;
        if kind.name() != record.kind {
            return Err(NodeCreationError::KindMismatch {
                node_id: record.node_id(),
                kind: record.kind.clone(),
            });
        }
        kind.restore(record)
    }
}
