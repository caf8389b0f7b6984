//! Replicated document store
//!
//! Owns every replicated document on this node together with its vector
//! clock. Local updates bump only this node's clock entry and are visible
//! immediately; remote state arrives through [`DocumentStore::merge`],
//! which validates before mutating so malformed input can never corrupt
//! local state.

use crate::clock::VectorClock;
use crate::crdt::{FieldConflict, FieldWrite, GCounter, LwwRegister, OrSet, StructuredDocument};
use crate::events::{EventBus, MeshEvent};
use crate::types::{now_ms, DocId, NodeId, OperationId, Payload, TagId};
use crate::{Error, Result};
use minicbor::{Decode, Encode};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Replication strategy of a document
#[derive(Clone, Copy, PartialEq, Eq, Hash, Encode, Decode, Serialize, Deserialize, Debug)]
#[cbor(index_only)]
pub enum DocumentKind {
    #[n(0)]
    GCounter,
    #[n(1)]
    OrSet,
    #[n(2)]
    LwwRegister,
    #[n(3)]
    Structured,
}

impl std::fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DocumentKind::GCounter => write!(f, "g-counter"),
            DocumentKind::OrSet => write!(f, "or-set"),
            DocumentKind::LwwRegister => write!(f, "lww-register"),
            DocumentKind::Structured => write!(f, "structured"),
        }
    }
}

/// Tagged union of document state, one variant per kind
#[derive(Clone, PartialEq, Eq, Encode, Decode, Serialize, Deserialize, Debug)]
pub enum DocumentState {
    #[n(0)]
    Counter(#[n(0)] GCounter),
    #[n(1)]
    Set(#[n(0)] OrSet),
    #[n(2)]
    Register(#[n(0)] LwwRegister),
    #[n(3)]
    Structured(#[n(0)] StructuredDocument),
}

impl DocumentState {
    pub fn kind(&self) -> DocumentKind {
        match self {
            DocumentState::Counter(_) => DocumentKind::GCounter,
            DocumentState::Set(_) => DocumentKind::OrSet,
            DocumentState::Register(_) => DocumentKind::LwwRegister,
            DocumentState::Structured(_) => DocumentKind::Structured,
        }
    }

    /// Internal consistency check, run on remote state before any merge
    pub fn validate(&self) -> Result<()> {
        match self {
            DocumentState::Set(set) => set.validate(),
            _ => Ok(()),
        }
    }
}

/// A document replica held by this node
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ReplicatedDocument {
    pub kind: DocumentKind,
    pub state: DocumentState,
    pub clock: VectorClock,
}

/// Result of merging remote state into a local document
#[derive(Clone, Default, Debug)]
pub struct MergeOutcome {
    /// Unresolved concurrent writes surfaced to the caller (structured
    /// documents only; other kinds merge without conflicts)
    pub conflicts: Vec<FieldConflict>,
}

/// Serialized document state for transport and persistence.
///
/// Round-trips losslessly through [`StateSnapshot::to_bytes`] /
/// [`StateSnapshot::from_bytes`].
#[derive(Clone, PartialEq, Eq, Encode, Decode, Serialize, Deserialize, Debug)]
pub struct StateSnapshot {
    /// Node that exported the snapshot
    #[n(0)]
    pub node_id: NodeId,
    #[n(1)]
    pub doc_id: DocId,
    #[n(2)]
    pub vector_clock: VectorClock,
    #[n(3)]
    pub data: DocumentState,
    #[n(4)]
    pub timestamp_ms: u64,
}

impl StateSnapshot {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        minicbor::to_vec(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        minicbor::decode(bytes).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Content digest over document identity, clock, and state. Exporter
    /// identity and export time are excluded so identical replicas exported
    /// by different peers hash identically.
    pub fn digest(&self) -> [u8; 32] {
        #[derive(Encode)]
        struct DigestData<'a> {
            #[n(0)]
            doc_id: &'a DocId,
            #[n(1)]
            vector_clock: &'a VectorClock,
            #[n(2)]
            data: &'a DocumentState,
        }

        let bytes = minicbor::to_vec(&DigestData {
            doc_id: &self.doc_id,
            vector_clock: &self.vector_clock,
            data: &self.data,
        })
        .expect("CBOR encoding should not fail");
        *blake3::hash(&bytes).as_bytes()
    }
}

/// Aggregate counters over all documents in the store
#[derive(Clone, Debug)]
pub struct CrdtStats {
    pub document_count: usize,
    /// Sum of all vector-clock entries, i.e. total local updates observed
    pub total_operations: u64,
    pub node_id: NodeId,
}

/// The CRDT manager: all replicated documents owned by one node
pub struct DocumentStore {
    node_id: NodeId,
    documents: HashMap<DocId, ReplicatedDocument>,
    events: EventBus,
}

impl DocumentStore {
    pub fn new(node_id: NodeId, events: EventBus) -> Self {
        Self {
            node_id,
            documents: HashMap::new(),
            events,
        }
    }

    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    /// Create a document with an initial state. The clock starts at
    /// `{self: 1}`.
    pub fn create_document(&mut self, doc_id: DocId, state: DocumentState) -> Result<()> {
        if self.documents.contains_key(&doc_id) {
            return Err(Error::AlreadyExists(doc_id));
        }
        let kind = state.kind();
        self.documents.insert(
            doc_id.clone(),
            ReplicatedDocument {
                kind,
                state,
                clock: VectorClock::seeded(self.node_id.clone(), 1),
            },
        );
        tracing::debug!(%doc_id, %kind, "document created");
        self.events.emit(MeshEvent::DocumentCreated {
            doc_id,
            node_id: self.node_id.clone(),
        });
        Ok(())
    }

    pub fn contains_document(&self, doc_id: &DocId) -> bool {
        self.documents.contains_key(doc_id)
    }

    pub fn document_ids(&self) -> Vec<DocId> {
        self.documents.keys().cloned().collect()
    }

    pub fn document(&self, doc_id: &DocId) -> Result<&ReplicatedDocument> {
        self.documents
            .get(doc_id)
            .ok_or_else(|| Error::NotFound(doc_id.clone()))
    }

    pub fn clock(&self, doc_id: &DocId) -> Result<&VectorClock> {
        Ok(&self.document(doc_id)?.clock)
    }

    /// Increment a grow-only counter and return the new total
    pub fn increment_counter(&mut self, doc_id: &DocId, amount: u64) -> Result<u64> {
        let node_id = self.node_id.clone();
        let doc = self.document_for_update(doc_id)?;
        let total = match &mut doc.state {
            DocumentState::Counter(counter) => counter.increment(&node_id, amount),
            other => return Err(kind_mismatch(doc_id, DocumentKind::GCounter, other.kind())),
        };
        doc.clock.increment(&node_id);
        self.emit_updated(doc_id);
        Ok(total)
    }

    /// Add a value to an observed-remove set, returning its fresh tag
    pub fn add_to_set(&mut self, doc_id: &DocId, value: Payload) -> Result<TagId> {
        let node_id = self.node_id.clone();
        let doc = self.document_for_update(doc_id)?;
        let tag = match &mut doc.state {
            DocumentState::Set(set) => set.add(value, node_id.clone(), now_ms()),
            other => return Err(kind_mismatch(doc_id, DocumentKind::OrSet, other.kind())),
        };
        doc.clock.increment(&node_id);
        self.emit_updated(doc_id);
        Ok(tag)
    }

    /// Tombstone all observed tags of a value, returning how many were
    /// removed
    pub fn remove_from_set(&mut self, doc_id: &DocId, value: &Payload) -> Result<usize> {
        let node_id = self.node_id.clone();
        let doc = self.document_for_update(doc_id)?;
        let removed = match &mut doc.state {
            DocumentState::Set(set) => set.remove(value),
            other => return Err(kind_mismatch(doc_id, DocumentKind::OrSet, other.kind())),
        };
        doc.clock.increment(&node_id);
        self.emit_updated(doc_id);
        Ok(removed)
    }

    /// Write a last-write-wins register. Returns whether the write landed
    /// (a stale timestamp loses to the stored value).
    pub fn set_register(&mut self, doc_id: &DocId, value: Payload) -> Result<bool> {
        let node_id = self.node_id.clone();
        let doc = self.document_for_update(doc_id)?;
        let applied = match &mut doc.state {
            DocumentState::Register(register) => register.set(value, node_id.clone(), now_ms()),
            other => return Err(kind_mismatch(doc_id, DocumentKind::LwwRegister, other.kind())),
        };
        doc.clock.increment(&node_id);
        self.emit_updated(doc_id);
        Ok(applied)
    }

    /// Write a field of a structured document
    pub fn put_field(&mut self, doc_id: &DocId, field: &str, value: Payload) -> Result<OperationId> {
        let node_id = self.node_id.clone();
        let doc = self.document_for_update(doc_id)?;
        match &mut doc.state {
            DocumentState::Structured(_) => {}
            other => return Err(kind_mismatch(doc_id, DocumentKind::Structured, other.kind())),
        }
        doc.clock.increment(&node_id);
        let write = FieldWrite {
            op_id: OperationId::new(),
            node: node_id,
            clock: doc.clock.clone(),
            timestamp_ms: now_ms(),
            field: field.to_string(),
            value,
        };
        let op_id = write.op_id;
        if let DocumentState::Structured(document) = &mut doc.state {
            document.record(write);
        }
        self.emit_updated(doc_id);
        Ok(op_id)
    }

    /// Merge remote state into a local document.
    ///
    /// Commutative, associative, and idempotent. The remote state is
    /// validated before any local mutation; a kind mismatch or
    /// internally-inconsistent remote leaves the local document untouched.
    pub fn merge(
        &mut self,
        doc_id: &DocId,
        remote_state: &DocumentState,
        remote_clock: &VectorClock,
    ) -> Result<MergeOutcome> {
        let doc = self
            .documents
            .get_mut(doc_id)
            .ok_or_else(|| Error::NotFound(doc_id.clone()))?;
        if remote_state.kind() != doc.kind {
            return Err(kind_mismatch(doc_id, doc.kind, remote_state.kind()));
        }
        remote_state.validate()?;

        match (&mut doc.state, remote_state) {
            (DocumentState::Counter(local), DocumentState::Counter(remote)) => local.merge(remote),
            (DocumentState::Set(local), DocumentState::Set(remote)) => local.merge(remote),
            (DocumentState::Register(local), DocumentState::Register(remote)) => {
                local.merge(remote)
            }
            (DocumentState::Structured(local), DocumentState::Structured(remote)) => {
                local.merge(remote)
            }
            _ => {
                return Err(kind_mismatch(doc_id, doc.kind, remote_state.kind()));
            }
        }
        doc.clock.merge(remote_clock);

        let conflicts = match &doc.state {
            DocumentState::Structured(document) => document.conflicts(),
            _ => Vec::new(),
        };
        self.events.emit(MeshEvent::DocumentsMerged {
            doc_id: doc_id.clone(),
            conflicts: conflicts.len(),
        });
        Ok(MergeOutcome { conflicts })
    }

    /// Export a document for transport or persistence
    pub fn export_state(&self, doc_id: &DocId) -> Result<StateSnapshot> {
        let doc = self.document(doc_id)?;
        Ok(StateSnapshot {
            node_id: self.node_id.clone(),
            doc_id: doc_id.clone(),
            vector_clock: doc.clock.clone(),
            data: doc.state.clone(),
            timestamp_ms: now_ms(),
        })
    }

    /// Adopt a snapshot wholesale, replacing any existing replica of the
    /// document. Used for initial adoption and peer-assisted
    /// reconstruction; ordinary replication goes through [`Self::merge`].
    pub fn import_state(&mut self, snapshot: StateSnapshot) -> Result<()> {
        snapshot.data.validate()?;
        let doc_id = snapshot.doc_id.clone();
        let source = snapshot.node_id.clone();
        self.documents.insert(
            doc_id.clone(),
            ReplicatedDocument {
                kind: snapshot.data.kind(),
                state: snapshot.data,
                clock: snapshot.vector_clock,
            },
        );
        tracing::debug!(%doc_id, %source, "state imported");
        self.events
            .emit(MeshEvent::StateImported { doc_id, source });
        Ok(())
    }

    // Read accessors

    pub fn counter_value(&self, doc_id: &DocId) -> Result<u64> {
        match &self.document(doc_id)?.state {
            DocumentState::Counter(counter) => Ok(counter.value()),
            other => Err(kind_mismatch(doc_id, DocumentKind::GCounter, other.kind())),
        }
    }

    pub fn set_values(&self, doc_id: &DocId) -> Result<Vec<Payload>> {
        match &self.document(doc_id)?.state {
            DocumentState::Set(set) => Ok(set.values()),
            other => Err(kind_mismatch(doc_id, DocumentKind::OrSet, other.kind())),
        }
    }

    pub fn set_contains(&self, doc_id: &DocId, value: &Payload) -> Result<bool> {
        match &self.document(doc_id)?.state {
            DocumentState::Set(set) => Ok(set.contains(value)),
            other => Err(kind_mismatch(doc_id, DocumentKind::OrSet, other.kind())),
        }
    }

    pub fn register_value(&self, doc_id: &DocId) -> Result<Payload> {
        match &self.document(doc_id)?.state {
            DocumentState::Register(register) => Ok(register.value().clone()),
            other => Err(kind_mismatch(doc_id, DocumentKind::LwwRegister, other.kind())),
        }
    }

    pub fn document_fields(&self, doc_id: &DocId) -> Result<BTreeMap<String, Payload>> {
        match &self.document(doc_id)?.state {
            DocumentState::Structured(document) => Ok(document.fields()),
            other => Err(kind_mismatch(doc_id, DocumentKind::Structured, other.kind())),
        }
    }

    pub fn document_conflicts(&self, doc_id: &DocId) -> Result<Vec<FieldConflict>> {
        match &self.document(doc_id)?.state {
            DocumentState::Structured(document) => Ok(document.conflicts()),
            other => Err(kind_mismatch(doc_id, DocumentKind::Structured, other.kind())),
        }
    }

    pub fn stats(&self) -> CrdtStats {
        let total_operations = self
            .documents
            .values()
            .map(|doc| doc.clock.weight())
            .fold(0u64, u64::saturating_add);
        CrdtStats {
            document_count: self.documents.len(),
            total_operations,
            node_id: self.node_id.clone(),
        }
    }

    fn document_for_update(&mut self, doc_id: &DocId) -> Result<&mut ReplicatedDocument> {
        self.documents
            .get_mut(doc_id)
            .ok_or_else(|| Error::NotFound(doc_id.clone()))
    }

    fn emit_updated(&self, doc_id: &DocId) {
        self.events.emit(MeshEvent::DocumentUpdated {
            doc_id: doc_id.clone(),
            node_id: self.node_id.clone(),
        });
    }
}

fn kind_mismatch(doc_id: &DocId, expected: DocumentKind, actual: DocumentKind) -> Error {
    Error::InvalidState(format!(
        "document {doc_id} is a {expected}, got {actual} state"
    ))
}
