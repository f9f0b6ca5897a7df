//! Master/slave link registry
//!
//! A link makes one knob's (dimension, view) mirror another's. Edges live in
//! a central table keyed by the slave side; the listener set of a master is
//! a reverse-index query over the same table, so severing an edge is a
//! single map removal with nothing else to keep in sync.
//!
//! Link chains resolve recursively at read time and are never flattened;
//! keeping the edge graph acyclic is the owner's responsibility.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::knob::Knob;
use crate::types::ViewIdx;
use crate::value::KnobValue;

/// Stable identity of a knob, unique across all knobs in the process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KnobId(u64);

static NEXT_KNOB_ID: AtomicU64 = AtomicU64::new(1);

impl KnobId {
    pub(crate) fn next() -> Self {
        KnobId(NEXT_KNOB_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Slave side of a link edge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LinkKey {
    pub knob: KnobId,
    pub dimension: usize,
    pub view: ViewIdx,
}

/// Master side of a link edge. The master is held weakly so that tearing
/// down a link after the master was destroyed still succeeds.
pub struct MasterLink<T: KnobValue> {
    pub master: Weak<Knob<T>>,
    pub master_id: KnobId,
    pub dimension: usize,
    pub view: ViewIdx,
}

impl<T: KnobValue> Clone for MasterLink<T> {
    fn clone(&self) -> Self {
        Self {
            master: self.master.clone(),
            master_id: self.master_id,
            dimension: self.dimension,
            view: self.view,
        }
    }
}

impl<T: KnobValue> std::fmt::Debug for MasterLink<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterLink")
            .field("master_id", &self.master_id)
            .field("dimension", &self.dimension)
            .field("view", &self.view)
            .finish()
    }
}

/// Central edge table shared by every knob of one value kind in a graph
pub struct LinkTable<T: KnobValue> {
    edges: Mutex<HashMap<LinkKey, MasterLink<T>>>,
}

impl<T: KnobValue> LinkTable<T> {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            edges: Mutex::new(HashMap::new()),
        })
    }

    /// Install or replace the master edge for a slave (dimension, view)
    pub fn link(&self, slave: LinkKey, master: MasterLink<T>) {
        self.edges.lock().insert(slave, master);
    }

    /// The master edge of a slave (dimension, view), if any
    pub fn master_of(&self, slave: &LinkKey) -> Option<MasterLink<T>> {
        self.edges.lock().get(slave).cloned()
    }

    /// Atomically remove and return the master edge of a slave
    pub fn unlink(&self, slave: &LinkKey) -> Option<MasterLink<T>> {
        self.edges.lock().remove(slave)
    }

    /// Reverse-index query: every slave (knob, dimension, view) currently
    /// driven by the given master knob
    pub fn listeners_of(&self, master: KnobId) -> Vec<LinkKey> {
        let edges = self.edges.lock();
        let mut out: Vec<LinkKey> = edges
            .iter()
            .filter(|(_, link)| link.master_id == master)
            .map(|(key, _)| *key)
            .collect();
        out.sort();
        out
    }

    /// Tear down the edges where the given knob is the slave side. Called
    /// before a slave is destroyed. Edges pointing at a destroyed master are
    /// kept: their weak handle goes dead and `unslave` still severs them,
    /// re-enabling the dimension along the way.
    pub fn remove_edges_of(&self, slave: KnobId) {
        self.edges.lock().retain(|key, _| key.knob != slave);
    }

    /// Number of edges in the table
    pub fn len(&self) -> usize {
        self.edges.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.lock().is_empty()
    }
}
