use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use serde::{Serialize, Deserialize};
use serde_json::{Map, Value};

pub const ID_FIELD: &str = "_id";
pub const DEFAULT_COLLECTION: &str = "default";
pub const DEFAULT_PARTITION: &str = "default";

/// A user record plus the engine-assigned `_id`.
pub type Document = Map<String, Value>;

/// Read the engine-assigned id out of a document.
pub fn doc_id(doc: &Document) -> Option<u64> {
    doc.get(ID_FIELD).and_then(Value::as_u64)
}

/// Key form of a value inside a secondary index bucket.
pub fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Per-collection counters. `inserted` doubles as the id generator and
/// is never rewound by destroy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    pub inserted: u64,
    pub total: u64,
}

/// Inverted point-lookup index: stringified field value -> ids of live
/// documents holding that value.
pub type SecondaryIndex = HashMap<String, Vec<u64>>;

/// Named container of partitions plus the bookkeeping that makes point
/// lookups O(1). The reserved-key on-disk form lives in the codec only.
#[derive(Debug, Clone, Default)]
pub struct Collection {
    pub stats: Stats,
    pub id_map: HashMap<u64, String>,
    pub secondary_indexes: HashMap<String, SecondaryIndex>,
    pub partitions: HashMap<String, Vec<Document>>,
}

impl Collection {
    pub fn new() -> Self {
        Collection::default()
    }

    /// Partition names in deterministic order, for full scans.
    pub fn partition_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.partitions.keys().cloned().collect();
        names.sort();
        names
    }
}

/// Derives a partition name from the document being written.
pub type PartitionFn = Arc<dyn Fn(&Document) -> String + Send + Sync>;

/// How an operation picks the partition ("index") a document lands in.
#[derive(Clone)]
pub enum PartitionSpec {
    Name(String),
    Derived(PartitionFn),
    Move {
        current: String,
        new: Box<PartitionSpec>,
    },
}

impl PartitionSpec {
    pub fn name(name: &str) -> Self {
        PartitionSpec::Name(name.to_string())
    }

    pub fn derived<F>(f: F) -> Self
    where
        F: Fn(&Document) -> String + Send + Sync + 'static,
    {
        PartitionSpec::Derived(Arc::new(f))
    }

    /// Resolve against a document. `Move` resolves through its `new` arm.
    pub fn resolve(&self, doc: &Document) -> String {
        match self {
            PartitionSpec::Name(name) => name.clone(),
            PartitionSpec::Derived(f) => f(doc),
            PartitionSpec::Move { new, .. } => new.resolve(doc),
        }
    }
}

impl Default for PartitionSpec {
    fn default() -> Self {
        PartitionSpec::Name(DEFAULT_PARTITION.to_string())
    }
}

impl From<&str> for PartitionSpec {
    fn from(name: &str) -> Self {
        PartitionSpec::Name(name.to_string())
    }
}

impl fmt::Debug for PartitionSpec {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PartitionSpec::Name(name) => write!(f, "Name({:?})", name),
            PartitionSpec::Derived(_) => write!(f, "Derived(..)"),
            PartitionSpec::Move { current, new } => {
                write!(f, "Move {{ current: {:?}, new: {:?} }}", current, new)
            }
        }
    }
}
