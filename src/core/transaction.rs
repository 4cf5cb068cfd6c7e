use std::collections::HashSet;
use log::{debug, warn};
use crate::core::database::{not_loaded, Database, Inner};
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::{Collection, PartitionSpec};
use crate::memory::residency::UnitKey;
use crate::query::types::Sort;
use crate::storage::aof::AofRecord;
use crate::storage::codec;
use crate::storage::layout::Mode;

/// Handle over the locked store. The operations of the public vocabulary
/// live on this type (see `core::operations`); every one of them routes
/// residency through the load-if-absent helpers below.
pub struct Tx<'a> {
    pub(crate) store: &'a Database,
    pub(crate) inner: &'a mut Inner,
    // Units the running operation needs resident. Eviction passes over
    // them, briefly letting residency exceed the configured bound.
    pub(crate) pins: HashSet<UnitKey>,
    replaying: bool,
}

impl Database {
    /// Run `callback` against the store under the serializing lock.
    /// Success commits (AOF append or dirty-unit save); an error rolls
    /// back and is rethrown. Queued transactions run in FIFO order.
    pub fn transaction<T, F>(&self, callback: F) -> Result<T>
    where
        F: FnOnce(&mut Tx) -> Result<T>,
    {
        let mut guard = self.state.lock();
        if !guard.loaded {
            return Err(not_loaded());
        }
        let result = {
            let mut tx = Tx::new(self, &mut guard);
            callback(&mut tx)
        };
        match result {
            Ok(value) => match self.commit(&mut guard) {
                Ok(()) => Ok(value),
                Err(err) => {
                    // Best-effort rollback, then surface the commit error.
                    if let Err(rollback_err) = self.rollback(&mut guard) {
                        warn!("rollback after failed commit also failed: {}", rollback_err);
                    }
                    Err(err)
                }
            },
            Err(err) => {
                if let Err(rollback_err) = self.rollback(&mut guard) {
                    warn!("rollback after failed transaction also failed: {}", rollback_err);
                }
                Err(err)
            }
        }
    }

    fn commit(&self, inner: &mut Inner) -> Result<()> {
        if self.config.aof {
            self.aof.append(&inner.pending)?;
        } else {
            match self.layout.mode() {
                Mode::SingleFile => {
                    if !inner.dirty.is_empty() {
                        self.save_database(&inner.collections)?;
                    }
                }
                Mode::Folder | Mode::Sharded => {
                    for key in inner.dirty.iter() {
                        self.save_unit(&inner.collections, key)?;
                    }
                }
            }
        }
        debug!(
            "commit: {} dirty unit(s), {} pending op(s)",
            inner.dirty.len(),
            inner.pending.len()
        );
        inner.pending.clear();
        inner.dirty.clear();
        Ok(())
    }

    fn rollback(&self, inner: &mut Inner) -> Result<()> {
        match self.layout.mode() {
            // Reload from disk to discard in-memory mutations.
            Mode::SingleFile => self.load_single_file(inner)?,
            // Drop the dirty units; they reload lazily from their
            // last-committed disk state on next access.
            Mode::Folder | Mode::Sharded => {
                let dirty: Vec<UnitKey> = inner.dirty.drain().collect();
                for key in dirty {
                    discard_unit(inner, &key);
                }
            }
        }
        inner.pending.clear();
        inner.dirty.clear();
        Ok(())
    }
}

fn discard_unit(inner: &mut Inner, key: &UnitKey) {
    match key {
        UnitKey::Database => {}
        UnitKey::Collection(name) | UnitKey::Meta(name) => {
            inner.collections.remove(name);
            inner.lru.remove_collection(name);
        }
        UnitKey::Shard(name, partition) => {
            if let Some(collection) = inner.collections.get_mut(name) {
                collection.partitions.remove(partition);
            }
            inner.lru.remove(key);
        }
    }
}

impl<'a> Tx<'a> {
    pub(crate) fn new(store: &'a Database, inner: &'a mut Inner) -> Self {
        Tx {
            store,
            inner,
            pins: HashSet::new(),
            replaying: false,
        }
    }

    pub(crate) fn for_replay(store: &'a Database, inner: &'a mut Inner) -> Self {
        Tx {
            store,
            inner,
            pins: HashSet::new(),
            replaying: true,
        }
    }

    pub(crate) fn mode(&self) -> Mode {
        self.store.layout.mode()
    }

    /// Queue an op record for the append-only log. Replay never re-queues.
    pub(crate) fn record(&mut self, record: AofRecord) {
        if self.store.config.aof && !self.replaying {
            self.inner.pending.push(record);
        }
    }

    pub(crate) fn op_begin(&mut self) {
        self.pins.clear();
    }

    /// The unit that carries a collection's bookkeeping in this mode.
    pub(crate) fn collection_unit(&self, name: &str) -> UnitKey {
        match self.mode() {
            Mode::SingleFile => UnitKey::Database,
            Mode::Folder => UnitKey::Collection(name.to_string()),
            Mode::Sharded => UnitKey::Meta(name.to_string()),
        }
    }

    pub(crate) fn shard_unit(&self, name: &str, partition: &str) -> UnitKey {
        match self.mode() {
            Mode::SingleFile => UnitKey::Database,
            Mode::Folder => UnitKey::Collection(name.to_string()),
            Mode::Sharded => UnitKey::Shard(name.to_string(), partition.to_string()),
        }
    }

    pub(crate) fn mark_dirty(&mut self, key: UnitKey) {
        self.inner.dirty.insert(key);
    }

    /// Mark `key` most recently used and persist-and-drop whatever the
    /// bound pushes out. Dirty victims are saved before they go.
    pub(crate) fn touch_unit(&mut self, key: UnitKey) -> Result<()> {
        if self.mode() == Mode::SingleFile {
            return Ok(());
        }
        self.inner.lru.touch(key);
        while let Some(victim) = self.inner.lru.evictable(&self.pins) {
            self.evict_unit(&victim)?;
        }
        Ok(())
    }

    fn evict_unit(&mut self, victim: &UnitKey) -> Result<()> {
        self.inner.lru.remove(victim);
        if self.inner.dirty.remove(victim) {
            self.store.save_unit(&self.inner.collections, victim)?;
        }
        debug!("evicting resident unit {:?}", victim);
        match victim {
            UnitKey::Database => {}
            UnitKey::Collection(name) => {
                self.inner.collections.remove(name);
            }
            UnitKey::Meta(name) => {
                // The meta record anchors the collection entry: resident
                // shards leave with it, dirty ones saved first.
                let shards: Vec<UnitKey> = match self.inner.collections.get(name) {
                    Some(collection) => collection
                        .partitions
                        .keys()
                        .map(|partition| UnitKey::Shard(name.clone(), partition.clone()))
                        .collect(),
                    None => Vec::new(),
                };
                for shard in shards {
                    self.inner.lru.remove(&shard);
                    if self.inner.dirty.remove(&shard) {
                        self.store.save_unit(&self.inner.collections, &shard)?;
                    }
                }
                self.inner.collections.remove(name);
            }
            UnitKey::Shard(name, partition) => {
                if let Some(collection) = self.inner.collections.get_mut(name) {
                    collection.partitions.remove(partition);
                }
            }
        }
        Ok(())
    }

    /// Load-if-absent for a collection's bookkeeping unit. Returns
    /// whether the collection exists afterwards; `create` materializes a
    /// fresh one.
    pub(crate) fn ensure_collection(&mut self, name: &str, create: bool) -> Result<bool> {
        let unit = self.collection_unit(name);
        if self.inner.collections.contains_key(name) {
            self.pins.insert(unit.clone());
            self.touch_unit(unit)?;
            return Ok(true);
        }
        let loaded = match self.mode() {
            // Single-file databases are fully resident after open.
            Mode::SingleFile => None,
            Mode::Folder => self
                .store
                .codec
                .read_value(&self.store.layout.collection_path(name))?
                .map(codec::collection_from_disk)
                .transpose()?,
            Mode::Sharded => {
                match self
                    .store
                    .codec
                    .read_value(&self.store.layout.meta_path(name))?
                    .map(codec::meta_from_disk)
                    .transpose()?
                {
                    Some(collection) => Some(collection),
                    // Shards without a meta file still name a collection.
                    None if self.store.layout.collection_dir(name).is_dir() => {
                        Some(Collection::new())
                    }
                    None => None,
                }
            }
        };
        match loaded {
            Some(collection) => {
                self.inner.collections.insert(name.to_string(), collection);
            }
            None if create => {
                self.inner.collections.insert(name.to_string(), Collection::new());
            }
            None => return Ok(false),
        }
        self.pins.insert(unit.clone());
        self.touch_unit(unit)?;
        Ok(true)
    }

    pub(crate) fn require_collection(&mut self, name: &str) -> Result<()> {
        if self.ensure_collection(name, false)? {
            Ok(())
        } else {
            Err(Error::new(
                ErrorKind::CollectionNotFound,
                format!("collection {:?} does not exist", name),
            ))
        }
    }

    /// Load-if-absent for one partition of a resident collection.
    pub(crate) fn ensure_partition(
        &mut self,
        name: &str,
        partition: &str,
        create: bool,
    ) -> Result<bool> {
        let resident = self
            .inner
            .collections
            .get(name)
            .map(|collection| collection.partitions.contains_key(partition))
            .unwrap_or(false);
        if !resident {
            let loaded = match self.mode() {
                Mode::Sharded => self
                    .store
                    .codec
                    .read_value(&self.store.layout.shard_path(name, partition))?
                    .map(codec::partition_from_disk)
                    .transpose()?,
                Mode::SingleFile | Mode::Folder => None,
            };
            let docs = match loaded {
                Some(docs) => docs,
                None if create => Vec::new(),
                None => return Ok(false),
            };
            match self.inner.collections.get_mut(name) {
                Some(collection) => {
                    collection.partitions.insert(partition.to_string(), docs);
                }
                None => return Err(not_loaded()),
            }
        }
        if self.mode() == Mode::Sharded {
            let unit = self.shard_unit(name, partition);
            self.pins.insert(unit.clone());
            self.touch_unit(unit)?;
        }
        Ok(true)
    }

    pub(crate) fn unpin_shard(&mut self, name: &str, partition: &str) {
        let unit = self.shard_unit(name, partition);
        if matches!(unit, UnitKey::Shard(..)) {
            self.pins.remove(&unit);
        }
    }

    pub(crate) fn resident(&self, name: &str) -> Result<&Collection> {
        self.inner.collections.get(name).ok_or_else(not_resident)
    }

    pub(crate) fn resident_mut(&mut self, name: &str) -> Result<&mut Collection> {
        self.inner.collections.get_mut(name).ok_or_else(not_resident)
    }

    /// Every partition the collection has, resident or on disk, in
    /// deterministic order.
    pub(crate) fn all_partitions(&mut self, name: &str) -> Result<Vec<String>> {
        let mut names: Vec<String> = match self.inner.collections.get(name) {
            Some(collection) => collection.partitions.keys().cloned().collect(),
            None => Vec::new(),
        };
        if self.mode() == Mode::Sharded {
            for shard in self.store.layout.list_shards(name)? {
                if !names.contains(&shard) {
                    names.push(shard);
                }
            }
        }
        names.sort();
        Ok(names)
    }

    /// Replay one append-only log record against the resident store.
    pub(crate) fn apply_record(&mut self, record: &AofRecord) -> Result<()> {
        match record {
            AofRecord::Create { collection, index, data } => {
                self.create(collection, &PartitionSpec::name(index), data.clone())?;
            }
            AofRecord::Update { collection, id, data, index } => {
                let spec = index.as_deref().map(PartitionSpec::name);
                self.update(collection, *id, data.clone(), spec.as_ref())?;
            }
            AofRecord::Destroy { collection, id } => {
                self.destroy(collection, *id)?;
            }
            AofRecord::CreateMany { collection, index, data } => {
                self.create_many(collection, &PartitionSpec::name(index), data.clone())?;
            }
            AofRecord::DropCollection { collection } => {
                self.drop_collection(collection)?;
            }
            AofRecord::DropIndex { collection, index } => {
                self.drop_index(collection, index)?;
            }
            AofRecord::RewriteCollection { collection, index, sort } => {
                let sort = match sort {
                    Some(spec) => Sort::ByField {
                        field: spec.field.clone(),
                        order: spec.order,
                    },
                    None => Sort::ById,
                };
                self.rewrite_collection(collection, &PartitionSpec::name(index), sort)?;
            }
            AofRecord::EnsureIndex { collection, field } => {
                self.ensure_index(collection, field)?;
            }
        }
        Ok(())
    }
}

fn not_resident() -> Error {
    Error::new(
        ErrorKind::DatabaseNotLoaded,
        "collection is not resident".to_string(),
    )
}
