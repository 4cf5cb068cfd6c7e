use std::collections::HashSet;
use log::debug;
use serde_json::Value;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::transaction::Tx;
use crate::core::types::{
    doc_id, stringify, Collection, Document, PartitionSpec, SecondaryIndex, Stats, ID_FIELD,
};
use crate::memory::residency::UnitKey;
use crate::query::filter::Filter;
use crate::query::matcher::DocumentMatcher;
use crate::query::types::{FindQuery, Populate, Sort};
use crate::storage::aof::{AofRecord, SortSpec};
use crate::storage::layout::Mode;

/// How a rewrite reaches the append-only log: as its own record when
/// the arguments serialize, otherwise expanded into equivalent records.
enum RewritePlan {
    Record { index: String, sort: Option<SortSpec> },
    Expand,
}

impl Tx<'_> {
    /// Insert `data` as a new document and return it with its assigned
    /// `_id`.
    pub fn create(
        &mut self,
        collection: &str,
        index: &PartitionSpec,
        data: Value,
    ) -> Result<Document> {
        self.op_begin();
        let map = as_object(&data)?.clone();
        let partition = resolve_target(index, &map)?;
        let doc = self.create_doc(collection, &partition, map)?;
        self.record(AofRecord::Create {
            collection: collection.to_string(),
            index: partition,
            data,
        });
        Ok(doc)
    }

    /// Insert every item of `data`, deriving the partition per item when
    /// `index` is a function. Returns the created documents in order.
    pub fn create_many(
        &mut self,
        collection: &str,
        index: &PartitionSpec,
        data: Vec<Value>,
    ) -> Result<Vec<Document>> {
        self.op_begin();
        let mut items = Vec::with_capacity(data.len());
        for item in &data {
            items.push(as_object(item)?.clone());
        }
        let mut created = Vec::with_capacity(items.len());
        let mut partitions = Vec::with_capacity(items.len());
        for item in items {
            let partition = resolve_target(index, &item)?;
            created.push(self.create_doc(collection, &partition, item)?);
            self.unpin_shard(collection, &partition);
            partitions.push(partition);
        }
        match index {
            PartitionSpec::Name(name) => self.record(AofRecord::CreateMany {
                collection: collection.to_string(),
                index: name.clone(),
                data,
            }),
            _ => {
                for (value, partition) in data.into_iter().zip(partitions) {
                    self.record(AofRecord::Create {
                        collection: collection.to_string(),
                        index: partition,
                        data: value,
                    });
                }
            }
        }
        Ok(created)
    }

    /// Replace the document body under `_id`, optionally moving it to a
    /// different partition.
    pub fn update(
        &mut self,
        collection: &str,
        id: u64,
        data: Value,
        index: Option<&PartitionSpec>,
    ) -> Result<Document> {
        self.op_begin();
        let map = as_object(&data)?.clone();
        self.require_collection(collection)?;
        let (old_partition, position) = self.locate(collection, id)?;
        let meta_unit = self.collection_unit(collection);
        let old_shard = self.shard_unit(collection, &old_partition);

        let mut new_doc = map;
        new_doc.insert(ID_FIELD.to_string(), Value::from(id));
        let collection_state = self.resident_mut(collection)?;
        let old_doc = match collection_state.partitions.get_mut(&old_partition) {
            Some(docs) => std::mem::replace(&mut docs[position], new_doc.clone()),
            None => return Err(document_not_found(collection, id)),
        };
        index_replace(collection_state, &old_doc, &new_doc, id);
        self.mark_dirty(meta_unit);
        self.mark_dirty(old_shard);

        let mut resolved = None;
        if let Some(spec) = index {
            let target = spec.resolve(&new_doc);
            resolved = Some(target.clone());
            if target != old_partition {
                let collection_state = self.resident_mut(collection)?;
                if let Some(docs) = collection_state.partitions.get_mut(&old_partition) {
                    docs.remove(position);
                }
                self.ensure_partition(collection, &target, true)?;
                let new_shard = self.shard_unit(collection, &target);
                let collection_state = self.resident_mut(collection)?;
                if let Some(docs) = collection_state.partitions.get_mut(&target) {
                    docs.push(new_doc.clone());
                }
                collection_state.id_map.insert(id, target);
                self.mark_dirty(new_shard);
            }
        }

        self.record(AofRecord::Update {
            collection: collection.to_string(),
            id,
            data,
            index: resolved,
        });
        Ok(new_doc)
    }

    /// Remove the document under `_id` and return it. `inserted` is not
    /// rewound.
    pub fn destroy(&mut self, collection: &str, id: u64) -> Result<Document> {
        self.op_begin();
        self.require_collection(collection)?;
        let (partition, position) = self.locate(collection, id)?;
        let meta_unit = self.collection_unit(collection);
        let shard_unit = self.shard_unit(collection, &partition);

        let collection_state = self.resident_mut(collection)?;
        let doc = match collection_state.partitions.get_mut(&partition) {
            Some(docs) => docs.remove(position),
            None => return Err(document_not_found(collection, id)),
        };
        collection_state.stats.total = collection_state.stats.total.saturating_sub(1);
        collection_state.id_map.remove(&id);
        index_remove(collection_state, &doc, id);
        self.mark_dirty(meta_unit);
        self.mark_dirty(shard_unit);

        self.record(AofRecord::Destroy {
            collection: collection.to_string(),
            id,
        });
        Ok(doc)
    }

    /// First matching document, or `None` when nothing matches.
    pub fn find(&mut self, collection: &str, query: FindQuery) -> Result<Option<Document>> {
        let docs = self.run_query(collection, query, true)?;
        Ok(docs.into_iter().next())
    }

    /// All matching documents, sorted (ascending `_id` by default).
    pub fn find_many(&mut self, collection: &str, query: FindQuery) -> Result<Vec<Document>> {
        self.run_query(collection, query, false)
    }

    /// Remove the collection from memory and erase its disk presence.
    pub fn drop_collection(&mut self, collection: &str) -> Result<()> {
        self.op_begin();
        if !self.collection_exists(collection)? {
            return Err(Error::new(
                ErrorKind::CollectionNotFound,
                format!("collection {:?} does not exist", collection),
            ));
        }
        self.inner.collections.remove(collection);
        self.inner.lru.remove_collection(collection);
        self.inner.dirty.retain(|key| key.collection() != Some(collection));
        match self.mode() {
            Mode::SingleFile => self.mark_dirty(UnitKey::Database),
            Mode::Folder | Mode::Sharded => self.store.remove_collection_files(collection)?,
        }
        self.record(AofRecord::DropCollection {
            collection: collection.to_string(),
        });
        Ok(())
    }

    /// Remove one partition and every document in it.
    pub fn drop_index(&mut self, collection: &str, partition: &str) -> Result<()> {
        self.op_begin();
        self.require_collection(collection)?;
        if !self.ensure_partition(collection, partition, false)? {
            return Err(Error::new(
                ErrorKind::IndexNotFound,
                format!("index {:?} is not in collection {:?}", partition, collection),
            ));
        }
        let meta_unit = self.collection_unit(collection);
        let shard_unit = self.shard_unit(collection, partition);

        let collection_state = self.resident_mut(collection)?;
        let docs = collection_state.partitions.remove(partition).unwrap_or_default();
        collection_state.stats.total = collection_state
            .stats
            .total
            .saturating_sub(docs.len() as u64);
        let ids: HashSet<u64> = docs.iter().filter_map(doc_id).collect();
        collection_state.id_map.retain(|id, _| !ids.contains(id));
        index_purge(collection_state, &ids);
        self.mark_dirty(meta_unit);
        if self.mode() == Mode::Sharded {
            self.inner.dirty.remove(&shard_unit);
            self.inner.lru.remove(&shard_unit);
            self.pins.remove(&shard_unit);
            self.store.remove_shard_file(collection, partition)?;
        }

        self.record(AofRecord::DropIndex {
            collection: collection.to_string(),
            index: partition.to_string(),
        });
        Ok(())
    }

    /// Collect every live document in sorted order, then rebuild the
    /// collection from scratch, reassigning `_id`s from 1. Configured
    /// secondary-index fields survive the rewrite.
    pub fn rewrite_collection(
        &mut self,
        collection: &str,
        index: &PartitionSpec,
        sort: Sort,
    ) -> Result<()> {
        if let PartitionSpec::Move { .. } = index {
            return Err(move_index_error());
        }
        let plan = match (index, &sort) {
            (PartitionSpec::Name(name), Sort::ById) => RewritePlan::Record {
                index: name.clone(),
                sort: None,
            },
            (PartitionSpec::Name(name), Sort::ByField { field, order }) => RewritePlan::Record {
                index: name.clone(),
                sort: Some(SortSpec {
                    field: field.clone(),
                    order: *order,
                }),
            },
            _ => RewritePlan::Expand,
        };

        let docs = self.run_query(collection, FindQuery { sort, ..FindQuery::default() }, false)?;

        let fields: Vec<String> = self
            .resident(collection)?
            .secondary_indexes
            .keys()
            .cloned()
            .collect();
        let mut fresh = Collection::new();
        for field in &fields {
            fresh.secondary_indexes.insert(field.clone(), Default::default());
        }
        self.inner.collections.insert(collection.to_string(), fresh);
        self.inner
            .dirty
            .retain(|key| !matches!(key, UnitKey::Shard(name, _) if name == collection));
        self.inner.lru.remove_collection(collection);
        if self.mode() == Mode::Sharded {
            self.store.remove_collection_files(collection)?;
        }
        let meta_unit = self.collection_unit(collection);
        self.pins.insert(meta_unit.clone());
        self.touch_unit(meta_unit.clone())?;
        self.mark_dirty(meta_unit);

        let mut reinserts = Vec::with_capacity(docs.len());
        for mut doc in docs {
            doc.remove(ID_FIELD);
            let partition = index.resolve(&doc);
            self.create_doc(collection, &partition, doc.clone())?;
            self.unpin_shard(collection, &partition);
            reinserts.push((partition, Value::Object(doc)));
        }

        match plan {
            RewritePlan::Record { index, sort } => self.record(AofRecord::RewriteCollection {
                collection: collection.to_string(),
                index,
                sort,
            }),
            RewritePlan::Expand => {
                self.record(AofRecord::DropCollection {
                    collection: collection.to_string(),
                });
                for field in &fields {
                    self.record(AofRecord::EnsureIndex {
                        collection: collection.to_string(),
                        field: field.clone(),
                    });
                }
                for (partition, data) in reinserts {
                    self.record(AofRecord::Create {
                        collection: collection.to_string(),
                        index: partition,
                        data,
                    });
                }
            }
        }
        Ok(())
    }

    /// Create the secondary index on `field` if absent and fill it from
    /// every existing document. Later writes keep it current.
    pub fn ensure_index(&mut self, collection: &str, field: &str) -> Result<()> {
        self.op_begin();
        self.ensure_collection(collection, true)?;
        let meta_unit = self.collection_unit(collection);
        self.resident_mut(collection)?
            .secondary_indexes
            .entry(field.to_string())
            .or_default();
        for partition in self.all_partitions(collection)? {
            if !self.ensure_partition(collection, &partition, false)? {
                continue;
            }
            let collection_state = self.resident(collection)?;
            // Documents without the field stay out of the index.
            let entries: Vec<(u64, String)> = collection_state
                .partitions
                .get(&partition)
                .map(|docs| {
                    docs.iter()
                        .filter_map(|doc| Some((doc_id(doc)?, stringify(doc.get(field)?))))
                        .collect()
                })
                .unwrap_or_default();
            let collection_state = self.resident_mut(collection)?;
            if let Some(buckets) = collection_state.secondary_indexes.get_mut(field) {
                for (id, key) in entries {
                    let bucket = buckets.entry(key).or_default();
                    if !bucket.contains(&id) {
                        bucket.push(id);
                    }
                }
            }
            self.unpin_shard(collection, &partition);
        }
        self.mark_dirty(meta_unit);
        self.record(AofRecord::EnsureIndex {
            collection: collection.to_string(),
            field: field.to_string(),
        });
        Ok(())
    }

    /// Snapshot of a collection's counters.
    pub fn stats(&mut self, collection: &str) -> Result<Stats> {
        self.op_begin();
        self.require_collection(collection)?;
        Ok(self.resident(collection)?.stats)
    }

    /// Shared insert path. Assumes the partition name is already
    /// resolved; queues nothing for the log.
    fn create_doc(
        &mut self,
        collection: &str,
        partition: &str,
        data: Document,
    ) -> Result<Document> {
        self.ensure_collection(collection, true)?;
        self.ensure_partition(collection, partition, true)?;
        let meta_unit = self.collection_unit(collection);
        let shard_unit = self.shard_unit(collection, partition);

        let collection_state = self.resident_mut(collection)?;
        let id = collection_state.stats.inserted + 1;
        collection_state.stats.inserted = id;
        collection_state.stats.total += 1;
        let mut doc = data;
        doc.insert(ID_FIELD.to_string(), Value::from(id));
        index_insert(collection_state, &doc, id);
        collection_state.id_map.insert(id, partition.to_string());
        if let Some(docs) = collection_state.partitions.get_mut(partition) {
            docs.push(doc.clone());
        }
        self.mark_dirty(meta_unit);
        self.mark_dirty(shard_unit);
        Ok(doc)
    }

    fn run_query(
        &mut self,
        collection: &str,
        query: FindQuery,
        first_only: bool,
    ) -> Result<Vec<Document>> {
        self.op_begin();
        self.require_collection(collection)?;
        let FindQuery { index, filter, predicate, sort, populate } = query;
        let matcher = DocumentMatcher::new(filter.as_ref(), predicate)?;
        let mut results: Vec<Document> = Vec::new();

        if let Some(ids) = self.point_lookup(collection, filter.as_ref())? {
            // Each candidate id names its partition through the id map,
            // so only the shards that can match are loaded.
            for id in ids {
                let Some(partition) = self.resident(collection)?.id_map.get(&id).cloned() else {
                    continue;
                };
                if !self.ensure_partition(collection, &partition, false)? {
                    continue;
                }
                let doc = self
                    .resident(collection)?
                    .partitions
                    .get(&partition)
                    .and_then(|docs| docs.iter().find(|doc| doc_id(doc) == Some(id)));
                if let Some(doc) = doc {
                    if matcher.matches(doc) {
                        results.push(doc.clone());
                        if first_only {
                            break;
                        }
                    }
                }
                self.unpin_shard(collection, &partition);
            }
        } else if let Some(partition) = &index {
            if self.ensure_partition(collection, partition, false)? {
                let collection_state = self.resident(collection)?;
                if let Some(docs) = collection_state.partitions.get(partition) {
                    for doc in docs {
                        if matcher.matches(doc) {
                            results.push(doc.clone());
                            if first_only {
                                break;
                            }
                        }
                    }
                }
            }
        } else {
            'scan: for partition in self.all_partitions(collection)? {
                if !self.ensure_partition(collection, &partition, false)? {
                    continue;
                }
                let collection_state = self.resident(collection)?;
                if let Some(docs) = collection_state.partitions.get(&partition) {
                    for doc in docs {
                        if matcher.matches(doc) {
                            results.push(doc.clone());
                            if first_only {
                                break 'scan;
                            }
                        }
                    }
                }
                self.unpin_shard(collection, &partition);
            }
        }

        if !first_only {
            sort.apply(&mut results);
        }
        if !populate.is_empty() {
            self.apply_populate(&mut results, &populate)?;
        }
        Ok(results)
    }

    /// Candidate ids when some filter field has a secondary index and an
    /// equality target. The full matcher still runs on every candidate.
    fn point_lookup(&self, collection: &str, filter: Option<&Filter>) -> Result<Option<Vec<u64>>> {
        let Some(filter) = filter else {
            return Ok(None);
        };
        let collection_state = self.resident(collection)?;
        for field in filter.fields() {
            let Some(buckets) = collection_state.secondary_indexes.get(field) else {
                continue;
            };
            let Some(target) = filter.point_lookup_target(field) else {
                continue;
            };
            let ids = buckets.get(&stringify(target)).cloned().unwrap_or_default();
            return Ok(Some(ids));
        }
        Ok(None)
    }

    fn apply_populate(&mut self, docs: &mut [Document], rules: &[Populate]) -> Result<()> {
        for rule in rules {
            if !self.ensure_collection(&rule.collection, false)? {
                debug!("populate: collection {:?} does not exist", rule.collection);
                continue;
            }
            for position in 0..docs.len() {
                let Some(id) = docs[position].get(&rule.field).and_then(Value::as_u64) else {
                    continue;
                };
                let Some(partition) =
                    self.resident(&rule.collection)?.id_map.get(&id).cloned()
                else {
                    continue;
                };
                if !self.ensure_partition(&rule.collection, &partition, false)? {
                    continue;
                }
                let joined = self
                    .resident(&rule.collection)?
                    .partitions
                    .get(&partition)
                    .and_then(|docs| docs.iter().find(|doc| doc_id(doc) == Some(id)))
                    .cloned();
                if let Some(joined) = joined {
                    docs[position].insert(rule.field.clone(), Value::Object(joined));
                }
                self.unpin_shard(&rule.collection, &partition);
            }
        }
        Ok(())
    }

    /// Partition and position of a document, id map first, partition
    /// scan as the fallback.
    fn locate(&mut self, collection: &str, id: u64) -> Result<(String, usize)> {
        let mapped = self.resident(collection)?.id_map.get(&id).cloned();
        if let Some(partition) = mapped {
            if self.ensure_partition(collection, &partition, false)? {
                let position = self
                    .resident(collection)?
                    .partitions
                    .get(&partition)
                    .and_then(|docs| position_of(docs, id));
                if let Some(position) = position {
                    return Ok((partition, position));
                }
            }
        }
        for partition in self.all_partitions(collection)? {
            if !self.ensure_partition(collection, &partition, false)? {
                continue;
            }
            let position = self
                .resident(collection)?
                .partitions
                .get(&partition)
                .and_then(|docs| position_of(docs, id));
            match position {
                Some(position) => return Ok((partition, position)),
                None => self.unpin_shard(collection, &partition),
            }
        }
        Err(document_not_found(collection, id))
    }

    fn collection_exists(&self, collection: &str) -> Result<bool> {
        if self.inner.collections.contains_key(collection) {
            return Ok(true);
        }
        Ok(match self.mode() {
            Mode::SingleFile => false,
            Mode::Folder => self.store.layout.collection_path(collection).exists(),
            Mode::Sharded => self.store.layout.collection_dir(collection).is_dir(),
        })
    }
}

fn as_object(data: &Value) -> Result<&serde_json::Map<String, Value>> {
    match data {
        Value::Object(map) => Ok(map),
        _ => Err(Error::new(
            ErrorKind::Validation,
            "data must be an object".to_string(),
        )),
    }
}

fn resolve_target(index: &PartitionSpec, doc: &Document) -> Result<String> {
    match index {
        PartitionSpec::Move { .. } => Err(move_index_error()),
        other => Ok(other.resolve(doc)),
    }
}

fn move_index_error() -> Error {
    Error::new(
        ErrorKind::Validation,
        "a {current, new} index is only valid for update".to_string(),
    )
}

fn document_not_found(collection: &str, id: u64) -> Error {
    Error::new(
        ErrorKind::DocumentNotFound,
        format!("_id {} is not in collection {:?}", id, collection),
    )
}

fn position_of(docs: &[Document], id: u64) -> Option<usize> {
    docs.iter().position(|doc| doc_id(doc) == Some(id))
}

fn index_insert(collection: &mut Collection, doc: &Document, id: u64) {
    for (field, buckets) in collection.secondary_indexes.iter_mut() {
        if let Some(value) = doc.get(field) {
            let bucket = buckets.entry(stringify(value)).or_default();
            if !bucket.contains(&id) {
                bucket.push(id);
            }
        }
    }
}

fn index_remove(collection: &mut Collection, doc: &Document, id: u64) {
    for (field, buckets) in collection.secondary_indexes.iter_mut() {
        if let Some(value) = doc.get(field) {
            bucket_remove(buckets, &stringify(value), id);
        }
    }
}

fn bucket_remove(buckets: &mut SecondaryIndex, key: &str, id: u64) {
    if let Some(bucket) = buckets.get_mut(key) {
        bucket.retain(|entry| *entry != id);
    }
    if buckets.get(key).map_or(false, Vec::is_empty) {
        buckets.remove(key);
    }
}

fn index_replace(collection: &mut Collection, old: &Document, new: &Document, id: u64) {
    for (field, buckets) in collection.secondary_indexes.iter_mut() {
        let old_key = old.get(field).map(stringify);
        let new_key = new.get(field).map(stringify);
        if old_key == new_key {
            continue;
        }
        if let Some(key) = old_key {
            bucket_remove(buckets, &key, id);
        }
        if let Some(key) = new_key {
            let bucket = buckets.entry(key).or_default();
            if !bucket.contains(&id) {
                bucket.push(id);
            }
        }
    }
}

fn index_purge(collection: &mut Collection, ids: &HashSet<u64>) {
    for buckets in collection.secondary_indexes.values_mut() {
        buckets.retain(|_, bucket| {
            bucket.retain(|id| !ids.contains(id));
            !bucket.is_empty()
        });
    }
}
